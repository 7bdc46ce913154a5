//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use safety_training_core::ports::{AttemptStore, TelemetryReporter, TrainingService};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers. The per-connection session state lives in the core's
/// `TrainingSession`, owned by the WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AttemptStore>,
    pub service: Arc<dyn TrainingService>,
    pub telemetry: Arc<dyn TelemetryReporter>,
    pub config: Arc<Config>,
}
