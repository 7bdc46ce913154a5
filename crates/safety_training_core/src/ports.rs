//! crates/safety_training_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the training flow.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! session controller and the scoring logic to be independent of specific
//! transports and storage backends.

use async_trait::async_trait;

use crate::domain::{
    AnswerRecord, AnswerSet, Attempt, Question, QuestionRecord, ScoreReport, TrainingVideo,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    /// The operation is not allowed in the attempt's current state
    /// (e.g., fetching questions before the video is completed).
    #[error("Invalid state for this operation: {0}")]
    InvalidState(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The remote transition operations the session controller depends on.
/// Each call gates a phase transition; failures keep the phase unchanged.
#[async_trait]
pub trait TrainingService: Send + Sync {
    /// Marks the attempt's video as honestly watched to the end.
    /// Success is the only way into the quiz phase.
    async fn complete_video(&self, attempt_id: i64) -> PortResult<()>;

    /// Fetches the attempt's ordered question selection, without answer keys.
    async fn fetch_questions(&self, attempt_id: i64) -> PortResult<Vec<Question>>;

    /// Submits a complete answer set and returns the graded outcome.
    async fn submit_answers(&self, attempt_id: i64, answers: &AnswerSet) -> PortResult<ScoreReport>;
}

/// Best-effort reporting side channel. Callers log failures and move on;
/// nothing in the session flow ever blocks on these.
#[async_trait]
pub trait TelemetryReporter: Send + Sync {
    /// Reports that playback started for the attempt.
    async fn video_started(&self, attempt_id: i64) -> PortResult<()>;

    /// Reports a blocked forward skip, with the client-side running count.
    async fn skip_attempt(&self, attempt_id: i64, count: u32) -> PortResult<()>;
}

/// Persistence port for attempts, videos, questions, and graded answers.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    // --- Videos and question bank ---
    async fn get_video(&self, video_id: i64) -> PortResult<TrainingVideo>;

    async fn active_questions(&self, video_id: i64) -> PortResult<Vec<QuestionRecord>>;

    // --- Attempt lifecycle ---
    async fn get_attempt(&self, attempt_id: i64) -> PortResult<Attempt>;

    async fn create_attempt(
        &self,
        video_id: i64,
        subject: &str,
        attempt_number: u32,
        access_token: &str,
    ) -> PortResult<Attempt>;

    /// The newest attempt for this subject and video that has not been
    /// passed, if any. Used to resume a failed attempt instead of stacking
    /// new ones.
    async fn latest_unpassed_attempt(
        &self,
        video_id: i64,
        subject: &str,
    ) -> PortResult<Option<Attempt>>;

    /// How many attempts this subject already has for the video, passed or
    /// not. Drives the attempt numbering.
    async fn attempt_count(&self, video_id: i64, subject: &str) -> PortResult<u32>;

    // --- Video tracking ---
    async fn mark_video_started(&self, attempt_id: i64) -> PortResult<()>;

    /// Increments the stored skip counter and returns the new total.
    async fn increment_skip_attempts(&self, attempt_id: i64) -> PortResult<u32>;

    async fn mark_video_completed(&self, attempt_id: i64) -> PortResult<()>;

    // --- Test tracking ---
    async fn store_question_selection(
        &self,
        attempt_id: i64,
        question_ids: &[i64],
    ) -> PortResult<()>;

    /// The attempt's selection in the order it was stored.
    async fn selected_questions(&self, attempt_id: i64) -> PortResult<Vec<QuestionRecord>>;

    /// Stamps the test start, clearing any answers from a prior try.
    async fn mark_test_started(&self, attempt_id: i64) -> PortResult<()>;

    /// Persists the graded answers and the final score, moving the attempt
    /// to its terminal state.
    async fn record_test_result(
        &self,
        attempt_id: i64,
        answers: &[AnswerRecord],
        score: f64,
        correct_answers: u32,
        total_questions: u32,
        passed: bool,
    ) -> PortResult<()>;
}
