//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification. These endpoints are the hosting
//! system's surface: it provisions an attempt here, hands the id and access
//! token to the learner's page, and polls the status afterwards.

use crate::config::Config;
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use safety_training_core::domain::Attempt;
use safety_training_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        start_attempt_handler,
        get_attempt_handler,
    ),
    components(
        schemas(StartAttemptRequest, AttemptResponse)
    ),
    tags(
        (name = "Safety Training API", description = "API endpoints for the video-gated safety training flow.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The request payload for provisioning an attempt.
#[derive(Deserialize, ToSchema)]
pub struct StartAttemptRequest {
    pub video_id: i64,
    /// The hosting system's reference for whoever takes the training.
    pub subject: String,
}

/// An attempt as reported to the hosting system.
#[derive(Serialize, ToSchema)]
pub struct AttemptResponse {
    pub attempt_id: i64,
    pub video_id: i64,
    pub subject: String,
    pub attempt_number: u32,
    pub state: String,
    pub access_token: String,
    /// Where the learner's page should open its session socket.
    pub ws_url: String,
    pub video_skip_attempts: u32,
    pub score: f64,
    pub passed: bool,
}

impl AttemptResponse {
    fn from_attempt(attempt: Attempt, config: &Config) -> Self {
        Self {
            attempt_id: attempt.id,
            video_id: attempt.video_id,
            subject: attempt.subject,
            attempt_number: attempt.attempt_number,
            state: attempt.state.as_str().to_string(),
            access_token: attempt.access_token,
            ws_url: format!("{}/ws", config.public_base_url),
            video_skip_attempts: attempt.video_skip_attempts,
            score: attempt.score,
            passed: attempt.passed,
        }
    }
}

#[derive(Deserialize)]
pub struct TokenQuery {
    token: String,
}

fn port_error_response(e: PortError) -> (StatusCode, String) {
    match e {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
        PortError::InvalidState(msg) => (StatusCode::CONFLICT, msg),
        PortError::Unexpected(msg) => {
            error!("Port error: {}", msg);
            (StatusCode::INTERNAL_SERVER_ERROR, msg)
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Provision a training attempt for a subject.
///
/// Re-uses the subject's newest unpassed attempt for the video if one
/// exists, so a failed run is retried instead of stacking fresh attempts.
#[utoipa::path(
    post,
    path = "/attempts",
    request_body = StartAttemptRequest,
    responses(
        (status = 201, description = "Attempt created or re-used", body = AttemptResponse),
        (status = 400, description = "Bad request (e.g., inactive video)"),
        (status = 404, description = "Video not found"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn start_attempt_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let video = app_state
        .store
        .get_video(req.video_id)
        .await
        .map_err(port_error_response)?;
    if !video.active {
        return Err((
            StatusCode::BAD_REQUEST,
            "Training video is not active".to_string(),
        ));
    }

    if let Some(existing) = app_state
        .store
        .latest_unpassed_attempt(video.id, &req.subject)
        .await
        .map_err(port_error_response)?
    {
        info!(attempt_id = existing.id, subject = %req.subject, "Re-using unpassed attempt");
        let response = AttemptResponse::from_attempt(existing, &app_state.config);
        return Ok((StatusCode::CREATED, Json(response)));
    }

    let attempt_number = app_state
        .store
        .attempt_count(video.id, &req.subject)
        .await
        .map_err(port_error_response)?
        + 1;
    let access_token = Uuid::new_v4().simple().to_string();
    let attempt = app_state
        .store
        .create_attempt(video.id, &req.subject, attempt_number, &access_token)
        .await
        .map_err(port_error_response)?;
    info!(attempt_id = attempt.id, subject = %req.subject, attempt_number, "Attempt created");

    let response = AttemptResponse::from_attempt(attempt, &app_state.config);
    Ok((StatusCode::CREATED, Json(response)))
}

/// Fetch an attempt's status.
///
/// Requires the attempt's access token; this is the same public-access
/// token handed out at provisioning time.
#[utoipa::path(
    get,
    path = "/attempts/{attempt_id}",
    responses(
        (status = 200, description = "Attempt status", body = AttemptResponse),
        (status = 401, description = "Invalid access token"),
        (status = 404, description = "Attempt not found")
    ),
    params(
        ("attempt_id" = i64, Path, description = "The attempt identifier."),
        ("token" = String, Query, description = "The attempt's access token.")
    )
)]
pub async fn get_attempt_handler(
    State(app_state): State<Arc<AppState>>,
    Path(attempt_id): Path<i64>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let attempt = app_state
        .store
        .get_attempt(attempt_id)
        .await
        .map_err(port_error_response)?;

    if attempt.access_token != query.token {
        return Err((
            StatusCode::UNAUTHORIZED,
            "Invalid access token".to_string(),
        ));
    }

    let response = AttemptResponse::from_attempt(attempt, &app_state.config);
    Ok((StatusCode::OK, Json(response)))
}
