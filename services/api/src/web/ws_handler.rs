//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It bridges the wire protocol to the core session controller: client
//! messages become session events, session effects become server messages.

use crate::web::{
    protocol::{ClientMessage, PhasePayload, QuestionPayload, ResultPayload, ServerMessage},
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream, StreamExt},
    SinkExt,
};
use safety_training_core::session::{
    PlaybackErrorKind, SessionConfig, SessionEffect, SessionEvent, TrainingSession,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("New WebSocket connection established.");

    // The sender is wrapped in an Arc<Mutex<>> so the delayed-effect tasks
    // can share it with the main loop.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Initialization Phase ---
    let Some(mut session) = initialize_session(&mut receiver, &ws_sender, &app_state).await else {
        return;
    };

    // Guards every delayed effect: cancelled the moment the connection ends,
    // so no timer fires into a torn-down session.
    let shutdown = CancellationToken::new();

    // --- 2. Main Message Loop ---
    loop {
        if let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_message(text.to_string(), &mut session, &ws_sender, &shutdown)
                        .await;
                }
                Message::Close(_) => {
                    info!("Client sent close message.");
                    break;
                }
                _ => {}
            }
        } else {
            info!("Client disconnected.");
            break;
        }
    }

    // --- 3. Cleanup ---
    shutdown.cancel();
    info!(attempt_id = session.attempt_id(), "WebSocket connection closed.");
}

/// Waits for the `Init` message, checks the access token, and builds the
/// session controller from the attempt's stored configuration.
async fn initialize_session(
    receiver: &mut SplitStream<WebSocket>,
    ws_sender: &WsSender,
    app_state: &Arc<AppState>,
) -> Option<TrainingSession> {
    let Some(Ok(Message::Text(init_json))) = receiver.next().await else {
        error!("Client disconnected before sending Init message.");
        return None;
    };

    let (attempt_id, token) = match serde_json::from_str::<ClientMessage>(&init_json) {
        Ok(ClientMessage::Init { attempt_id, token }) => (attempt_id, token),
        _ => {
            error!("First message was not a valid Init message.");
            return None;
        }
    };
    info!(attempt_id, "Initializing session");

    let attempt = match app_state.store.get_attempt(attempt_id).await {
        Ok(attempt) => attempt,
        Err(e) => {
            error!(attempt_id, error = %e, "Failed to load attempt");
            send_message(
                ws_sender,
                &ServerMessage::Error {
                    message: "Failed to load attempt data.".to_string(),
                },
            )
            .await;
            return None;
        }
    };

    if attempt.access_token != token {
        error!(attempt_id, "Access token mismatch");
        send_message(
            ws_sender,
            &ServerMessage::Error {
                message: "Unauthorized: invalid access token.".to_string(),
            },
        )
        .await;
        return None;
    }

    let video = match app_state.store.get_video(attempt.video_id).await {
        Ok(video) => video,
        Err(e) => {
            error!(attempt_id, error = %e, "Failed to load video");
            send_message(
                ws_sender,
                &ServerMessage::Error {
                    message: "Failed to load training video.".to_string(),
                },
            )
            .await;
            return None;
        }
    };

    let config = SessionConfig {
        attempt_id,
        video_url: video.video_url.clone(),
        video_duration: video.duration_seconds,
    };
    let session = match TrainingSession::new(
        config,
        app_state.service.clone(),
        app_state.telemetry.clone(),
    ) {
        Ok(session) => session,
        Err(e) => {
            // Configuration errors are fatal: no state machine is entered.
            error!(attempt_id, error = %e, "Session configuration invalid");
            send_message(
                ws_sender,
                &ServerMessage::Error {
                    message: format!("Error: {}", e),
                },
            )
            .await;
            return None;
        }
    };

    send_message(
        ws_sender,
        &ServerMessage::SessionInitialized {
            attempt_id,
            video_url: video.video_url,
            video_duration: video.duration_seconds,
        },
    )
    .await;
    Some(session)
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: String,
    session: &mut TrainingSession,
    ws_sender: &WsSender,
    shutdown: &CancellationToken,
) {
    match serde_json::from_str::<ClientMessage>(&text) {
        Ok(client_msg) => {
            let Some(event) = session_event(client_msg) else {
                return;
            };
            let effects = session.handle(event).await;
            for effect in effects {
                apply_effect(effect, ws_sender, shutdown).await;
            }
        }
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
        }
    }
}

/// Maps a wire message onto a session event. Returns `None` for messages
/// with no event (a duplicate `Init`, an unknown error code, an unparsable
/// answer letter), which are logged and dropped.
fn session_event(msg: ClientMessage) -> Option<SessionEvent> {
    match msg {
        ClientMessage::Init { .. } => {
            warn!("Received subsequent Init message, which is ignored.");
            None
        }
        ClientMessage::StartTraining => Some(SessionEvent::StartTraining),
        ClientMessage::VideoStarted => Some(SessionEvent::PlaybackStarted),
        ClientMessage::VideoProgress { position } => {
            Some(SessionEvent::PositionChanged { position })
        }
        ClientMessage::VideoSeeking { target } => Some(SessionEvent::SeekStarted { target }),
        ClientMessage::VideoSeeked { position } => Some(SessionEvent::SeekFinished { position }),
        ClientMessage::VideoEnded => Some(SessionEvent::PlaybackEnded),
        ClientMessage::VideoError { code } => match playback_error_kind(code) {
            Some(kind) => Some(SessionEvent::PlaybackFailed { kind }),
            None => {
                warn!(code, "Unknown media error code");
                None
            }
        },
        ClientMessage::RetryQuestions => Some(SessionEvent::ReloadQuestions),
        ClientMessage::SelectAnswer {
            question_id,
            answer,
        } => match safety_training_core::domain::AnswerChoice::from_letter(&answer) {
            Some(choice) => Some(SessionEvent::AnswerSelected {
                question_id,
                choice,
            }),
            None => {
                warn!(question_id, answer, "Unparsable answer letter");
                None
            }
        },
        ClientMessage::SubmitQuiz => Some(SessionEvent::SubmitAnswers),
        ClientMessage::RetryTraining => Some(SessionEvent::Retry),
        ClientMessage::CloseTraining => Some(SessionEvent::Close),
    }
}

/// The media-error codes of the player element.
fn playback_error_kind(code: i32) -> Option<PlaybackErrorKind> {
    match code {
        1 => Some(PlaybackErrorKind::Aborted),
        2 => Some(PlaybackErrorKind::Network),
        3 => Some(PlaybackErrorKind::Decode),
        4 => Some(PlaybackErrorKind::Unsupported),
        _ => None,
    }
}

/// Executes one session effect: immediate effects become a single server
/// message, delayed effects are scheduled on a task tied to the shutdown
/// token.
async fn apply_effect(effect: SessionEffect, ws_sender: &WsSender, shutdown: &CancellationToken) {
    match effect {
        SessionEffect::EnterPhase(phase) => {
            if let Some(phase) = PhasePayload::from_phase(phase) {
                send_message(ws_sender, &ServerMessage::PhaseChanged { phase }).await;
            }
        }
        SessionEffect::InitializeVideo { delay_ms } => {
            send_delayed(ws_sender, shutdown, delay_ms, ServerMessage::InitVideo);
        }
        SessionEffect::PauseVideo => {
            send_message(ws_sender, &ServerMessage::PauseVideo).await;
        }
        SessionEffect::ResetPlayback => {
            send_message(ws_sender, &ServerMessage::ResetPlayback).await;
        }
        SessionEffect::ResumePlayback { delay_ms } => {
            send_delayed(ws_sender, shutdown, delay_ms, ServerMessage::PlayVideo);
        }
        SessionEffect::ShowSkipWarning {
            count,
            dismiss_after_ms,
        } => {
            send_message(
                ws_sender,
                &ServerMessage::SkipWarning {
                    count,
                    dismiss_after_ms,
                },
            )
            .await;
        }
        SessionEffect::UpdateSelection {
            question_id,
            choice,
        } => {
            send_message(
                ws_sender,
                &ServerMessage::SelectionUpdated {
                    question_id,
                    answer: choice.as_letter().to_string(),
                },
            )
            .await;
        }
        SessionEffect::RenderQuestions(questions) => {
            send_message(
                ws_sender,
                &ServerMessage::Questions {
                    questions: questions.into_iter().map(QuestionPayload::from).collect(),
                },
            )
            .await;
        }
        SessionEffect::RenderResult(report) => {
            send_message(
                ws_sender,
                &ServerMessage::Result {
                    result: ResultPayload::from(&report),
                },
            )
            .await;
        }
        SessionEffect::ShowAlert { message } => {
            send_message(ws_sender, &ServerMessage::Alert { message }).await;
        }
        SessionEffect::ReloadSession => {
            send_message(ws_sender, &ServerMessage::ReloadRequired).await;
        }
        SessionEffect::EndSession => {
            send_message(ws_sender, &ServerMessage::SessionEnded).await;
        }
    }
}

/// Sends a message after a delay, unless the session is torn down first.
fn send_delayed(
    ws_sender: &WsSender,
    shutdown: &CancellationToken,
    delay_ms: u64,
    msg: ServerMessage,
) {
    let ws_sender = ws_sender.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                send_message(&ws_sender, &msg).await;
            }
        }
    });
}

async fn send_message(ws_sender: &WsSender, msg: &ServerMessage) {
    let json = serde_json::to_string(msg).unwrap();
    if ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_err()
    {
        error!("Failed to send message to client.");
    }
}
