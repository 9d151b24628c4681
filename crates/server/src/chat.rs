//! Chat session endpoints.
//!
//! `POST /sessions/{session_id}/messages` runs one turn and returns the
//! structured [`TurnResponse`]. `GET /sessions/{session_id}/history` returns
//! the recorded transcript.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use askerp_agent::runtime::{AgentRuntime, TurnReply, TurnResponse};
use askerp_agent::sessions::SessionStore;
use askerp_core::domain::conversation::ConversationTurn;
use askerp_core::errors::InterfaceError;

const MAX_SESSION_ID_LEN: usize = 64;
const MAX_QUESTION_LEN: usize = 2_000;

#[derive(Clone)]
pub struct ChatState {
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionStore>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/sessions/{session_id}/messages", post(post_message))
        .route("/sessions/{session_id}/history", get(get_history))
        .with_state(state)
}

pub async fn post_message(
    Path(session_id): Path<String>,
    State(state): State<ChatState>,
    Json(body): Json<MessageRequest>,
) -> Result<(StatusCode, Json<TurnResponse>), (StatusCode, Json<ApiError>)> {
    validate_session_id(&session_id)?;
    let question = body.question.trim();
    if question.is_empty() || question.chars().count() > MAX_QUESTION_LEN {
        return Err(bad_request(format!(
            "question must contain between 1 and {MAX_QUESTION_LEN} characters"
        )));
    }

    let response = state.runtime.handle_session_message(&state.sessions, &session_id, question).await;
    info!(
        event_name = "http.chat.turn",
        correlation_id = %response.correlation_id,
        session_id = %session_id,
        "chat turn answered"
    );

    Ok((turn_status(&response.reply), Json(response)))
}

pub async fn get_history(
    Path(session_id): Path<String>,
    State(state): State<ChatState>,
) -> ApiResult<HistoryResponse> {
    validate_session_id(&session_id)?;

    match state.sessions.transcript(&session_id).await {
        Some(turns) => Ok(Json(HistoryResponse { session_id, turns })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: "not_found",
                message: format!("session `{session_id}` has no history"),
                correlation_id: uuid::Uuid::new_v4().to_string(),
            }),
        )),
    }
}

/// Failed turns are still recorded in history; the status tells clients the
/// answer is an apology rather than data.
fn turn_status(reply: &TurnReply) -> StatusCode {
    match reply {
        TurnReply::Failed { error_class: "internal", .. } => StatusCode::INTERNAL_SERVER_ERROR,
        TurnReply::Failed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

fn validate_session_id(session_id: &str) -> Result<(), (StatusCode, Json<ApiError>)> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(bad_request(format!(
            "session id must be 1-{MAX_SESSION_ID_LEN} characters of letters, digits, `-` or `_`"
        )))
    }
}

fn bad_request(message: String) -> (StatusCode, Json<ApiError>) {
    let error = InterfaceError::BadRequest {
        message: message.clone(),
        correlation_id: uuid::Uuid::new_v4().to_string(),
    };
    warn!(
        event_name = "http.chat.bad_request",
        correlation_id = %error.correlation_id(),
        reason = %message,
        "rejected chat request"
    );
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: "bad_request",
            message,
            correlation_id: error.correlation_id().to_string(),
        }),
    )
}
