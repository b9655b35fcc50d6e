//! Session endpoints

use super::user::AuthenticatedUser;
use crate::error::{Error, Result};
use crate::sessions::{CompletionOutcome, StartOutcome};
use crate::video::ConversationStatus;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use haven_common::db::{Session, SessionCompletionTrigger, SessionKind};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub kind: SessionKind,
}

#[derive(Debug, Deserialize)]
pub struct JoinSessionRequest {
    pub invite_code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteSessionRequest {
    #[serde(default)]
    pub trigger: Option<SessionCompletionTrigger>,
}

/// POST /api/sessions
///
/// 201 with the active session, or 403 `upgrade_required` when a gate
/// refuses.
pub async fn start_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<StartSessionRequest>,
) -> Result<Response> {
    match state.sessions.start_session(user.id(), request.kind).await? {
        outcome @ StartOutcome::Started { .. } => {
            Ok((StatusCode::CREATED, Json(outcome)).into_response())
        }
        StartOutcome::Denied { reason, .. } => Err(Error::GateDenied(reason)),
    }
}

/// GET /api/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Session>>> {
    Ok(Json(state.sessions.list_sessions(user.id()).await?))
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Session>> {
    Ok(Json(state.sessions.get_session(user.id(), session_id).await?))
}

/// POST /api/sessions/join
pub async fn join_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<JoinSessionRequest>,
) -> Result<Json<Session>> {
    Ok(Json(
        state
            .sessions
            .join_session(user.id(), &request.invite_code)
            .await?,
    ))
}

/// POST /api/sessions/:id/complete
///
/// A `page_unload` trigger is queued and answered with 202.
pub async fn complete_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
    body: Option<Json<CompleteSessionRequest>>,
) -> Result<Response> {
    let trigger = body
        .and_then(|Json(request)| request.trigger)
        .unwrap_or(SessionCompletionTrigger::UserEnded);

    if trigger == SessionCompletionTrigger::PageUnload {
        return Ok(queue_completion(&state, &user, session_id));
    }

    let outcome: CompletionOutcome = state
        .sessions
        .complete_session(user.id(), session_id, trigger)
        .await?;
    Ok(Json(outcome).into_response())
}

/// POST /api/sessions/:id/beacon
///
/// Sent from an unloading page; never waits for the completion.
pub async fn session_beacon(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> Response {
    queue_completion(&state, &user, session_id)
}

fn queue_completion(state: &AppState, user: &AuthenticatedUser, session_id: Uuid) -> Response {
    let queued = state.sessions.complete_in_background(
        user.id(),
        session_id,
        SessionCompletionTrigger::PageUnload,
    );
    (StatusCode::ACCEPTED, Json(json!({ "queued": queued }))).into_response()
}

/// GET /api/sessions/:id/conversation
pub async fn conversation_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ConversationStatus>> {
    Ok(Json(
        state
            .sessions
            .conversation_status(user.id(), session_id)
            .await?,
    ))
}
