//! Insight endpoints

use super::user::AuthenticatedUser;
use crate::error::Result;
use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use haven_common::db::Insight;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateInsightRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub body: String,
}

/// POST /api/insights
pub async fn create_insight(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateInsightRequest>,
) -> Result<(StatusCode, Json<Insight>)> {
    let insight = state
        .insights
        .create(user.id(), request.session_id, &request.body)
        .await?;
    Ok((StatusCode::CREATED, Json(insight)))
}

/// GET /api/insights
pub async fn list_insights(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Insight>>> {
    Ok(Json(state.insights.list(user.id()).await?))
}
