//! Billing endpoints

use super::user::AuthenticatedUser;
use crate::billing::{CardDetails, Offerings, PurchaseOutcome};
use crate::error::Result;
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use haven_common::db::Subscription;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    /// Plan key, e.g. `reflect_plus`
    pub plan: String,
    #[serde(default)]
    pub annual: bool,
    #[serde(default)]
    pub card: Option<CardDetails>,
}

/// GET /api/billing/offerings
pub async fn get_offerings(State(state): State<AppState>) -> Result<Json<Offerings>> {
    Ok(Json(state.billing.offerings().await?))
}

/// POST /api/billing/purchase
///
/// 200 on success, 402 with a structured reason when the provider refuses.
pub async fn purchase(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<PurchaseRequest>,
) -> Result<Response> {
    let outcome = state
        .billing
        .purchase(user.id(), &request.plan, request.annual, request.card.as_ref())
        .await?;

    let status = match outcome {
        PurchaseOutcome::Completed { .. } => StatusCode::OK,
        PurchaseOutcome::Failed { .. } => StatusCode::PAYMENT_REQUIRED,
    };
    Ok((status, Json(outcome)).into_response())
}

/// POST /api/billing/cancel
pub async fn cancel(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Subscription>> {
    Ok(Json(state.billing.cancel(user.id()).await?))
}

/// POST /api/billing/restore
pub async fn restore(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Subscription>> {
    Ok(Json(state.billing.restore(user.id()).await?))
}
