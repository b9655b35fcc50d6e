//! Plan catalog, subscription and allowance endpoints

use super::user::AuthenticatedUser;
use crate::analytics::UsageSummary;
use crate::entitlements::RemainingAllowances;
use crate::error::Result;
use crate::AppState;
use axum::{extract::State, Json};
use haven_common::db::Subscription;
use haven_common::plans::{self, Plan};

/// GET /api/plans
pub async fn list_plans() -> Json<&'static [Plan]> {
    Json(plans::all_plans())
}

/// GET /api/subscription
///
/// Creates the Free subscription on first access.
pub async fn get_subscription(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Subscription>> {
    Ok(Json(state.resolver.require_subscription(user.id()).await?))
}

/// GET /api/allowances
pub async fn get_allowances(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<RemainingAllowances>> {
    Ok(Json(state.resolver.get_remaining_allowances(user.id()).await?))
}

/// GET /api/analytics
pub async fn get_usage_summary(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<UsageSummary>> {
    Ok(Json(state.analytics.usage_summary(user.id()).await?))
}
