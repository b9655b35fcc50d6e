//! Per-user usage summary

use crate::entitlements::{allowances_for, EntitlementResolver, RemainingAllowances};
use crate::error::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    /// Sessions the user created
    pub total_sessions: i64,
    pub solo_sessions: i64,
    pub group_sessions: i64,
    pub completed_sessions: i64,
    /// Group sessions joined as a guest
    pub sessions_joined: i64,
    pub minutes_consumed: i64,
    pub insights_created: i64,
    pub allowances: RemainingAllowances,
}

pub struct AnalyticsService {
    pool: SqlitePool,
    resolver: Arc<EntitlementResolver>,
}

impl AnalyticsService {
    pub fn new(pool: SqlitePool, resolver: Arc<EntitlementResolver>) -> Self {
        Self { pool, resolver }
    }

    pub async fn usage_summary(&self, user_id: &str) -> Result<UsageSummary> {
        let sub = self.resolver.require_subscription(user_id).await?;

        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(kind = 'solo'), 0) AS solo,
                COALESCE(SUM(kind = 'group'), 0) AS grp,
                COALESCE(SUM(status = 'completed'), 0) AS completed,
                COALESCE(SUM(minutes_consumed), 0) AS minutes
            FROM sessions
            WHERE creator_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let sessions_joined: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session_participants WHERE user_id = ? AND role = 'guest'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let insights_created: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM insights WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(UsageSummary {
            total_sessions: row.try_get("total")?,
            solo_sessions: row.try_get("solo")?,
            group_sessions: row.try_get("grp")?,
            completed_sessions: row.try_get("completed")?,
            sessions_joined,
            minutes_consumed: row.try_get("minutes")?,
            insights_created,
            allowances: allowances_for(&sub, self.resolver.clock().now()),
        })
    }
}
