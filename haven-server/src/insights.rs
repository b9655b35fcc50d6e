//! Reflection insights
//!
//! Creating an insight reserves against the weekly quota in the same store
//! statement that counts it.

use crate::entitlements::{effective_plan, DenialReason, EntitlementResolver};
use crate::error::{Error, Result};
use crate::metering::UsageMeter;
use chrono::Duration;
use haven_common::db::Insight;
use haven_common::events::{EventBus, HavenEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_BODY_CHARS: usize = 10_000;

pub struct InsightService {
    pool: SqlitePool,
    resolver: Arc<EntitlementResolver>,
    meter: Arc<UsageMeter>,
    events: EventBus,
}

impl InsightService {
    pub fn new(
        pool: SqlitePool,
        resolver: Arc<EntitlementResolver>,
        meter: Arc<UsageMeter>,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            resolver,
            meter,
            events,
        }
    }

    pub async fn create(&self, user_id: &str, session_id: Option<Uuid>, body: &str) -> Result<Insight> {
        let body = body.trim();
        if body.is_empty() {
            return Err(Error::Validation("Insight text is required".to_string()));
        }
        if body.chars().count() > MAX_BODY_CHARS {
            return Err(Error::Validation(format!(
                "Insight text is limited to {} characters",
                MAX_BODY_CHARS
            )));
        }

        if let Some(session_id) = session_id {
            self.require_session_access(user_id, session_id).await?;
        }

        if !self.meter.try_record_insight(user_id).await? {
            let reason = DenialReason::InsightLimitReached;
            self.events.emit_lossy(HavenEvent::QuotaDenied {
                user_id: user_id.to_string(),
                reason: reason.code().to_string(),
                timestamp: self.resolver.clock().now(),
            });
            return Err(Error::GateDenied(reason));
        }

        let insight = Insight {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            session_id,
            body: body.to_string(),
            created_at: self.resolver.clock().now(),
        };

        let saved = sqlx::query(
            "INSERT INTO insights (id, user_id, session_id, body, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(insight.id.to_string())
        .bind(&insight.user_id)
        .bind(insight.session_id.map(|id| id.to_string()))
        .bind(&insight.body)
        .bind(insight.created_at)
        .execute(&self.pool)
        .await;

        if let Err(e) = saved {
            // The weekly count was taken for an insight that does not exist
            if let Err(release_error) = self.meter.release_insight(user_id).await {
                warn!(user_id = %user_id, error = %release_error, "Could not release insight reservation");
            }
            return Err(e.into());
        }

        info!(user_id = %user_id, insight_id = %insight.id, "Saved insight");
        Ok(insight)
    }

    async fn require_session_access(&self, user_id: &str, session_id: Uuid) -> Result<()> {
        let visible: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sessions s
                WHERE s.id = ?1
                  AND (s.creator_id = ?2
                       OR EXISTS (SELECT 1 FROM session_participants p
                                  WHERE p.session_id = s.id AND p.user_id = ?2))
            )
            "#,
        )
        .bind(session_id.to_string())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        if visible {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Session {}", session_id)))
        }
    }

    /// Insights within the plan's history window, newest first
    pub async fn list(&self, user_id: &str) -> Result<Vec<Insight>> {
        let sub = self.resolver.require_subscription(user_id).await?;
        let retention_days = effective_plan(&sub).features.history_retention_days;
        let since = self.resolver.clock().now() - Duration::days(i64::from(retention_days));

        let rows = sqlx::query(
            r#"
            SELECT * FROM insights
            WHERE user_id = ? AND julianday(created_at) >= julianday(?)
            ORDER BY julianday(created_at) DESC, id
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut insights = Vec::with_capacity(rows.len());
        for row in &rows {
            insights.push(Insight::from_row(row)?);
        }
        Ok(insights)
    }
}
