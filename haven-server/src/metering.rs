//! Usage metering
//!
//! Counter updates are delegated to the store as single conditional
//! statements. The `record_*` operations count unconditionally; the `try_*`
//! operations reserve against the plan limit in the same statement.

use crate::entitlements::{effective_plan, EntitlementResolver};
use crate::error::{Error, Result};
use haven_common::time::{day_key, week_key};
use haven_common::Limit;
use std::sync::Arc;
use tracing::{debug, info};

pub struct UsageMeter {
    resolver: Arc<EntitlementResolver>,
}

impl UsageMeter {
    pub fn new(resolver: Arc<EntitlementResolver>) -> Self {
        Self { resolver }
    }

    /// Count a solo session for today, resetting yesterday's counter
    pub async fn record_solo_session_start(&self, user_id: &str) -> Result<()> {
        self.resolver.require_subscription(user_id).await?;
        let now = self.resolver.clock().now();

        let updated = self
            .resolver
            .store()
            .increment_solo_sessions(user_id, &day_key(now), Limit::Unlimited, now)
            .await?;
        if !updated {
            return Err(Error::SubscriptionUnavailable(user_id.to_string()));
        }

        debug!(user_id = %user_id, "Recorded solo session start");
        Ok(())
    }

    /// Reserve one of today's solo sessions against the plan limit
    ///
    /// Returns false when the limit is reached; the counter is unchanged.
    pub async fn try_start_solo_session(&self, user_id: &str) -> Result<bool> {
        let sub = self.resolver.require_subscription(user_id).await?;
        let limit = effective_plan(&sub).features.solo_sessions_per_day;
        let now = self.resolver.clock().now();

        let reserved = self
            .resolver
            .store()
            .increment_solo_sessions(user_id, &day_key(now), limit, now)
            .await?;

        debug!(user_id = %user_id, reserved, "Solo session reservation");
        Ok(reserved)
    }

    /// Return a solo reservation whose session could not be created
    ///
    /// A reservation made before midnight is not returned to the new day.
    pub async fn release_solo_session(&self, user_id: &str) -> Result<bool> {
        let now = self.resolver.clock().now();
        let released = self
            .resolver
            .store()
            .release_solo_session(user_id, &day_key(now), now)
            .await?;

        debug!(user_id = %user_id, released, "Released solo session reservation");
        Ok(released)
    }

    /// Add consumed minutes; overage is allowed
    pub async fn record_minutes_consumed(&self, user_id: &str, minutes: u32) -> Result<()> {
        if minutes == 0 {
            return Ok(());
        }
        let now = self.resolver.clock().now();
        let updated = self
            .resolver
            .store()
            .add_minutes(user_id, minutes, now)
            .await?;
        if !updated {
            return Err(Error::SubscriptionUnavailable(user_id.to_string()));
        }

        info!(user_id = %user_id, minutes, "Recorded metered minutes");
        Ok(())
    }

    pub async fn record_insight(&self, user_id: &str) -> Result<()> {
        self.resolver.require_subscription(user_id).await?;
        let now = self.resolver.clock().now();

        let updated = self
            .resolver
            .store()
            .increment_insights(user_id, &week_key(now), Limit::Unlimited, now)
            .await?;
        if !updated {
            return Err(Error::SubscriptionUnavailable(user_id.to_string()));
        }
        Ok(())
    }

    /// Reserve one of this week's insights against the plan limit
    pub async fn try_record_insight(&self, user_id: &str) -> Result<bool> {
        let sub = self.resolver.require_subscription(user_id).await?;
        let limit = effective_plan(&sub).features.insights_per_week;
        let now = self.resolver.clock().now();

        Ok(self
            .resolver
            .store()
            .increment_insights(user_id, &week_key(now), limit, now)
            .await?)
    }

    /// Return an insight reservation whose insight was not saved
    pub async fn release_insight(&self, user_id: &str) -> Result<bool> {
        let now = self.resolver.clock().now();
        Ok(self
            .resolver
            .store()
            .release_insight(user_id, &week_key(now), now)
            .await?)
    }
}
