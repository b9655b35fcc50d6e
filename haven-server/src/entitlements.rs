//! Entitlement resolution and feature gates
//!
//! Resolves a user's authoritative subscription (creating a Free row on first
//! access), maps it to a catalog plan, and answers gate questions. Gates and
//! the allowance snapshot are computed by the same pure functions so they
//! cannot disagree.

use crate::error::{Error, Result};
use crate::identity::IdentityProvider;
use crate::store::{PlanTerms, StoreError, SubscriptionStore};
use chrono::{DateTime, Utc};
use haven_common::db::{BillingInterval, Subscription, SubscriptionStatus};
use haven_common::events::{EventBus, HavenEvent};
use haven_common::plans::{self, Limit, Plan};
use haven_common::time::{add_months, day_key, week_key};
use haven_common::Clock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a gate refused an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    SoloSessionLimitReached,
    GroupSessionsUnavailable,
    MinutesExhausted,
    InsightLimitReached,
    SubscriptionUnavailable,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::SoloSessionLimitReached => "solo_session_limit_reached",
            DenialReason::GroupSessionsUnavailable => "group_sessions_unavailable",
            DenialReason::MinutesExhausted => "minutes_exhausted",
            DenialReason::InsightLimitReached => "insight_limit_reached",
            DenialReason::SubscriptionUnavailable => "subscription_unavailable",
        }
    }

    /// User-facing explanation
    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::SoloSessionLimitReached => {
                "You've used today's reflection sessions. Upgrade for unlimited sessions."
            }
            DenialReason::GroupSessionsUnavailable => {
                "Group sessions are available on the Resolve Together plan."
            }
            DenialReason::MinutesExhausted => {
                "You've used all conversation minutes for this billing period."
            }
            DenialReason::InsightLimitReached => {
                "You've reached this week's insight limit. Upgrade for unlimited insights."
            }
            DenialReason::SubscriptionUnavailable => {
                "We couldn't load your subscription. Please try again in a moment."
            }
        }
    }
}

/// Snapshot of every quota dimension for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemainingAllowances {
    pub plan_id: String,
    pub plan_name: String,
    pub metered_minutes: Limit,
    pub solo_sessions_today: Limit,
    pub insights_this_week: Limit,
    pub group_sessions: bool,
    pub period_ends_at: DateTime<Utc>,
    pub cancel_at_period_end: bool,
}

/// Plan whose features currently apply to `sub`
///
/// Canceled and unpaid rows fall back to Free; unknown plan ids as well.
pub fn effective_plan(sub: &Subscription) -> &'static Plan {
    if !sub.status.grants_paid_features() {
        return plans::free_plan();
    }
    match plans::get_plan_by_id(&sub.plan_id) {
        Some(plan) => plan,
        None => {
            warn!(plan_id = %sub.plan_id, user_id = %sub.user_id, "Unknown plan on subscription, treating as Free");
            plans::free_plan()
        }
    }
}

/// Minute allowance for the current period
///
/// The row's copied limit applies while its plan is in effect.
pub fn minutes_limit(sub: &Subscription) -> Limit {
    let plan = effective_plan(sub);
    if plan.id == sub.plan_id {
        sub.tavus_minutes_limit
    } else {
        plan.features.metered_minutes
    }
}

pub fn minutes_remaining(sub: &Subscription) -> Limit {
    minutes_limit(sub).remaining(sub.tavus_minutes_used)
}

/// Solo sessions left on `today`; a stale date counts as zero used
pub fn solo_sessions_remaining(sub: &Subscription, today: &str) -> Limit {
    let used = if sub.last_solo_session_date.as_deref() == Some(today) {
        sub.solo_sessions_today
    } else {
        0
    };
    effective_plan(sub).features.solo_sessions_per_day.remaining(used)
}

/// Insights left in `week`; a stale week key counts as zero used
pub fn insights_remaining(sub: &Subscription, week: &str) -> Limit {
    let used = if sub.last_insight_date.as_deref() == Some(week) {
        sub.insights_this_week
    } else {
        0
    };
    effective_plan(sub).features.insights_per_week.remaining(used)
}

/// Whether a remaining allowance admits at least one more unit
pub fn has_capacity(remaining: Limit) -> bool {
    !matches!(remaining, Limit::Limited(0))
}

pub fn allowances_for(sub: &Subscription, now: DateTime<Utc>) -> RemainingAllowances {
    let plan = effective_plan(sub);
    RemainingAllowances {
        plan_id: plan.id.to_string(),
        plan_name: plan.display_name.to_string(),
        metered_minutes: minutes_remaining(sub),
        solo_sessions_today: solo_sessions_remaining(sub, &day_key(now)),
        insights_this_week: insights_remaining(sub, &week_key(now)),
        group_sessions: plan.features.group_sessions,
        period_ends_at: sub.current_period_end,
        cancel_at_period_end: sub.cancel_at_period_end,
    }
}

/// Plan change requested by the billing path
#[derive(Debug, Clone)]
pub struct PlanGrant {
    pub plan: &'static Plan,
    pub interval: BillingInterval,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub billing_customer_id: Option<String>,
}

/// Resolves subscriptions and answers feature-gate questions
pub struct EntitlementResolver {
    store: Arc<dyn SubscriptionStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl EntitlementResolver {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            identity,
            clock,
            events,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// The user's subscription, creating a Free row if none exists
    ///
    /// When the store rejects the insert as unauthorized, the caller's
    /// identity is re-confirmed and the insert retried once. A second
    /// rejection yields `Ok(None)`: the caller has no subscription, which is
    /// not the same as Free access.
    pub async fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>> {
        if let Some(sub) = self.store.latest_subscription(user_id).await? {
            return self.apply_period_rollover(sub).await.map(Some);
        }

        let now = self.clock.now();
        let terms = default_terms(now);

        match self.store.insert_subscription(user_id, &terms, now).await {
            Ok(sub) => {
                info!(user_id = %user_id, "Created default Free subscription");
                Ok(Some(sub))
            }
            Err(StoreError::PermissionDenied(reason)) => {
                warn!(user_id = %user_id, reason = %reason, "Subscription insert rejected, re-confirming identity");
                self.retry_default_insert(user_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn retry_default_insert(&self, user_id: &str) -> Result<Option<Subscription>> {
        if !self.identity.confirm_identity(user_id).await? {
            warn!(user_id = %user_id, "Identity could not be confirmed, subscription unavailable");
            return Ok(None);
        }

        // Another request may have created the row in the meantime
        if let Some(sub) = self.store.latest_subscription(user_id).await? {
            return Ok(Some(sub));
        }

        let now = self.clock.now();
        match self.store.insert_subscription(user_id, &default_terms(now), now).await {
            Ok(sub) => {
                info!(user_id = %user_id, "Created default Free subscription on retry");
                Ok(Some(sub))
            }
            Err(StoreError::PermissionDenied(reason)) => {
                warn!(user_id = %user_id, reason = %reason, "Subscription insert rejected again, giving up");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`Self::get_subscription`] but absence is an error
    pub async fn require_subscription(&self, user_id: &str) -> Result<Subscription> {
        self.get_subscription(user_id)
            .await?
            .ok_or_else(|| Error::SubscriptionUnavailable(user_id.to_string()))
    }

    /// Start a new period if the current one has ended
    ///
    /// Minutes reset; a scheduled cancellation or a canceled/unpaid row drops
    /// to Free at the boundary.
    async fn apply_period_rollover(&self, sub: Subscription) -> Result<Subscription> {
        let now = self.clock.now();
        if now < sub.current_period_end {
            return Ok(sub);
        }

        let current_plan = plans::get_plan_by_id(&sub.plan_id).unwrap_or_else(plans::free_plan);
        let downgrade = !current_plan.is_free()
            && (sub.cancel_at_period_end || !sub.status.grants_paid_features());

        let (plan, interval, status) = if downgrade {
            (plans::free_plan(), BillingInterval::Monthly, SubscriptionStatus::Active)
        } else {
            (current_plan, sub.billing_interval, sub.status)
        };

        let mut period_start = sub.current_period_end;
        let mut period_end = add_months(period_start, interval.months());
        while period_end <= now {
            period_start = period_end;
            period_end = add_months(period_start, interval.months());
        }

        let terms = PlanTerms {
            plan,
            interval,
            status,
            period_start,
            period_end,
            cancel_at_period_end: false,
            billing_customer_id: None,
        };

        if self
            .store
            .roll_period(sub.id, sub.current_period_end, &terms, now)
            .await?
        {
            info!(
                user_id = %sub.user_id,
                plan_id = plan.id,
                period_end = %period_end,
                "Advanced billing period"
            );
            if downgrade {
                self.events.emit_lossy(HavenEvent::PlanChanged {
                    user_id: sub.user_id.clone(),
                    old_plan_id: sub.plan_id.clone(),
                    new_plan_id: plan.id.to_string(),
                    timestamp: now,
                });
            }
        } else {
            debug!(user_id = %sub.user_id, "Billing period already advanced by another request");
        }

        Ok(self
            .store
            .latest_subscription(&sub.user_id)
            .await?
            .unwrap_or(sub))
    }

    pub async fn can_start_solo_session(&self, user_id: &str) -> Result<bool> {
        let sub = self.require_subscription(user_id).await?;
        let today = day_key(self.clock.now());
        Ok(has_capacity(solo_sessions_remaining(&sub, &today)))
    }

    /// Binary feature gate, no quota
    pub async fn can_start_group_session(&self, user_id: &str) -> Result<bool> {
        let sub = self.require_subscription(user_id).await?;
        Ok(effective_plan(&sub).features.group_sessions)
    }

    pub async fn can_consume_metered_minutes(&self, user_id: &str, minutes: u32) -> Result<bool> {
        let sub = self.require_subscription(user_id).await?;
        Ok(minutes_limit(&sub).admits(sub.tavus_minutes_used, minutes))
    }

    pub async fn can_generate_insight(&self, user_id: &str) -> Result<bool> {
        let sub = self.require_subscription(user_id).await?;
        let week = week_key(self.clock.now());
        Ok(has_capacity(insights_remaining(&sub, &week)))
    }

    pub async fn get_remaining_allowances(&self, user_id: &str) -> Result<RemainingAllowances> {
        let sub = self.require_subscription(user_id).await?;
        Ok(allowances_for(&sub, self.clock.now()))
    }

    /// Put the user on a new plan (purchase or restore)
    pub async fn assign_plan(&self, user_id: &str, grant: PlanGrant) -> Result<Subscription> {
        let current = self.require_subscription(user_id).await?;
        let now = self.clock.now();

        let terms = PlanTerms {
            plan: grant.plan,
            interval: grant.interval,
            status: SubscriptionStatus::Active,
            period_start: grant.period_start,
            period_end: grant.period_end,
            cancel_at_period_end: grant.cancel_at_period_end,
            billing_customer_id: grant.billing_customer_id,
        };

        let updated = self.store.assign_plan(user_id, &terms, now).await?;

        info!(
            user_id = %user_id,
            old_plan = %current.plan_id,
            new_plan = %updated.plan_id,
            "Assigned plan"
        );

        if current.plan_id != updated.plan_id {
            self.events.emit_lossy(HavenEvent::PlanChanged {
                user_id: user_id.to_string(),
                old_plan_id: current.plan_id,
                new_plan_id: updated.plan_id.clone(),
                timestamp: now,
            });
        }

        Ok(updated)
    }

    /// Set or clear cancel-at-period-end; the plan stays until the boundary
    pub async fn set_cancel_at_period_end(&self, user_id: &str, cancel: bool) -> Result<Subscription> {
        self.require_subscription(user_id).await?;
        let updated = self
            .store
            .set_cancel_at_period_end(user_id, cancel, self.clock.now())
            .await?;
        info!(user_id = %user_id, cancel, "Updated cancel-at-period-end");
        Ok(updated)
    }
}

/// Terms of the Free row created on first access
fn default_terms(now: DateTime<Utc>) -> PlanTerms {
    PlanTerms {
        plan: plans::free_plan(),
        interval: BillingInterval::Monthly,
        status: SubscriptionStatus::Active,
        period_start: now,
        period_end: add_months(now, 1),
        cancel_at_period_end: false,
        billing_customer_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::GatewayIdentity;
    use crate::store::SqliteSubscriptionStore;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use haven_common::db::init_memory_database;
    use haven_common::FixedClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 14, 9, 30, 0).unwrap()
    }

    async fn resolver_at(at: DateTime<Utc>) -> (EntitlementResolver, Arc<FixedClock>, SqliteSubscriptionStore) {
        let pool = init_memory_database().await.unwrap();
        let store = SqliteSubscriptionStore::new(pool);
        let clock = Arc::new(FixedClock::new(at));
        let resolver = EntitlementResolver::new(
            Arc::new(store.clone()),
            Arc::new(GatewayIdentity),
            clock.clone(),
            EventBus::new(16),
        );
        (resolver, clock, store)
    }

    /// Store that rejects the first `denials` inserts as unauthorized
    struct RlsLaggingStore {
        inner: SqliteSubscriptionStore,
        denials: AtomicUsize,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl SubscriptionStore for RlsLaggingStore {
        async fn latest_subscription(&self, user_id: &str) -> crate::store::StoreResult<Option<Subscription>> {
            self.inner.latest_subscription(user_id).await
        }
        async fn insert_subscription(
            &self,
            user_id: &str,
            terms: &PlanTerms,
            now: DateTime<Utc>,
        ) -> crate::store::StoreResult<Subscription> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            if self
                .denials
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::PermissionDenied("new row violates row-level security policy".into()));
            }
            self.inner.insert_subscription(user_id, terms, now).await
        }
        async fn assign_plan(&self, user_id: &str, terms: &PlanTerms, now: DateTime<Utc>) -> crate::store::StoreResult<Subscription> {
            self.inner.assign_plan(user_id, terms, now).await
        }
        async fn set_cancel_at_period_end(&self, user_id: &str, cancel: bool, now: DateTime<Utc>) -> crate::store::StoreResult<Subscription> {
            self.inner.set_cancel_at_period_end(user_id, cancel, now).await
        }
        async fn roll_period(&self, id: i64, expected_end: DateTime<Utc>, terms: &PlanTerms, now: DateTime<Utc>) -> crate::store::StoreResult<bool> {
            self.inner.roll_period(id, expected_end, terms, now).await
        }
        async fn increment_solo_sessions(&self, user_id: &str, today: &str, limit: Limit, now: DateTime<Utc>) -> crate::store::StoreResult<bool> {
            self.inner.increment_solo_sessions(user_id, today, limit, now).await
        }
        async fn increment_insights(&self, user_id: &str, week: &str, limit: Limit, now: DateTime<Utc>) -> crate::store::StoreResult<bool> {
            self.inner.increment_insights(user_id, week, limit, now).await
        }
        async fn release_solo_session(&self, user_id: &str, today: &str, now: DateTime<Utc>) -> crate::store::StoreResult<bool> {
            self.inner.release_solo_session(user_id, today, now).await
        }
        async fn release_insight(&self, user_id: &str, week: &str, now: DateTime<Utc>) -> crate::store::StoreResult<bool> {
            self.inner.release_insight(user_id, week, now).await
        }
        async fn add_minutes(&self, user_id: &str, minutes: u32, now: DateTime<Utc>) -> crate::store::StoreResult<bool> {
            self.inner.add_minutes(user_id, minutes, now).await
        }
    }

    struct CountingIdentity {
        calls: AtomicUsize,
        confirm: bool,
    }

    #[async_trait]
    impl IdentityProvider for CountingIdentity {
        async fn confirm_identity(&self, _user_id: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.confirm)
        }
    }

    async fn lagging_resolver(denials: usize, confirm: bool) -> (EntitlementResolver, Arc<RlsLaggingStore>, Arc<CountingIdentity>) {
        let pool = init_memory_database().await.unwrap();
        let store = Arc::new(RlsLaggingStore {
            inner: SqliteSubscriptionStore::new(pool),
            denials: AtomicUsize::new(denials),
            inserts: AtomicUsize::new(0),
        });
        let identity = Arc::new(CountingIdentity {
            calls: AtomicUsize::new(0),
            confirm,
        });
        let resolver = EntitlementResolver::new(
            store.clone(),
            identity.clone(),
            Arc::new(FixedClock::new(start())),
            EventBus::new(16),
        );
        (resolver, store, identity)
    }

    #[tokio::test]
    async fn test_new_user_gets_free_row() {
        let (resolver, _clock, _store) = resolver_at(start()).await;

        let sub = resolver.get_subscription("new-user").await.unwrap().unwrap();

        assert_eq!(sub.plan_id, plans::FREE_PLAN_ID);
        assert_eq!(sub.tavus_minutes_limit, Limit::Limited(25));
        assert_eq!(sub.solo_sessions_today, 0);
        assert_eq!(sub.status, SubscriptionStatus::Active);

        // Second call returns the same row rather than creating another
        let again = resolver.get_subscription("new-user").await.unwrap().unwrap();
        assert_eq!(again.id, sub.id);
    }

    #[tokio::test]
    async fn test_rejected_insert_retried_once_after_identity_check() {
        let (resolver, store, identity) = lagging_resolver(1, true).await;

        let sub = resolver.get_subscription("fresh-signup").await.unwrap();

        assert!(sub.is_some());
        assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_rejection_means_no_subscription() {
        let (resolver, store, identity) = lagging_resolver(2, true).await;

        assert!(resolver.get_subscription("fresh-signup").await.unwrap().is_none());
        assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 2);

        // Gates surface unavailability instead of granting Free access
        let gate = resolver.can_start_solo_session("fresh-signup").await;
        assert!(matches!(gate, Err(Error::SubscriptionUnavailable(_))));
    }

    #[tokio::test]
    async fn test_unconfirmed_identity_skips_retry() {
        let (resolver, store, identity) = lagging_resolver(1, false).await;

        assert!(resolver.get_subscription("fresh-signup").await.unwrap().is_none());
        assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_solo_gate_uses_daily_rollover() {
        let (resolver, clock, store) = resolver_at(start()).await;
        resolver.get_subscription("u1").await.unwrap();

        let today = day_key(start());
        store.increment_solo_sessions("u1", &today, Limit::Unlimited, start()).await.unwrap();
        assert!(!resolver.can_start_solo_session("u1").await.unwrap());

        clock.advance(Duration::days(1));
        assert!(resolver.can_start_solo_session("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_minute_gate_boundary() {
        let (resolver, _clock, store) = resolver_at(start()).await;
        resolver.get_subscription("u1").await.unwrap();
        sqlx::query("UPDATE subscriptions SET tavus_minutes_limit = 100, tavus_minutes_used = 96 WHERE user_id = 'u1'")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(!resolver.can_consume_metered_minutes("u1", 5).await.unwrap());
        assert!(resolver.can_consume_metered_minutes("u1", 4).await.unwrap());
    }

    #[tokio::test]
    async fn test_overage_closes_minute_gate() {
        let (resolver, _clock, store) = resolver_at(start()).await;
        resolver.get_subscription("u1").await.unwrap();
        store.add_minutes("u1", 40, start()).await.unwrap();

        assert!(!resolver.can_consume_metered_minutes("u1", 1).await.unwrap());
        let allowances = resolver.get_remaining_allowances("u1").await.unwrap();
        assert_eq!(allowances.metered_minutes, Limit::Limited(0));
    }

    #[tokio::test]
    async fn test_period_rollover_resets_minutes() {
        let (resolver, clock, store) = resolver_at(start()).await;
        let sub = resolver.get_subscription("u1").await.unwrap().unwrap();
        store.add_minutes("u1", 25, start()).await.unwrap();

        clock.set(sub.current_period_end + Duration::days(40));
        let rolled = resolver.get_subscription("u1").await.unwrap().unwrap();

        assert_eq!(rolled.tavus_minutes_used, 0);
        assert!(rolled.current_period_start <= clock.now());
        assert!(rolled.current_period_end > clock.now());
    }

    #[tokio::test]
    async fn test_scheduled_cancellation_downgrades_at_period_end() {
        let (resolver, clock, _store) = resolver_at(start()).await;
        resolver.get_subscription("u1").await.unwrap();

        let plan = plans::get_plan_by_name("resolve_together").unwrap();
        resolver
            .assign_plan(
                "u1",
                PlanGrant {
                    plan,
                    interval: BillingInterval::Monthly,
                    period_start: start(),
                    period_end: add_months(start(), 1),
                    cancel_at_period_end: false,
                    billing_customer_id: Some("cus_test".to_string()),
                },
            )
            .await
            .unwrap();
        resolver.set_cancel_at_period_end("u1", true).await.unwrap();

        // Access continues until the period ends
        assert!(resolver.can_start_group_session("u1").await.unwrap());

        clock.set(add_months(start(), 1) + Duration::minutes(1));
        assert!(!resolver.can_start_group_session("u1").await.unwrap());
        let sub = resolver.get_subscription("u1").await.unwrap().unwrap();
        assert_eq!(sub.plan_id, plans::FREE_PLAN_ID);
        assert!(!sub.cancel_at_period_end);
    }

    #[tokio::test]
    async fn test_canceled_status_resolves_to_free_features() {
        let (resolver, _clock, store) = resolver_at(start()).await;
        resolver.get_subscription("u1").await.unwrap();
        sqlx::query("UPDATE subscriptions SET plan_id = 'plan_resolve_together', status = 'canceled' WHERE user_id = 'u1'")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(!resolver.can_start_group_session("u1").await.unwrap());
        let allowances = resolver.get_remaining_allowances("u1").await.unwrap();
        assert_eq!(allowances.plan_id, plans::FREE_PLAN_ID);
    }

    #[test]
    fn test_denial_reason_codes_are_stable() {
        assert_eq!(DenialReason::MinutesExhausted.code(), "minutes_exhausted");
        assert_eq!(
            serde_json::to_string(&DenialReason::GroupSessionsUnavailable).unwrap(),
            "\"group_sessions_unavailable\""
        );
        assert!(!DenialReason::SoloSessionLimitReached.message().is_empty());
    }
}
