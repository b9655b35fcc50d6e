//! Billing/Purchase Adapter
//!
//! Translates plan purchases into provider calls and, on success, into plan
//! assignments on the subscription. A failed purchase leaves local state
//! untouched.

use super::validation::{validate_card, CardDetails};
use super::{BillingProvider, Offerings};
use crate::entitlements::{EntitlementResolver, PlanGrant};
use crate::error::{Error, Result};
use haven_common::db::{BillingInterval, PurchaseStatus, Subscription};
use haven_common::plans;
use haven_common::time::add_months;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseFailure {
    /// The provider refused the purchase
    Declined,
    /// The provider could not be reached
    ProviderUnavailable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Completed {
        subscription: Subscription,
    },
    Failed {
        reason: PurchaseFailure,
        message: String,
    },
}

pub struct BillingAdapter {
    provider: Arc<dyn BillingProvider>,
    resolver: Arc<EntitlementResolver>,
}

impl BillingAdapter {
    pub fn new(provider: Arc<dyn BillingProvider>, resolver: Arc<EntitlementResolver>) -> Self {
        Self { provider, resolver }
    }

    pub async fn offerings(&self) -> Result<Offerings> {
        self.provider.get_offerings().await
    }

    /// Buy `plan_key` (e.g. `"resolve_together"`)
    ///
    /// Input errors are returned as `Error::Validation` before any remote
    /// call. Provider refusals are a `Failed` outcome, not an error.
    pub async fn purchase(
        &self,
        user_id: &str,
        plan_key: &str,
        is_annual: bool,
        card: Option<&CardDetails>,
    ) -> Result<PurchaseOutcome> {
        if let Some(card) = card {
            validate_card(card, self.resolver.clock().now())?;
        }

        let plan = plans::get_plan_by_name(plan_key)
            .ok_or_else(|| Error::Validation(format!("Unknown plan '{}'", plan_key)))?;
        let package_id = plan
            .product_id(is_annual)
            .ok_or_else(|| Error::Validation(format!("{} cannot be purchased", plan.display_name)))?;

        // Fail before charging if there is no subscription to update
        self.resolver.require_subscription(user_id).await?;

        let result = match self.provider.purchase_package(user_id, package_id, is_annual).await {
            Ok(result) => result,
            Err(e) => {
                warn!(user_id = %user_id, package_id, error = %e, "Billing provider unavailable");
                return Ok(PurchaseOutcome::Failed {
                    reason: PurchaseFailure::ProviderUnavailable,
                    message: "The billing service is unavailable. Please try again.".to_string(),
                });
            }
        };

        let record = match (result.success, result.purchase) {
            (true, Some(record)) => record,
            (_, _) => {
                let message = result
                    .error
                    .unwrap_or_else(|| "The purchase was declined".to_string());
                info!(user_id = %user_id, package_id, message = %message, "Purchase declined");
                return Ok(PurchaseOutcome::Failed {
                    reason: PurchaseFailure::Declined,
                    message,
                });
            }
        };

        let subscription = self
            .resolver
            .assign_plan(
                user_id,
                PlanGrant {
                    plan,
                    interval: BillingInterval::from_annual(is_annual),
                    period_start: record.purchased_at,
                    period_end: record.expires_at,
                    cancel_at_period_end: false,
                    billing_customer_id: Some(record.customer_id),
                },
            )
            .await?;

        info!(user_id = %user_id, plan_id = plan.id, annual = is_annual, "Purchase completed");
        Ok(PurchaseOutcome::Completed { subscription })
    }

    /// Stop renewal; paid access continues until the period ends
    pub async fn cancel(&self, user_id: &str) -> Result<Subscription> {
        let sub = self.resolver.require_subscription(user_id).await?;
        if sub.plan_id == plans::FREE_PLAN_ID {
            return Err(Error::Validation("There is no paid subscription to cancel".to_string()));
        }

        self.provider
            .cancel_subscription(user_id)
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        self.resolver.set_cancel_at_period_end(user_id, true).await
    }

    /// Re-synchronize the plan from the provider's purchase history
    ///
    /// The newest unexpired purchase wins; with none the user is on Free.
    pub async fn restore(&self, user_id: &str) -> Result<Subscription> {
        let current = self.resolver.require_subscription(user_id).await?;
        let history = self
            .provider
            .restore_purchases(user_id)
            .await
            .map_err(|e| Error::Provider(e.to_string()))?;

        let now = self.resolver.clock().now();
        let current_purchase = history.into_iter().find_map(|record| {
            let plan = plans::get_plan_by_external_product_id(&record.product_id)?;
            (record.expires_at > now).then_some((plan, record))
        });

        let grant = match current_purchase {
            Some((plan, record)) => PlanGrant {
                plan,
                interval: BillingInterval::from_annual(plans::is_annual_product(&record.product_id)),
                period_start: record.purchased_at,
                period_end: record.expires_at,
                cancel_at_period_end: record.status == PurchaseStatus::Canceled,
                billing_customer_id: Some(record.customer_id),
            },
            None if current.plan_id == plans::FREE_PLAN_ID => {
                info!(user_id = %user_id, "No purchases to restore");
                return Ok(current);
            }
            None => PlanGrant {
                plan: plans::free_plan(),
                interval: BillingInterval::Monthly,
                period_start: now,
                period_end: add_months(now, 1),
                cancel_at_period_end: false,
                billing_customer_id: None,
            },
        };

        let restored = self.resolver.assign_plan(user_id, grant).await?;
        info!(user_id = %user_id, plan_id = %restored.plan_id, "Restored purchases");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{MockBillingProvider, PurchaseResult};
    use crate::identity::GatewayIdentity;
    use crate::store::SqliteSubscriptionStore;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use haven_common::db::{init_memory_database, PurchaseRecord};
    use haven_common::events::EventBus;
    use haven_common::{Clock, FixedClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        adapter: BillingAdapter,
        resolver: Arc<EntitlementResolver>,
        clock: Arc<FixedClock>,
    }

    async fn fixture() -> Fixture {
        let pool = init_memory_database().await.unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 10, 15, 0, 0).unwrap()));
        let resolver = Arc::new(EntitlementResolver::new(
            Arc::new(SqliteSubscriptionStore::new(pool.clone())),
            Arc::new(GatewayIdentity),
            clock.clone(),
            EventBus::new(8),
        ));
        let provider = Arc::new(MockBillingProvider::new(pool, clock.clone()));
        Fixture {
            adapter: BillingAdapter::new(provider, resolver.clone()),
            resolver,
            clock,
        }
    }

    struct UnreachableProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BillingProvider for UnreachableProvider {
        async fn get_offerings(&self) -> Result<Offerings> {
            Err(Error::Provider("timeout".into()))
        }
        async fn purchase_package(&self, _user_id: &str, _package_id: &str, _is_annual: bool) -> Result<PurchaseResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Provider("timeout".into()))
        }
        async fn restore_purchases(&self, _user_id: &str) -> Result<Vec<PurchaseRecord>> {
            Err(Error::Provider("timeout".into()))
        }
        async fn cancel_subscription(&self, _user_id: &str) -> Result<()> {
            Err(Error::Provider("timeout".into()))
        }
    }

    #[tokio::test]
    async fn test_purchase_assigns_plan_and_customer() {
        let f = fixture().await;

        let outcome = f.adapter.purchase("u1", "reflect_plus", true, None).await.unwrap();
        let PurchaseOutcome::Completed { subscription } = outcome else {
            panic!("purchase should complete");
        };

        assert_eq!(subscription.plan_id, "plan_reflect_plus");
        assert_eq!(subscription.billing_interval, BillingInterval::Annual);
        assert!(subscription.billing_customer_id.as_deref().unwrap().starts_with("cus_"));
        assert_eq!(subscription.current_period_end, add_months(f.clock.now(), 12));
        assert!(f.resolver.can_start_solo_session("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_plan_and_free_plan_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.adapter.purchase("u1", "platinum", false, None).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            f.adapter.purchase("u1", "free", false, None).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_card_never_reaches_provider() {
        let pool = init_memory_database().await.unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 10, 15, 0, 0).unwrap()));
        let resolver = Arc::new(EntitlementResolver::new(
            Arc::new(SqliteSubscriptionStore::new(pool)),
            Arc::new(GatewayIdentity),
            clock,
            EventBus::new(8),
        ));
        let provider = Arc::new(UnreachableProvider {
            calls: AtomicUsize::new(0),
        });
        let adapter = BillingAdapter::new(provider.clone(), resolver.clone());

        let card = CardDetails {
            holder_name: "Sam".into(),
            number: "4242424242424241".into(),
            expiry: "12/29".into(),
            cvc: "123".into(),
        };
        let result = adapter.purchase("u1", "reflect_plus", false, Some(&card)).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        // Provider failure is a structured outcome and leaves the plan alone
        let outcome = adapter.purchase("u1", "reflect_plus", false, None).await.unwrap();
        assert!(matches!(
            outcome,
            PurchaseOutcome::Failed { reason: PurchaseFailure::ProviderUnavailable, .. }
        ));
        let sub = resolver.get_subscription("u1").await.unwrap().unwrap();
        assert_eq!(sub.plan_id, plans::FREE_PLAN_ID);
    }

    #[tokio::test]
    async fn test_cancel_keeps_access_until_period_end() {
        let f = fixture().await;
        f.adapter.purchase("u1", "resolve_together", false, None).await.unwrap();

        let sub = f.adapter.cancel("u1").await.unwrap();
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.plan_id, "plan_resolve_together");
        assert!(f.resolver.can_start_group_session("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_on_free_is_rejected() {
        let f = fixture().await;
        assert!(matches!(f.adapter.cancel("u1").await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_restore_follows_provider_history() {
        let f = fixture().await;
        f.adapter.purchase("u1", "resolve_together", false, None).await.unwrap();

        // Local row drifts to Free; the provider still has an active purchase
        f.resolver
            .assign_plan(
                "u1",
                PlanGrant {
                    plan: plans::free_plan(),
                    interval: BillingInterval::Monthly,
                    period_start: f.clock.now(),
                    period_end: add_months(f.clock.now(), 1),
                    cancel_at_period_end: false,
                    billing_customer_id: None,
                },
            )
            .await
            .unwrap();

        let restored = f.adapter.restore("u1").await.unwrap();
        assert_eq!(restored.plan_id, "plan_resolve_together");

        // After the purchase lapses, restore lands on Free
        f.clock.advance(Duration::days(40));
        let restored = f.adapter.restore("u1").await.unwrap();
        assert_eq!(restored.plan_id, plans::FREE_PLAN_ID);
    }

    #[tokio::test]
    async fn test_restore_prefers_later_of_same_instant_purchases() {
        let f = fixture().await;
        f.adapter.purchase("u1", "reflect_plus", false, None).await.unwrap();
        f.adapter.purchase("u1", "resolve_together", false, None).await.unwrap();

        let restored = f.adapter.restore("u1").await.unwrap();
        assert_eq!(restored.plan_id, "plan_resolve_together");
        // The superseded purchase is canceled; the live one is not
        assert!(!restored.cancel_at_period_end);
    }
}
