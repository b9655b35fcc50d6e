//! Subscription store seam
//!
//! The entitlement and metering layers talk to subscription rows only through
//! [`SubscriptionStore`]. Counter updates are single conditional statements
//! evaluated by the store, never a client-side read-modify-write.

mod sqlite;

pub use sqlite::SqliteSubscriptionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use haven_common::db::{BillingInterval, Subscription, SubscriptionStatus};
use haven_common::{Limit, Plan};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Row-level authorization rejected the operation (e.g. the caller's
    /// identity has not propagated yet right after signup)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No subscription for user {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<haven_common::Error> for StoreError {
    fn from(e: haven_common::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Plan terms written onto a subscription row
#[derive(Debug, Clone)]
pub struct PlanTerms {
    pub plan: &'static Plan,
    pub interval: BillingInterval,
    pub status: SubscriptionStatus,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub billing_customer_id: Option<String>,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// The authoritative row: most recently created wins when duplicates exist
    async fn latest_subscription(&self, user_id: &str) -> StoreResult<Option<Subscription>>;

    /// Insert a fresh row with zeroed counters
    async fn insert_subscription(
        &self,
        user_id: &str,
        terms: &PlanTerms,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription>;

    /// Replace the plan terms on the authoritative row
    ///
    /// Minutes used reset only when the period start changes.
    async fn assign_plan(
        &self,
        user_id: &str,
        terms: &PlanTerms,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription>;

    async fn set_cancel_at_period_end(
        &self,
        user_id: &str,
        cancel: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription>;

    /// Start a new billing period on row `subscription_id`, resetting minutes
    ///
    /// Applies only while the row's period still ends at `expected_end`, so
    /// concurrent callers advance a period once. Returns whether it applied.
    async fn roll_period(
        &self,
        subscription_id: i64,
        expected_end: DateTime<Utc>,
        terms: &PlanTerms,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Count one solo session for `today`, resetting the counter when the
    /// stored date differs
    ///
    /// With a finite `limit` the increment applies only while today's count is
    /// below it. Returns whether a row was updated.
    async fn increment_solo_sessions(
        &self,
        user_id: &str,
        today: &str,
        limit: Limit,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Weekly counterpart of [`Self::increment_solo_sessions`] for insights
    async fn increment_insights(
        &self,
        user_id: &str,
        week: &str,
        limit: Limit,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Give back one solo session counted on `today`
    ///
    /// Applies only while the stored date is still `today` and the counter is
    /// positive. Returns whether a row was updated.
    async fn release_solo_session(
        &self,
        user_id: &str,
        today: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Weekly counterpart of [`Self::release_solo_session`] for insights
    async fn release_insight(&self, user_id: &str, week: &str, now: DateTime<Utc>)
        -> StoreResult<bool>;

    /// Additive, unclamped; overage is billed externally
    async fn add_minutes(&self, user_id: &str, minutes: u32, now: DateTime<Utc>)
        -> StoreResult<bool>;
}
