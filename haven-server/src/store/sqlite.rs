//! SQLite-backed subscription store
//!
//! Each counter update is one `UPDATE` whose WHERE clause carries both the
//! row selection and the quota condition; SQLite serializes writers, so two
//! concurrent increments for one user both land or the second sees the
//! first.

use super::{PlanTerms, StoreError, StoreResult, SubscriptionStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use haven_common::db::Subscription;
use haven_common::Limit;
use sqlx::SqlitePool;
use tracing::debug;

/// Row id of the authoritative subscription for user `?1`
const LATEST_ROW: &str = "(SELECT id FROM subscriptions WHERE user_id = ?1 \
                          ORDER BY julianday(created_at) DESC, id DESC LIMIT 1)";

#[derive(Clone)]
pub struct SqliteSubscriptionStore {
    pool: SqlitePool,
}

impl SqliteSubscriptionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_by_id(&self, id: i64) -> StoreResult<Subscription> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Subscription::from_row(&row)?)
    }

    async fn require_latest(&self, user_id: &str) -> StoreResult<Subscription> {
        self.latest_subscription(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn latest_subscription(&self, user_id: &str) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = ?
            ORDER BY julianday(created_at) DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Subscription::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_subscription(
        &self,
        user_id: &str,
        terms: &PlanTerms,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                user_id, plan_id, plan_name, status, billing_interval,
                current_period_start, current_period_end, cancel_at_period_end,
                tavus_minutes_used, tavus_minutes_limit,
                solo_sessions_today, insights_this_week,
                billing_customer_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, 0, 0, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(terms.plan.id)
        .bind(terms.plan.display_name)
        .bind(terms.status.as_str())
        .bind(terms.interval.as_str())
        .bind(terms.period_start)
        .bind(terms.period_end)
        .bind(terms.cancel_at_period_end)
        .bind(terms.plan.features.metered_minutes.as_column())
        .bind(&terms.billing_customer_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(user_id = %user_id, plan_id = terms.plan.id, "Inserted subscription row");
        self.fetch_by_id(result.last_insert_rowid()).await
    }

    async fn assign_plan(
        &self,
        user_id: &str,
        terms: &PlanTerms,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        let sql = format!(
            r#"
            UPDATE subscriptions SET
                plan_id = ?2,
                plan_name = ?3,
                status = ?4,
                billing_interval = ?5,
                tavus_minutes_used = CASE
                    WHEN julianday(current_period_start) = julianday(?6) THEN tavus_minutes_used
                    ELSE 0 END,
                current_period_start = ?6,
                current_period_end = ?7,
                cancel_at_period_end = ?8,
                tavus_minutes_limit = ?9,
                billing_customer_id = COALESCE(?10, billing_customer_id),
                updated_at = ?11
            WHERE id = {}
            "#,
            LATEST_ROW
        );

        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(terms.plan.id)
            .bind(terms.plan.display_name)
            .bind(terms.status.as_str())
            .bind(terms.interval.as_str())
            .bind(terms.period_start)
            .bind(terms.period_end)
            .bind(terms.cancel_at_period_end)
            .bind(terms.plan.features.metered_minutes.as_column())
            .bind(&terms.billing_customer_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(user_id.to_string()));
        }
        self.require_latest(user_id).await
    }

    async fn set_cancel_at_period_end(
        &self,
        user_id: &str,
        cancel: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        let sql = format!(
            "UPDATE subscriptions SET cancel_at_period_end = ?2, updated_at = ?3 WHERE id = {}",
            LATEST_ROW
        );

        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(cancel)
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(user_id.to_string()));
        }
        self.require_latest(user_id).await
    }

    async fn roll_period(
        &self,
        subscription_id: i64,
        expected_end: DateTime<Utc>,
        terms: &PlanTerms,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                plan_id = ?,
                plan_name = ?,
                status = ?,
                billing_interval = ?,
                current_period_start = ?,
                current_period_end = ?,
                cancel_at_period_end = ?,
                tavus_minutes_used = 0,
                tavus_minutes_limit = ?,
                updated_at = ?
            WHERE id = ? AND julianday(current_period_end) = julianday(?)
            "#,
        )
        .bind(terms.plan.id)
        .bind(terms.plan.display_name)
        .bind(terms.status.as_str())
        .bind(terms.interval.as_str())
        .bind(terms.period_start)
        .bind(terms.period_end)
        .bind(terms.cancel_at_period_end)
        .bind(terms.plan.features.metered_minutes.as_column())
        .bind(now)
        .bind(subscription_id)
        .bind(expected_end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn increment_solo_sessions(
        &self,
        user_id: &str,
        today: &str,
        limit: Limit,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql = format!(
            r#"
            UPDATE subscriptions SET
                solo_sessions_today = CASE
                    WHEN last_solo_session_date = ?2 THEN solo_sessions_today + 1
                    ELSE 1 END,
                last_solo_session_date = ?2,
                updated_at = ?3
            WHERE id = {}
              AND (?4 IS NULL OR
                   (CASE WHEN last_solo_session_date = ?2 THEN solo_sessions_today ELSE 0 END) < ?4)
            "#,
            LATEST_ROW
        );

        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(today)
            .bind(now)
            .bind(limit.as_column())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn increment_insights(
        &self,
        user_id: &str,
        week: &str,
        limit: Limit,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql = format!(
            r#"
            UPDATE subscriptions SET
                insights_this_week = CASE
                    WHEN last_insight_date = ?2 THEN insights_this_week + 1
                    ELSE 1 END,
                last_insight_date = ?2,
                updated_at = ?3
            WHERE id = {}
              AND (?4 IS NULL OR
                   (CASE WHEN last_insight_date = ?2 THEN insights_this_week ELSE 0 END) < ?4)
            "#,
            LATEST_ROW
        );

        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(week)
            .bind(now)
            .bind(limit.as_column())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_solo_session(
        &self,
        user_id: &str,
        today: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE subscriptions SET solo_sessions_today = solo_sessions_today - 1, updated_at = ?3 \
             WHERE id = {} AND last_solo_session_date = ?2 AND solo_sessions_today > 0",
            LATEST_ROW
        );

        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(today)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_insight(
        &self,
        user_id: &str,
        week: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE subscriptions SET insights_this_week = insights_this_week - 1, updated_at = ?3 \
             WHERE id = {} AND last_insight_date = ?2 AND insights_this_week > 0",
            LATEST_ROW
        );

        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(week)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_minutes(
        &self,
        user_id: &str,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE subscriptions SET tavus_minutes_used = tavus_minutes_used + ?2, updated_at = ?3 \
             WHERE id = {}",
            LATEST_ROW
        );

        let result = sqlx::query(&sql)
            .bind(user_id)
            .bind(minutes as i64)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use haven_common::db::{init_memory_database, BillingInterval, SubscriptionStatus};
    use haven_common::plans;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 14, 10, 0, 0).unwrap()
    }

    fn free_terms(start: DateTime<Utc>) -> PlanTerms {
        PlanTerms {
            plan: plans::free_plan(),
            interval: BillingInterval::Monthly,
            status: SubscriptionStatus::Active,
            period_start: start,
            period_end: start + Duration::days(30),
            cancel_at_period_end: false,
            billing_customer_id: None,
        }
    }

    async fn store() -> SqliteSubscriptionStore {
        SqliteSubscriptionStore::new(init_memory_database().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_then_latest() {
        let store = store().await;
        assert!(store.latest_subscription("u1").await.unwrap().is_none());

        let inserted = store.insert_subscription("u1", &free_terms(now()), now()).await.unwrap();
        assert_eq!(inserted.tavus_minutes_limit, Limit::Limited(25));
        assert_eq!(inserted.solo_sessions_today, 0);
        assert_eq!(inserted.plan_name, "Free");

        let latest = store.latest_subscription("u1").await.unwrap().unwrap();
        assert_eq!(latest, inserted);
    }

    #[tokio::test]
    async fn test_most_recently_created_row_wins() {
        let store = store().await;
        let older = store
            .insert_subscription("u1", &free_terms(now()), now() - Duration::hours(1))
            .await
            .unwrap();
        let newer = store.insert_subscription("u1", &free_terms(now()), now()).await.unwrap();

        let latest = store.latest_subscription("u1").await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
        assert_ne!(latest.id, older.id);

        // Counter updates target the authoritative row only
        assert!(store.add_minutes("u1", 7, now()).await.unwrap());
        let untouched: i64 = sqlx::query_scalar("SELECT tavus_minutes_used FROM subscriptions WHERE id = ?")
            .bind(older.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(untouched, 0);
    }

    #[tokio::test]
    async fn test_solo_increment_respects_limit_and_rolls_over() {
        let store = store().await;
        store.insert_subscription("u1", &free_terms(now()), now()).await.unwrap();

        assert!(store.increment_solo_sessions("u1", "2026-04-14", Limit::Limited(2), now()).await.unwrap());
        assert!(store.increment_solo_sessions("u1", "2026-04-14", Limit::Limited(2), now()).await.unwrap());
        assert!(!store.increment_solo_sessions("u1", "2026-04-14", Limit::Limited(2), now()).await.unwrap());

        // New day resets the counter to 1
        assert!(store.increment_solo_sessions("u1", "2026-04-15", Limit::Limited(2), now()).await.unwrap());
        let sub = store.latest_subscription("u1").await.unwrap().unwrap();
        assert_eq!(sub.solo_sessions_today, 1);
        assert_eq!(sub.last_solo_session_date.as_deref(), Some("2026-04-15"));
    }

    #[tokio::test]
    async fn test_unlimited_increment_always_applies() {
        let store = store().await;
        store.insert_subscription("u1", &free_terms(now()), now()).await.unwrap();

        for _ in 0..5 {
            assert!(store.increment_solo_sessions("u1", "2026-04-14", Limit::Unlimited, now()).await.unwrap());
        }
        let sub = store.latest_subscription("u1").await.unwrap().unwrap();
        assert_eq!(sub.solo_sessions_today, 5);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = store().await;
        store.insert_subscription("u1", &free_terms(now()), now()).await.unwrap();

        let a = store.clone();
        let b = store.clone();
        let (ra, rb) = tokio::join!(
            a.increment_solo_sessions("u1", "2026-04-14", Limit::Unlimited, now()),
            b.increment_solo_sessions("u1", "2026-04-14", Limit::Unlimited, now()),
        );
        assert!(ra.unwrap() && rb.unwrap());

        let sub = store.latest_subscription("u1").await.unwrap().unwrap();
        assert_eq!(sub.solo_sessions_today, 2);
    }

    #[tokio::test]
    async fn test_release_gives_back_only_todays_slot() {
        let store = store().await;
        store.insert_subscription("u1", &free_terms(now()), now()).await.unwrap();

        assert!(store.increment_solo_sessions("u1", "2026-04-14", Limit::Limited(1), now()).await.unwrap());
        // Counted on a different day: nothing to release
        assert!(!store.release_solo_session("u1", "2026-04-13", now()).await.unwrap());

        assert!(store.release_solo_session("u1", "2026-04-14", now()).await.unwrap());
        assert!(!store.release_solo_session("u1", "2026-04-14", now()).await.unwrap());
        let sub = store.latest_subscription("u1").await.unwrap().unwrap();
        assert_eq!(sub.solo_sessions_today, 0);

        assert!(store.increment_solo_sessions("u1", "2026-04-14", Limit::Limited(1), now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_insight_never_goes_negative() {
        let store = store().await;
        store.insert_subscription("u1", &free_terms(now()), now()).await.unwrap();

        assert!(!store.release_insight("u1", "2026-04-13", now()).await.unwrap());
        assert!(store.increment_insights("u1", "2026-04-13", Limit::Limited(1), now()).await.unwrap());
        assert!(store.release_insight("u1", "2026-04-13", now()).await.unwrap());

        let sub = store.latest_subscription("u1").await.unwrap().unwrap();
        assert_eq!(sub.insights_this_week, 0);
    }

    #[tokio::test]
    async fn test_increment_without_row_reports_false() {
        let store = store().await;
        assert!(!store.increment_solo_sessions("ghost", "2026-04-14", Limit::Unlimited, now()).await.unwrap());
        assert!(!store.add_minutes("ghost", 3, now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_roll_period_applies_once() {
        let store = store().await;
        let sub = store.insert_subscription("u1", &free_terms(now()), now()).await.unwrap();
        store.add_minutes("u1", 20, now()).await.unwrap();

        let next = free_terms(sub.current_period_end);
        assert!(store.roll_period(sub.id, sub.current_period_end, &next, now()).await.unwrap());
        assert!(!store.roll_period(sub.id, sub.current_period_end, &next, now()).await.unwrap());

        let rolled = store.latest_subscription("u1").await.unwrap().unwrap();
        assert_eq!(rolled.tavus_minutes_used, 0);
        assert_eq!(rolled.current_period_start, sub.current_period_end);
    }

    #[tokio::test]
    async fn test_assign_plan_keeps_minutes_within_same_period() {
        let store = store().await;
        let sub = store.insert_subscription("u1", &free_terms(now()), now()).await.unwrap();
        store.add_minutes("u1", 10, now()).await.unwrap();

        let mut terms = free_terms(sub.current_period_start);
        terms.plan = plans::get_plan_by_name("reflect_plus").unwrap();
        terms.billing_customer_id = Some("cus_1".to_string());
        let upgraded = store.assign_plan("u1", &terms, now()).await.unwrap();
        assert_eq!(upgraded.tavus_minutes_used, 10);
        assert_eq!(upgraded.tavus_minutes_limit, Limit::Limited(120));
        assert_eq!(upgraded.billing_customer_id.as_deref(), Some("cus_1"));

        let fresh_period = free_terms(now() + Duration::days(1));
        let reset = store.assign_plan("u1", &fresh_period, now()).await.unwrap();
        assert_eq!(reset.tavus_minutes_used, 0);
        // Customer id survives when the new terms carry none
        assert_eq!(reset.billing_customer_id.as_deref(), Some("cus_1"));
    }
}
