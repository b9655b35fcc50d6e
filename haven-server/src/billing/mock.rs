//! Billing provider simulated against the local purchases table

use super::{BillingProvider, Offerings, PurchaseResult};
use crate::error::Result;
use async_trait::async_trait;
use haven_common::db::{BillingInterval, PurchaseRecord, PurchaseStatus};
use haven_common::plans;
use haven_common::time::add_months;
use haven_common::Clock;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct MockBillingProvider {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl MockBillingProvider {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Customer id from earlier purchases, or a new one
    async fn customer_id(&self, user_id: &str) -> Result<String> {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT customer_id FROM purchases WHERE user_id = ? \
             ORDER BY julianday(purchased_at), rowid LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(existing.unwrap_or_else(|| format!("cus_{}", &Uuid::new_v4().simple().to_string()[..14])))
    }
}

#[async_trait]
impl BillingProvider for MockBillingProvider {
    async fn get_offerings(&self) -> Result<Offerings> {
        Ok(Offerings::from_catalog())
    }

    async fn purchase_package(
        &self,
        user_id: &str,
        package_id: &str,
        is_annual: bool,
    ) -> Result<PurchaseResult> {
        let Some(plan) = plans::get_plan_by_external_product_id(package_id) else {
            return Ok(PurchaseResult::declined(format!("Unknown package {}", package_id)));
        };
        if plans::is_annual_product(package_id) != is_annual {
            return Ok(PurchaseResult::declined("Package does not match the billing interval"));
        }

        let now = self.clock.now();
        let record = PurchaseRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            product_id: package_id.to_string(),
            customer_id: self.customer_id(user_id).await?,
            status: PurchaseStatus::Active,
            purchased_at: now,
            expires_at: add_months(now, BillingInterval::from_annual(is_annual).months()),
        };

        let mut tx = self.pool.begin().await?;

        // A new purchase supersedes whatever was active
        sqlx::query("UPDATE purchases SET status = 'canceled' WHERE user_id = ? AND status = 'active'")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO purchases (id, user_id, product_id, customer_id, status, purchased_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.user_id)
        .bind(&record.product_id)
        .bind(&record.customer_id)
        .bind(record.status.as_str())
        .bind(record.purchased_at)
        .bind(record.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(user_id = %user_id, plan_id = plan.id, product_id = %package_id, "Mock purchase recorded");

        Ok(PurchaseResult {
            success: true,
            purchase: Some(record),
            error: None,
        })
    }

    async fn restore_purchases(&self, user_id: &str) -> Result<Vec<PurchaseRecord>> {
        let rows = sqlx::query(
            // Same-instant purchases fall back to insertion order
            "SELECT * FROM purchases WHERE user_id = ? ORDER BY julianday(purchased_at) DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(PurchaseRecord::from_row(row)?);
        }
        debug!(user_id = %user_id, count = records.len(), "Loaded purchase history");
        Ok(records)
    }

    async fn cancel_subscription(&self, user_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE purchases SET status = 'canceled' WHERE user_id = ? AND status = 'active'")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        info!(user_id = %user_id, purchases = result.rows_affected(), "Mock renewal canceled");
        Ok(())
    }
}
