//! Billing provider seam and purchase adapter

mod adapter;
mod mock;
mod validation;

pub use adapter::{BillingAdapter, PurchaseFailure, PurchaseOutcome};
pub use mock::MockBillingProvider;
pub use validation::{luhn_valid, validate_card, CardDetails};

use crate::error::Result;
use async_trait::async_trait;
use haven_common::db::PurchaseRecord;
use haven_common::plans::{self, Plan};
use serde::Serialize;

/// A purchasable product
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Package {
    /// External product identifier
    pub id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub display_name: String,
    pub price: f64,
    pub annual: bool,
}

impl Package {
    fn for_plan(plan: &Plan, annual: bool) -> Option<Self> {
        let id = plan.product_id(annual)?;
        Some(Self {
            id: id.to_string(),
            plan_id: plan.id.to_string(),
            plan_name: plan.name.to_string(),
            display_name: plan.display_name.to_string(),
            price: if annual {
                plan.annual_price
            } else {
                plan.monthly_price
            },
            annual,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offerings {
    pub packages: Vec<Package>,
}

impl Offerings {
    /// Monthly and annual packages for every paid plan in the catalog
    pub fn from_catalog() -> Self {
        let packages = plans::all_plans()
            .iter()
            .flat_map(|plan| [Package::for_plan(plan, false), Package::for_plan(plan, true)])
            .flatten()
            .collect();
        Self { packages }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseResult {
    pub success: bool,
    pub purchase: Option<PurchaseRecord>,
    pub error: Option<String>,
}

impl PurchaseResult {
    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            success: false,
            purchase: None,
            error: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn get_offerings(&self) -> Result<Offerings>;

    async fn purchase_package(
        &self,
        user_id: &str,
        package_id: &str,
        is_annual: bool,
    ) -> Result<PurchaseResult>;

    /// Full purchase history, newest first
    async fn restore_purchases(&self, user_id: &str) -> Result<Vec<PurchaseRecord>>;

    /// Stop renewal; the current purchase stays valid until it expires
    async fn cancel_subscription(&self, user_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offerings_cover_paid_plans_only() {
        let offerings = Offerings::from_catalog();
        assert_eq!(offerings.packages.len(), 4);
        assert!(offerings.packages.iter().all(|p| p.price > 0.0));

        let annual = offerings
            .packages
            .iter()
            .find(|p| p.id == "haven_resolve_together_annual")
            .unwrap();
        assert!(annual.annual);
        assert_eq!(annual.price, 199.99);
    }
}
