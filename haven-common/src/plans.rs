//! Plan catalog
//!
//! Static registry of the subscription tiers. Lookups never fail; an unknown
//! key yields `None`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of the default tier assigned to new users
pub const FREE_PLAN_ID: &str = "plan_free";

/// Quota on a metered dimension
///
/// Serializes as a bare integer or the string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Limited(u32),
    Unlimited,
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    /// Database representation: NULL means unlimited
    pub fn as_column(&self) -> Option<i64> {
        match self {
            Limit::Limited(n) => Some(*n as i64),
            Limit::Unlimited => None,
        }
    }

    pub fn from_column(value: Option<i64>) -> Self {
        match value {
            Some(n) => Limit::Limited(n.clamp(0, u32::MAX as i64) as u32),
            None => Limit::Unlimited,
        }
    }

    /// Units left after `used` have been consumed
    ///
    /// Usage above the limit (overage) saturates at zero.
    pub fn remaining(&self, used: u32) -> Limit {
        match self {
            Limit::Limited(max) => Limit::Limited(max.saturating_sub(used)),
            Limit::Unlimited => Limit::Unlimited,
        }
    }

    /// Whether `requested` more units fit under the limit
    pub fn admits(&self, used: u32, requested: u32) -> bool {
        match self {
            Limit::Limited(max) => max.saturating_sub(used) >= requested,
            Limit::Unlimited => true,
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Limited(n) => serializer.serialize_u32(*n),
            Limit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u32),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => Ok(Limit::Limited(n)),
            Raw::Word(w) if w.eq_ignore_ascii_case("unlimited") => Ok(Limit::Unlimited),
            Raw::Word(w) => Err(serde::de::Error::custom(format!(
                "expected integer or \"unlimited\", got \"{}\"",
                w
            ))),
        }
    }
}

/// Feature limits granted by a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanFeatures {
    /// Conversation minutes per billing period
    pub metered_minutes: Limit,
    pub solo_sessions_per_day: Limit,
    pub insights_per_week: Limit,
    pub group_sessions: bool,
    pub history_retention_days: u32,
    pub priority_support: bool,
}

/// A subscription tier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub id: &'static str,
    /// Internal key used by purchase requests
    pub name: &'static str,
    pub display_name: &'static str,
    pub monthly_price: f64,
    pub annual_price: f64,
    pub features: PlanFeatures,
    pub monthly_product_id: Option<&'static str>,
    pub annual_product_id: Option<&'static str>,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.id == FREE_PLAN_ID
    }

    /// External billing product for the chosen cadence
    pub fn product_id(&self, annual: bool) -> Option<&'static str> {
        if annual {
            self.annual_product_id
        } else {
            self.monthly_product_id
        }
    }
}

static PLANS: [Plan; 3] = [
    Plan {
        id: FREE_PLAN_ID,
        name: "free",
        display_name: "Free",
        monthly_price: 0.0,
        annual_price: 0.0,
        features: PlanFeatures {
            metered_minutes: Limit::Limited(25),
            solo_sessions_per_day: Limit::Limited(1),
            insights_per_week: Limit::Limited(1),
            group_sessions: false,
            history_retention_days: 7,
            priority_support: false,
        },
        monthly_product_id: None,
        annual_product_id: None,
    },
    Plan {
        id: "plan_reflect_plus",
        name: "reflect_plus",
        display_name: "Reflect+",
        monthly_price: 9.99,
        annual_price: 99.99,
        features: PlanFeatures {
            metered_minutes: Limit::Limited(120),
            solo_sessions_per_day: Limit::Unlimited,
            insights_per_week: Limit::Unlimited,
            group_sessions: false,
            history_retention_days: 90,
            priority_support: false,
        },
        monthly_product_id: Some("haven_reflect_plus_monthly"),
        annual_product_id: Some("haven_reflect_plus_annual"),
    },
    Plan {
        id: "plan_resolve_together",
        name: "resolve_together",
        display_name: "Resolve Together",
        monthly_price: 19.99,
        annual_price: 199.99,
        features: PlanFeatures {
            metered_minutes: Limit::Limited(300),
            solo_sessions_per_day: Limit::Unlimited,
            insights_per_week: Limit::Unlimited,
            group_sessions: true,
            history_retention_days: 365,
            priority_support: true,
        },
        monthly_product_id: Some("haven_resolve_together_monthly"),
        annual_product_id: Some("haven_resolve_together_annual"),
    },
];

/// All plans, cheapest first
pub fn all_plans() -> &'static [Plan] {
    &PLANS
}

/// The default tier
pub fn free_plan() -> &'static Plan {
    &PLANS[0]
}

pub fn get_plan_by_id(id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|p| p.id == id)
}

/// Look up by internal key, falling back to a case-insensitive display name
/// match (`"Reflect+"`).
pub fn get_plan_by_name(name: &str) -> Option<&'static Plan> {
    PLANS
        .iter()
        .find(|p| p.name == name)
        .or_else(|| PLANS.iter().find(|p| p.display_name.eq_ignore_ascii_case(name)))
}

/// Resolve an external billing product (monthly or annual) to its plan
pub fn get_plan_by_external_product_id(product_id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|p| {
        p.monthly_product_id == Some(product_id) || p.annual_product_id == Some(product_id)
    })
}

/// Whether a product identifier is the annual variant
pub fn is_annual_product(product_id: &str) -> bool {
    PLANS.iter().any(|p| p.annual_product_id == Some(product_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_plan_defaults() {
        let free = free_plan();
        assert!(free.is_free());
        assert_eq!(free.features.metered_minutes, Limit::Limited(25));
        assert!(!free.features.group_sessions);
        assert_eq!(free.product_id(false), None);
    }

    #[test]
    fn test_lookup_by_id_name_and_product() {
        let plan = get_plan_by_name("resolve_together").unwrap();
        assert_eq!(get_plan_by_id(plan.id), Some(plan));
        assert_eq!(
            get_plan_by_external_product_id("haven_resolve_together_annual"),
            Some(plan)
        );
        assert_eq!(get_plan_by_name("reflect+").map(|p| p.name), Some("reflect_plus"));
    }

    #[test]
    fn test_unknown_lookups_return_none() {
        assert!(get_plan_by_id("plan_platinum").is_none());
        assert!(get_plan_by_name("").is_none());
        assert!(get_plan_by_external_product_id("haven_free_monthly").is_none());
    }

    #[test]
    fn test_annual_product_detection() {
        assert!(is_annual_product("haven_reflect_plus_annual"));
        assert!(!is_annual_product("haven_reflect_plus_monthly"));
    }

    #[test]
    fn test_limit_remaining_saturates_on_overage() {
        assert_eq!(Limit::Limited(25).remaining(30), Limit::Limited(0));
        assert_eq!(Limit::Unlimited.remaining(u32::MAX), Limit::Unlimited);
    }

    #[test]
    fn test_limit_admits_boundary() {
        let limit = Limit::Limited(100);
        assert!(!limit.admits(96, 5));
        assert!(limit.admits(96, 4));
        assert!(Limit::Unlimited.admits(u32::MAX, u32::MAX));
    }

    #[test]
    fn test_limit_serde_forms() {
        assert_eq!(serde_json::to_string(&Limit::Limited(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Limit::Unlimited).unwrap(), "\"unlimited\"");
        assert_eq!(serde_json::from_str::<Limit>("7").unwrap(), Limit::Limited(7));
        assert_eq!(
            serde_json::from_str::<Limit>("\"unlimited\"").unwrap(),
            Limit::Unlimited
        );
        assert!(serde_json::from_str::<Limit>("\"lots\"").is_err());
    }

    #[test]
    fn test_limit_column_round_trip() {
        assert_eq!(Limit::from_column(None), Limit::Unlimited);
        assert_eq!(Limit::from_column(Some(-4)), Limit::Limited(0));
        assert_eq!(Limit::Limited(25).as_column(), Some(25));
    }
}
