//! Database models
//!
//! Rows are decoded by hand from `SqliteRow` so enum columns can be validated
//! on the way in. UUIDs are stored as their hyphenated text form.

use crate::plans::Limit;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// Billing state of a subscription row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    Unpaid,
}

text_enum!(SubscriptionStatus {
    Active => "active",
    Canceled => "canceled",
    PastDue => "past_due",
    Unpaid => "unpaid",
});

impl SubscriptionStatus {
    /// Whether paid features stay available in this state
    ///
    /// Past-due accounts keep access while the billing provider retries.
    pub fn grants_paid_features(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::PastDue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Annual,
}

text_enum!(BillingInterval {
    Monthly => "monthly",
    Annual => "annual",
});

impl BillingInterval {
    pub fn from_annual(annual: bool) -> Self {
        if annual {
            BillingInterval::Annual
        } else {
            BillingInterval::Monthly
        }
    }

    pub fn months(&self) -> u32 {
        match self {
            BillingInterval::Monthly => 1,
            BillingInterval::Annual => 12,
        }
    }
}

/// One user's binding to a plan plus usage counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: String,
    pub plan_id: String,
    /// Denormalized display name of the plan
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub billing_interval: BillingInterval,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub tavus_minutes_used: u32,
    /// Copied from the plan when the plan is assigned
    pub tavus_minutes_limit: Limit,
    pub last_solo_session_date: Option<String>,
    pub solo_sessions_today: u32,
    /// Week key (Monday date) of the most recent insight
    pub last_insight_date: Option<String>,
    pub insights_this_week: u32,
    pub billing_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            plan_id: row.try_get("plan_id")?,
            plan_name: row.try_get("plan_name")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            billing_interval: row.try_get::<String, _>("billing_interval")?.parse()?,
            current_period_start: row.try_get("current_period_start")?,
            current_period_end: row.try_get("current_period_end")?,
            cancel_at_period_end: row.try_get("cancel_at_period_end")?,
            tavus_minutes_used: counter(row.try_get("tavus_minutes_used")?),
            tavus_minutes_limit: Limit::from_column(row.try_get("tavus_minutes_limit")?),
            last_solo_session_date: row.try_get("last_solo_session_date")?,
            solo_sessions_today: counter(row.try_get("solo_sessions_today")?),
            last_insight_date: row.try_get("last_insight_date")?,
            insights_this_week: counter(row.try_get("insights_this_week")?),
            billing_customer_id: row.try_get("billing_customer_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Solo reflection
    Solo,
    /// Group conflict resolution
    Group,
}

text_enum!(SessionKind {
    Solo => "solo",
    Group => "group",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Archived,
}

text_enum!(SessionStatus {
    Active => "active",
    Completed => "completed",
    Archived => "archived",
});

/// What ended a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCompletionTrigger {
    /// Explicit "end session" action
    UserEnded,
    /// Session view torn down by navigation
    Unmounted,
    /// Page became hidden
    PageHidden,
    /// Page unload beacon
    PageUnload,
}

text_enum!(SessionCompletionTrigger {
    UserEnded => "user_ended",
    Unmounted => "unmounted",
    PageHidden => "page_hidden",
    PageUnload => "page_unload",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            role: row.try_get("role")?,
            joined_at: row.try_get("joined_at")?,
        })
    }
}

/// A wellness session and its video conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub creator_id: String,
    pub invite_code: Option<String>,
    pub invite_expires_at: Option<DateTime<Utc>>,
    pub conversation_id: Option<String>,
    pub conversation_url: Option<String>,
    pub fallback_mode: bool,
    pub max_duration_minutes: u32,
    pub minutes_consumed: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completion_trigger: Option<SessionCompletionTrigger>,
    pub participants: Vec<Participant>,
}

impl Session {
    /// Decode the session row; participants are loaded separately
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            kind: row.try_get::<String, _>("kind")?.parse()?,
            status: row.try_get::<String, _>("status")?.parse()?,
            creator_id: row.try_get("creator_id")?,
            invite_code: row.try_get("invite_code")?,
            invite_expires_at: row.try_get("invite_expires_at")?,
            conversation_id: row.try_get("conversation_id")?,
            conversation_url: row.try_get("conversation_url")?,
            fallback_mode: row.try_get("fallback_mode")?,
            max_duration_minutes: counter(row.try_get("max_duration_minutes")?),
            minutes_consumed: counter(row.try_get("minutes_consumed")?),
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            completion_trigger: row
                .try_get::<Option<String>, _>("completion_trigger")?
                .map(|t| t.parse())
                .transpose()?,
            participants: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: Option<Uuid>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let session_id: Option<String> = row.try_get("session_id")?;
        Ok(Self {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            user_id: row.try_get("user_id")?,
            session_id: session_id.as_deref().map(parse_uuid).transpose()?,
            body: row.try_get("body")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Active,
    Canceled,
}

text_enum!(PurchaseStatus {
    Active => "active",
    Canceled => "canceled",
});

/// A purchase as recorded by the billing provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub user_id: String,
    pub product_id: String,
    pub customer_id: String,
    pub status: PurchaseStatus,
    pub purchased_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PurchaseRecord {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid(&row.try_get::<String, _>("id")?)?,
            user_id: row.try_get("user_id")?,
            product_id: row.try_get("product_id")?,
            customer_id: row.try_get("customer_id")?,
            status: row.try_get::<String, _>("status")?.parse()?,
            purchased_at: row.try_get("purchased_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

fn parse_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| Error::Internal(format!("invalid UUID '{}': {}", text, e)))
}

fn counter(value: i64) -> u32 {
    value.clamp(0, u32::MAX as i64) as u32
}
