//! # Haven Common Library
//!
//! Shared code for the Haven services including:
//! - Plan catalog (subscription tiers and their feature limits)
//! - Subscription, session and purchase models
//! - Database initialization and schema
//! - Event types (HavenEvent enum) and the event bus
//! - Configuration loading and clock utilities

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod plans;
pub mod time;

pub use error::{Error, Result};
pub use plans::{Limit, Plan, PlanFeatures};
pub use time::{Clock, FixedClock, SystemClock};
