//! haven-server library
//!
//! Subscription entitlements, usage metering, session lifecycle and billing
//! for Haven, served over HTTP.

use axum::Router;
use haven_common::events::EventBus;
use haven_common::Clock;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod analytics;
pub mod api;
pub mod billing;
pub mod cleanup;
pub mod config;
pub mod entitlements;
pub mod error;
pub mod identity;
pub mod insights;
pub mod metering;
pub mod sessions;
pub mod store;
pub mod video;

pub use error::{Error, Result};

use analytics::AnalyticsService;
use billing::{BillingAdapter, BillingProvider, MockBillingProvider};
use cleanup::CleanupQueue;
use config::ServiceConfig;
use entitlements::EntitlementResolver;
use identity::GatewayIdentity;
use insights::InsightService;
use metering::UsageMeter;
use sessions::{SessionCoordinator, SessionRepository};
use store::SqliteSubscriptionStore;
use video::VideoGateway;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: EventBus,
    pub resolver: Arc<EntitlementResolver>,
    pub meter: Arc<UsageMeter>,
    pub sessions: Arc<SessionCoordinator>,
    pub billing: Arc<BillingAdapter>,
    pub insights: Arc<InsightService>,
    pub analytics: Arc<AnalyticsService>,
    pub video: Arc<VideoGateway>,
    pub cleanup: CleanupQueue,
}

impl AppState {
    /// Wire services with the configured video provider and the mock
    /// billing provider
    ///
    /// Spawns the cleanup worker, so it must run inside a tokio runtime.
    pub fn new(db: SqlitePool, config: &ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        let events = EventBus::new(config.server.event_capacity);
        let video = Arc::new(VideoGateway::from_settings(
            config.video.clone(),
            events.clone(),
            clock.clone(),
        ));
        let billing: Arc<dyn BillingProvider> =
            Arc::new(MockBillingProvider::new(db.clone(), clock.clone()));
        Self::with_providers(db, config, clock, events, video, billing)
    }

    /// Wire services around explicit provider instances
    pub fn with_providers(
        db: SqlitePool,
        config: &ServiceConfig,
        clock: Arc<dyn Clock>,
        events: EventBus,
        video: Arc<VideoGateway>,
        billing_provider: Arc<dyn BillingProvider>,
    ) -> Self {
        let resolver = Arc::new(EntitlementResolver::new(
            Arc::new(SqliteSubscriptionStore::new(db.clone())),
            Arc::new(GatewayIdentity),
            clock,
            events.clone(),
        ));
        let meter = Arc::new(UsageMeter::new(resolver.clone()));
        let cleanup = CleanupQueue::start(
            config.cleanup.queue_capacity,
            Duration::from_millis(config.cleanup.deadline_ms),
        );

        let sessions = Arc::new(SessionCoordinator::new(
            resolver.clone(),
            meter.clone(),
            SessionRepository::new(db.clone()),
            video.clone(),
            cleanup.clone(),
            events.clone(),
            config.sessions.clone(),
        ));
        let billing = Arc::new(BillingAdapter::new(billing_provider, resolver.clone()));
        let insights = Arc::new(InsightService::new(
            db.clone(),
            resolver.clone(),
            meter.clone(),
            events.clone(),
        ));
        let analytics = Arc::new(AnalyticsService::new(db.clone(), resolver.clone()));

        Self {
            db,
            events,
            resolver,
            meter,
            sessions,
            billing,
            insights,
            analytics,
            video,
            cleanup,
        }
    }
}

/// Build application router
///
/// Everything except `/health`, `/api/plans` and `/api/buildinfo` requires
/// the `x-user-id` header.
pub fn build_router(state: AppState) -> Router {
    use api::{billing, insights, sessions, subscription};
    use axum::routing::{get, post};

    let api_routes = Router::new()
        .route("/api/plans", get(subscription::list_plans))
        .route("/api/buildinfo", get(api::get_build_info))
        .route("/api/subscription", get(subscription::get_subscription))
        .route("/api/allowances", get(subscription::get_allowances))
        .route("/api/analytics", get(subscription::get_usage_summary))
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::start_session),
        )
        .route("/api/sessions/join", post(sessions::join_session))
        .route("/api/sessions/:id", get(sessions::get_session))
        .route("/api/sessions/:id/complete", post(sessions::complete_session))
        .route("/api/sessions/:id/beacon", post(sessions::session_beacon))
        .route(
            "/api/sessions/:id/conversation",
            get(sessions::conversation_status),
        )
        .route(
            "/api/insights",
            get(insights::list_insights).post(insights::create_insight),
        )
        .route("/api/billing/offerings", get(billing::get_offerings))
        .route("/api/billing/purchase", post(billing::purchase))
        .route("/api/billing/cancel", post(billing::cancel))
        .route("/api/billing/restore", post(billing::restore))
        .route("/events", get(api::event_stream));

    Router::new()
        .merge(api_routes)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
