//! Shared fixtures for haven-server integration tests
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use haven_common::db::init_memory_database;
use haven_common::events::EventBus;
use haven_common::FixedClock;
use haven_server::billing::MockBillingProvider;
use haven_server::config::ServiceConfig;
use haven_server::video::{VideoGateway, VideoProvider};
use haven_server::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

/// Tuesday morning, mid-month
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 15, 10, 0, 0).unwrap()
}

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
    pub clock: Arc<FixedClock>,
}

/// In-memory database, default settings (no video key, so fallback mode)
pub async fn test_app() -> TestApp {
    test_app_with(ServiceConfig::default()).await
}

pub async fn test_app_with(config: ServiceConfig) -> TestApp {
    let pool = init_memory_database().await.expect("in-memory database");
    let clock = Arc::new(FixedClock::new(start_time()));
    let state = AppState::new(pool, &config, clock.clone());
    TestApp {
        router: build_router(state.clone()),
        state,
        clock,
    }
}

/// Default settings with `provider` as the live video client
pub async fn test_app_with_video(provider: Arc<dyn VideoProvider>) -> TestApp {
    let config = ServiceConfig::default();
    let pool = init_memory_database().await.expect("in-memory database");
    let clock = Arc::new(FixedClock::new(start_time()));
    let events = EventBus::new(config.server.event_capacity);
    let video = Arc::new(VideoGateway::new(
        Some(provider),
        config.video.clone(),
        events.clone(),
        clock.clone(),
    ));
    let billing = Arc::new(MockBillingProvider::new(pool.clone(), clock.clone()));
    let state = AppState::with_providers(pool, &config, clock.clone(), events, video, billing);
    TestApp {
        router: build_router(state.clone()),
        state,
        clock,
    }
}

impl TestApp {
    /// Send a request as `user` (no header when None) and decode the JSON reply
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

/// Poll until `check` passes or a second elapses
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
