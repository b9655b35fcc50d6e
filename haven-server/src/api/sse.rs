//! Server-Sent Events stream of the caller's own events

use super::user::AuthenticatedUser;
use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// GET /events
///
/// Starts with a `ConnectionStatus` event, then forwards every
/// [`haven_common::events::HavenEvent`] concerning the caller.
pub async fn event_stream(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();
    let user_id = user.0;
    debug!(user_id = %user_id, "SSE client connected");

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.user_id() != Some(user_id.as_str()) {
                        continue;
                    }
                    match serde_json::to_string(&event) {
                        Ok(json) => yield Ok(Event::default().event(event.event_type()).data(json)),
                        Err(e) => warn!("Failed to serialize event: {}", e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id = %user_id, skipped, "SSE client lagged, events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
