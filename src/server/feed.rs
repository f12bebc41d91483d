//! HTTP surface: health check and the live consumption feed.

use std::convert::Infallible;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use acueducto_core::{ChangeEvent, CONSUMO_UPDATE};
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::Stream;
use serde::Serialize;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;

use super::bridge::NotificationBridge;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<NotificationBridge>,
    ids: Arc<DeliveryIds>,
}

impl AppState {
    pub fn new(bridge: Arc<NotificationBridge>) -> Self {
        Self {
            bridge,
            ids: Arc::new(DeliveryIds::default()),
        }
    }
}

/// Event ids: delivery time in milliseconds, bumped when two deliveries
/// land in the same millisecond.
#[derive(Debug, Default)]
struct DeliveryIds {
    last: AtomicI64,
}

impl DeliveryIds {
    fn next(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let id = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, id, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return id,
                Err(current) => last = current,
            }
        }
    }
}

pub fn router(bridge: Arc<NotificationBridge>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/consumo/events", get(consumption_events))
        .with_state(AppState::new(bridge))
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Streams every consumption change published after the client connects.
async fn consumption_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bridge.subscribe();
    tracing::info!(
        subscribers = state.bridge.subscriber_count(),
        "Live feed client connected"
    );

    let ids = state.ids.clone();
    let stream = BroadcastStream::new(rx).filter_map(move |received| match received {
        Ok(event) => to_sse(&event, ids.next()),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Live feed client lagged, dropped oldest events");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &ChangeEvent, id: i64) -> Option<Result<Event, Infallible>> {
    match Event::default()
        .event(CONSUMO_UPDATE)
        .id(id.to_string())
        .json_data(event)
    {
        Ok(sse) => Some(Ok(sse)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode live feed event");
            None
        }
    }
}
