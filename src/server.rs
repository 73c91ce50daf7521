//! HTTP broadcast of magnitude records.
//!
//! Provides:
//! - `GET /stream`: SSE stream, one `magnitude` event per published record
//! - `GET /magnitudes`: latest record of every recently updated event
//! - `GET /health`: liveness probe

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, PoisonError, RwLock};

use axum::{
    Json, Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use crate::models::MagnitudeRecord;

/// Capacity of the SSE broadcast channel.
const CHANNEL_CAPACITY: usize = 100;

/// Maximum number of events kept for `/magnitudes`.
/// Follows NASA Power of 10: bounded resources.
const MAX_LATEST: usize = 1000;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Serialized records for SSE clients
    tx: broadcast::Sender<String>,
    /// Latest record per event ID
    latest: Arc<RwLock<HashMap<String, MagnitudeRecord>>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel::<String>(CHANNEL_CAPACITY);
        Self {
            tx,
            latest: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store and broadcast freshly published records.
    pub fn publish(&self, records: &[MagnitudeRecord]) {
        if records.is_empty() {
            return;
        }
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        for rec in records {
            latest.insert(rec.event_id.clone(), rec.clone());
            match serde_json::to_string(rec) {
                // No receivers is not an error
                Ok(json) => {
                    let _ = self.tx.send(json);
                }
                Err(e) => debug!("failed to serialize record: {e}"),
            }
        }

        // Evict the least recently updated events
        while latest.len() > MAX_LATEST {
            let Some(oldest) = latest
                .values()
                .min_by_key(|r| r.creation_time)
                .map(|r| r.event_id.clone())
            else {
                break;
            };
            latest.remove(&oldest);
        }

        debug_assert!(latest.len() <= MAX_LATEST);
    }

    fn snapshot(&self) -> Vec<MagnitudeRecord> {
        let latest = self.latest.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<MagnitudeRecord> = latest.values().cloned().collect();
        records.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
        records
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(sse_handler))
        .route("/magnitudes", get(magnitudes_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve the router on `host:port` until the process exits.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or serving fails.
pub async fn run_server(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("serving magnitudes on http://{addr}");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

/// SSE stream handler for real-time magnitudes.
async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(json) => Some(Ok(Event::default().event("magnitude").data(json))),
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Latest record per event, most recent first.
async fn magnitudes_handler(State(state): State<AppState>) -> Json<Vec<MagnitudeRecord>> {
    Json(state.snapshot())
}

/// Health check endpoint.
async fn health_handler() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;

    fn record(event_id: &str, update: u32, secs: i64) -> MagnitudeRecord {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(secs);
        MagnitudeRecord {
            event_id: event_id.into(),
            origin_id: "o1".into(),
            magnitude: 3.0,
            magnitude_type: "MVS".into(),
            station_count: 1,
            available_stations: 1,
            station_magnitudes: Vec::new(),
            update,
            comments: Vec::new(),
            likelihood: 0.99,
            is_valid: true,
            delta_mag: 0.0,
            delta_pick: 0.0,
            median_station_magnitude: 3.0,
            latitude: 46.0,
            longitude: 8.0,
            depth_km: None,
            origin_time: t,
            creation_time: t,
        }
    }

    #[tokio::test]
    async fn test_latest_per_event() {
        let state = AppState::new();
        state.publish(&[record("e1", 0, 0), record("e2", 0, 1)]);
        state.publish(&[record("e1", 1, 2)]);

        let Json(records) = magnitudes_handler(State(state)).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_id, "e1");
        assert_eq!(records[0].update, 1);
        assert_eq!(records[1].event_id, "e2");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let state = AppState::new();
        let mut rx = state.tx.subscribe();
        state.publish(&[record("e1", 0, 0)]);

        let json = rx.recv().await.unwrap();
        let back: MagnitudeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_id, "e1");
    }

    #[test]
    fn test_bounded_latest() {
        let state = AppState::new();
        let records: Vec<_> = (0..=MAX_LATEST as i64)
            .map(|i| record(&format!("e{i}"), 0, i))
            .collect();
        state.publish(&records);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.len(), MAX_LATEST);
        assert!(snapshot.iter().all(|r| r.event_id != "e0"));
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health_handler().await, "OK");
    }
}
