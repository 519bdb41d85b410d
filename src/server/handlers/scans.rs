//! Scan control surface, including the per-scan SSE stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;

use super::ApiError;
use crate::models::{ScanEventRecord, ScanSession};
use crate::server::AppState;

/// Trigger a scan for a portal. Returns 202 with the scan id; the scan
/// itself runs detached and is observable via the stream endpoint.
pub async fn start_scan(
    State(state): State<AppState>,
    Path(portal_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let scan_id = state.executor.scan_detached(&portal_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "scan_id": scan_id, "portal_id": portal_id })),
    ))
}

pub async fn get_scan(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> Result<Json<ScanSession>, ApiError> {
    state
        .registry
        .get_scan(&scan_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("scan not found: {}", scan_id)))
}

pub async fn active_scans(State(state): State<AppState>) -> Json<Vec<ScanSession>> {
    Json(state.registry.active_scans().await)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

pub async fn scan_history(
    State(state): State<AppState>,
    Path(portal_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<ScanSession>> {
    Json(state.registry.scan_history(&portal_id, query.limit).await)
}

fn sse_event(record: &ScanEventRecord) -> Event {
    Event::default()
        .json_data(record)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

/// Stream a scan as server-sent events: the full current snapshot as an
/// `initial_state` event, then every subsequent event in order, with
/// comment-line heartbeats keeping idle connections alive. Dropping the
/// connection only stops watching; the scan keeps running.
pub async fn stream_scan(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state
        .registry
        .subscribe(&scan_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("scan not found: {}", scan_id)))?;

    let initial = Event::default()
        .json_data(json!({
            "type": "initial_state",
            "session": subscription.snapshot,
        }))
        .unwrap_or_else(|_| Event::default().data("{}"));

    let tail: BoxStream<'static, Result<Event, Infallible>> = match subscription.events {
        Some(rx) => BroadcastStream::new(rx)
            // A lagged subscriber drops the gap rather than the stream.
            .filter_map(|result| async move { result.ok() })
            .map(|record| Ok(sse_event(&record)))
            .boxed(),
        None => stream::empty().boxed(),
    };

    let events = stream::once(async move { Ok(initial) }).chain(tail);
    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    ))
}
