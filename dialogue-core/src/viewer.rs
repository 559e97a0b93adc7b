//! Live trace viewer: a static page plus an incremental polling endpoint.

use crate::trace::{TraceEvent, TraceRecorder};
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const VIEWER_PAGE: &str = include_str!("viewer.html");

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    since: u64,
}

#[derive(Debug, Serialize)]
struct EventsResponse {
    events: Vec<TraceEvent>,
    next_id: u64,
}

async fn index_page() -> Html<&'static str> {
    Html(VIEWER_PAGE)
}

async fn poll_events(
    State(recorder): State<Arc<TraceRecorder>>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    if !recorder.is_enabled() {
        return Json(EventsResponse {
            events: Vec::new(),
            next_id: 0,
        });
    }
    let (events, next_id) = recorder.get_events_since(query.since);
    Json(EventsResponse { events, next_id })
}

/// Build the viewer router around a shared recorder.
pub fn viewer_router(recorder: Arc<TraceRecorder>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/events", get(poll_events))
        .with_state(recorder)
}

/// Serve the trace viewer on localhost until the process exits.
pub async fn serve_viewer(recorder: Arc<TraceRecorder>, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("trace viewer listening on http://127.0.0.1:{port}");
    axum::serve(listener, viewer_router(recorder)).await
}
