//! Server-Sent Events endpoint

use super::server::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events - stream of committed stage events
///
/// Each SSE frame is named after the event type (`waxing_posted`, ...).
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    foundry_common::sse::stage_event_stream(state.hub.subscribe())
}
