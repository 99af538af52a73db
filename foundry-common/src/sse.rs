//! Server-Sent Events (SSE) utilities
//!
//! Turns an event hub subscription into an axum SSE response.

use crate::events::Subscription;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Create an SSE stream carrying every stage event the subscription receives
///
/// The first frame is a `ConnectionStatus` event so clients can show a
/// connected indicator; each stage event is sent with its `event_type` as the
/// SSE event name and the full event as JSON data. The stream ends when the
/// hub drops the subscription (client too slow); the client is expected to
/// reconnect and re-read the queues.
pub fn stage_event_stream(
    mut subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscriber = subscription.id();
    info!(subscriber = %subscriber, "New SSE client connected");

    let stream = async_stream::stream! {
        // Send initial connected status
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        while let Some(event) = subscription.next().await {
            match Event::default()
                .event(event.event_type.as_str())
                .json_data(&event)
            {
                Ok(sse_event) => {
                    debug!(subscriber = %subscriber, flask_id = event.flask_id, "SSE: forwarding event");
                    yield Ok(sse_event);
                }
                Err(e) => warn!(subscriber = %subscriber, "Failed to serialize stage event: {}", e),
            }
        }

        info!(subscriber = %subscriber, "SSE subscription closed by hub");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
