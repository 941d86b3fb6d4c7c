//! Live task event stream over Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{Stream, StreamExt};
use tracing::{info, warn};

use treemux_core::TaskId;

use crate::bus::BusItem;
use crate::coordinator::Coordinator;
use crate::http::responses::ApiError;
use crate::state::AppState;

/// Stream a task's events: full replay first, then live events.
///
/// Each SSE event is named after the domain event type and carries the
/// sequence number as its id. Dropped events are announced as a `gap` event.
pub async fn task_events(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let task_id = TaskId::new(task_id);
    let subscription = Coordinator::new(state).subscribe(&task_id).await?;
    info!(task_id = %task_id, "Event stream opened");

    let stream = subscription
        .into_stream()
        .map(|item| Ok::<_, Infallible>(to_sse(item)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(item: BusItem) -> Event {
    match item {
        BusItem::Event(envelope) => {
            let event = Event::default()
                .event(envelope.event.event_type())
                .id(envelope.seq.to_string());
            match event.json_data(&envelope) {
                Ok(event) => event,
                Err(e) => {
                    warn!(seq = envelope.seq, error = %e, "Failed to encode event");
                    Event::default().comment(format!("unencodable event {}", envelope.seq))
                }
            }
        }
        BusItem::Gap { skipped } => Event::default()
            .event("gap")
            .data(serde_json::json!({ "skipped": skipped }).to_string()),
    }
}
