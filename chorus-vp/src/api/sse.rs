//! Server-Sent Events (SSE) stream of engine events
//!
//! `GET /events` streams every [`VoiceEvent`]; `?session=ID` narrows it to
//! one session.

use super::AppContext;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use chorus_common::events::VoiceEvent;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    session: Option<String>,
}

impl EventFilter {
    fn accepts(&self, event: &VoiceEvent) -> bool {
        self.session
            .as_deref()
            .map_or(true, |session| event.session_id() == session)
    }
}

/// GET /events - SSE event stream
pub async fn event_stream(
    State(ctx): State<AppContext>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(session = ?filter.session, "New SSE client connected");

    let rx = ctx.manager.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let item = match result {
            Ok(event) if filter.accepts(&event) => to_sse(&event),
            Ok(_) => None,
            Err(e) => {
                // Lagged receiver; the client keeps the stream and misses some events
                warn!("SSE stream error: {:?}", e);
                None
            }
        };
        async move { item }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_sse(event: &VoiceEvent) -> Option<Result<Event, Infallible>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}
