//! Server-Sent Events framing for a turn.
//!
//! Reply fragments go out as unnamed events carrying `{"token": ...}`. The
//! stream then ends with exactly one named `done` or `error` event.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures_util::{Stream, StreamExt, stream};
use psychtrainer_core::TurnEvent;
use serde::Serialize;
use tracing::warn;

use crate::models::{DoneEvent, ErrorEvent, TokenEvent};

const INTERRUPTED: &str = "The turn ended without a result. Please try again.";

#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    Token(TokenEvent),
    Done(DoneEvent),
    Error(ErrorEvent),
}

impl From<TurnEvent> for WireEvent {
    fn from(event: TurnEvent) -> Self {
        match event {
            TurnEvent::Token(token) => WireEvent::Token(TokenEvent { token }),
            TurnEvent::Done {
                phase,
                turn_count,
                professor_note,
            } => WireEvent::Done(DoneEvent {
                phase: phase.into(),
                turn_count,
                professor_note,
            }),
            TurnEvent::Error(error) => WireEvent::Error(ErrorEvent { error }),
        }
    }
}

impl WireEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WireEvent::Token(_))
    }

    pub fn into_sse(self) -> Event {
        match self {
            WireEvent::Token(payload) => json_event(None, &payload),
            WireEvent::Done(payload) => json_event(Some("done"), &payload),
            WireEvent::Error(payload) => json_event(Some("error"), &payload),
        }
    }
}

fn json_event<T: Serialize>(name: Option<&str>, payload: &T) -> Event {
    let event = match name {
        Some(name) => Event::default().event(name),
        None => Event::default(),
    };
    match serde_json::to_string(payload) {
        Ok(data) => event.data(data),
        Err(e) => {
            warn!("Failed to encode stream payload: {}", e);
            Event::default().event("error").data(r#"{"error":"encoding failure"}"#)
        }
    }
}

/// Forwards events up to and including the first terminal one. If the source
/// ends without a terminal event, an `error` event is appended.
pub fn with_terminal_guarantee<S>(events: S) -> impl Stream<Item = WireEvent>
where
    S: Stream<Item = TurnEvent> + Unpin,
{
    stream::unfold((events, false), |(mut events, finished)| async move {
        if finished {
            return None;
        }
        match events.next().await {
            Some(event) => {
                let event = WireEvent::from(event);
                let terminal = event.is_terminal();
                Some((event, (events, terminal)))
            }
            None => {
                warn!("Turn stream closed without a terminal event");
                let event = WireEvent::Error(ErrorEvent {
                    error: INTERRUPTED.to_string(),
                });
                Some((event, (events, true)))
            }
        }
    })
}

pub fn sse_stream<S>(events: S) -> impl Stream<Item = Result<Event, Infallible>>
where
    S: Stream<Item = TurnEvent> + Unpin,
{
    with_terminal_guarantee(events).map(|event| Ok(event.into_sse()))
}
