//! Server-Sent Events support

use crate::runtime::{Subscription, TurnEvent};
use crate::session::{ChatTurn, Session};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert broadcast stream to SSE stream, starting with the stored state
pub fn sse_stream(
    session: Option<Session>,
    turns: Vec<ChatTurn>,
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init_data = json!({
        "type": "init",
        "session": session,
        "turns": turns,
    });
    let init = futures::stream::once(async move {
        Ok(Event::default().event("init").data(init_data.to_string()))
    });

    let (broadcast_rx, release) = subscription.into_parts();
    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(event) => Some(Ok(turn_event_to_axum(&event))),
        Err(_) => None, // Skip lagged messages
    });
    // Owns the release guard, so the channel is released when the client goes away
    let release = futures::stream::once(async move { drop(release) }).filter_map(|()| None);

    Sse::new(init.chain(broadcasts).chain(release)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn turn_event_to_axum(event: &TurnEvent) -> Event {
    let event_type = match event {
        TurnEvent::UserMessage { .. } => "user_message",
        TurnEvent::BotReply { .. } => "bot_reply",
        TurnEvent::Reset => "reset",
        TurnEvent::Error { .. } => "error",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| json!({ "type": event_type }).to_string());
    Event::default().event(event_type).data(data)
}
