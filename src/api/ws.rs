// =============================================================================
// WebSocket Event Bridge — bus topics pushed to dashboard clients
// =============================================================================
//
// Clients connect to `/api/v1/events?topics=market:update,gamma:command` and
// receive every envelope published on those topics from then on, one JSON
// text frame each, in bus order.  Without `topics` all four are bridged.
//
// The handler also:
//   - Responds to Ping frames with Pong frames.
//   - Drops the bus subscription on disconnect (the bus prunes it on the
//     next publish).
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app_state::AppContext;
use crate::events::{Subscription, Topic};

// =============================================================================
// Query parameters
// =============================================================================

#[derive(Deserialize)]
pub struct EventsQuery {
    topics: Option<String>,
}

/// Parse a comma-separated topic list. Empty means every topic.
fn parse_topics(raw: Option<&str>) -> Result<Vec<Topic>, String> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(Topic::ALL.to_vec()),
        Some(r) => r,
    };
    let mut topics = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let topic = Topic::parse(name).ok_or_else(|| format!("unknown topic: {name}"))?;
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    Ok(topics)
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let topics = match parse_topics(query.topics.as_deref()) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "event stream rejected");
            return (StatusCode::BAD_REQUEST, e).into_response();
        }
    };

    info!(topics = ?topics, "event stream accepted — upgrading");
    let subscription = ctx.bus.subscribe(&topics);
    ws.on_upgrade(move |socket| handle_connection(socket, subscription))
        .into_response()
}

// =============================================================================
// Connection handler
// =============================================================================

/// Runs two concurrent branches via `tokio::select!`:
///   1. **Forward** — relay each bus envelope as a text frame.
///   2. **Recv** — answer pings, stop on close or error.
async fn handle_connection(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let mut forwarded: u64 = 0;

    loop {
        tokio::select! {
            envelope = subscription.recv() => {
                let Some(envelope) = envelope else {
                    info!("event bus closed — ending stream");
                    break;
                };
                match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            debug!(error = %e, "WebSocket send failed — disconnecting");
                            break;
                        }
                        forwarded += 1;
                    }
                    // Serialisation errors are not network errors; keep going.
                    Err(e) => warn!(error = %e, topic = %envelope.topic, "failed to serialise envelope"),
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "Failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }

    info!(forwarded, "event stream closed");
}
