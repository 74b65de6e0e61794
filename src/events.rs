// =============================================================================
// Event Bus — typed publish/subscribe for downstream consumers
// =============================================================================
//
// Four topics, nothing else:
//
//   market:update   — composite market read per instrument
//   regime:change   — confirmed regime transitions (confidence >= threshold)
//   alpha:decision  — the full decision of an Alpha cycle
//   gamma:command   — the command derived from that decision
//
// Delivery: every live subscriber of a topic receives every event published
// on it after subscribing, in publish order.  Sequence numbers are assigned
// per topic under the same lock that fans the event out, so concurrent
// publishers cannot interleave a topic's stream.  Subscriber queues are
// unbounded; a dropped receiver is pruned on the next publish.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

use crate::alpha::{AlphaDecision, GammaCommand};
use crate::regime::{MarketUpdate, RegimeChangeEvent};

// =============================================================================
// Topics & events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "market:update")]
    MarketUpdate,
    #[serde(rename = "regime:change")]
    RegimeChange,
    #[serde(rename = "alpha:decision")]
    AlphaDecision,
    #[serde(rename = "gamma:command")]
    GammaCommand,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::MarketUpdate,
        Topic::RegimeChange,
        Topic::AlphaDecision,
        Topic::GammaCommand,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketUpdate => "market:update",
            Self::RegimeChange => "regime:change",
            Self::AlphaDecision => "alpha:decision",
            Self::GammaCommand => "gamma:command",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload published on the bus. The variant determines the topic.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    MarketUpdate(MarketUpdate),
    RegimeChange(RegimeChangeEvent),
    AlphaDecision(AlphaDecision),
    GammaCommand(GammaCommand),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Self::MarketUpdate(_) => Topic::MarketUpdate,
            Self::RegimeChange(_) => Topic::RegimeChange,
            Self::AlphaDecision(_) => Topic::AlphaDecision,
            Self::GammaCommand(_) => Topic::GammaCommand,
        }
    }
}

/// An event as delivered to a subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub topic: Topic,
    /// Per-topic sequence number, starting at 1.
    pub seq: u64,
    pub published_at: DateTime<Utc>,
    pub event: Arc<Event>,
}

// =============================================================================
// EventBus
// =============================================================================

#[derive(Default)]
struct TopicState {
    seq: u64,
    subscribers: Vec<UnboundedSender<Envelope>>,
}

/// In-process publish/subscribe bus shared through the application context.
#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<Topic, TopicState>>,
}

/// Receiving half of a subscription.
pub struct Subscription {
    rx: UnboundedReceiver<Envelope>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one or more topics through a single ordered queue.
    pub fn subscribe(&self, topics: &[Topic]) -> Subscription {
        let (tx, rx) = unbounded_channel();
        let mut map = self.topics.lock();
        for topic in topics {
            map.entry(*topic).or_default().subscribers.push(tx.clone());
        }
        debug!(topics = ?topics, "event bus subscription added");
        Subscription { rx }
    }

    /// Publish an event to all subscribers of its topic. Returns the number
    /// of subscribers that received it.
    pub fn publish(&self, event: Event) -> usize {
        let topic = event.topic();
        let event = Arc::new(event);
        let mut map = self.topics.lock();
        let state = map.entry(topic).or_default();
        state.seq += 1;

        let envelope = Envelope {
            topic,
            seq: state.seq,
            published_at: Utc::now(),
            event,
        };

        state
            .subscribers
            .retain(|tx| tx.send(envelope.clone()).is_ok());

        let delivered = state.subscribers.len();
        trace!(topic = %topic, seq = envelope.seq, delivered, "event published");
        delivered
    }

    /// Number of events published so far on `topic`.
    pub fn published_count(&self, topic: Topic) -> u64 {
        self.topics.lock().get(&topic).map_or(0, |s| s.seq)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.lock().get(&topic).map_or(0, |s| s.subscribers.len())
    }
}
