//! In-process subscriptions over tokio broadcast channels.

use tokio::sync::broadcast;
use tracing::trace;

use crate::port::outbound::notifier::{Event, Notifier, Topic};

/// Default per-topic buffer; slower subscribers observe `Lagged`.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fans events out to per-topic broadcast channels.
///
/// Each subscriber sees its topic's events in publish order. Clones share
/// the same channels.
#[derive(Clone)]
pub struct ChannelNotifier {
    market: broadcast::Sender<Event>,
    chain: broadcast::Sender<Event>,
    job: broadcast::Sender<Event>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            market: broadcast::channel(capacity).0,
            chain: broadcast::channel(capacity).0,
            job: broadcast::channel(capacity).0,
        }
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Market => &self.market,
            Topic::Chain => &self.chain,
            Topic::Job => &self.job,
        }
    }

    /// Receive every event published to `topic` from now on.
    #[must_use]
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.sender(topic).subscribe()
    }
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: Event) {
        let topic = event.topic();
        // No subscribers is not an error.
        if self.sender(topic).send(event).is_err() {
            trace!(topic = topic.as_str(), "No subscribers");
        }
    }
}
