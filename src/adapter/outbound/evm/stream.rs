//! Push-based event source over `eth_subscribe`.
//!
//! A background task holds one websocket subscribed to `newHeads` and to the
//! contract's `logs`, and buffers what arrives per block. The indexer reads
//! the buffer through [`EventSource`]; when the connection drops, the buffer
//! is marked incomplete and the task reconnects with backoff.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::abi::{decode_log, EventTopics, RpcLog};
use super::rpc::parse_quantity;
use crate::domain::backoff::Backoff;
use crate::domain::event::ChainEvent;
use crate::domain::id::{BlockHash, ChainId};
use crate::error::{ChainError, Error, Result};
use crate::port::outbound::ledger::{EventSource, StreamHealth};

#[derive(Debug, Deserialize)]
struct HeadNotification {
    number: String,
    hash: String,
}

#[derive(Debug, Default)]
struct BufferedBlock {
    hash: Option<BlockHash>,
    events: Vec<ChainEvent>,
}

/// Blocks received since the subscription was (re)established.
#[derive(Debug, Default)]
struct StreamBuffer {
    connected: bool,
    head: Option<u64>,
    earliest: Option<u64>,
    last_block_at: Option<Instant>,
    blocks: BTreeMap<u64, BufferedBlock>,
}

impl StreamBuffer {
    fn disconnect(&mut self) {
        self.connected = false;
        self.earliest = None;
        self.blocks.clear();
    }

    fn on_head(&mut self, number: u64, hash: BlockHash, capacity: u64) {
        let contiguous = self.head.is_some_and(|head| number <= head + 1);
        if !contiguous {
            if self.head.is_some() {
                warn!(block = number, previous = ?self.head, "Gap in head stream");
            }
            self.earliest = Some(number);
        }

        if let Some(existing) = self.blocks.get(&number) {
            if existing.hash.as_ref().is_some_and(|h| *h != hash) {
                debug!(block = number, "Head replaced, dropping buffered descendants");
                let _ = self.blocks.split_off(&(number + 1));
            }
        }

        let entry = self.blocks.entry(number).or_default();
        entry.events.retain(|event| event.block_hash == hash);
        entry.hash = Some(hash);

        self.head = Some(number);
        self.last_block_at = Some(Instant::now());

        let horizon = number.saturating_sub(capacity);
        self.blocks = self.blocks.split_off(&horizon);
        if self.earliest.is_some_and(|earliest| earliest < horizon) {
            self.earliest = Some(horizon);
        }
    }

    fn on_log(&mut self, event: ChainEvent, removed: bool) {
        let entry = self.blocks.entry(event.block_number).or_default();
        let id = event.id();
        entry.events.retain(|existing| existing.id() != id);
        if removed {
            return;
        }
        if entry.hash.as_ref().is_some_and(|h| *h != event.block_hash) {
            return;
        }
        entry.events.push(event);
    }

    fn health(&self) -> StreamHealth {
        StreamHealth {
            connected: self.connected,
            head: self.head,
            earliest_block: self.earliest,
            last_block_age: self.last_block_at.map(|at| at.elapsed()),
        }
    }
}

/// Websocket subscription to heads and market logs.
pub struct WsEventStream {
    url: String,
    chain_id: ChainId,
    contract: String,
    topics: EventTopics,
    capacity: u64,
    buffer: Mutex<StreamBuffer>,
}

impl WsEventStream {
    /// `capacity` is how many blocks below the head stay buffered.
    #[must_use]
    pub fn new(url: impl Into<String>, chain_id: ChainId, contract: impl Into<String>, capacity: u64) -> Self {
        Self {
            url: url.into(),
            chain_id,
            contract: contract.into().to_ascii_lowercase(),
            topics: EventTopics::new(),
            capacity: capacity.max(1),
            buffer: Mutex::new(StreamBuffer::default()),
        }
    }

    /// Run the subscription until `shutdown` flips to `true`.
    pub fn spawn(self: &Arc<Self>, mut backoff: Backoff, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let stream = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let session = tokio::select! {
                    result = stream.run_session(&mut backoff) => result,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Event stream shutting down");
                            stream.buffer.lock().disconnect();
                            return;
                        }
                        continue;
                    }
                };
                stream.buffer.lock().disconnect();

                if let Err(e) = session {
                    if backoff.record_failure() {
                        error!(
                            failures = backoff.consecutive_failures(),
                            "Event stream circuit breaker tripped"
                        );
                    }
                    warn!(error = %e, "Event stream disconnected");
                }

                let delay = backoff.next_delay();
                info!(delay_ms = delay.as_millis(), "Reconnecting event stream");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn run_session(&self, backoff: &mut Backoff) -> Result<()> {
        let (ws, _) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws.split();

        let heads = json!({
            "jsonrpc": "2.0", "id": 1, "method": "eth_subscribe", "params": ["newHeads"]
        });
        let logs = json!({
            "jsonrpc": "2.0", "id": 2, "method": "eth_subscribe",
            "params": ["logs", { "address": self.contract, "topics": [self.topics.all()] }]
        });
        write.send(Message::Text(heads.to_string())).await?;
        write.send(Message::Text(logs.to_string())).await?;

        self.buffer.lock().connected = true;
        backoff.reset();
        info!(url = %self.url, "Event stream subscribed");

        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => self.handle_text(&text),
                Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                Message::Close(frame) => {
                    debug!(?frame, "Event stream closed by server");
                    break;
                }
                _ => {}
            }
        }
        Err(ChainError::StreamUnavailable("websocket closed".to_string()).into())
    }

    fn handle_text(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unparseable stream message");
                return;
            }
        };
        if let Some(error) = value.get("error") {
            warn!(%error, "Subscription error");
            return;
        }
        let Some(result) = value.pointer("/params/result") else {
            return;
        };

        if result.get("topics").is_some() {
            self.handle_log(result);
        } else {
            self.handle_head(result);
        }
    }

    fn handle_head(&self, result: &Value) {
        let head = match HeadNotification::deserialize(result) {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "Malformed head notification");
                return;
            }
        };
        match parse_quantity(&head.number) {
            Ok(number) => self
                .buffer
                .lock()
                .on_head(number, BlockHash::new(head.hash), self.capacity),
            Err(e) => warn!(error = %e, "Malformed head number"),
        }
    }

    fn handle_log(&self, result: &Value) {
        let log = match RpcLog::deserialize(result) {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "Malformed log notification");
                return;
            }
        };
        match decode_log(self.chain_id, &self.topics, &log) {
            Ok(Some(event)) => self.buffer.lock().on_log(event, log.removed),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Skipping malformed market log"),
        }
    }

    fn unavailable(reason: &str) -> Error {
        ChainError::StreamUnavailable(reason.to_string()).into()
    }
}

#[async_trait]
impl EventSource for WsEventStream {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn head(&self) -> Result<u64> {
        let buffer = self.buffer.lock();
        if !buffer.connected {
            return Err(Self::unavailable("not connected"));
        }
        buffer.head.ok_or_else(|| Self::unavailable("no head received"))
    }

    async fn fetch_events(&self, from: u64, to: u64) -> Result<Vec<ChainEvent>> {
        let buffer = self.buffer.lock();
        if !buffer.connected {
            return Err(Self::unavailable("not connected"));
        }
        if !buffer.earliest.is_some_and(|earliest| earliest <= from) {
            return Err(Self::unavailable("range starts before stream coverage"));
        }
        if !buffer.head.is_some_and(|head| head >= to) {
            return Err(Self::unavailable("range ends past stream head"));
        }

        let mut events: Vec<ChainEvent> = buffer
            .blocks
            .range(from..=to)
            .flat_map(|(_, block)| block.events.iter().cloned())
            .collect();
        events.sort_by_key(ChainEvent::position);
        Ok(events)
    }

    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>> {
        let buffer = self.buffer.lock();
        buffer
            .blocks
            .get(&number)
            .and_then(|block| block.hash.clone())
            .map(Some)
            .ok_or_else(|| Self::unavailable("block not buffered"))
    }

    fn stream_health(&self) -> Option<StreamHealth> {
        Some(self.buffer.lock().health())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventPayload;
    use crate::domain::id::{MarketId, TxHash};

    fn event(block: u64, hash: &str, index: u64) -> ChainEvent {
        ChainEvent {
            chain_id: ChainId::new(1),
            block_number: block,
            block_hash: BlockHash::new(hash),
            log_index: index,
            tx_hash: TxHash::new(format!("0x{block}{index}")),
            market_id: MarketId::new("m"),
            payload: EventPayload::MarketCancelled,
        }
    }

    fn connected_stream() -> WsEventStream {
        let stream = WsEventStream::new("ws://localhost", ChainId::new(1), "0xc", 8);
        stream.buffer.lock().connected = true;
        stream
    }

    #[tokio::test]
    async fn serves_buffered_range() {
        let stream = connected_stream();
        {
            let mut buffer = stream.buffer.lock();
            buffer.on_head(10, BlockHash::new("0xa10"), 8);
            buffer.on_log(event(10, "0xa10", 1), false);
            buffer.on_log(event(10, "0xa10", 0), false);
            buffer.on_head(11, BlockHash::new("0xa11"), 8);
        }

        assert_eq!(stream.head().await.unwrap(), 11);
        let events = stream.fetch_events(10, 11).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].log_index, 0);
        assert_eq!(
            stream.block_hash(11).await.unwrap(),
            Some(BlockHash::new("0xa11"))
        );

        let health = stream.stream_health().unwrap();
        assert!(health.covers(10));
        assert!(!health.covers(9));
    }

    #[tokio::test]
    async fn range_outside_coverage_is_unavailable() {
        let stream = connected_stream();
        stream.buffer.lock().on_head(10, BlockHash::new("0xa"), 8);

        assert!(matches!(
            stream.fetch_events(9, 10).await,
            Err(Error::Chain(ChainError::StreamUnavailable(_)))
        ));
        assert!(matches!(
            stream.fetch_events(10, 11).await,
            Err(Error::Chain(ChainError::StreamUnavailable(_)))
        ));
    }

    #[test]
    fn replaced_head_drops_stale_logs_and_descendants() {
        let mut buffer = StreamBuffer::default();
        buffer.on_head(10, BlockHash::new("0xa10"), 8);
        buffer.on_head(11, BlockHash::new("0xa11"), 8);
        buffer.on_log(event(10, "0xa10", 0), false);
        buffer.on_log(event(11, "0xa11", 0), false);

        buffer.on_head(10, BlockHash::new("0xb10"), 8);

        assert!(buffer.blocks[&10].events.is_empty());
        assert!(!buffer.blocks.contains_key(&11));
        assert_eq!(buffer.head, Some(10));
    }

    #[test]
    fn removed_logs_are_dropped() {
        let mut buffer = StreamBuffer::default();
        buffer.on_head(10, BlockHash::new("0xa"), 8);
        buffer.on_log(event(10, "0xa", 0), false);
        buffer.on_log(event(10, "0xa", 0), true);
        assert!(buffer.blocks[&10].events.is_empty());
    }

    #[test]
    fn gap_resets_coverage_and_buffer_is_bounded() {
        let mut buffer = StreamBuffer::default();
        buffer.on_head(10, BlockHash::new("0xa"), 4);
        assert_eq!(buffer.earliest, Some(10));
        buffer.on_head(20, BlockHash::new("0xb"), 4);
        assert_eq!(buffer.earliest, Some(20));

        for n in 21..=30 {
            buffer.on_head(n, BlockHash::new(format!("0x{n}")), 4);
        }
        assert_eq!(buffer.earliest, Some(26));
        assert_eq!(buffer.blocks.keys().next(), Some(&26));
    }

    #[test]
    fn disconnect_clears_coverage() {
        let mut buffer = StreamBuffer::default();
        buffer.connected = true;
        buffer.on_head(10, BlockHash::new("0xa"), 4);
        buffer.disconnect();
        let health = buffer.health();
        assert!(!health.connected);
        assert!(!health.covers(10));
    }
}
