//! Request/response event source over `eth_getLogs`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::abi::{decode_log, EventTopics, RpcLog};
use super::rpc::{parse_quantity, quantity, JsonRpcClient};
use crate::domain::event::ChainEvent;
use crate::domain::id::{BlockHash, ChainId};
use crate::error::Result;
use crate::port::outbound::ledger::EventSource;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcBlockHeader {
    pub number: Option<String>,
    pub hash: Option<String>,
    #[serde(default)]
    pub base_fee_per_gas: Option<String>,
}

/// Polls the market contract's logs over JSON-RPC.
pub struct EvmLogSource {
    rpc: Arc<JsonRpcClient>,
    chain_id: ChainId,
    contract: String,
    topics: EventTopics,
}

impl EvmLogSource {
    #[must_use]
    pub fn new(rpc: Arc<JsonRpcClient>, chain_id: ChainId, contract: impl Into<String>) -> Self {
        Self {
            rpc,
            chain_id,
            contract: contract.into().to_ascii_lowercase(),
            topics: EventTopics::new(),
        }
    }

    /// Decode logs, skipping removed and malformed entries, in ledger order.
    pub(crate) fn decode_all(chain_id: ChainId, topics: &EventTopics, logs: &[RpcLog]) -> Vec<ChainEvent> {
        let mut events: Vec<ChainEvent> = logs
            .iter()
            .filter(|log| !log.removed)
            .filter_map(|log| match decode_log(chain_id, topics, log) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        tx_hash = log.transaction_hash.as_deref().unwrap_or("?"),
                        error = %e,
                        "Skipping malformed market log"
                    );
                    None
                }
            })
            .collect();
        events.sort_by_key(ChainEvent::position);
        events
    }
}

#[async_trait]
impl EventSource for EvmLogSource {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn head(&self) -> Result<u64> {
        let raw: String = self.rpc.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
    }

    async fn fetch_events(&self, from: u64, to: u64) -> Result<Vec<ChainEvent>> {
        let filter = json!([{
            "address": self.contract,
            "fromBlock": quantity(from),
            "toBlock": quantity(to),
            "topics": [self.topics.all()],
        }]);
        let logs: Vec<RpcLog> = self.rpc.call("eth_getLogs", filter).await?;
        let events = Self::decode_all(self.chain_id, &self.topics, &logs);
        debug!(from, to, logs = logs.len(), events = events.len(), "Fetched logs");
        Ok(events)
    }

    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>> {
        let header: Option<RpcBlockHeader> = self
            .rpc
            .call("eth_getBlockByNumber", json!([quantity(number), false]))
            .await?;
        Ok(header.and_then(|h| h.hash).map(BlockHash::new))
    }
}
