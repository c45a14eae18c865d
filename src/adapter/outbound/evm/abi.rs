//! Market contract ABI: event decoding and call encoding.
//!
//! Events:
//!
//! ```text
//! MarketCreated(bytes32 indexed marketId, uint256 outcomes, uint256 liquidity)
//! TradeExecuted(bytes32 indexed marketId, uint256 outcome, int256 shares)
//! MarketSettled(bytes32 indexed marketId, uint256 outcome)
//! MarketCancelled(bytes32 indexed marketId)
//! ```
//!
//! Calls: `trade(bytes32,uint256,int256,uint256)` and `settle(bytes32,uint256)`.
//!
//! Share and liquidity amounts are 18-decimal fixed point on chain.

use alloy_primitives::{hex, keccak256, I256, U256};
use serde::Deserialize;

use super::rpc::parse_quantity;
use crate::domain::event::{ChainEvent, EventPayload};
use crate::domain::id::{BlockHash, ChainId, MarketId, TxHash};
use crate::domain::job::ContractCall;
use crate::error::{Error, Result, TransactionError};

/// Fixed-point scale of on-chain amounts.
const SCALE: f64 = 1e18;
const WORD: usize = 32;

const MARKET_CREATED: &str = "MarketCreated(bytes32,uint256,uint256)";
const TRADE_EXECUTED: &str = "TradeExecuted(bytes32,uint256,int256)";
const MARKET_SETTLED: &str = "MarketSettled(bytes32,uint256)";
const MARKET_CANCELLED: &str = "MarketCancelled(bytes32)";
const TRADE_FN: &str = "trade(bytes32,uint256,int256,uint256)";
const SETTLE_FN: &str = "settle(bytes32,uint256)";

/// A log as returned by `eth_getLogs` and `eth_subscribe("logs")`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    #[serde(default)]
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: Option<String>,
    pub block_hash: Option<String>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// `topic0` of every market event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTopics {
    pub market_created: String,
    pub trade_executed: String,
    pub market_settled: String,
    pub market_cancelled: String,
}

impl EventTopics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            market_created: topic(MARKET_CREATED),
            trade_executed: topic(TRADE_EXECUTED),
            market_settled: topic(MARKET_SETTLED),
            market_cancelled: topic(MARKET_CANCELLED),
        }
    }

    /// All topics, for `eth_getLogs` / `eth_subscribe` filters.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        vec![
            self.market_created.clone(),
            self.trade_executed.clone(),
            self.market_settled.clone(),
            self.market_cancelled.clone(),
        ]
    }
}

impl Default for EventTopics {
    fn default() -> Self {
        Self::new()
    }
}

fn topic(signature: &str) -> String {
    hex::encode_prefixed(keccak256(signature.as_bytes()))
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn words(data: &str) -> Result<Vec<[u8; WORD]>> {
    let bytes = hex::decode(data).map_err(|e| Error::Parse(format!("log data: {e}")))?;
    if bytes.len() % WORD != 0 {
        return Err(Error::Parse(format!(
            "log data length {} is not a multiple of {WORD}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(WORD)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

fn word_at(words: &[[u8; WORD]], index: usize) -> Result<&[u8; WORD]> {
    words
        .get(index)
        .ok_or_else(|| Error::Parse(format!("log data missing word {index}")))
}

fn as_usize(word: &[u8; WORD]) -> Result<usize> {
    let value = U256::from_be_bytes(*word);
    usize::try_from(value).map_err(|_| Error::Parse(format!("value {value} does not fit usize")))
}

fn unsigned_amount(word: &[u8; WORD]) -> Result<f64> {
    let value = U256::from_be_bytes(*word);
    let raw: f64 = value
        .to_string()
        .parse()
        .map_err(|e| Error::Parse(format!("amount {value}: {e}")))?;
    Ok(raw / SCALE)
}

fn signed_amount(word: &[u8; WORD]) -> Result<f64> {
    let value = I256::from_raw(U256::from_be_bytes(*word));
    let raw: f64 = value
        .to_string()
        .parse()
        .map_err(|e| Error::Parse(format!("amount {value}: {e}")))?;
    Ok(raw / SCALE)
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| Error::Parse(format!("log missing {field}")))
}

/// Decode a market contract log.
///
/// Returns `Ok(None)` for logs of other events or pending logs without a
/// block.
///
/// # Errors
///
/// Returns [`Error::Parse`] when a market event is malformed.
pub fn decode_log(chain_id: ChainId, topics: &EventTopics, log: &RpcLog) -> Result<Option<ChainEvent>> {
    let Some(topic0) = log.topics.first().map(|t| t.to_ascii_lowercase()) else {
        return Ok(None);
    };
    if log.block_number.is_none() {
        return Ok(None);
    }

    let market_topic = log
        .topics
        .get(1)
        .ok_or_else(|| Error::Parse("market event without market id topic".to_string()))?;
    let market_id = MarketId::new(market_topic.to_ascii_lowercase());
    let data = words(&log.data)?;

    let payload = if topic0 == topics.market_created {
        EventPayload::MarketCreated {
            outcomes: as_usize(word_at(&data, 0)?)?,
            liquidity: unsigned_amount(word_at(&data, 1)?)?,
        }
    } else if topic0 == topics.trade_executed {
        EventPayload::TradeExecuted {
            outcome: as_usize(word_at(&data, 0)?)?,
            shares: signed_amount(word_at(&data, 1)?)?,
        }
    } else if topic0 == topics.market_settled {
        EventPayload::MarketSettled {
            outcome: as_usize(word_at(&data, 0)?)?,
        }
    } else if topic0 == topics.market_cancelled {
        EventPayload::MarketCancelled
    } else {
        return Ok(None);
    };

    Ok(Some(ChainEvent {
        chain_id,
        block_number: parse_quantity(required("blockNumber", &log.block_number)?)?,
        block_hash: BlockHash::new(required("blockHash", &log.block_hash)?),
        log_index: parse_quantity(required("logIndex", &log.log_index)?)?,
        tx_hash: TxHash::new(required("transactionHash", &log.transaction_hash)?),
        market_id,
        payload,
    }))
}

fn market_word(market_id: &MarketId) -> Result<[u8; WORD]> {
    let bytes = hex::decode(market_id.as_str()).map_err(|e| {
        TransactionError::InvalidInput(format!("market id {market_id} is not hex: {e}"))
    })?;
    <[u8; WORD]>::try_from(bytes.as_slice()).map_err(|_| {
        TransactionError::InvalidInput(format!("market id {market_id} is not 32 bytes")).into()
    })
}

fn fixed_point(value: f64, field: &str) -> Result<i128> {
    let scaled = (value * SCALE).round();
    if !scaled.is_finite() || scaled.abs() >= i128::MAX as f64 {
        return Err(TransactionError::InvalidInput(format!("{field} {value} out of range")).into());
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(scaled as i128)
}

fn signed_word(value: i128) -> [u8; WORD] {
    let fill = if value < 0 { 0xff } else { 0x00 };
    let mut word = [fill; WORD];
    word[WORD - 16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn unsigned_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Encode a contract call as `0x`-prefixed calldata.
///
/// # Errors
///
/// Returns [`TransactionError::InvalidInput`] for a non-hex market id or
/// amounts that do not fit the ABI types.
pub fn encode_call(market_id: &MarketId, call: &ContractCall) -> Result<String> {
    let market = market_word(market_id)?;
    let mut data = Vec::with_capacity(4 + WORD * 4);
    match call {
        ContractCall::Trade {
            outcome,
            shares,
            max_cost,
        } => {
            data.extend_from_slice(&selector(TRADE_FN));
            data.extend_from_slice(&market);
            data.extend_from_slice(&unsigned_word(*outcome as u128));
            data.extend_from_slice(&signed_word(fixed_point(*shares, "shares")?));
            let bound = match max_cost {
                Some(cost) => {
                    let scaled = fixed_point(*cost, "max_cost")?;
                    let scaled = u128::try_from(scaled).map_err(|_| {
                        TransactionError::InvalidInput(format!("max_cost {cost} is negative"))
                    })?;
                    unsigned_word(scaled)
                }
                None => [0xff; WORD],
            };
            data.extend_from_slice(&bound);
        }
        ContractCall::Settle { outcome } => {
            data.extend_from_slice(&selector(SETTLE_FN));
            data.extend_from_slice(&market);
            data.extend_from_slice(&unsigned_word(*outcome as u128));
        }
    }
    Ok(hex::encode_prefixed(data))
}
