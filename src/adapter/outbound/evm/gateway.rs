//! Transaction submission over JSON-RPC.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::abi;
use super::rpc::{parse_quantity, JsonRpcClient, RpcErrorBody};
use super::source::RpcBlockHeader;
use crate::domain::id::{MarketId, TxHash};
use crate::domain::job::{ContractCall, FeeParams};
use crate::error::{ChainError, Error, Result, TransactionError};
use crate::port::outbound::ledger::{CallData, ReceiptStatus, TransactionGateway, TxReceipt};

/// Base fee is doubled so the cap survives several full blocks.
const BASE_FEE_HEADROOM: u64 = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    #[serde(default)]
    revert_reason: Option<String>,
}

/// Classify a rejected `eth_sendRawTransaction`.
pub(crate) fn classify_send_error(error: &RpcErrorBody) -> Error {
    let text = error.normalized();
    if text.contains("underpriced")
        || text.contains("fee too low")
        || text.contains("max fee per gas less than block base fee")
    {
        TransactionError::Underpriced(error.message.clone()).into()
    } else if text.contains("already known")
        || text.contains("known transaction")
        || text.contains("nonce too low")
    {
        TransactionError::AlreadyKnown(error.message.clone()).into()
    } else if text.contains("execution reverted") {
        TransactionError::Reverted {
            reason: error.message.clone(),
        }
        .into()
    } else if text.contains("insufficient funds")
        || text.contains("intrinsic gas")
        || text.contains("invalid")
    {
        TransactionError::InvalidInput(error.message.clone()).into()
    } else {
        ChainError::Connectivity(format!(
            "eth_sendRawTransaction: {} ({})",
            error.message, error.code
        ))
        .into()
    }
}

/// Sends signed transactions and reads receipts and fee data.
pub struct EvmGateway {
    rpc: Arc<JsonRpcClient>,
    contract: String,
    gas_limit: u64,
}

impl EvmGateway {
    #[must_use]
    pub fn new(rpc: Arc<JsonRpcClient>, contract: impl Into<String>, gas_limit: u64) -> Self {
        Self {
            rpc,
            contract: contract.into(),
            gas_limit,
        }
    }

    async fn legacy_fees(&self) -> Result<FeeParams> {
        let raw: String = self.rpc.call("eth_gasPrice", json!([])).await?;
        let price = parse_quantity(&raw)?;
        Ok(FeeParams {
            max_fee_per_gas: price,
            max_priority_fee_per_gas: price,
        })
    }
}

#[async_trait]
impl TransactionGateway for EvmGateway {
    fn encode_call(&self, market_id: &MarketId, call: &ContractCall) -> Result<CallData> {
        Ok(CallData {
            to: self.contract.clone(),
            data: abi::encode_call(market_id, call)?,
            gas_limit: self.gas_limit,
        })
    }

    async fn pending_nonce(&self, address: &str) -> Result<u64> {
        let raw: String = self
            .rpc
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        parse_quantity(&raw)
    }

    async fn suggest_fees(&self) -> Result<FeeParams> {
        let header: Option<RpcBlockHeader> = self
            .rpc
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let Some(base_fee) = header.and_then(|h| h.base_fee_per_gas) else {
            debug!("Latest block has no base fee, using eth_gasPrice");
            return self.legacy_fees().await;
        };
        let base_fee = parse_quantity(&base_fee)?;

        let tip = match self
            .rpc
            .call::<String>("eth_maxPriorityFeePerGas", json!([]))
            .await
        {
            Ok(raw) => parse_quantity(&raw)?,
            Err(e) => {
                warn!(error = %e, "eth_maxPriorityFeePerGas failed, using eth_gasPrice");
                return self.legacy_fees().await;
            }
        };

        Ok(FeeParams {
            max_fee_per_gas: base_fee
                .saturating_mul(BASE_FEE_HEADROOM)
                .saturating_add(tip),
            max_priority_fee_per_gas: tip,
        })
    }

    async fn send_raw_transaction(&self, raw: &str) -> Result<TxHash> {
        match self
            .rpc
            .call_raw("eth_sendRawTransaction", json!([raw]))
            .await?
        {
            Ok(value) => {
                let hash: String = serde_json::from_value(value)
                    .map_err(|e| Error::Parse(format!("eth_sendRawTransaction: {e}")))?;
                Ok(TxHash::new(hash))
            }
            Err(error) => Err(classify_send_error(&error)),
        }
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .rpc
            .call("eth_getTransactionReceipt", json!([hash.as_str()]))
            .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let Some(block) = receipt.block_number.as_deref() else {
            return Ok(None);
        };

        let status = match receipt.status.as_deref() {
            Some("0x1") | None => ReceiptStatus::Success,
            Some(_) => ReceiptStatus::Reverted {
                reason: receipt
                    .revert_reason
                    .unwrap_or_else(|| "execution reverted".to_string()),
            },
        };
        Ok(Some(TxReceipt {
            tx_hash: TxHash::new(receipt.transaction_hash),
            block_number: parse_quantity(block)?,
            status,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_error(message: &str) -> RpcErrorBody {
        RpcErrorBody {
            code: -32000,
            message: message.to_string(),
            data: None,
        }
    }

    #[test]
    fn fee_races_are_transient() {
        for message in [
            "replacement transaction underpriced",
            "transaction fee too low",
            "max fee per gas less than block base fee",
        ] {
            let err = classify_send_error(&rpc_error(message));
            assert!(
                matches!(err, Error::Transaction(TransactionError::Underpriced(_))),
                "{message}"
            );
            assert!(err.is_transient());
        }
        assert!(matches!(
            classify_send_error(&rpc_error("already known")),
            Error::Transaction(TransactionError::AlreadyKnown(_))
        ));
        assert!(matches!(
            classify_send_error(&rpc_error("nonce too low")),
            Error::Transaction(TransactionError::AlreadyKnown(_))
        ));
    }

    #[test]
    fn reverts_and_bad_input_are_permanent() {
        let revert = classify_send_error(&rpc_error("execution reverted: MarketClosed"));
        assert!(matches!(
            revert,
            Error::Transaction(TransactionError::Reverted { .. })
        ));
        assert!(!revert.is_transient());

        let funds = classify_send_error(&rpc_error("insufficient funds for gas * price + value"));
        assert!(matches!(
            funds,
            Error::Transaction(TransactionError::InvalidInput(_))
        ));
        assert!(!funds.is_transient());
    }

    #[test]
    fn unknown_rejections_are_connectivity() {
        let err = classify_send_error(&rpc_error("header not found"));
        assert!(matches!(err, Error::Chain(ChainError::Connectivity(_))));
        assert!(err.is_transient());
    }

    #[test]
    fn receipt_deserializes() {
        let receipt: RpcReceipt = serde_json::from_value(json!({
            "transactionHash": "0xabc",
            "blockNumber": "0x10",
            "status": "0x0",
            "gasUsed": "0x5208"
        }))
        .unwrap();
        assert_eq!(receipt.status.as_deref(), Some("0x0"));
        assert_eq!(receipt.block_number.as_deref(), Some("0x10"));
    }
}
