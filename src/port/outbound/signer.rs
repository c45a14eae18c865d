//! Key-custody port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::id::{ChainId, TxHash};
use crate::domain::job::FeeParams;
use crate::error::Result;

/// Transaction handed to the custody service for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub chain_id: ChainId,
    pub from: String,
    pub to: String,
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u64,
    pub max_priority_fee_per_gas: u64,
    pub data: String,
}

impl UnsignedTransaction {
    #[must_use]
    pub const fn fees(&self) -> FeeParams {
        FeeParams {
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
        }
    }
}

/// Signed, RLP-encoded transaction and its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub raw: String,
    pub hash: TxHash,
}

/// Signs transactions without exposing key material.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Address transactions are sent from.
    fn address(&self) -> &str;

    /// Sign `tx`. The same input always yields the same hash.
    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction>;
}
