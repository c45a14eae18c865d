//! Deterministic signer.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::chain::tx_hash_for;
use crate::error::Result;
use crate::port::outbound::signer::{SignedTransaction, TransactionSigner, UnsignedTransaction};

/// Address used by [`StaticSigner::default`].
pub const SIGNER_ADDRESS: &str = "0x00000000000000000000000000000000000000bb";

/// Encodes the nonce and fees into the raw transaction and remembers every
/// transaction it signed.
pub struct StaticSigner {
    address: String,
    signed: Mutex<Vec<UnsignedTransaction>>,
}

impl StaticSigner {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            signed: Mutex::new(Vec::new()),
        }
    }

    pub fn signed(&self) -> Vec<UnsignedTransaction> {
        self.signed.lock().clone()
    }
}

impl Default for StaticSigner {
    fn default() -> Self {
        Self::new(SIGNER_ADDRESS)
    }
}

#[async_trait]
impl TransactionSigner for StaticSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction> {
        let raw = format!("0x{:x}{:08x}{:04x}", tx.nonce, tx.max_fee_per_gas, tx.max_priority_fee_per_gas);
        self.signed.lock().push(tx.clone());
        Ok(SignedTransaction {
            hash: tx_hash_for(&raw),
            raw,
        })
    }
}
