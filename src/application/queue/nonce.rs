//! Local nonce allocation for the signing address.

use std::collections::BTreeSet;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::port::outbound::ledger::TransactionGateway;

#[derive(Debug, Default)]
struct NonceState {
    /// Next fresh nonce; `None` until seeded from the ledger.
    next: Option<u64>,
    /// Nonces handed back by jobs that finished without broadcasting.
    free: BTreeSet<u64>,
    /// Lowest value the ledger seed may take.
    floor: u64,
}

/// Hands out nonces for the signing address, seeded lazily from the ledger.
///
/// A released nonce is reused before any fresh one, so a nonce is never held
/// by two live jobs and never left as a gap.
#[derive(Debug, Default)]
pub(crate) struct NonceManager {
    state: Mutex<NonceState>,
}

impl NonceManager {
    /// Reserve a nonce for `address`, lowest released first.
    pub async fn reserve(&self, gateway: &dyn TransactionGateway, address: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        if let Some(nonce) = state.free.pop_first() {
            debug!(address, nonce, "Reusing released nonce");
            return Ok(nonce);
        }
        let nonce = match state.next {
            Some(nonce) => nonce,
            None => {
                let pending = gateway.pending_nonce(address).await?;
                let nonce = pending.max(state.floor);
                debug!(address, pending, nonce, "Seeded nonce from ledger");
                nonce
            }
        };
        state.next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Give back a nonce that never reached the ledger.
    pub async fn release(&self, nonce: u64) {
        let mut state = self.state.lock().await;
        if state.next.is_some_and(|next| nonce >= next) {
            return;
        }
        state.free.insert(nonce);
        // Released nonces at the top of the range shrink it again.
        if let Some(mut next) = state.next {
            while next > 0 && state.free.remove(&(next - 1)) {
                next -= 1;
            }
            state.next = Some(next);
        }
    }

    /// Drop local state. The next reservation asks the ledger again and
    /// never returns a value below `floor`.
    pub async fn resync(&self, floor: u64) {
        *self.state.lock().await = NonceState {
            floor,
            ..NonceState::default()
        };
    }
}
