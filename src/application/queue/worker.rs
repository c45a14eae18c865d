//! One execution attempt of a contract-call job.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::policy::{next_step, NextStep};
use super::Inner;
use crate::domain::id::{JobId, MarketId, TxHash};
use crate::domain::job::{ContractCallJob, FeeParams};
use crate::error::{Error, Result, TransactionError};
use crate::port::outbound::ledger::ReceiptStatus;
use crate::port::outbound::signer::UnsignedTransaction;

impl Inner {
    /// Run one attempt of the front job of `market_id`'s lane, then release
    /// the lane and the worker permit.
    pub(super) async fn execute(self: Arc<Self>, job_id: JobId, market_id: MarketId, permit: OwnedSemaphorePermit) {
        let terminal = self.process(&job_id).await;
        {
            let mut lanes = self.lanes.lock();
            if terminal {
                lanes.remove(&market_id, &job_id);
            }
            lanes.active.remove(&market_id);
        }
        drop(permit);
        self.wake.notify_one();
    }

    /// Returns whether the job ended terminal.
    async fn process(&self, id: &JobId) -> bool {
        let attempt = match self.modify(id, ContractCallJob::begin_attempt) {
            Some(Ok(attempt)) => attempt,
            Some(Err(e)) => {
                debug!(job_id = %id, error = %e, "Job not runnable");
                return self.snapshot(id).map_or(true, |job| job.is_terminal());
            }
            None => return true,
        };
        self.persist(id).await;

        let Some(job) = self.snapshot(id) else {
            return true;
        };
        info!(
            job_id = %id,
            market_id = %job.market_id(),
            kind = job.kind().as_str(),
            attempt,
            "Executing job"
        );

        let result = self.attempt(id).await;
        let terminal = match result {
            Ok(tx_hash) => {
                self.modify(id, ContractCallJob::succeed);
                info!(job_id = %id, market_id = %job.market_id(), %tx_hash, attempt, "Job succeeded");
                true
            }
            Err(e) => self.settle_failure(id, &job, attempt, &e),
        };

        self.persist(id).await;
        if terminal {
            if let Some(job) = self.snapshot(id) {
                self.finish(&job).await;
            }
        }
        terminal
    }

    fn settle_failure(&self, id: &JobId, job: &ContractCallJob, attempt: u32, e: &Error) -> bool {
        let policy = self.settings.retry_policy();
        match next_step(&policy, e, attempt, Utc::now()) {
            NextStep::Retry { at, bump_fee } => {
                self.modify(id, |job| job.requeue(e.to_string(), at, bump_fee));
                warn!(
                    job_id = %id,
                    market_id = %job.market_id(),
                    attempt,
                    retry_at = %at,
                    bump_fee,
                    error = %e,
                    "Attempt failed, retrying"
                );
                false
            }
            NextStep::Fail => {
                self.modify(id, |job| job.fail(e.to_string()));
                warn!(job_id = %id, market_id = %job.market_id(), attempt, error = %e, "Job failed");
                true
            }
            NextStep::Exhausted => {
                self.modify(id, |job| {
                    let mut history = job.history().to_vec();
                    if let Some(last) = history.last_mut() {
                        last.error = Some(e.to_string());
                    }
                    let exhausted = TransactionError::RetryExhausted {
                        job_id: id.clone(),
                        market_id: job.market_id().clone(),
                        last_error: e.to_string(),
                        history,
                    };
                    error!(job_id = %id, market_id = %job.market_id(), error = %exhausted, "Retries exhausted");
                    job.fail(exhausted.to_string())
                });
                true
            }
        }
    }

    /// Build, sign, broadcast and await one transaction. Returns the hash of
    /// the transaction that was mined successfully.
    async fn attempt(&self, id: &JobId) -> Result<TxHash> {
        let job = self
            .snapshot(id)
            .ok_or_else(|| TransactionError::UnknownJob(id.clone()))?;

        // An earlier broadcast may have been mined since the last attempt.
        if let Some(tx_hash) = self.check_broadcasts(&job).await? {
            debug!(job_id = %id, %tx_hash, "Earlier broadcast confirmed");
            return Ok(tx_hash);
        }

        let nonce = match job.nonce() {
            Some(nonce) => nonce,
            None => {
                let reserved = self
                    .timed("pending_nonce", self.nonces.reserve(&*self.gateway, self.signer.address()))
                    .await?;
                self.modify(id, |job| job.assign_nonce(reserved)).unwrap_or(reserved)
            }
        };

        let fees = self.fees_for(&job).await?;
        self.modify(id, |job| job.set_fees(fees));
        self.persist(id).await;

        let call = self.gateway.encode_call(job.market_id(), job.call())?;
        let tx = UnsignedTransaction {
            chain_id: self.settings.chain_id,
            from: self.signer.address().to_string(),
            to: call.to,
            nonce,
            gas_limit: call.gas_limit,
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            data: call.data,
        };
        let signed = self.timed("sign", self.signer.sign(&tx)).await?;

        let tx_hash = match self
            .timed("send_raw_transaction", self.gateway.send_raw_transaction(&signed.raw))
            .await
        {
            Ok(hash) => hash,
            Err(Error::Transaction(TransactionError::AlreadyKnown(reason))) => {
                debug!(job_id = %id, nonce, %reason, "Transaction already known");
                signed.hash.clone()
            }
            Err(e) => return Err(e),
        };
        debug!(job_id = %id, nonce, %tx_hash, "Broadcast");
        self.modify(id, |job| job.record_broadcast(tx_hash));
        self.persist(id).await;

        self.await_receipt(id).await
    }

    /// Fees for the coming broadcast: a fresh suggestion the first time,
    /// the previous fees bumped after an underpriced rejection, the previous
    /// fees otherwise.
    async fn fees_for(&self, job: &ContractCallJob) -> Result<FeeParams> {
        match job.fees() {
            Some(fees) if job.bump_fee() => {
                let suggested = self.timed("suggest_fees", self.gateway.suggest_fees()).await?;
                Ok(fees.bump(self.settings.fee_bump_percent).max(suggested))
            }
            Some(fees) => Ok(fees),
            None => self.timed("suggest_fees", self.gateway.suggest_fees()).await,
        }
    }

    /// Look for a receipt of any hash this job broadcast, newest first.
    async fn check_broadcasts(&self, job: &ContractCallJob) -> Result<Option<TxHash>> {
        for hash in job.broadcasts().iter().rev() {
            let receipt = self
                .timed("transaction_receipt", self.gateway.transaction_receipt(hash))
                .await?;
            if let Some(receipt) = receipt {
                return match receipt.status {
                    ReceiptStatus::Success => Ok(Some(receipt.tx_hash)),
                    ReceiptStatus::Reverted { reason } => Err(TransactionError::Reverted { reason }.into()),
                };
            }
        }
        Ok(None)
    }

    async fn await_receipt(&self, id: &JobId) -> Result<TxHash> {
        let timeout = self.settings.receipt_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let job = self
                .snapshot(id)
                .ok_or_else(|| TransactionError::UnknownJob(id.clone()))?;
            if let Some(tx_hash) = self.check_broadcasts(&job).await? {
                return Ok(tx_hash);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::timeout(
                    "transaction_receipt",
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
            tokio::time::sleep(self.settings.receipt_poll_interval.min(deadline - now)).await;
        }
    }
}
