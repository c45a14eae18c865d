//! Outbound contract-call jobs.
//!
//! A job moves `Pending -> Inflight -> {Succeeded, Failed}`, and may return
//! from `Inflight` to `Pending` when an attempt fails transiently. Terminal
//! states are final; every transition out of them is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::id::{IdempotencyKey, JobId, MarketId, TxHash};

/// Reason recorded on jobs cancelled before their first broadcast.
pub const CANCELLED_REASON: &str = "cancelled by caller";

/// What a job asks the ledger to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    SubmitTrade,
    Settle,
}

impl JobKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SubmitTrade => "submit_trade",
            Self::Settle => "settle",
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Inflight,
    Succeeded,
    Failed,
}

impl JobState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Inflight => "INFLIGHT",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Contract call carried by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ContractCall {
    /// Buy (positive) or sell (negative) `shares` of `outcome`.
    Trade {
        outcome: usize,
        shares: f64,
        /// Slippage bound passed to the contract, if any.
        #[serde(default)]
        max_cost: Option<f64>,
    },
    /// Resolve the market to `outcome`.
    Settle { outcome: usize },
}

impl ContractCall {
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::Trade { .. } => JobKind::SubmitTrade,
            Self::Settle { .. } => JobKind::Settle,
        }
    }
}

/// EIP-1559 fee parameters, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParams {
    pub max_fee_per_gas: u64,
    pub max_priority_fee_per_gas: u64,
}

impl FeeParams {
    /// Raise both fees by `percent`, always by at least one wei.
    #[must_use]
    pub fn bump(self, percent: u32) -> Self {
        let raise = |value: u64| {
            let extra = (u128::from(value) * u128::from(percent)).div_ceil(100);
            let extra = u64::try_from(extra).unwrap_or(u64::MAX).max(1);
            value.saturating_add(extra)
        };
        Self {
            max_fee_per_gas: raise(self.max_fee_per_gas),
            max_priority_fee_per_gas: raise(self.max_priority_fee_per_gas),
        }
    }

    /// Component-wise maximum, so a re-fetched suggestion never lowers fees.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self {
            max_fee_per_gas: self.max_fee_per_gas.max(other.max_fee_per_gas),
            max_priority_fee_per_gas: self
                .max_priority_fee_per_gas
                .max(other.max_priority_fee_per_gas),
        }
    }
}

/// What happened during one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
}

/// A queued outbound contract call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCallJob {
    id: JobId,
    market_id: MarketId,
    call: ContractCall,
    idempotency_key: IdempotencyKey,
    state: JobState,
    attempts: u32,
    next_retry_at: Option<DateTime<Utc>>,
    nonce: Option<u64>,
    fees: Option<FeeParams>,
    bump_fee: bool,
    broadcasts: Vec<TxHash>,
    history: Vec<AttemptRecord>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    version: Option<u64>,
}

impl ContractCallJob {
    /// Create a pending job.
    #[must_use]
    pub fn new(market_id: MarketId, call: ContractCall, idempotency_key: IdempotencyKey) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            market_id,
            call,
            idempotency_key,
            state: JobState::Pending,
            attempts: 0,
            next_retry_at: None,
            nonce: None,
            fees: None,
            bump_fee: false,
            broadcasts: Vec::new(),
            history: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
            version: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &JobId {
        &self.id
    }

    #[must_use]
    pub const fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    #[must_use]
    pub const fn call(&self) -> &ContractCall {
        &self.call
    }

    #[must_use]
    pub const fn kind(&self) -> JobKind {
        self.call.kind()
    }

    #[must_use]
    pub const fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    #[must_use]
    pub const fn state(&self) -> JobState {
        self.state
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    #[must_use]
    pub const fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    #[must_use]
    pub const fn fees(&self) -> Option<FeeParams> {
        self.fees
    }

    /// Whether the next attempt must raise fees.
    #[must_use]
    pub const fn bump_fee(&self) -> bool {
        self.bump_fee
    }

    /// Every transaction hash this job has broadcast, oldest first.
    #[must_use]
    pub fn broadcasts(&self) -> &[TxHash] {
        &self.broadcasts
    }

    #[must_use]
    pub fn history(&self) -> &[AttemptRecord] {
        &self.history
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    #[must_use]
    pub const fn version(&self) -> Option<u64> {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = Some(version);
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the job is due to run at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.next_retry_at.map_or(true, |at| at <= now)
    }

    /// Only pending jobs that never reached the ledger can be cancelled.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        self.state == JobState::Pending && self.broadcasts.is_empty()
    }

    fn ensure_state(&self, expected: JobState) -> Result<(), DomainError> {
        if self.state.is_terminal() {
            return Err(DomainError::JobTerminal {
                job_id: self.id.clone(),
                state: self.state.as_str(),
            });
        }
        if self.state != expected {
            return Err(DomainError::MalformedPayload(format!(
                "job {} is {}, expected {}",
                self.id,
                self.state.as_str(),
                expected.as_str()
            )));
        }
        Ok(())
    }

    fn current_attempt(&mut self) -> Option<&mut AttemptRecord> {
        self.history.last_mut()
    }

    /// Start a new attempt. Returns the attempt number (1-based).
    ///
    /// # Errors
    ///
    /// Returns `DomainError` unless the job is pending.
    pub fn begin_attempt(&mut self) -> Result<u32, DomainError> {
        self.ensure_state(JobState::Pending)?;
        let now = Utc::now();
        self.attempts += 1;
        self.state = JobState::Inflight;
        self.next_retry_at = None;
        self.updated_at = now;
        self.history.push(AttemptRecord {
            attempt: self.attempts,
            started_at: now,
            tx_hash: None,
            error: None,
        });
        Ok(self.attempts)
    }

    /// Pin the signer nonce. Once assigned it never changes.
    pub fn assign_nonce(&mut self, nonce: u64) -> u64 {
        *self.nonce.get_or_insert(nonce)
    }

    /// Fee parameters for the current attempt.
    pub fn set_fees(&mut self, fees: FeeParams) {
        self.fees = Some(fees);
        self.bump_fee = false;
    }

    /// Record a transaction hash handed to the ledger.
    pub fn record_broadcast(&mut self, tx_hash: TxHash) {
        if !self.broadcasts.contains(&tx_hash) {
            self.broadcasts.push(tx_hash.clone());
        }
        if let Some(attempt) = self.current_attempt() {
            attempt.tx_hash = Some(tx_hash);
        }
        self.updated_at = Utc::now();
    }

    /// Mark the job confirmed on the ledger.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` unless the job is inflight.
    pub fn succeed(&mut self) -> Result<(), DomainError> {
        self.ensure_state(JobState::Inflight)?;
        self.state = JobState::Succeeded;
        self.last_error = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the job permanently failed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the job is already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), DomainError> {
        if self.state.is_terminal() {
            return Err(DomainError::JobTerminal {
                job_id: self.id.clone(),
                state: self.state.as_str(),
            });
        }
        let error = error.into();
        if self.state == JobState::Inflight {
            if let Some(attempt) = self.current_attempt() {
                attempt.error = Some(error.clone());
            }
        }
        self.state = JobState::Failed;
        self.next_retry_at = None;
        self.last_error = Some(error);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Return an inflight job to the queue after a transient failure.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` unless the job is inflight.
    pub fn requeue(
        &mut self,
        error: impl Into<String>,
        retry_at: DateTime<Utc>,
        bump_fee: bool,
    ) -> Result<(), DomainError> {
        self.ensure_state(JobState::Inflight)?;
        let error = error.into();
        if let Some(attempt) = self.current_attempt() {
            attempt.error = Some(error.clone());
        }
        self.state = JobState::Pending;
        self.next_retry_at = Some(retry_at);
        self.bump_fee = bump_fee;
        self.last_error = Some(error);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Cancel a job that never reached the ledger.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the job is terminal, inflight or has broadcast.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.ensure_state(JobState::Pending)?;
        if !self.broadcasts.is_empty() {
            return Err(DomainError::MalformedPayload(format!(
                "job {} already broadcast {} transaction(s)",
                self.id,
                self.broadcasts.len()
            )));
        }
        self.fail(CANCELLED_REASON)
    }

    /// Put a job that was inflight when the process stopped back in the queue.
    /// The interrupted attempt still counts.
    pub fn recover_interrupted(&mut self) {
        if self.state == JobState::Inflight {
            if let Some(attempt) = self.current_attempt() {
                attempt.error.get_or_insert_with(|| "interrupted".to_string());
            }
            self.state = JobState::Pending;
            self.next_retry_at = None;
            self.updated_at = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ContractCallJob {
        ContractCallJob::new(
            MarketId::new("M1"),
            ContractCall::Trade {
                outcome: 0,
                shares: 5.0,
                max_cost: None,
            },
            IdempotencyKey::new("k1"),
        )
    }

    #[test]
    fn new_job_is_pending_without_attempts() {
        let job = job();
        assert_eq!(job.state(), JobState::Pending);
        assert_eq!(job.attempts(), 0);
        assert_eq!(job.kind(), JobKind::SubmitTrade);
        assert!(job.is_due(Utc::now()));
        assert!(job.is_cancellable());
    }

    #[test]
    fn success_path() {
        let mut job = job();
        assert_eq!(job.begin_attempt().unwrap(), 1);
        assert_eq!(job.state(), JobState::Inflight);
        job.record_broadcast(TxHash::new("0xAA"));
        job.succeed().unwrap();
        assert_eq!(job.state(), JobState::Succeeded);
        assert_eq!(job.broadcasts(), &[TxHash::new("0xaa")]);
        assert_eq!(job.history()[0].tx_hash, Some(TxHash::new("0xaa")));
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = job();
        job.begin_attempt().unwrap();
        job.fail("reverted").unwrap();
        assert!(matches!(job.begin_attempt(), Err(DomainError::JobTerminal { .. })));
        assert!(matches!(job.succeed(), Err(DomainError::JobTerminal { .. })));
        assert!(matches!(job.fail("again"), Err(DomainError::JobTerminal { .. })));
        assert!(job.requeue("x", Utc::now(), false).is_err());
        assert_eq!(job.last_error(), Some("reverted"));
    }

    #[test]
    fn requeue_schedules_retry_and_keeps_nonce() {
        let mut job = job();
        job.begin_attempt().unwrap();
        assert_eq!(job.assign_nonce(7), 7);
        let later = Utc::now() + chrono::Duration::seconds(5);
        job.requeue("underpriced", later, true).unwrap();
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.bump_fee());
        assert!(!job.is_due(Utc::now()));
        assert!(job.is_due(later));

        job.begin_attempt().unwrap();
        assert_eq!(job.assign_nonce(9), 7);
        assert_eq!(job.attempts(), 2);
        assert_eq!(job.history()[0].error.as_deref(), Some("underpriced"));
    }

    #[test]
    fn cancel_only_before_broadcast() {
        let mut fresh = job();
        fresh.cancel().unwrap();
        assert_eq!(fresh.state(), JobState::Failed);
        assert_eq!(fresh.last_error(), Some(CANCELLED_REASON));

        let mut broadcast = job();
        broadcast.begin_attempt().unwrap();
        assert!(broadcast.cancel().is_err());
        broadcast.record_broadcast(TxHash::new("0x1"));
        broadcast
            .requeue("timeout", Utc::now(), false)
            .unwrap();
        assert!(!broadcast.is_cancellable());
        assert!(broadcast.cancel().is_err());
    }

    #[test]
    fn interrupted_job_returns_to_pending() {
        let mut job = job();
        job.begin_attempt().unwrap();
        job.recover_interrupted();
        assert_eq!(job.state(), JobState::Pending);
        assert_eq!(job.attempts(), 1);
        assert_eq!(job.history()[0].error.as_deref(), Some("interrupted"));
    }

    #[test]
    fn fee_bump_raises_by_percent() {
        let fees = FeeParams {
            max_fee_per_gas: 100,
            max_priority_fee_per_gas: 1,
        };
        let bumped = fees.bump(12);
        assert_eq!(bumped.max_fee_per_gas, 112);
        assert_eq!(bumped.max_priority_fee_per_gas, 2);
    }

    #[test]
    fn serialized_job_keeps_state() {
        let mut job = job();
        job.begin_attempt().unwrap();
        let json = serde_json::to_string(&job).unwrap();
        let back: ContractCallJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state(), JobState::Inflight);
        assert_eq!(back.id(), job.id());
        assert_eq!(back.version(), None);
    }
}
