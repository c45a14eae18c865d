//! Outbound contract-call queue.
//!
//! Jobs are grouped into per-market lanes. A lane runs at most one job at a
//! time and a job stays at the front of its lane until it is terminal, so
//! calls for one market reach the ledger in submission order. Distinct lanes
//! run concurrently, bounded by a semaphore of `workers` permits.
//!
//! A single dispatcher task starts due lane fronts and otherwise sleeps until
//! the earliest scheduled retry or until something wakes it (enqueue, a
//! finished attempt, a cancellation).

mod nonce;
mod policy;
mod repository;
mod worker;

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, info, warn};

use self::nonce::NonceManager;
use self::repository::JobRepository;
use crate::domain::backoff::RetryPolicy;
use crate::domain::id::{ChainId, IdempotencyKey, JobId, MarketId};
use crate::domain::job::{ContractCall, ContractCallJob};
use crate::error::{Error, Result, TransactionError};
use crate::port::outbound::ledger::TransactionGateway;
use crate::port::outbound::notifier::{Event, JobEvent, NotifierRegistry};
use crate::port::outbound::signer::TransactionSigner;
use crate::port::outbound::store::RowStore;

/// Dispatcher wake-up when nothing is scheduled.
const IDLE_WAKE: Duration = Duration::from_secs(1);

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub chain_id: ChainId,
    /// Total attempts per job, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles with every further failure.
    pub base_delay: Duration,
    /// Pending plus inflight jobs accepted before `QueueFull`.
    pub max_depth: usize,
    pub workers: usize,
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub fee_bump_percent: u32,
    /// Timeout for every gateway and signer call.
    pub rpc_timeout: Duration,
    pub max_cas_retries: u32,
}

impl QueueSettings {
    /// Settings with the documented defaults for `chain_id`.
    #[must_use]
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            max_attempts: 5,
            base_delay: Duration::from_millis(5_000),
            max_depth: 1_000,
            workers: num_cpus::get(),
            receipt_timeout: Duration::from_millis(120_000),
            receipt_poll_interval: Duration::from_millis(2_000),
            fee_bump_percent: 12,
            rpc_timeout: Duration::from_millis(10_000),
            max_cas_retries: 5,
        }
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay)
    }
}

#[derive(Debug, Default)]
struct Lanes {
    queues: HashMap<MarketId, VecDeque<JobId>>,
    /// Markets with an attempt in progress.
    active: HashSet<MarketId>,
}

impl Lanes {
    fn remove(&mut self, market_id: &MarketId, job_id: &JobId) {
        if let Some(queue) = self.queues.get_mut(market_id) {
            queue.retain(|id| id != job_id);
            if queue.is_empty() {
                self.queues.remove(market_id);
            }
        }
    }
}

pub(crate) struct Inner {
    settings: QueueSettings,
    gateway: Arc<dyn TransactionGateway>,
    signer: Arc<dyn TransactionSigner>,
    repository: JobRepository,
    notifiers: Arc<NotifierRegistry>,
    nonces: NonceManager,
    jobs: DashMap<JobId, watch::Sender<ContractCallJob>>,
    keys: DashMap<IdempotencyKey, JobId>,
    lanes: Mutex<Lanes>,
    /// Non-terminal jobs.
    depth: AtomicUsize,
    enqueue_lock: tokio::sync::Mutex<()>,
    wake: Notify,
    permits: Arc<Semaphore>,
}

impl Inner {
    fn snapshot(&self, id: &JobId) -> Option<ContractCallJob> {
        self.jobs.get(id).map(|job| job.borrow().clone())
    }

    /// Apply `f` to the live job and publish the result to waiters.
    fn modify<R>(&self, id: &JobId, f: impl FnOnce(&mut ContractCallJob) -> R) -> Option<R> {
        let entry = self.jobs.get(id)?;
        let mut out = None;
        entry.send_modify(|job| out = Some(f(job)));
        out
    }

    /// Write the current snapshot of `id`. Failures are logged; the in-memory
    /// job stays authoritative and the next transition writes again.
    async fn persist(&self, id: &JobId) {
        if let Err(e) = self.repository.save_latest(id, || self.snapshot(id)).await {
            warn!(job_id = %id, error = %e, "Failed to persist job");
        }
    }

    async fn timed<T>(&self, operation: &'static str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.settings.rpc_timeout;
        tokio::time::timeout(timeout, call).await.map_err(|_| {
            Error::timeout(operation, u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
        })?
    }

    /// Bookkeeping once a job turned terminal.
    async fn finish(&self, job: &ContractCallJob) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        if let Some(nonce) = job.nonce().filter(|_| job.broadcasts().is_empty()) {
            debug!(job_id = %job.id(), nonce, "Job never broadcast, releasing nonce");
            self.nonces.release(nonce).await;
        }
        self.notifiers.notify_all(Event::JobFinished(JobEvent {
            job_id: job.id().clone(),
            market_id: job.market_id().clone(),
            kind: job.kind(),
            state: job.state(),
            attempts: job.attempts(),
            broadcasts: job.broadcasts().to_vec(),
            last_error: job.last_error().map(str::to_string),
        }));
    }
}

/// Per-market FIFO queue of outbound contract calls.
#[derive(Clone)]
pub struct ContractCallQueue {
    inner: Arc<Inner>,
}

impl ContractCallQueue {
    #[must_use]
    pub fn new(
        settings: QueueSettings,
        gateway: Arc<dyn TransactionGateway>,
        signer: Arc<dyn TransactionSigner>,
        store: Arc<dyn RowStore>,
        notifiers: Arc<NotifierRegistry>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.workers.max(1)));
        let repository = JobRepository::new(store, settings.max_cas_retries);
        Self {
            inner: Arc::new(Inner {
                settings,
                gateway,
                signer,
                repository,
                notifiers,
                nonces: NonceManager::default(),
                jobs: DashMap::new(),
                keys: DashMap::new(),
                lanes: Mutex::new(Lanes::default()),
                depth: AtomicUsize::new(0),
                enqueue_lock: tokio::sync::Mutex::new(()),
                wake: Notify::new(),
                permits,
            }),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    /// Queue `call` for `market_id`. A key seen before returns the job that
    /// already carries it.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::QueueFull`] at `max_depth`, or the store
    /// error if the job could not be persisted.
    pub async fn enqueue(&self, market_id: MarketId, call: ContractCall, key: IdempotencyKey) -> Result<JobId> {
        let inner = &self.inner;
        let _guard = inner.enqueue_lock.lock().await;

        if let Some(existing) = inner.keys.get(&key).map(|id| id.clone()) {
            debug!(job_id = %existing, key = %key, "Duplicate idempotency key");
            return Ok(existing);
        }

        let depth = inner.depth.load(Ordering::SeqCst);
        let max_depth = inner.settings.max_depth;
        if depth >= max_depth {
            warn!(depth, max_depth, market_id = %market_id, "Queue full");
            return Err(TransactionError::QueueFull { depth, max_depth }.into());
        }

        let job = ContractCallJob::new(market_id.clone(), call, key.clone());
        let id = job.id().clone();
        inner.repository.save_latest(&id, || Some(job.clone())).await?;

        info!(job_id = %id, market_id = %market_id, kind = job.kind().as_str(), "Job queued");
        inner.jobs.insert(id.clone(), watch::channel(job).0);
        inner.keys.insert(key, id.clone());
        inner.depth.fetch_add(1, Ordering::SeqCst);
        inner
            .lanes
            .lock()
            .queues
            .entry(market_id)
            .or_default()
            .push_back(id.clone());
        inner.wake.notify_one();
        Ok(id)
    }

    /// Current snapshot of a job.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::UnknownJob`] for an id never queued here.
    pub fn job(&self, id: &JobId) -> Result<ContractCallJob> {
        self.inner
            .snapshot(id)
            .ok_or_else(|| TransactionError::UnknownJob(id.clone()).into())
    }

    /// Resolve once the job is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::UnknownJob`] for an id never queued here.
    pub async fn wait(&self, id: &JobId) -> Result<ContractCallJob> {
        let mut rx = self
            .inner
            .jobs
            .get(id)
            .map(|job| job.subscribe())
            .ok_or_else(|| TransactionError::UnknownJob(id.clone()))?;
        let job = rx
            .wait_for(ContractCallJob::is_terminal)
            .await
            .map_err(|_| Error::Connection(format!("job {id} dropped")))?;
        Ok(job.clone())
    }

    /// Cancel a pending job that never broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NotCancellable`] once the job is inflight,
    /// terminal or has reached the ledger.
    pub async fn cancel(&self, id: &JobId) -> Result<ContractCallJob> {
        let inner = &self.inner;
        let outcome = inner
            .modify(id, |job| {
                if job.is_cancellable() {
                    job.cancel().map_err(|_| job.state())
                } else {
                    Err(job.state())
                }
            })
            .ok_or_else(|| TransactionError::UnknownJob(id.clone()))?;

        if let Err(state) = outcome {
            return Err(TransactionError::NotCancellable {
                job_id: id.clone(),
                state: state.as_str(),
            }
            .into());
        }

        let job = self.job(id)?;
        inner.lanes.lock().remove(job.market_id(), id);
        inner.persist(id).await;
        inner.finish(&job).await;
        inner.wake.notify_one();
        info!(job_id = %id, market_id = %job.market_id(), "Job cancelled");
        Ok(job)
    }

    /// Pending plus inflight jobs.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.depth.load(Ordering::SeqCst)
    }

    /// Reload stored jobs. Non-terminal ones go back into their lanes in
    /// creation order; jobs that were inflight count their interrupted
    /// attempt. Returns how many jobs were requeued.
    ///
    /// # Errors
    ///
    /// Returns the store error if jobs cannot be listed or decoded.
    pub async fn recover(&self) -> Result<usize> {
        let inner = &self.inner;
        let _guard = inner.enqueue_lock.lock().await;
        let mut requeued = 0;
        let mut nonce_floor = 0;

        for mut job in inner.repository.load_all().await? {
            let id = job.id().clone();
            if inner.jobs.contains_key(&id) {
                continue;
            }
            inner.keys.insert(job.idempotency_key().clone(), id.clone());
            let live = !job.is_terminal();
            if live {
                job.recover_interrupted();
                if let Some(nonce) = job.nonce() {
                    nonce_floor = nonce_floor.max(nonce + 1);
                }
                inner
                    .lanes
                    .lock()
                    .queues
                    .entry(job.market_id().clone())
                    .or_default()
                    .push_back(id.clone());
                inner.depth.fetch_add(1, Ordering::SeqCst);
                requeued += 1;
            }
            inner.jobs.insert(id.clone(), watch::channel(job).0);
            if live {
                inner.persist(&id).await;
            }
        }

        // Recovered jobs keep their nonces; fresh ones start above them.
        inner.nonces.resync(nonce_floor).await;
        inner.wake.notify_one();
        info!(requeued, "Recovered queued jobs");
        Ok(requeued)
    }

    /// Dispatch jobs until `shutdown` is set. Attempts already running are
    /// left to finish on their own tasks.
    ///
    /// # Errors
    ///
    /// Currently never fails; the signature matches the other long-running
    /// tasks.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let chain_id = self.inner.settings.chain_id;
        info!(%chain_id, workers = self.inner.settings.workers, "Queue dispatcher started");

        loop {
            let sleep_for = self.dispatch_ready().map_or(IDLE_WAKE, |at| {
                (at - Utc::now()).to_std().unwrap_or(Duration::ZERO).min(IDLE_WAKE)
            });

            tokio::select! {
                () = self.inner.wake.notified() => {}
                () = tokio::time::sleep(sleep_for) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(%chain_id, "Queue dispatcher stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Start every due lane front that can get a worker. Returns the earliest
    /// scheduled retry among fronts that are not due yet.
    fn dispatch_ready(&self) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut lanes = self.inner.lanes.lock();

        let idle: Vec<MarketId> = lanes
            .queues
            .keys()
            .filter(|market| !lanes.active.contains(*market))
            .cloned()
            .collect();

        for market_id in idle {
            let Some(job_id) = self.lane_front(&mut lanes, &market_id) else {
                continue;
            };
            let Some(job) = self.inner.snapshot(&job_id) else {
                continue;
            };
            if !job.is_due(now) {
                if let Some(at) = job.next_retry_at() {
                    earliest = Some(earliest.map_or(at, |e| e.min(at)));
                }
                continue;
            }
            let Ok(permit) = Arc::clone(&self.inner.permits).try_acquire_owned() else {
                break;
            };
            lanes.active.insert(market_id.clone());
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.execute(job_id, market_id, permit).await;
            });
        }
        earliest
    }

    /// First non-terminal job of a lane, dropping terminal leftovers.
    fn lane_front(&self, lanes: &mut Lanes, market_id: &MarketId) -> Option<JobId> {
        let queue = lanes.queues.get_mut(market_id)?;
        while let Some(id) = queue.front() {
            if self.inner.snapshot(id).is_some_and(|job| !job.is_terminal()) {
                return Some(id.clone());
            }
            queue.pop_front();
        }
        lanes.queues.remove(market_id);
        None
    }
}
