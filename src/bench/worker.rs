//! Sieve worker pool
//!
//! Spawns one blocking thread per worker, each owning its partition of the
//! integer domain and its own prime counter. Counters are only merged after
//! every worker has been joined. Progress is streamed over tokio channels
//! without touching the counters themselves.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bench::deadline::{Deadline, StopSignal};
use crate::bench::prime::{is_prime_polling, SegmentSieve};
use crate::config::{PartitionPolicy, SieveConfig};
use crate::models::SieveResult;
use crate::{CgrbError, Result};

/// Base primes sieved by every chunked worker before its first chunk
const INITIAL_BASE: u64 = 100_000;
/// Minimum gap between two progress messages from one worker
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Worker status for tracking individual worker states
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerStatus {
    /// Worker is created but not spawned
    Idle,
    /// Worker thread is running
    Running,
    /// Worker observed its stop condition and returned its count
    Completed,
    /// Worker failed with an error
    Failed(String),
}

/// Individual worker information
#[derive(Debug)]
pub struct WorkerInfo {
    /// Unique worker ID, also its partition index
    pub id: usize,
    /// Current status of the worker
    pub status: WorkerStatus,
    /// Join handle for the worker thread
    pub handle: Option<JoinHandle<Result<SieveWorkerState>>>,
}

impl WorkerInfo {
    /// Create a new worker info
    pub fn new(id: usize) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            handle: None,
        }
    }

    /// Check if the worker is completed (success or failure)
    pub fn is_completed(&self) -> bool {
        matches!(self.status, WorkerStatus::Completed | WorkerStatus::Failed(_))
    }
}

/// State owned by exactly one worker thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SieveWorkerState {
    pub id: usize,
    /// Next integer this worker would examine
    pub next_candidate: u64,
    pub local_prime_count: u64,
    pub candidates_tested: u64,
}

impl SieveWorkerState {
    fn new(id: usize, next_candidate: u64) -> Self {
        Self {
            id,
            next_candidate,
            local_prime_count: 0,
            candidates_tested: 0,
        }
    }
}

/// Snapshot published by a single worker
#[derive(Debug, Clone)]
pub struct WorkerProgress {
    pub worker_id: usize,
    pub primes_found: u64,
    pub candidates_tested: u64,
}

/// Aggregated progress update from all workers
#[derive(Debug, Clone)]
pub struct AggregatedProgress {
    /// Primes reported so far across all workers
    pub total_primes_found: u64,
    /// Candidates reported so far across all workers
    pub candidates_tested: u64,
    /// Elapsed time since benchmark start
    pub elapsed: Duration,
    /// Time left until the deadline
    pub remaining: Duration,
    /// Primes per second so far
    pub rate: f64,
    /// Number of workers that reported at least once
    pub active_workers: usize,
}

impl AggregatedProgress {
    /// Fraction of the run duration that has passed (0.0 to 1.0)
    pub fn completion_percentage(&self) -> f64 {
        let total = self.elapsed + self.remaining;
        if total.is_zero() {
            0.0
        } else {
            (self.elapsed.as_secs_f64() / total.as_secs_f64()).min(1.0)
        }
    }
}

/// Counts over a fixed candidate range, used to verify partition coverage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeCount {
    pub total_primes_found: u64,
    pub per_worker_primes: Vec<u64>,
    pub candidates_tested: u64,
}

/// What ends a worker's loop besides the stop signal
#[derive(Debug, Clone, Copy)]
enum RunLimit {
    /// Stop producing work once the deadline expires
    Deadline(Deadline),
    /// Stop before testing any candidate `>= end`
    Until(u64),
}

/// Everything one worker thread needs, cloned per worker
#[derive(Clone)]
struct WorkerContext {
    id: usize,
    worker_count: usize,
    start: u64,
    policy: PartitionPolicy,
    limit: RunLimit,
    stop: StopSignal,
    abort: Arc<AtomicBool>,
    cursor: Arc<AtomicU64>,
    progress_tx: Option<mpsc::Sender<WorkerProgress>>,
}

impl WorkerContext {
    fn should_stop(&self) -> bool {
        if self.stop.is_stopped() || self.abort.load(Ordering::Relaxed) {
            return true;
        }
        match self.limit {
            RunLimit::Deadline(deadline) => deadline.expired(),
            RunLimit::Until(_) => false,
        }
    }

    fn failure(&self, reason: String) -> CgrbError {
        self.abort.store(true, Ordering::Relaxed);
        CgrbError::WorkerFailure {
            worker: self.id,
            reason,
        }
    }

    fn publish(&self, state: &SieveWorkerState) {
        if let Some(tx) = &self.progress_tx {
            // Dropped updates are fine, the next one carries the full count
            let _ = tx.try_send(WorkerProgress {
                worker_id: self.id,
                primes_found: state.local_prime_count,
                candidates_tested: state.candidates_tested,
            });
        }
    }

    fn run(self) -> Result<SieveWorkerState> {
        match self.policy {
            PartitionPolicy::Interleaved { check_interval } => self.run_interleaved(check_interval),
            PartitionPolicy::Chunked { chunk_size } => self.run_chunked(chunk_size),
        }
    }

    /// Test `start + id`, `start + id + n`, ... checking the limit every batch
    /// and inside long trial divisions
    fn run_interleaved(self, check_interval: u64) -> Result<SieveWorkerState> {
        let stride = self.worker_count as u64;
        let first = self.start.checked_add(self.id as u64).ok_or_else(|| {
            self.failure(format!("first candidate past {} overflows", self.start))
        })?;
        let mut state = SieveWorkerState::new(self.id, first);
        let end = match self.limit {
            RunLimit::Until(end) => end,
            RunLimit::Deadline(_) => u64::MAX,
        };
        let bounded = matches!(self.limit, RunLimit::Until(_));
        let mut last_publish = Instant::now();
        let mut work = 0u64;

        loop {
            for _ in 0..check_interval {
                if bounded && state.next_candidate >= end {
                    return Ok(state);
                }
                let Some(prime) =
                    is_prime_polling(state.next_candidate, &mut work, || self.should_stop())
                else {
                    // An abandoned candidate is neither counted nor tested
                    return Ok(state);
                };
                if prime {
                    state.local_prime_count += 1;
                }
                state.candidates_tested += 1;
                state.next_candidate = state.next_candidate.checked_add(stride).ok_or_else(|| {
                    self.failure(format!(
                        "candidate {} is the last representable in this partition",
                        state.next_candidate
                    ))
                })?;
            }

            if last_publish.elapsed() >= PROGRESS_INTERVAL {
                self.publish(&state);
                last_publish = Instant::now();
            }
            if self.should_stop() {
                break;
            }
        }

        Ok(state)
    }

    /// Pull disjoint ranges from the shared cursor until the limit is reached
    fn run_chunked(self, chunk_size: u64) -> Result<SieveWorkerState> {
        let mut sieve = SegmentSieve::new(INITIAL_BASE);
        let mut state = SieveWorkerState::new(self.id, self.start);
        let mut last_publish = Instant::now();

        // Checked before claiming a range so no range is claimed after expiry
        while !self.should_stop() {
            let low = self
                .cursor
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cursor| {
                    cursor.checked_add(chunk_size)
                })
                .map_err(|cursor| {
                    self.failure(format!(
                        "range starting at {} would overflow the candidate space",
                        cursor
                    ))
                })?;
            let mut high = low + chunk_size;
            if let RunLimit::Until(end) = self.limit {
                if low >= end {
                    break;
                }
                high = high.min(end);
            }

            // Once stopped, the rest of the range is left untested
            let (primes, covered) =
                sieve.count_primes_polling(low, high, || self.should_stop());
            state.local_prime_count += primes;
            state.candidates_tested += covered - low;
            state.next_candidate = covered;

            if last_publish.elapsed() >= PROGRESS_INTERVAL {
                self.publish(&state);
                last_publish = Instant::now();
            }
        }

        Ok(state)
    }
}

/// Pool of prime counting workers for one benchmark run
pub struct SieveWorkerPool {
    config: SieveConfig,
    workers: Vec<WorkerInfo>,
}

impl SieveWorkerPool {
    /// Create a new worker pool
    pub fn new(config: SieveConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            workers: Vec::new(),
        })
    }

    /// Run until the configured deadline expires or `stop` fires
    pub async fn run(
        &mut self,
        stop: &StopSignal,
        progress_tx: Option<mpsc::Sender<AggregatedProgress>>,
    ) -> Result<SieveResult> {
        let deadline = Deadline::start(self.config.duration)?;

        log::info!(
            "Starting prime count: {} workers, {}, {:?}",
            self.config.worker_count,
            self.config.partition.description(),
            self.config.duration
        );

        let worker_tx = match progress_tx {
            Some(progress_tx) => {
                let (worker_tx, worker_rx) = mpsc::channel(self.config.worker_count * 4);
                Self::start_progress_aggregation(
                    worker_rx,
                    progress_tx,
                    deadline,
                    self.config.worker_count,
                );
                Some(worker_tx)
            }
            None => None,
        };

        self.spawn_workers(RunLimit::Deadline(deadline), stop, worker_tx);
        let states = self.join_workers().await?;
        let elapsed = deadline.elapsed();

        let candidates_tested = states.iter().map(|s| s.candidates_tested).sum();
        let per_worker_primes = states.iter().map(|s| s.local_prime_count).collect();
        let mut result = SieveResult::new(
            self.config.worker_count,
            self.config.partition,
            per_worker_primes,
            candidates_tested,
            self.config.duration,
            elapsed,
        );
        result.interrupted = stop.is_stopped();

        log::info!(
            "Prime count finished: {} primes in {:?} ({:.1} primes/s)",
            result.total_primes_found,
            elapsed,
            result.rate
        );
        if result.overshoot() > Duration::ZERO {
            log::debug!("Run overshot its deadline by {:?}", result.overshoot());
        }

        Ok(result)
    }

    /// Count primes in `[config.start, end)` with the same partitioning as a
    /// timed run, ignoring the deadline
    pub async fn count_range(&mut self, end: u64) -> Result<RangeCount> {
        self.spawn_workers(RunLimit::Until(end), &StopSignal::new(), None);
        let states = self.join_workers().await?;

        Ok(RangeCount {
            total_primes_found: states.iter().map(|s| s.local_prime_count).sum(),
            per_worker_primes: states.iter().map(|s| s.local_prime_count).collect(),
            candidates_tested: states.iter().map(|s| s.candidates_tested).sum(),
        })
    }

    /// Spawn one blocking thread per worker; partitions are fixed here
    fn spawn_workers(
        &mut self,
        limit: RunLimit,
        stop: &StopSignal,
        progress_tx: Option<mpsc::Sender<WorkerProgress>>,
    ) {
        let abort = Arc::new(AtomicBool::new(false));
        let cursor = Arc::new(AtomicU64::new(self.config.start));

        self.workers.clear();
        for id in 0..self.config.worker_count {
            let context = WorkerContext {
                id,
                worker_count: self.config.worker_count,
                start: self.config.start,
                policy: self.config.partition,
                limit,
                stop: stop.clone(),
                abort: Arc::clone(&abort),
                cursor: Arc::clone(&cursor),
                progress_tx: progress_tx.clone(),
            };

            let mut worker = WorkerInfo::new(id);
            worker.handle = Some(tokio::task::spawn_blocking(move || context.run()));
            worker.status = WorkerStatus::Running;
            self.workers.push(worker);
        }
    }

    /// Wait for every worker, then fail the run if any single worker failed
    async fn join_workers(&mut self) -> Result<Vec<SieveWorkerState>> {
        let mut states = Vec::with_capacity(self.workers.len());
        let mut first_error: Option<CgrbError> = None;

        for worker in self.workers.iter_mut() {
            let Some(handle) = worker.handle.take() else {
                continue;
            };
            match handle.await {
                Ok(Ok(state)) => {
                    worker.status = WorkerStatus::Completed;
                    states.push(state);
                }
                Ok(Err(e)) => {
                    log::error!("Sieve worker {} failed: {}", worker.id, e);
                    worker.status = WorkerStatus::Failed(e.to_string());
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    log::error!("Sieve worker {} did not join: {}", worker.id, e);
                    worker.status = WorkerStatus::Failed(format!("Join error: {}", e));
                    first_error.get_or_insert(CgrbError::WorkerFailure {
                        worker: worker.id,
                        reason: format!("join failed: {}", e),
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(CgrbError::BenchmarkFailed(e.to_string())),
            None => Ok(states),
        }
    }

    /// Fold per-worker snapshots into aggregated updates for the caller
    fn start_progress_aggregation(
        mut worker_rx: mpsc::Receiver<WorkerProgress>,
        progress_tx: mpsc::Sender<AggregatedProgress>,
        deadline: Deadline,
        worker_count: usize,
    ) {
        tokio::spawn(async move {
            let mut worker_progress: Vec<Option<WorkerProgress>> = vec![None; worker_count];

            // Ends once every worker has dropped its sender
            while let Some(update) = worker_rx.recv().await {
                let id = update.worker_id;
                if id < worker_progress.len() {
                    worker_progress[id] = Some(update);
                }
                let aggregated = Self::aggregate_progress(&worker_progress, deadline);
                if progress_tx.send(aggregated).await.is_err() {
                    // Receiver dropped, keep draining so workers never see a full channel
                    continue;
                }
            }
        });
    }

    /// Aggregate progress from all workers
    fn aggregate_progress(
        worker_progress: &[Option<WorkerProgress>],
        deadline: Deadline,
    ) -> AggregatedProgress {
        let mut total_primes_found = 0u64;
        let mut candidates_tested = 0u64;
        let mut active_workers = 0;

        for progress in worker_progress.iter().flatten() {
            total_primes_found += progress.primes_found;
            candidates_tested += progress.candidates_tested;
            active_workers += 1;
        }

        let elapsed = deadline.elapsed();
        AggregatedProgress {
            total_primes_found,
            candidates_tested,
            elapsed,
            remaining: deadline.remaining(),
            rate: crate::models::calculate_rate(total_primes_found, elapsed),
            active_workers,
        }
    }

    /// Get current worker statuses
    pub fn worker_statuses(&self) -> Vec<(usize, WorkerStatus)> {
        self.workers.iter().map(|w| (w.id, w.status.clone())).collect()
    }

    /// Check if all workers are completed
    pub fn all_workers_completed(&self) -> bool {
        self.workers.iter().all(|w| w.is_completed())
    }
}

/// Run the CPU prime counting benchmark with a fresh pool
pub async fn run_sieve_benchmark(
    config: &SieveConfig,
    stop: &StopSignal,
    progress_tx: Option<mpsc::Sender<AggregatedProgress>>,
) -> Result<SieveResult> {
    let mut pool = SieveWorkerPool::new(config.clone())?;
    pool.run(stop, progress_tx).await
}
