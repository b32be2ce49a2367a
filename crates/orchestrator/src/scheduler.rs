use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use crate::error::FailureReason;
use crate::job::{Job, JobId};
use crate::outcome::Outcome;
use crate::progress::{ProgressBoard, SlotReporter, Tally};
use crate::summary::format_clock;
use log::{debug, error, info, warn};

/// Something that can carry one job to a terminal outcome.
///
/// Called at most once per job. Implementations publish progress through the
/// reporter and should stop promptly once `cancel` fires.
pub trait JobRunner: Send + Sync + 'static {
    fn run(&self, job: Arc<Job>, reporter: SlotReporter, cancel: CancellationToken) -> impl Future<Output = Outcome> + Send;

    /// Clean up after a job whose outcome was recorded without `run` finishing
    fn abandoned(&self, _outcome: &Outcome) {}
}

/// Batch counters. Only the scheduler's completion path writes them.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub started_at: DateTime<Local>,
    started: Instant,
}

impl PoolState {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            succeeded: 0,
            failed: 0,
            started_at: Local::now(),
            started: Instant::now(),
        }
    }

    fn record(&mut self, outcome: &Outcome) {
        self.completed += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn tally(&self) -> Tally {
        Tally {
            total: self.total,
            completed: self.completed,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.total && self.completed == self.succeeded + self.failed
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: PoolState,
    /// One entry per job, in completion order
    pub outcomes: Vec<Outcome>,
    /// Number of slots the run used
    pub slots: usize,
    /// Highest number of jobs in flight at once
    pub peak_in_flight: usize,
    pub wall_time: Duration,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.warning().is_some())
    }
}

/// Pending jobs in discovery order behind a shared cursor.
///
/// `claim` hands out each job exactly once, however many workers race on it.
#[derive(Debug)]
pub struct JobQueue {
    jobs: Vec<Arc<Job>>,
    cursor: AtomicUsize,
}

impl JobQueue {
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs: jobs.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Take the next unstarted job, if any
    pub fn claim(&self) -> Option<Arc<Job>> {
        let index = self.cursor.fetch_add(1, Ordering::AcqRel);
        self.jobs.get(index).cloned()
    }
}

enum PoolEvent {
    Dispatched { slot: usize, job: Arc<Job> },
    Finished { slot: usize, outcome: Outcome },
}

/// Bounded pool of concurrently running jobs.
///
/// Each slot is a worker task that refills itself from the shared queue as
/// soon as its current job has an outcome, so all slots stay busy until the
/// queue runs dry.
pub struct WorkerPool<R: JobRunner> {
    runner: Arc<R>,
    board: Arc<ProgressBoard>,
    limit: usize,
}

impl<R: JobRunner> WorkerPool<R> {
    pub fn new(runner: R, concurrency_limit: usize) -> Self {
        let limit = concurrency_limit.max(1);
        Self {
            runner: Arc::new(runner),
            board: Arc::new(ProgressBoard::new(limit)),
            limit,
        }
    }

    /// Progress table shared with renderers
    pub fn board(&self) -> Arc<ProgressBoard> {
        self.board.clone()
    }

    /// Run every job to a terminal outcome.
    ///
    /// Failures never stop the run. After `cancel` fires, in-flight jobs are
    /// stopped and unstarted ones are recorded as cancelled without running.
    pub async fn run(&self, jobs: Vec<Job>, cancel: CancellationToken) -> RunSummary {
        let total = jobs.len();
        let mut state = PoolState::new(total);
        self.board.set_tally(state.tally());

        let slots = self.limit.min(total);
        if slots == 0 {
            info!("No jobs to run");
            return RunSummary {
                wall_time: state.elapsed(),
                state,
                outcomes: Vec::new(),
                slots: 0,
                peak_in_flight: 0,
            };
        }

        info!("Starting {} job(s) on {} slot(s)", total, slots);

        let queue = Arc::new(JobQueue::new(jobs));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();
        for slot in 0..slots {
            workers.spawn(worker_loop(
                slot,
                queue.clone(),
                self.runner.clone(),
                self.board.clone(),
                tx.clone(),
                cancel.clone(),
            ));
        }
        drop(tx);

        let mut in_flight: HashMap<usize, Arc<Job>> = HashMap::with_capacity(slots);
        let mut dispatched: HashSet<JobId> = HashSet::with_capacity(total);
        let mut outcomes = Vec::with_capacity(total);
        let mut peak_in_flight = 0;

        while let Some(event) = rx.recv().await {
            match event {
                PoolEvent::Dispatched { slot, job } => {
                    if !dispatched.insert(job.id) {
                        error!("Job {} was dispatched twice", job.id);
                    }
                    if let Some(previous) = in_flight.insert(slot, job) {
                        error!("Slot {} still held job {} when a new one was dispatched", slot, previous.id);
                    }
                    peak_in_flight = peak_in_flight.max(in_flight.len());
                }
                PoolEvent::Finished { slot, outcome } => {
                    in_flight.remove(&slot);
                    self.complete(&mut state, &mut outcomes, outcome);
                }
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task ended abnormally: {}", e);
            }
        }

        // A dead worker leaves its job without an outcome; record it rather than drop it
        let mut orphans: Vec<(usize, Arc<Job>)> = in_flight.into_iter().collect();
        orphans.sort_by_key(|(slot, _)| *slot);
        for (slot, job) in orphans {
            self.board.clear(slot);
            let outcome = Outcome::failure(job, Duration::ZERO, FailureReason::Crashed);
            self.runner.abandoned(&outcome);
            self.complete(&mut state, &mut outcomes, outcome);
        }
        while let Some(job) = queue.claim() {
            let outcome = Outcome::failure(job, Duration::ZERO, FailureReason::Crashed);
            self.runner.abandoned(&outcome);
            self.complete(&mut state, &mut outcomes, outcome);
        }

        if !state.is_complete() {
            error!(
                "Run ended with inconsistent counters: {} completed, {} succeeded, {} failed of {}",
                state.completed, state.succeeded, state.failed, state.total
            );
        }

        info!(
            "Run finished: {}/{} completed, {} succeeded, {} failed in {}",
            state.completed,
            state.total,
            state.succeeded,
            state.failed,
            format_clock(state.elapsed())
        );

        RunSummary {
            wall_time: state.elapsed(),
            state,
            outcomes,
            slots,
            peak_in_flight,
        }
    }

    fn complete(&self, state: &mut PoolState, outcomes: &mut Vec<Outcome>, outcome: Outcome) {
        state.record(&outcome);
        self.board.set_tally(state.tally());
        log_outcome(&outcome, state);
        outcomes.push(outcome);
    }
}

async fn worker_loop<R: JobRunner>(
    slot: usize,
    queue: Arc<JobQueue>,
    runner: Arc<R>,
    board: Arc<ProgressBoard>,
    tx: mpsc::UnboundedSender<PoolEvent>,
    cancel: CancellationToken,
) {
    let reporter = SlotReporter::new(slot, board.clone());

    while let Some(job) = queue.claim() {
        if tx.send(PoolEvent::Dispatched { slot, job: job.clone() }).is_err() {
            break;
        }

        let outcome = if cancel.is_cancelled() {
            Outcome::failure(job, Duration::ZERO, FailureReason::Cancelled)
        } else {
            runner.run(job, reporter.clone(), cancel.clone()).await
        };

        // Free the slot before the scheduler hears about the outcome
        board.clear(slot);
        if tx.send(PoolEvent::Finished { slot, outcome }).is_err() {
            break;
        }
    }

    debug!("Slot {}: queue drained", slot);
}

fn log_outcome(outcome: &Outcome, state: &PoolState) {
    let job = outcome.job();
    let progress = format!("[{}/{}]", state.completed, state.total);
    match outcome {
        Outcome::Success { elapsed, warning: None, .. } => {
            info!("✅ {} Job {}: {} done in {}", progress, job.id, job.label(), format_clock(*elapsed));
        }
        Outcome::Success { elapsed, warning: Some(w), .. } => {
            warn!("⚠️  {} Job {}: {} transcoded in {} but {}", progress, job.id, job.label(), format_clock(*elapsed), w);
        }
        Outcome::Failure { elapsed, reason, .. } => {
            error!("❌ {} Job {}: {} failed after {}: {}", progress, job.id, job.label(), format_clock(*elapsed), reason);
        }
    }
}
