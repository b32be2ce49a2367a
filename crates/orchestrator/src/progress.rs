use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use crate::job::{Job, JobId};
use log::warn;

/// Where a slot's job currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Claimed by a slot, engine not yet producing output
    Queued,
    Running,
    /// Engine reported the end of its stream; output being promoted
    Finalizing,
}

/// Latest progress reading for one slot's job. Replaced wholesale on each update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    /// Completion in [0, 1], or None when unknown
    pub fraction: Option<f64>,
    /// Wall time since the job started
    pub elapsed: Duration,
    /// Media position the engine has reached
    pub position: Option<Duration>,
    /// Probed duration of the source
    pub total: Option<Duration>,
    pub label: String,
    pub phase: Phase,
}

impl ProgressSnapshot {
    pub fn queued(job: &Job) -> Self {
        Self {
            job_id: job.id,
            fraction: None,
            elapsed: Duration::ZERO,
            position: None,
            total: None,
            label: job.label(),
            phase: Phase::Queued,
        }
    }
}

/// Clamp a raw ratio into [0, 1]; non-finite values mean "unknown"
pub fn clamp_fraction(raw: f64) -> Option<f64> {
    if raw.is_finite() {
        Some(raw.clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Completion fraction of `position` against `total`
pub fn fraction_of(position: Option<Duration>, total: Option<Duration>) -> Option<f64> {
    match (position, total) {
        (Some(pos), Some(total)) if !total.is_zero() => {
            clamp_fraction(pos.as_secs_f64() / total.as_secs_f64())
        }
        _ => None,
    }
}

/// One completed block of engine progress output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    /// Position reached, None if absent, unparseable or regressing
    pub position: Option<Duration>,
    /// The engine announced the end of its stream
    pub ended: bool,
}

/// Incremental parser for ffmpeg's `-progress` key=value stream.
///
/// Lines accumulate into a block that is closed by a `progress=` line.
/// Anything it does not understand is ignored.
#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: Option<Duration>,
    last_reported: Option<Duration>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a report when the line closes a block
    pub fn feed(&mut self, line: &str) -> Option<ProgressReport> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key.trim() {
            // out_time_ms carries microseconds as well
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    if us >= 0 {
                        self.pending = Some(Duration::from_micros(us as u64));
                    }
                }
                None
            }
            "out_time" => {
                if self.pending.is_none() {
                    self.pending = parse_clock(value);
                }
                None
            }
            "progress" => {
                let ended = value == "end";
                let position = self.pending.take().and_then(|pos| {
                    match self.last_reported {
                        Some(last) if pos < last => None,
                        _ => {
                            self.last_reported = Some(pos);
                            Some(pos)
                        }
                    }
                });
                Some(ProgressReport { position, ended })
            }
            _ => None,
        }
    }
}

/// Parse `HH:MM:SS.ffffff`
pub fn parse_clock(value: &str) -> Option<Duration> {
    let mut parts = value.trim().splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if minutes >= 60 || !seconds.is_finite() || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    let whole = hours.checked_mul(3600)?.checked_add(minutes * 60)?;
    Duration::from_secs(whole).checked_add(Duration::from_secs_f64(seconds))
}

/// Batch-wide counters mirrored for renderers. Written only by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct BoardState {
    slots: Vec<Option<ProgressSnapshot>>,
    tally: Tally,
}

/// Shared slot -> snapshot table.
///
/// Sized once for the pool, so updates are O(1) and nothing grows with the
/// number of jobs. The lock is only held for a single read or write.
#[derive(Debug)]
pub struct ProgressBoard {
    state: Mutex<BoardState>,
}

impl ProgressBoard {
    pub fn new(slots: usize) -> Self {
        Self {
            state: Mutex::new(BoardState {
                slots: vec![None; slots],
                tally: Tally::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Replace the snapshot of a slot
    pub fn update(&self, slot: usize, snapshot: ProgressSnapshot) {
        let mut state = self.state.lock();
        match state.slots.get_mut(slot) {
            Some(entry) => *entry = Some(snapshot),
            None => warn!("Progress update for unknown slot {} dropped", slot),
        }
    }

    /// Forget a slot once its job has an outcome
    pub fn clear(&self, slot: usize) {
        if let Some(entry) = self.state.lock().slots.get_mut(slot) {
            *entry = None;
        }
    }

    /// Current snapshot of every occupied slot, ordered by slot
    pub fn snapshot_all(&self) -> Vec<(usize, ProgressSnapshot)> {
        let state = self.state.lock();
        state
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, snap)| snap.clone().map(|s| (slot, s)))
            .collect()
    }

    pub fn active_slots(&self) -> usize {
        self.state.lock().slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn set_tally(&self, tally: Tally) {
        self.state.lock().tally = tally;
    }

    pub fn tally(&self) -> Tally {
        self.state.lock().tally
    }
}

/// A worker's handle for publishing progress of its current job
#[derive(Debug, Clone)]
pub struct SlotReporter {
    slot: usize,
    board: Arc<ProgressBoard>,
}

impl SlotReporter {
    pub fn new(slot: usize, board: Arc<ProgressBoard>) -> Self {
        Self { slot, board }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn report(&self, snapshot: ProgressSnapshot) {
        self.board.update(self.slot, snapshot);
    }
}
