use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use orchestrator::progress::{Phase, ProgressBoard, ProgressSnapshot};
use orchestrator::summary::format_clock;
use tokio_util::sync::CancellationToken;

/// Resolution of the per-slot bars
const BAR_STEPS: u64 = 1000;

/// One progress bar per worker slot plus a batch total, redrawn from the board
#[derive(Default)]
pub struct BarRenderer {
    multi: MultiProgress,
}

impl BarRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log sink that hides the bars while a record is written
    pub fn log_writer(&self) -> LogWriter {
        LogWriter { multi: self.multi.clone() }
    }

    pub async fn run(self, board: Arc<ProgressBoard>, interval: Duration, stop: CancellationToken) -> Result<()> {
        let total_bar = self.multi.add(ProgressBar::new(board.tally().total as u64));
        total_bar.set_style(
            ProgressStyle::with_template("{prefix:>7} [{bar:40.green/white}] {pos}/{len} files {msg}")?
                .progress_chars("#>-"),
        );
        total_bar.set_prefix("Total");

        let slot_style = ProgressStyle::with_template("{prefix:>7} [{bar:40.cyan/blue}] {msg}")?
            .progress_chars("#>-");
        let slot_bars: Vec<ProgressBar> = (0..board.capacity())
            .map(|slot| {
                let bar = self.multi.add(ProgressBar::new(BAR_STEPS));
                bar.set_style(slot_style.clone());
                bar.set_prefix(format!("Slot {}", slot));
                bar
            })
            .collect();

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => draw(&board, &total_bar, &slot_bars),
            }
        }

        draw(&board, &total_bar, &slot_bars);
        for bar in &slot_bars {
            bar.finish_and_clear();
        }
        total_bar.finish();
        Ok(())
    }
}

fn draw(board: &ProgressBoard, total_bar: &ProgressBar, slot_bars: &[ProgressBar]) {
    let tally = board.tally();
    total_bar.set_length(tally.total as u64);
    total_bar.set_position(tally.completed as u64);
    total_bar.set_message(format!("✅ {} ❌ {}", tally.succeeded, tally.failed));

    let mut active = board.snapshot_all().into_iter().peekable();
    for (slot, bar) in slot_bars.iter().enumerate() {
        match active.next_if(|(s, _)| *s == slot) {
            Some((_, snap)) => {
                let pos = snap.fraction.map(|f| (f * BAR_STEPS as f64) as u64).unwrap_or(0);
                bar.set_position(pos);
                bar.set_message(progress_text(&snap));
            }
            None => {
                bar.set_position(0);
                bar.set_message("idle");
            }
        }
    }
}

/// One-line description of a slot: percent, file, media time and phase
pub fn progress_text(snap: &ProgressSnapshot) -> String {
    let percent = match snap.fraction {
        Some(f) => format!("{:5.1}%", f * 100.0),
        None => "  ?  %".to_string(),
    };
    let media = match (snap.position, snap.total) {
        (Some(pos), Some(total)) => format!("{}/{}", format_clock(pos), format_clock(total)),
        (Some(pos), None) => format!("{}/?", format_clock(pos)),
        (None, Some(total)) => format!("?/{}", format_clock(total)),
        (None, None) => "?/?".to_string(),
    };
    let phase = match snap.phase {
        Phase::Queued => " (starting)",
        Phase::Running => "",
        Phase::Finalizing => " (finalizing)",
    };
    format!("{} {} {} [{}]{}", percent, snap.label, media, format_clock(snap.elapsed), phase)
}

/// `env_logger` target that suspends the bars around each record
pub struct LogWriter {
    multi: MultiProgress,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}
