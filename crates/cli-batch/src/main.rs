use anyhow::{Context, Result};
use clap::Parser;
use humansize::{format_size, DECIMAL};
use log::{error, info, warn};
use orchestrator::{
    config::BatchConfig,
    ffmpeg::EncodeProfile,
    scan,
    summary::{format_clock, total_output_bytes},
    Executor, RunSummary, WorkerPool,
};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

mod render;
mod tui;

/// Log file written inside the output directory while the dashboard owns the terminal
const TUI_LOG_FILE: &str = "batch720.log";

/// Batch 720p transcoder: converts every video in a directory with bounded parallelism
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory containing the videos to convert
    #[arg(value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Directory containing the videos to convert (same as DIR)
    #[arg(short, long, conflicts_with = "dir")]
    input: Option<PathBuf>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of concurrent encodes (defaults to the number of CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Encode profile: x265, h264-nvenc or hevc-nvenc
    #[arg(long, value_parser = parse_profile)]
    profile: Option<EncodeProfile>,

    /// Prefix for output file names (e.g. "720p_")
    #[arg(long)]
    prefix: Option<String>,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Path to the ffprobe binary
    #[arg(long)]
    ffprobe: Option<PathBuf>,

    /// Kill an encode after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Skip duration probing (progress shows media time only)
    #[arg(long)]
    no_probe: bool,

    /// Write <file>.why.txt next to sources that failed
    #[arg(long)]
    failure_notes: bool,

    /// Full-screen dashboard instead of progress bars
    #[arg(long)]
    tui: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Override configuration values with the flags given on the command line
    fn apply(&self, cfg: &mut BatchConfig) {
        if let Some(root) = self.dir.as_ref().or(self.input.as_ref()) {
            cfg.input_root = root.clone();
        }
        if let Some(jobs) = self.jobs {
            cfg.concurrency = Some(jobs);
        }
        if let Some(profile) = self.profile {
            cfg.profile = profile;
        }
        if let Some(prefix) = &self.prefix {
            cfg.output_prefix = prefix.clone();
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            cfg.ffmpeg_bin = ffmpeg.clone();
        }
        if let Some(ffprobe) = &self.ffprobe {
            cfg.ffprobe_bin = ffprobe.clone();
        }
        if let Some(secs) = self.timeout {
            cfg.job_timeout_secs = Some(secs);
        }
        if self.no_probe {
            cfg.probe_duration = false;
        }
        if self.failure_notes {
            cfg.failure_notes = true;
        }
    }
}

fn parse_profile(s: &str) -> Result<EncodeProfile, String> {
    s.parse()
}

fn init_logging(verbose: bool, target: Option<Box<dyn Write + Send>>) {
    let default_level = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    builder.format_timestamp_secs();
    if let Some(target) = target {
        builder.target(env_logger::Target::Pipe(target));
    }
    builder.init();
}

/// Open the dashboard log file, or `None` when the input root is not a directory yet
fn open_tui_log(cfg: &BatchConfig) -> Result<Option<fs::File>> {
    if !cfg.input_root.is_dir() {
        return Ok(None);
    }
    let output_dir = cfg.output_dir();
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    let path = output_dir.join(TUI_LOG_FILE);
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    Ok(Some(file))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration, then let flags win
    let mut cfg = BatchConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply(&mut cfg);

    // Logs go around the bars, or into a file while the dashboard is up
    let bars = render::BarRenderer::new();
    if args.tui {
        let file = open_tui_log(&cfg)?;
        init_logging(args.verbose, file.map(|f| Box::new(f) as Box<dyn Write + Send>));
    } else {
        init_logging(args.verbose, Some(Box::new(bars.log_writer())));
    }

    info!("Batch transcoder starting");
    info!("  Input: {}", cfg.input_root.display());
    info!("  Output: {}", cfg.output_dir().display());
    info!("  Done: {}", cfg.done_dir().display());
    info!("  Profile: {}", cfg.profile);
    if let Some(timeout) = cfg.job_timeout() {
        info!("  Job timeout: {}s", timeout.as_secs());
    }

    let jobs = scan::discover(&cfg).context("Failed to discover input files")?;
    if jobs.is_empty() {
        println!("No video files found in {}, nothing to do.", cfg.input_root.display());
        return Ok(());
    }

    let limit = cfg.effective_concurrency(jobs.len());
    info!("Converting {} file(s) with {} concurrent job(s)", jobs.len(), limit);

    let pool = WorkerPool::new(Executor::new(cfg.clone()), limit);
    let board = pool.board();
    let cancel = CancellationToken::new();

    // Ctrl-C stops running engines and records everything unfinished as cancelled
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping running encodes...");
            signal_cancel.cancel();
        }
    });

    let render_stop = CancellationToken::new();
    let renderer = if args.tui {
        let board = board.clone();
        let root = cfg.input_root.clone();
        let interval = cfg.render_interval();
        let stop = render_stop.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || tui::run(board, root, interval, stop, cancel))
    } else {
        tokio::spawn(bars.run(board.clone(), cfg.render_interval(), render_stop.clone()))
    };

    let summary = pool.run(jobs, cancel).await;

    render_stop.cancel();
    match renderer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Progress display failed: {:#}", e),
        Err(e) => error!("Progress display task panicked: {}", e),
    }

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let state = &summary.state;
    println!("{}", "=".repeat(72));
    println!("Processing complete!");
    println!(
        "Total files: {} | Successful: {} | Failed: {}",
        state.total, state.succeeded, state.failed
    );
    println!(
        "Output written: {}",
        format_size(total_output_bytes(&summary.outcomes), DECIMAL)
    );
    println!(
        "Started: {} | Total time: {} | Peak concurrency: {}/{}",
        state.started_at.format("%Y-%m-%d %H:%M:%S"),
        format_clock(summary.wall_time),
        summary.peak_in_flight,
        summary.slots
    );

    let failures: Vec<_> = summary.failures().collect();
    if !failures.is_empty() {
        println!("Failed files:");
        for outcome in failures {
            if let Some(reason) = outcome.reason() {
                println!("  ❌ {}: {}", outcome.job().label(), reason);
            }
        }
    }

    let warnings: Vec<_> = summary.warnings().collect();
    if !warnings.is_empty() {
        println!("Warnings:");
        for outcome in warnings {
            if let Some(warning) = outcome.warning() {
                println!("  ⚠️  {}: {}", outcome.job().label(), warning);
            }
        }
    }
    println!("{}", "=".repeat(72));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "batch720", "/videos", "-j", "3", "--profile", "HEVC-NVENC", "--prefix", "720p_",
            "--timeout", "600", "--no-probe", "--failure-notes",
        ]);
        let mut cfg = BatchConfig::default_config();
        args.apply(&mut cfg);

        assert_eq!(cfg.input_root, PathBuf::from("/videos"));
        assert_eq!(cfg.concurrency, Some(3));
        assert_eq!(cfg.profile, EncodeProfile::HevcNvenc);
        assert_eq!(cfg.output_prefix, "720p_");
        assert_eq!(cfg.job_timeout_secs, Some(600));
        assert!(!cfg.probe_duration);
        assert!(cfg.failure_notes);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let args = Args::parse_from(["batch720"]);
        let mut cfg = BatchConfig::default_config();
        cfg.output_prefix = "x_".to_string();
        args.apply(&mut cfg);

        assert_eq!(cfg.input_root, PathBuf::from("."));
        assert_eq!(cfg.output_prefix, "x_");
        assert!(cfg.probe_duration);
        assert_eq!(cfg.concurrency, None);
    }

    #[test]
    fn test_input_flag_and_unknown_profile() {
        let args = Args::parse_from(["batch720", "--input", "/media"]);
        let mut cfg = BatchConfig::default_config();
        args.apply(&mut cfg);
        assert_eq!(cfg.input_root, PathBuf::from("/media"));

        assert!(Args::try_parse_from(["batch720", "--profile", "av1"]).is_err());
    }
}
