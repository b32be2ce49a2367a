use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The input root could not be enumerated. Fatal for the whole run.
#[derive(Debug, Error)]
#[error("cannot read input directory {}: {source}", .root.display())]
pub struct DiscoveryError {
    pub root: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Why a single job ended in failure. Scoped to that job; siblings keep running.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FailureReason {
    /// The engine could not be launched at all
    #[error("failed to launch {}: {message}", .program.display())]
    Spawn {
        program: PathBuf,
        message: String,
        not_found: bool,
    },
    /// The engine ran and exited unsuccessfully
    #[error("engine exited with {}{}", describe_exit(.code), tail_suffix(.stderr_tail))]
    Engine {
        code: Option<i32>,
        stderr_tail: String,
    },
    #[error("engine killed after exceeding {}s timeout", .after.as_secs())]
    TimedOut { after: Duration },
    #[error("cancelled before completion")]
    Cancelled,
    /// Local I/O around the engine failed (pipes, output directory)
    #[error("i/o error: {0}")]
    Io(String),
    /// The worker running the job died without reporting an outcome
    #[error("worker crashed while running the job")]
    Crashed,
}

fn describe_exit(code: &Option<i32>) -> String {
    match *code {
        Some(c) => format!("exit code {}", c),
        None => "abnormal termination (signal)".to_string(),
    }
}

fn tail_suffix(tail: &str) -> String {
    match tail.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => format!(": {}", last.trim()),
        None => String::new(),
    }
}

/// Post-success file move failed. Reported as a warning on an otherwise successful job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot create directory {}: {message}", .path.display())]
    CreateDir { path: PathBuf, message: String },
    #[error("destination already exists: {}", .path.display())]
    DestinationExists { path: PathBuf },
    #[error("cannot move {} -> {}: {message}", .from.display(), .to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },
}

/// Duration probe failed. Only degrades the progress display.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeWarning {
    #[error("ffprobe could not be launched: {0}")]
    Launch(String),
    #[error("ffprobe exited with code {0:?}")]
    Exit(Option<i32>),
    #[error("unparseable ffprobe output: {0}")]
    Parse(String),
    #[error("no duration reported")]
    Missing,
}
