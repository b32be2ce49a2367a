use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader, Take};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use crate::config::BatchConfig;
use crate::error::FailureReason;
use crate::job::Job;
use crate::outcome::Outcome;
use crate::progress::{fraction_of, Phase, ProgressParser, ProgressSnapshot, SlotReporter};
use crate::scheduler::JobRunner;
use crate::{ffmpeg, ffprobe, lifecycle};
use log::{debug, error, info, warn};

/// How long to wait for the stderr reader after the engine has exited
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest engine output line kept; longer lines are dropped whole
const MAX_LINE_BYTES: usize = 4096;

/// Why the engine wait loop stopped
enum Stop {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

/// Runs one engine process per job and turns its output into progress and an outcome
#[derive(Debug, Clone)]
pub struct Executor {
    cfg: Arc<BatchConfig>,
}

impl Executor {
    pub fn new(cfg: BatchConfig) -> Self {
        Self { cfg: Arc::new(cfg) }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.cfg
    }

    /// Transcode one job and settle its source file.
    ///
    /// Success is decided only by the engine's exit status. Every failure path
    /// leaves the source where it was and removes the staged output.
    pub async fn execute(&self, job: Arc<Job>, reporter: &SlotReporter, cancel: &CancellationToken) -> Outcome {
        let started = Instant::now();
        let mut snapshot = ProgressSnapshot::queued(&job);
        reporter.report(snapshot.clone());

        if cancel.is_cancelled() {
            return self.settle(job, started, Err(FailureReason::Cancelled));
        }

        info!("Job {}: starting {} on slot {}", job.id, job.source_path.display(), reporter.slot());

        if self.cfg.probe_duration {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return self.settle(job, started, Err(FailureReason::Cancelled));
                }
                probed = ffprobe::probe_duration(&self.cfg, &job.source_path) => match probed {
                    Ok(total) => {
                        debug!("Job {}: duration {:.1}s", job.id, total.as_secs_f64());
                        snapshot.total = Some(total);
                    }
                    Err(w) => debug!("Job {}: duration probe failed, progress unknown: {}", job.id, w),
                }
            }
        }

        let result = self.run_engine(&job, started, &mut snapshot, reporter, cancel).await;
        self.settle(job, started, result)
    }

    /// Build the outcome and hand the source file to the lifecycle manager
    fn settle(&self, job: Arc<Job>, started: Instant, result: Result<(), FailureReason>) -> Outcome {
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(()) => {
                match lifecycle::promote_output(&job) {
                    Ok(true) => {}
                    Ok(false) => warn!("Job {}: engine exited successfully but wrote no output", job.id),
                    Err(e) => {
                        // Without a finished output the original must stay put
                        error!("Job {}: {}", job.id, e);
                        return Outcome::Success { job, elapsed, warning: Some(e) };
                    }
                }
                Outcome::success(job.clone(), elapsed)
            }
            Err(reason) => Outcome::failure(job.clone(), elapsed, reason),
        };

        match lifecycle::dispose(&self.cfg, &job, &outcome) {
            Ok(_) => outcome,
            Err(e) => {
                warn!("Job {}: ⚠️  transcode succeeded but {}", job.id, e);
                match outcome {
                    Outcome::Success { job, elapsed, .. } => Outcome::Success { job, elapsed, warning: Some(e) },
                    failure => failure,
                }
            }
        }
    }

    async fn run_engine(
        &self,
        job: &Job,
        started: Instant,
        snapshot: &mut ProgressSnapshot,
        reporter: &SlotReporter,
        cancel: &CancellationToken,
    ) -> Result<(), FailureReason> {
        if let Some(output_dir) = job.staging_path.parent() {
            lifecycle::ensure_dir(output_dir).map_err(|e| FailureReason::Io(e.to_string()))?;
        }

        let args = ffmpeg::build_encode_command(job, self.cfg.profile);
        debug!(
            "Job {}: executing {} {}",
            job.id,
            self.cfg.ffmpeg_bin.display(),
            args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
        );

        let mut child = spawn_engine(&self.cfg.ffmpeg_bin, &args)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FailureReason::Io("engine stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FailureReason::Io("engine stderr not captured".to_string()))?;

        // Drain stderr continuously so the engine never blocks on a full pipe
        let stderr_task = tokio::spawn(collect_tail(stderr, self.cfg.stderr_tail_lines));

        snapshot.phase = Phase::Running;
        snapshot.elapsed = started.elapsed();
        reporter.report(snapshot.clone());

        let mut lines = CappedLines::new(stdout);
        let mut stdout_open = true;
        let mut parser = ProgressParser::new();
        let interval = self.cfg.progress_interval();
        let mut last_push: Option<Instant> = None;

        let limit = self.cfg.job_timeout();
        let deadline = async move {
            match limit {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let stop = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Stop::Cancelled,
                _ = &mut deadline => break Stop::TimedOut(limit.unwrap_or_default()),
                status = child.wait() => break Stop::Exited(status),
                line = lines.next_line(), if stdout_open => {
                    match line {
                        Ok(None) => stdout_open = false,
                        Ok(Some(line)) => {
                            if let Some(report) = parser.feed(&line) {
                                snapshot.position = report.position;
                                snapshot.fraction = fraction_of(report.position, snapshot.total);
                                snapshot.elapsed = started.elapsed();
                                if report.ended {
                                    snapshot.phase = Phase::Finalizing;
                                }
                                if report.ended || last_push.map_or(true, |t| t.elapsed() >= interval) {
                                    reporter.report(snapshot.clone());
                                    last_push = Some(Instant::now());
                                }
                            }
                        }
                        Err(e) => {
                            debug!("Job {}: progress stream closed: {}", job.id, e);
                            stdout_open = false;
                        }
                    }
                }
            }
        };

        match stop {
            Stop::Cancelled => {
                warn!("Job {}: cancelled, stopping engine", job.id);
                terminate(&mut child, job).await;
                stderr_task.abort();
                Err(FailureReason::Cancelled)
            }
            Stop::TimedOut(after) => {
                warn!("Job {}: engine exceeded {}s, stopping it", job.id, after.as_secs());
                terminate(&mut child, job).await;
                stderr_task.abort();
                Err(FailureReason::TimedOut { after })
            }
            Stop::Exited(Err(e)) => {
                stderr_task.abort();
                Err(FailureReason::Io(format!("waiting for engine: {}", e)))
            }
            Stop::Exited(Ok(status)) => {
                let stderr_tail = match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr_task).await {
                    Ok(Ok(tail)) => tail,
                    _ => String::new(),
                };

                if !status.success() {
                    debug!("Job {}: engine stderr tail:\n{}", job.id, stderr_tail);
                    return Err(FailureReason::Engine {
                        code: status.code(),
                        stderr_tail,
                    });
                }

                snapshot.phase = Phase::Finalizing;
                snapshot.fraction = Some(1.0);
                snapshot.elapsed = started.elapsed();
                reporter.report(snapshot.clone());
                Ok(())
            }
        }
    }
}

impl JobRunner for Executor {
    fn run(&self, job: Arc<Job>, reporter: SlotReporter, cancel: CancellationToken) -> impl Future<Output = Outcome> + Send {
        async move { self.execute(job, &reporter, &cancel).await }
    }

    fn abandoned(&self, outcome: &Outcome) {
        let job = outcome.job();
        if let Err(e) = lifecycle::dispose(&self.cfg, job, outcome) {
            warn!("Job {}: cleanup after crash failed: {}", job.id, e);
        }
    }
}

fn spawn_engine(program: &Path, args: &[std::ffi::OsString]) -> Result<Child, FailureReason> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FailureReason::Spawn {
            program: program.to_path_buf(),
            message: e.to_string(),
            not_found: e.kind() == std::io::ErrorKind::NotFound,
        })
}

async fn terminate(child: &mut Child, job: &Job) {
    if let Err(e) = child.kill().await {
        warn!("Job {}: failed to kill engine: {}", job.id, e);
    }
}

/// Newline-delimited reader that never buffers more than `MAX_LINE_BYTES`.
///
/// Cancel safe: a partially read line stays buffered for the next call.
struct CappedLines<R> {
    reader: Take<BufReader<R>>,
    buf: Vec<u8>,
    skipping: bool,
}

impl<R: AsyncRead + Unpin> CappedLines<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader).take(MAX_LINE_BYTES as u64),
            buf: Vec::new(),
            skipping: false,
        }
    }

    /// Next line without its terminator, or `None` at end of stream
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.buf).await?;
            let line = std::mem::take(&mut self.buf);
            self.reader.set_limit(MAX_LINE_BYTES as u64);

            if read == 0 && line.is_empty() {
                return Ok(None);
            }
            let complete = line.last() == Some(&b'\n');
            if !complete && line.len() >= MAX_LINE_BYTES {
                self.skipping = true;
                continue;
            }
            // Remainder of an overlong line
            if std::mem::replace(&mut self.skipping, false) {
                continue;
            }
            return Ok(Some(String::from_utf8_lossy(&line).trim_end().to_string()));
        }
    }
}

/// Read a stream to the end, keeping only its last `keep` lines
async fn collect_tail<R: AsyncRead + Unpin>(reader: R, keep: usize) -> String {
    let mut lines = CappedLines::new(reader);
    let mut tail: VecDeque<String> = VecDeque::with_capacity(keep);

    while let Ok(Some(line)) = lines.next_line().await {
        if keep == 0 {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_tail_keeps_last_lines() {
        let input: &[u8] = b"one\ntwo\nthree\nfour\n";
        assert_eq!(collect_tail(input, 2).await, "three\nfour");
        assert_eq!(collect_tail(input, 0).await, "");
    }

    #[tokio::test]
    async fn test_collect_tail_tolerates_invalid_utf8() {
        let input: &[u8] = b"ok\n\xff\xfe broken\nlast line";
        let tail = collect_tail(input, 5).await;
        assert!(tail.ends_with("last line"));
        assert_eq!(tail.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_overlong_lines_are_dropped_whole() {
        let mut input = vec![b'x'; MAX_LINE_BYTES * 3 + 17];
        input.extend_from_slice(b"\nout_time_us=5000000\nprogress=continue\n");
        let mut lines = CappedLines::new(&input[..]);

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("out_time_us=5000000"));
        assert!(lines.buf.capacity() <= MAX_LINE_BYTES);
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("progress=continue"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unterminated_stream_stays_bounded() {
        let input = vec![b'y'; MAX_LINE_BYTES * 8];
        let mut lines = CappedLines::new(&input[..]);
        assert_eq!(lines.next_line().await.unwrap(), None);

        let tail = collect_tail(&b"first\nsecond without newline"[..], 5).await;
        assert_eq!(tail, "first\nsecond without newline");
    }

    #[test]
    fn test_abandoned_job_is_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cfg = BatchConfig {
            input_root: root.to_path_buf(),
            failure_notes: true,
            ..Default::default()
        };
        let source = root.join("movie.mkv");
        std::fs::write(&source, b"source").unwrap();
        let job = Arc::new(Job::new(0, source.clone(), &cfg.output_dir(), &cfg.done_dir(), ""));
        std::fs::create_dir_all(cfg.output_dir()).unwrap();
        std::fs::write(&job.staging_path, b"half").unwrap();

        let executor = Executor::new(cfg);
        let outcome = Outcome::failure(job.clone(), Duration::ZERO, FailureReason::Crashed);
        executor.abandoned(&outcome);

        assert!(!job.staging_path.exists());
        assert!(source.exists());
        let note = std::fs::read_to_string(lifecycle::why_txt_path(&source)).unwrap();
        assert_eq!(note, FailureReason::Crashed.to_string());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_is_spawn_failure() {
        let err = spawn_engine(Path::new("/nonexistent/ffmpeg"), &[]).unwrap_err();
        match err {
            FailureReason::Spawn { not_found, .. } => assert!(not_found),
            other => panic!("unexpected reason: {:?}", other),
        }
    }
}
