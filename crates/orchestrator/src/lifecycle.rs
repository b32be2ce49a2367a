use std::fs;
use std::path::{Path, PathBuf};
use crate::config::BatchConfig;
use crate::error::LifecycleError;
use crate::job::Job;
use crate::outcome::Outcome;
use log::{debug, info, warn};

/// Where a job's source file ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Moved into the done area
    MovedToDone,
    /// Left untouched in the input root for a later run
    LeftInPlace,
}

/// Create a directory (and parents) if missing
pub fn ensure_dir(path: &Path) -> Result<(), LifecycleError> {
    fs::create_dir_all(path).map_err(|e| LifecycleError::CreateDir {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Move the engine's staged output to its final name.
///
/// Returns false when the engine left no file behind.
pub fn promote_output(job: &Job) -> Result<bool, LifecycleError> {
    if !job.staging_path.exists() {
        return Ok(false);
    }
    fs::rename(&job.staging_path, &job.output_path).map_err(|e| LifecycleError::Move {
        from: job.staging_path.clone(),
        to: job.output_path.clone(),
        message: e.to_string(),
    })?;
    debug!("Job {}: output promoted to {}", job.id, job.output_path.display());
    Ok(true)
}

/// Remove a half-written staging file so it is never mistaken for a finished output
pub fn discard_partial(job: &Job) {
    match fs::remove_file(&job.staging_path) {
        Ok(()) => info!("Job {}: 🗑️  Deleted partial output {}", job.id, job.staging_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Job {}: could not delete partial output {}: {}", job.id, job.staging_path.display(), e),
    }
}

/// Settle a job's source file after its outcome is known.
///
/// Success moves the original into the done area with a single rename, so it
/// is always in exactly one of the two places. Failure leaves it where it was.
pub fn dispose(cfg: &BatchConfig, job: &Job, outcome: &Outcome) -> Result<Disposition, LifecycleError> {
    match outcome {
        Outcome::Success { .. } => {
            let done_dir = job.done_path.parent().map(Path::to_path_buf).unwrap_or_else(|| cfg.done_dir());
            ensure_dir(&done_dir)?;

            // rename(2) replaces silently; an existing file there must survive
            if job.done_path.exists() {
                return Err(LifecycleError::DestinationExists { path: job.done_path.clone() });
            }

            fs::rename(&job.source_path, &job.done_path).map_err(|e| LifecycleError::Move {
                from: job.source_path.clone(),
                to: job.done_path.clone(),
                message: e.to_string(),
            })?;
            info!("Job {}: original moved to {}", job.id, job.done_path.display());

            let note = why_txt_path(&job.source_path);
            if note.exists() {
                fs::remove_file(&note).ok();
            }
            Ok(Disposition::MovedToDone)
        }
        Outcome::Failure { reason, .. } => {
            discard_partial(job);
            if cfg.failure_notes {
                if let Err(e) = write_why_txt(&job.source_path, &reason.to_string()) {
                    warn!("Job {}: could not write failure note: {}", job.id, e);
                }
            }
            Ok(Disposition::LeftInPlace)
        }
    }
}

/// Get the path to the why.txt file for a given source file
pub fn why_txt_path(file_path: &Path) -> PathBuf {
    let mut name = file_path.as_os_str().to_owned();
    name.push(".why.txt");
    PathBuf::from(name)
}

/// Write a why.txt file explaining why a job failed
pub fn write_why_txt(file_path: &Path, reason: &str) -> std::io::Result<()> {
    fs::write(why_txt_path(file_path), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(root: &Path) -> (BatchConfig, Arc<Job>) {
        let cfg = BatchConfig {
            input_root: root.to_path_buf(),
            ..Default::default()
        };
        let source = root.join("movie.mkv");
        fs::write(&source, b"original bytes").unwrap();
        let job = Job::new(0, source, &cfg.output_dir(), &cfg.done_dir(), "");
        (cfg, Arc::new(job))
    }

    #[test]
    fn test_success_moves_source_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, job) = setup(dir.path());
        let outcome = Outcome::success(job.clone(), Duration::from_secs(1));

        assert_eq!(dispose(&cfg, &job, &outcome).unwrap(), Disposition::MovedToDone);
        assert!(!job.source_path.exists());
        assert_eq!(fs::read(&job.done_path).unwrap(), b"original bytes");
    }

    #[test]
    fn test_failure_leaves_source_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, job) = setup(dir.path());
        ensure_dir(&cfg.output_dir()).unwrap();
        fs::write(&job.staging_path, b"half").unwrap();

        let outcome = Outcome::failure(job.clone(), Duration::ZERO, FailureReason::Cancelled);
        assert_eq!(dispose(&cfg, &job, &outcome).unwrap(), Disposition::LeftInPlace);
        assert_eq!(fs::read(&job.source_path).unwrap(), b"original bytes");
        assert!(!job.done_path.exists());
        assert!(!job.staging_path.exists());
        assert!(!why_txt_path(&job.source_path).exists());
    }

    #[test]
    fn test_existing_done_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, job) = setup(dir.path());
        ensure_dir(&cfg.done_dir()).unwrap();
        fs::write(&job.done_path, b"older run").unwrap();

        let outcome = Outcome::success(job.clone(), Duration::ZERO);
        let err = dispose(&cfg, &job, &outcome).unwrap_err();
        assert!(matches!(err, LifecycleError::DestinationExists { .. }));
        assert_eq!(fs::read(&job.source_path).unwrap(), b"original bytes");
        assert_eq!(fs::read(&job.done_path).unwrap(), b"older run");
    }

    #[test]
    fn test_unwritable_done_area_is_lifecycle_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cfg, _) = setup(dir.path());
        // A regular file where the done directory should be
        fs::write(dir.path().join("blocker"), b"").unwrap();
        cfg.done_dir_name = "blocker/done".to_string();
        let job = Arc::new(Job::new(0, dir.path().join("movie.mkv"), &cfg.output_dir(), &cfg.done_dir(), ""));

        let outcome = Outcome::success(job.clone(), Duration::ZERO);
        assert!(matches!(dispose(&cfg, &job, &outcome), Err(LifecycleError::CreateDir { .. })));
        assert!(job.source_path.exists());
    }

    #[test]
    fn test_failure_note_written_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let (mut cfg, job) = setup(dir.path());
        cfg.failure_notes = true;

        let failed = Outcome::failure(job.clone(), Duration::ZERO, FailureReason::Engine { code: Some(1), stderr_tail: String::new() });
        dispose(&cfg, &job, &failed).unwrap();
        let note = why_txt_path(&job.source_path);
        assert_eq!(fs::read_to_string(&note).unwrap(), "engine exited with exit code 1");
        // The note itself never becomes a job
        assert!(!cfg.is_recognized(&note));

        let ok = Outcome::success(job.clone(), Duration::ZERO);
        dispose(&cfg, &job, &ok).unwrap();
        assert!(!note.exists());
    }

    #[test]
    fn test_promote_output() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, job) = setup(dir.path());
        assert!(!promote_output(&job).unwrap());

        ensure_dir(&cfg.output_dir()).unwrap();
        fs::write(&job.staging_path, b"encoded").unwrap();
        assert!(promote_output(&job).unwrap());
        assert!(!job.staging_path.exists());
        assert_eq!(fs::read(&job.output_path).unwrap(), b"encoded");
    }
}
