use walkdir::WalkDir;
use crate::config::BatchConfig;
use crate::error::DiscoveryError;
use crate::job::Job;
use log::{debug, info, warn};

/// Enumerate jobs for every recognized video file directly under the input root.
///
/// Hidden files and anything inside subdirectories (including the output
/// and done areas) are ignored. Order follows the directory listing. An
/// empty result is not an error; only an unreadable root is.
pub fn discover(cfg: &BatchConfig) -> Result<Vec<Job>, DiscoveryError> {
    let root = &cfg.input_root;

    // Fail fast on an unusable root so nothing is started
    std::fs::read_dir(root).map_err(|source| DiscoveryError {
        root: root.clone(),
        source,
    })?;

    info!("Scanning directory: {}", root.display());

    let output_dir = cfg.output_dir();
    let done_dir = cfg.done_dir();
    let mut jobs = Vec::new();
    let mut entries_seen = 0;

    let walker = WalkDir::new(root).min_depth(1).max_depth(1).follow_links(false);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };
        entries_seen += 1;

        let path = entry.path();
        let name = entry.file_name().to_string_lossy();

        if name.starts_with('.') {
            debug!("Skipping hidden entry: {}", path.display());
            continue;
        }

        // Symlinks count when they point at a regular file
        let is_file = entry.file_type().is_file()
            || (entry.path_is_symlink() && path.is_file());
        if !is_file {
            continue;
        }

        if !cfg.is_recognized(path) {
            continue;
        }

        let job = Job::new(
            jobs.len(),
            path.to_path_buf(),
            &output_dir,
            &done_dir,
            &cfg.output_prefix,
        );
        debug!("Found candidate {}: {}", job.id, path.display());
        jobs.push(job);
    }

    info!(
        "Scan complete: {} entries checked, {} candidate(s) in {}",
        entries_seen,
        jobs.len(),
        root.display()
    );
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn config_for(root: &Path) -> BatchConfig {
        BatchConfig {
            input_root: root.to_path_buf(),
            ..Default::default()
        }
    }

    fn names(jobs: &[Job]) -> Vec<String> {
        let mut names: Vec<String> = jobs.iter().map(|j| j.label()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_discovers_recognized_top_level_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mkv"), b"x").unwrap();
        fs::write(dir.path().join("b.MP4"), b"x").unwrap();
        fs::write(dir.path().join("c.wmv"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("a.mkv.why.txt"), b"x").unwrap();

        let jobs = discover(&config_for(dir.path())).unwrap();
        assert_eq!(names(&jobs), vec!["a.mkv", "b.MP4", "c.wmv"]);
    }

    #[test]
    fn test_ids_follow_discovery_order() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            fs::write(dir.path().join(format!("{}.mov", i)), b"x").unwrap();
        }
        let jobs = discover(&config_for(dir.path())).unwrap();
        let ids: Vec<usize> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_skips_hidden_files_and_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".hidden.mkv"), b"x").unwrap();
        fs::create_dir(dir.path().join("720p")).unwrap();
        fs::write(dir.path().join("720p").join("out.mkv"), b"x").unwrap();
        fs::write(dir.path().join("720p").join(".partial-out.mkv"), b"x").unwrap();
        fs::create_dir(dir.path().join("done")).unwrap();
        fs::write(dir.path().join("done").join("old.mkv"), b"x").unwrap();
        fs::create_dir(dir.path().join("folder.mkv")).unwrap();
        fs::write(dir.path().join("real.mkv"), b"x").unwrap();

        let jobs = discover(&config_for(dir.path())).unwrap();
        assert_eq!(names(&jobs), vec!["real.mkv"]);
    }

    #[test]
    fn test_empty_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = discover(&config_for(dir.path())).unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_missing_root_is_discovery_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let err = discover(&config_for(&missing)).unwrap_err();
        assert_eq!(err.root, missing);
    }

    #[test]
    fn test_derived_paths_use_configured_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("clip.mkv"), b"x").unwrap();
        let cfg = BatchConfig {
            output_prefix: "720p_".to_string(),
            ..config_for(dir.path())
        };
        let jobs = discover(&cfg).unwrap();
        assert_eq!(jobs[0].output_path, dir.path().join("720p").join("720p_clip.mkv"));
        assert_eq!(jobs[0].done_path, dir.path().join("done").join("clip.mkv"));
    }
}
