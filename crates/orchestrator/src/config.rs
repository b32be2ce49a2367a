use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::ffmpeg::EncodeProfile;

/// Video extensions picked up by discovery (compared case-insensitively)
pub const DEFAULT_EXTENSIONS: &[&str] = &["mp4", "wmv", "mov", "mkv"];

/// Configuration for one batch transcoding run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Directory whose top-level video files become jobs
    pub input_root: PathBuf,
    /// Subdirectory of the input root receiving transcoded files
    pub output_dir_name: String,
    /// Subdirectory of the input root receiving originals after a successful transcode
    pub done_dir_name: String,
    /// Prefix prepended to every output file name (e.g. "720p_")
    pub output_prefix: String,
    /// Recognized input extensions, without the leading dot
    pub extensions: Vec<String>,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Static encoder argument template
    pub profile: EncodeProfile,
    /// Maximum number of concurrent jobs (defaults to available processing units)
    pub concurrency: Option<usize>,
    /// Minimum interval between progress pushes from a single job
    pub progress_interval_ms: u64,
    /// Interval at which renderers redraw the progress board
    pub render_interval_ms: u64,
    /// Kill a job's engine after this many seconds
    pub job_timeout_secs: Option<u64>,
    /// Probe source duration with ffprobe to normalize progress
    pub probe_duration: bool,
    /// Write `<source>.why.txt` next to sources whose job failed
    pub failure_notes: bool,
    /// Number of trailing engine stderr lines kept for failure reasons
    pub stderr_tail_lines: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl BatchConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            input_root: PathBuf::from("."),
            output_dir_name: "720p".to_string(),
            done_dir_name: "done".to_string(),
            output_prefix: String::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            profile: EncodeProfile::default(),
            concurrency: None,
            progress_interval_ms: 250,
            render_interval_ms: 500,
            job_timeout_secs: None,
            probe_duration: true,
            failure_notes: false,
            stderr_tail_lines: 20,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.input_root.join(&self.output_dir_name)
    }

    pub fn done_dir(&self) -> PathBuf {
        self.input_root.join(&self.done_dir_name)
    }

    /// Whether a file name carries one of the recognized extensions
    pub fn is_recognized(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Concurrency limit for a run over `job_count` jobs.
    ///
    /// Falls back to the number of available processing units and is
    /// clamped to the job count so no slot is spun up without work.
    pub fn effective_concurrency(&self, job_count: usize) -> usize {
        let limit = self.concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        limit.max(1).min(job_count)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(50))
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_layout() {
        let cfg = BatchConfig {
            input_root: PathBuf::from("/videos"),
            ..Default::default()
        };
        assert_eq!(cfg.output_dir(), PathBuf::from("/videos/720p"));
        assert_eq!(cfg.done_dir(), PathBuf::from("/videos/done"));
    }

    #[test]
    fn test_extensions_case_insensitive() {
        let cfg = BatchConfig::default();
        assert!(cfg.is_recognized(Path::new("movie.MKV")));
        assert!(cfg.is_recognized(Path::new("clip.Mp4")));
        assert!(!cfg.is_recognized(Path::new("notes.txt")));
        assert!(!cfg.is_recognized(Path::new("no_extension")));
    }

    #[test]
    fn test_load_toml_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.toml");
        std::fs::write(&path, "concurrency = 3\nprofile = \"hevc-nvenc\"\noutput_prefix = \"720p_\"\n").unwrap();

        let cfg = BatchConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.concurrency, Some(3));
        assert_eq!(cfg.profile, EncodeProfile::HevcNvenc);
        assert_eq!(cfg.output_prefix, "720p_");
        // Untouched fields keep their defaults
        assert_eq!(cfg.done_dir_name, "done");
        assert_eq!(cfg.progress_interval_ms, 250);
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, r#"{"job_timeout_secs": 600, "extensions": ["avi"]}"#).unwrap();

        let cfg = BatchConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.job_timeout(), Some(Duration::from_secs(600)));
        assert!(cfg.is_recognized(Path::new("a.AVI")));
        assert!(!cfg.is_recognized(Path::new("a.mkv")));
    }

    #[test]
    fn test_missing_config_file_yields_defaults() {
        let cfg = BatchConfig::load_config(Some(Path::new("/nonexistent/batch.toml"))).unwrap();
        assert_eq!(cfg.output_dir_name, "720p");
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(BatchConfig::load_config(Some(&path)).is_err());
    }

    proptest! {
        /// The effective limit never exceeds the job count and is at least one when work exists
        #[test]
        fn test_effective_concurrency_is_clamped(
            limit in proptest::option::of(0usize..64),
            jobs in 0usize..128,
        ) {
            let cfg = BatchConfig { concurrency: limit, ..Default::default() };
            let effective = cfg.effective_concurrency(jobs);
            prop_assert!(effective <= jobs);
            if jobs > 0 {
                prop_assert!(effective >= 1);
            }
            if let Some(l) = limit {
                prop_assert!(effective <= l.max(1));
            }
        }
    }
}
