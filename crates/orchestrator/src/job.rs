use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Stable index of a job in discovery order
pub type JobId = usize;

/// Prefix of the hidden file the engine writes to before its output is promoted
pub const STAGING_PREFIX: &str = ".partial-";

/// One input file to transcode. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    /// Original file in the input root
    pub source_path: PathBuf,
    /// Final location of the transcoded file
    pub output_path: PathBuf,
    /// Where the engine writes while running; renamed to `output_path` on success
    pub staging_path: PathBuf,
    /// Where the original is moved after a successful transcode
    pub done_path: PathBuf,
}

impl Job {
    /// Derive all paths of a job from its source file
    pub fn new(id: JobId, source_path: PathBuf, output_dir: &Path, done_dir: &Path, output_prefix: &str) -> Self {
        let file_name = source_path.file_name().map(OsString::from).unwrap_or_default();
        let mut output_name = OsString::from(output_prefix);
        output_name.push(&file_name);
        let mut staging_name = OsString::from(STAGING_PREFIX);
        staging_name.push(&output_name);

        Self {
            id,
            output_path: output_dir.join(&output_name),
            staging_path: output_dir.join(staging_name),
            done_path: done_dir.join(&file_name),
            source_path,
        }
    }

    /// Human label shown by renderers
    pub fn label(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }
}
