pub mod config;
pub mod error;
pub mod job;
pub mod scan;
pub mod ffprobe;
pub mod ffmpeg;
pub mod progress;
pub mod outcome;
pub mod lifecycle;
pub mod executor;
pub mod scheduler;
pub mod summary;

pub use config::BatchConfig;
pub use error::{DiscoveryError, FailureReason, LifecycleError, ProbeWarning};
pub use job::{Job, JobId};
pub use outcome::Outcome;
pub use progress::{Phase, ProgressBoard, ProgressSnapshot, SlotReporter};
pub use executor::Executor;
pub use scheduler::{JobRunner, PoolState, RunSummary, WorkerPool};
