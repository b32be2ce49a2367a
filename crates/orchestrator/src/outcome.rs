use std::sync::Arc;
use std::time::Duration;
use crate::error::{FailureReason, LifecycleError};
use crate::job::Job;

/// Terminal result of one job. Produced once by the executor, consumed once by the scheduler.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        job: Arc<Job>,
        elapsed: Duration,
        /// Set when the transcode succeeded but the original could not be moved
        warning: Option<LifecycleError>,
    },
    Failure {
        job: Arc<Job>,
        elapsed: Duration,
        reason: FailureReason,
    },
}

impl Outcome {
    pub fn success(job: Arc<Job>, elapsed: Duration) -> Self {
        Outcome::Success { job, elapsed, warning: None }
    }

    pub fn failure(job: Arc<Job>, elapsed: Duration, reason: FailureReason) -> Self {
        Outcome::Failure { job, elapsed, reason }
    }

    pub fn job(&self) -> &Arc<Job> {
        match self {
            Outcome::Success { job, .. } | Outcome::Failure { job, .. } => job,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Outcome::Success { elapsed, .. } | Outcome::Failure { elapsed, .. } => *elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            Outcome::Failure { reason, .. } => Some(reason),
            Outcome::Success { .. } => None,
        }
    }

    pub fn warning(&self) -> Option<&LifecycleError> {
        match self {
            Outcome::Success { warning, .. } => warning.as_ref(),
            Outcome::Failure { .. } => None,
        }
    }
}
