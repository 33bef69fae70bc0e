use std::fmt;

use serde::{Serialize, Serializer};

/// Lifecycle status of a job as tracked by a JobQueue.
///
/// `NotAvailable` is the status of a freshly parsed job, `Queued` is set when
/// the job enters a queue. All other values are reported by the execution
/// backend once the job has been dispatched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum JobStatus {
    NotAvailable,
    Queued,
    New,
    Submitted,
    Running,
    Terminating,
    Terminated,
    Stopped,
    Unknown,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotAvailable => "N/A",
            Self::Queued => "queued",
            Self::New => "NEW",
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
            Self::Stopped => "STOPPED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Terminal statuses remove the job from its queue.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
