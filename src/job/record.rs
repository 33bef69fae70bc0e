use std::fmt;
use std::path::{Path, PathBuf};

use crate::job::status::JobStatus;
use crate::spool::transfer::{move_atomic, Collision};
use crate::spool::SpoolError;

/// Placeholder for bookkeeping values a backend has not reported (yet).
pub const NOT_AVAILABLE: &str = "N/A";

/// Job types understood by the queue manager, selected by `jobtype` in the
/// `[hrmjobfile]` section.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobType {
    Hucore,
    DeleteJobs,
}

impl JobType {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobType::Hucore => "hucore",
            JobType::DeleteJobs => "deletejobs",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hucore" => Some(JobType::Hucore),
            "deletejobs" => Some(JobType::DeleteJobs),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of processing requested by a `hucore` job.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskType {
    Decon,
    Preview,
}

impl TaskType {
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskType::Decon => "decon",
            TaskType::Preview => "preview",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "decon" => Some(TaskType::Decon),
            "preview" => Some(TaskType::Preview),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything needed to run a `hucore` job on the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct HucoreTask {
    pub tasktype: TaskType,
    pub executable: String,
    pub template: String,
    /// Input files in declaration order, never empty.
    pub infiles: Vec<String>,
}

/// Job type specific part of a job description.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Hucore(HucoreTask),
    /// UIDs of jobs that should be cancelled.
    DeleteJobs { ids: Vec<String> },
}

/// Values reserved for backends able to report them; the local engine
/// leaves them at "N/A".
#[derive(Clone, Debug, PartialEq)]
pub struct Bookkeeping {
    pub start: String,
    pub progress: String,
    pub pid: String,
    pub server: String,
}

impl Default for Bookkeeping {
    fn default() -> Self {
        Bookkeeping {
            start: NOT_AVAILABLE.to_string(),
            progress: NOT_AVAILABLE.to_string(),
            pid: NOT_AVAILABLE.to_string(),
            server: NOT_AVAILABLE.to_string(),
        }
    }
}

/// A parsed and validated job description.
///
/// The `uid` is the primary key everywhere: queues, spool file names and
/// the status snapshot all refer to a job by it.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRecord {
    pub uid: String,
    pub version: String,
    pub user: String,
    pub email: String,
    /// Submission time in seconds since the epoch.
    pub timestamp: f64,
    pub payload: Payload,
    pub status: JobStatus,
    pub bookkeeping: Bookkeeping,
    /// Spool file currently backing this job, if it was read from one.
    pub jobfile: Option<PathBuf>,
}

impl JobRecord {
    /// The scheduling category of this job: the submitting user.
    pub fn category(&self) -> &str {
        &self.user
    }

    pub fn jobtype(&self) -> JobType {
        match self.payload {
            Payload::Hucore(_) => JobType::Hucore,
            Payload::DeleteJobs { .. } => JobType::DeleteJobs,
        }
    }

    pub fn hucore(&self) -> Option<&HucoreTask> {
        match &self.payload {
            Payload::Hucore(task) => Some(task),
            Payload::DeleteJobs { .. } => None,
        }
    }

    pub fn infiles(&self) -> &[String] {
        match &self.payload {
            Payload::Hucore(task) => &task.infiles,
            Payload::DeleteJobs { .. } => &[],
        }
    }

    pub fn deletion_ids(&self) -> &[String] {
        match &self.payload {
            Payload::DeleteJobs { ids } => ids,
            Payload::Hucore(_) => &[],
        }
    }

    pub fn with_jobfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.jobfile = Some(path.into());
        self
    }

    /// Move the backing job file into `target`, renaming it to `<uid><suffix>`.
    ///
    /// The original file name is discarded. Returns the new location, or
    /// `None` for jobs that were not read from a file.
    pub fn move_jobfile(
        &mut self,
        target: &Path,
        suffix: &str,
        collision: Collision,
    ) -> Result<Option<PathBuf>, SpoolError> {
        let Some(source) = self.jobfile.as_deref() else {
            return Ok(None);
        };
        let name = format!("{}{}", self.uid, suffix);
        let moved = move_atomic(source, target, &name, collision)?;
        self.jobfile = Some(moved.clone());
        Ok(Some(moved))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn sample(uid: &str) -> JobRecord {
        JobRecord {
            uid: uid.to_string(),
            version: "7".to_string(),
            user: "user01".to_string(),
            email: "user01@example.org".to_string(),
            timestamp: 1437152020.75,
            payload: Payload::Hucore(HucoreTask {
                tasktype: TaskType::Decon,
                executable: "/usr/local/bin/hucore".to_string(),
                template: "/data/decon.hgsb".to_string(),
                infiles: vec!["/data/a.h5".to_string()],
            }),
            status: JobStatus::NotAvailable,
            bookkeeping: Bookkeeping::default(),
            jobfile: None,
        }
    }

    #[test]
    fn names_round_trip() {
        assert_eq!(JobType::from_name("hucore"), Some(JobType::Hucore));
        assert_eq!(JobType::from_name("deletejobs"), Some(JobType::DeleteJobs));
        assert_eq!(JobType::from_name("snr"), None);
        assert_eq!(TaskType::from_name("preview"), Some(TaskType::Preview));
        assert_eq!(TaskType::Decon.to_string(), "decon");
    }

    #[test]
    fn accessors_follow_payload() {
        let job = sample("abc");
        assert_eq!(job.category(), "user01");
        assert_eq!(job.jobtype(), JobType::Hucore);
        assert_eq!(job.infiles(), ["/data/a.h5".to_string()]);
        assert!(job.deletion_ids().is_empty());
        assert_eq!(job.bookkeeping.pid, NOT_AVAILABLE);
    }

    #[test]
    fn move_without_jobfile_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut job = sample("abc");
        let moved = job.move_jobfile(dir.path(), ".jobfile", Collision::Overwrite).unwrap();
        assert!(moved.is_none());
    }

    #[test]
    fn move_renames_to_uid() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("hrm_jobfile_x1");
        let target = dir.path().join("cur");
        fs::create_dir(&target).unwrap();
        fs::write(&source, "content").unwrap();

        let mut job = sample("abc").with_jobfile(&source);
        let moved = job.move_jobfile(&target, ".jobfile", Collision::Overwrite).unwrap();

        assert_eq!(moved, Some(target.join("abc.jobfile")));
        assert_eq!(job.jobfile, Some(target.join("abc.jobfile")));
        assert!(!source.exists());
    }
}
