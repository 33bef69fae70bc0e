use std::fmt;
use std::process::ExitStatus;

use crate::job::status::JobStatus;

/// Execution state of a task inside an engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    New,
    Submitted,
    Running,
    Terminating,
    Terminated,
    Stopped,
    Unknown,
}

impl TaskState {
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskState::New => "NEW",
            TaskState::Submitted => "SUBMITTED",
            TaskState::Running => "RUNNING",
            TaskState::Terminating => "TERMINATING",
            TaskState::Terminated => "TERMINATED",
            TaskState::Stopped => "STOPPED",
            TaskState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<TaskState> for JobStatus {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::New => JobStatus::New,
            TaskState::Submitted => JobStatus::Submitted,
            TaskState::Running => JobStatus::Running,
            TaskState::Terminating => JobStatus::Terminating,
            TaskState::Terminated => JobStatus::Terminated,
            TaskState::Stopped => JobStatus::Stopped,
            TaskState::Unknown => JobStatus::Unknown,
        }
    }
}

/// How a terminated task ended.
///
/// Engines may normalise exit codes, so only zero, non-zero and killed are
/// told apart.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Killed on request, or ended by a signal.
    Killed,
    /// Non-zero exit code, `None` if the process could not be started.
    Failed(Option<i32>),
    /// Ran, but its outputs are still in the working directory.
    Uncollected,
}

impl Outcome {
    pub fn from_exit(status: ExitStatus, kill_requested: bool) -> Self {
        match status.code() {
            _ if kill_requested => Outcome::Killed,
            Some(0) => Outcome::Success,
            Some(code) => Outcome::Failed(Some(code)),
            None => Outcome::Killed,
        }
    }
}

/// Number of tasks per state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub new: usize,
    pub submitted: usize,
    pub running: usize,
    pub terminating: usize,
    pub terminated: usize,
    pub stopped: usize,
    pub unknown: usize,
    pub total: usize,
}

impl EngineStats {
    pub fn from_states(states: impl IntoIterator<Item = TaskState>) -> Self {
        let mut stats = EngineStats::default();
        for state in states {
            stats.add(state);
        }
        stats
    }

    pub fn add(&mut self, state: TaskState) {
        match state {
            TaskState::New => self.new += 1,
            TaskState::Submitted => self.submitted += 1,
            TaskState::Running => self.running += 1,
            TaskState::Terminating => self.terminating += 1,
            TaskState::Terminated => self.terminated += 1,
            TaskState::Stopped => self.stopped += 1,
            TaskState::Unknown => self.unknown += 1,
        }
        self.total += 1;
    }

    /// Whether the engine still has work that was handed to it but has
    /// not started running, or is running. A task in UNKNOWN state may still
    /// be running too. No new job is dispatched then.
    pub fn busy(&self) -> bool {
        self.new > 0 || self.submitted > 0 || self.running > 0 || self.unknown > 0
    }
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "NEW:{}  SUBM:{}  RUN:{}  TERM'ing:{}  TERM'ed:{}  UNKNWN:{}  STOP:{}  (total:{})",
            self.new,
            self.submitted,
            self.running,
            self.terminating,
            self.terminated,
            self.unknown,
            self.stopped,
            self.total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_map_to_job_status() {
        assert_eq!(JobStatus::from(TaskState::Running), JobStatus::Running);
        assert_eq!(JobStatus::from(TaskState::Terminated).as_str(), "TERMINATED");
        assert_eq!(TaskState::Stopped.to_string(), "STOPPED");
    }

    #[test]
    fn busy_counts_pending_and_running() {
        let idle = EngineStats::from_states([TaskState::Terminated, TaskState::Terminating]);
        assert!(!idle.busy());
        assert_eq!(idle.total, 2);
        assert!(EngineStats::from_states([TaskState::Submitted]).busy());
        assert!(EngineStats::from_states([TaskState::Running]).busy());
        assert!(EngineStats::from_states([TaskState::New]).busy());
        assert!(EngineStats::from_states([TaskState::Unknown]).busy());
    }

    #[test]
    fn stats_line() {
        let stats = EngineStats::from_states([TaskState::Running, TaskState::New]);
        assert_eq!(
            stats.to_string(),
            "NEW:1  SUBM:0  RUN:1  TERM'ing:0  TERM'ed:0  UNKNWN:0  STOP:0  (total:2)"
        );
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_outcomes() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(Outcome::from_exit(ExitStatus::from_raw(0), false), Outcome::Success);
        assert_eq!(
            Outcome::from_exit(ExitStatus::from_raw(165 << 8), false),
            Outcome::Failed(Some(165))
        );
        assert_eq!(Outcome::from_exit(ExitStatus::from_raw(9), false), Outcome::Killed);
        assert_eq!(Outcome::from_exit(ExitStatus::from_raw(0), true), Outcome::Killed);
    }
}
