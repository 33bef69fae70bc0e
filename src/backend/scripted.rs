use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backend::app::AppSpec;
use crate::backend::state::{EngineStats, Outcome, TaskState};
use crate::backend::{BackendError, Engine, TaskId};

/// In-memory engine whose task states are set by the test.
///
/// `progress` only completes kills: TERMINATING tasks become TERMINATED,
/// unless the engine was made stubborn.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    pub submitted: Vec<AppSpec>,
    pub killed: Vec<TaskId>,
    /// Submissions of these UIDs fail.
    pub refuse: Vec<String>,
    /// Kills never converge.
    pub stubborn: bool,
    pub unclean: bool,
    pub progress_calls: usize,
    tasks: BTreeMap<TaskId, (TaskState, Option<Outcome>)>,
    next_id: TaskId,
    output_root: PathBuf,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        ScriptedEngine { output_root: PathBuf::from("/results"), ..ScriptedEngine::default() }
    }

    pub fn set_state(&mut self, task: TaskId, state: TaskState) {
        if let Some(entry) = self.tasks.get_mut(&task) {
            entry.0 = state;
        }
    }

    pub fn finish(&mut self, task: TaskId, outcome: Outcome) {
        if let Some(entry) = self.tasks.get_mut(&task) {
            *entry = (TaskState::Terminated, Some(outcome));
        }
    }
}

impl Engine for ScriptedEngine {
    fn submit(&mut self, app: &AppSpec) -> Result<TaskId, BackendError> {
        if self.refuse.contains(&app.uid) {
            return Err(BackendError::Staging {
                uid: app.uid.clone(),
                path: PathBuf::from("/nonexistent"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "refused"),
            });
        }
        self.submitted.push(app.clone());
        self.next_id = self.submitted.len() as TaskId;
        self.tasks.insert(self.next_id, (TaskState::New, None));
        Ok(self.next_id)
    }

    fn progress(&mut self) {
        self.progress_calls += 1;
        if self.stubborn {
            return;
        }
        for entry in self.tasks.values_mut() {
            if entry.0 == TaskState::Terminating {
                *entry = (TaskState::Terminated, Some(Outcome::Killed));
            }
        }
    }

    fn state(&self, task: TaskId) -> Option<TaskState> {
        self.tasks.get(&task).map(|entry| entry.0)
    }

    fn outcome(&self, task: TaskId) -> Option<Outcome> {
        self.tasks.get(&task).and_then(|entry| entry.1)
    }

    fn kill(&mut self, task: TaskId) -> Result<(), BackendError> {
        let entry = self.tasks.get_mut(&task).ok_or(BackendError::UnknownTask(task))?;
        self.killed.push(task);
        if entry.0 != TaskState::Terminated {
            entry.0 = TaskState::Terminating;
        }
        Ok(())
    }

    fn remove(&mut self, task: TaskId) -> bool {
        match self.tasks.get(&task) {
            Some((TaskState::Terminated, _)) => self.tasks.remove(&task).is_some(),
            _ => false,
        }
    }

    fn stats(&self) -> EngineStats {
        EngineStats::from_states(self.tasks.values().map(|entry| entry.0))
    }

    fn resource_dirs_clean(&self) -> bool {
        !self.unclean
    }

    fn output_root(&self) -> &Path {
        &self.output_root
    }
}
