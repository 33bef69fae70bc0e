//! Execution backend: runs applications for dispatched jobs
//!
//! The spooler only talks to the [`Engine`] trait. Engines are polled: a call
//! to [`Engine::progress`] advances every task, and states are read back
//! afterwards. No engine method blocks.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backend::app::AppSpec;
use crate::backend::state::{EngineStats, Outcome, TaskState};

/// Application table and invocation building
pub mod app;
/// Backend configuration file and resource selection
pub mod config;
/// Engine running applications as local child processes
pub mod local;
/// Task states, outcomes and engine statistics
pub mod state;
#[cfg(test)]
pub mod scripted;

/// Identifies a task within one engine.
pub type TaskId = u64;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unable to read backend config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },
    #[error("unable to parse backend config file '{path}': {source}")]
    ConfigParse { path: PathBuf, source: serde_json::Error },
    #[error("no enabled resource in backend config")]
    NoResource,
    #[error("resource '{0}' is not configured or not enabled")]
    UnknownResource(String),
    #[error("no application for jobtype '{jobtype}' and tasktype '{tasktype}'")]
    NoApplication { jobtype: String, tasktype: String },
    #[error("unable to stage '{path}' for job '{uid}': {source}")]
    Staging { uid: String, path: PathBuf, source: io::Error },
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    #[error("resource directory unclean, refusing to start")]
    ResourceDirUnclean,
}

/// An execution engine the spooler dispatches applications to.
pub trait Engine {
    /// Accept an application, it starts on a later [`Engine::progress`].
    fn submit(&mut self, app: &AppSpec) -> Result<TaskId, BackendError>;

    /// Advance all tasks: start new ones, reap finished ones.
    fn progress(&mut self);

    fn state(&self, task: TaskId) -> Option<TaskState>;

    /// How a terminated task ended, `None` while it is not terminated.
    fn outcome(&self, task: TaskId) -> Option<Outcome>;

    /// Request termination, the task reaches TERMINATED on a later progress.
    fn kill(&mut self, task: TaskId) -> Result<(), BackendError>;

    /// Forget a terminated task. Returns `false` if it is unknown or still
    /// active.
    fn remove(&mut self, task: TaskId) -> bool;

    fn stats(&self) -> EngineStats;

    /// Whether the resource's working directory holds no leftovers.
    fn resource_dirs_clean(&self) -> bool;

    /// Directory results are collected in.
    fn output_root(&self) -> &Path;
}
