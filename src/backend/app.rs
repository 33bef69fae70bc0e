use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::backend::state::{Outcome, TaskState};
use crate::backend::{BackendError, Engine, TaskId};
use crate::critical;
use crate::job::record::{JobRecord, JobType, TaskType};

/// File receiving both stdout and stderr of an application.
pub const STDOUT_FILE: &str = "stdout.txt";

/// Everything an engine needs to run one job.
#[derive(Debug, Clone, PartialEq)]
pub struct AppSpec {
    /// Application name used in log messages, e.g. `HuDeconApp`.
    pub name: &'static str,
    pub uid: String,
    pub user: String,
    /// Program followed by its arguments.
    pub arguments: Vec<String>,
    /// Files copied into the working directory before starting.
    pub inputs: Vec<PathBuf>,
    /// Files or directories collected from the working directory afterwards.
    pub outputs: Vec<String>,
    pub output_dir: PathBuf,
    pub stdout: String,
}

type Builder = fn(&'static str, &JobRecord, &Path) -> Option<AppSpec>;

struct AppEntry {
    jobtype: JobType,
    tasktype: TaskType,
    name: &'static str,
    build: Builder,
}

/// Applications by job type and task type.
static APPLICATIONS: &[AppEntry] = &[
    AppEntry {
        jobtype: JobType::Hucore,
        tasktype: TaskType::Decon,
        name: "HuDeconApp",
        build: hucore_app,
    },
    AppEntry {
        jobtype: JobType::Hucore,
        tasktype: TaskType::Preview,
        name: "HuPreviewApp",
        build: hucore_app,
    },
];

/// Build the application for a job, collecting results below `output_root`.
pub fn build_app(job: &JobRecord, output_root: &Path) -> Result<AppSpec, BackendError> {
    let jobtype = job.jobtype();
    let tasktype = job.hucore().map(|task| task.tasktype);
    let unknown = || BackendError::NoApplication {
        jobtype: jobtype.to_string(),
        tasktype: tasktype.map_or_else(|| "-".to_string(), |t| t.to_string()),
    };
    let entry = APPLICATIONS
        .iter()
        .find(|entry| entry.jobtype == jobtype && Some(entry.tasktype) == tasktype)
        .ok_or_else(unknown)?;
    let spec = (entry.build)(entry.name, job, output_root).ok_or_else(unknown)?;
    debug!("{} output dir: {}", spec.name, spec.output_dir.display());
    Ok(spec)
}

/// Run `hucore` with the job's template, collecting `resultdir` and
/// `previews`. The template is staged next to the images, so hucore gets its
/// bare file name.
fn hucore_app(name: &'static str, job: &JobRecord, output_root: &Path) -> Option<AppSpec> {
    let task = job.hucore()?;
    let template_on_target = Path::new(&task.template)
        .file_name()
        .map_or_else(|| task.template.clone(), |n| n.to_string_lossy().into_owned());
    let arguments = vec![
        task.executable.clone(),
        "-exitOnDone".to_string(),
        "-noExecLog".to_string(),
        "-checkForUpdates".to_string(),
        "disable".to_string(),
        "-template".to_string(),
        template_on_target,
    ];
    let inputs =
        task.infiles.iter().chain(std::iter::once(&task.template)).map(PathBuf::from).collect();
    debug!(
        "Additional {} parameters: [[template: {}]] [[infiles: {:?}]]",
        name, task.template, task.infiles
    );
    Some(AppSpec {
        name,
        uid: job.uid.clone(),
        user: job.user.clone(),
        arguments,
        inputs,
        outputs: vec!["resultdir".to_string(), "previews".to_string()],
        output_dir: output_root.join(format!("results_{}", job.uid)),
        stdout: STDOUT_FILE.to_string(),
    })
}

/// A dispatched job and the engine task running it.
///
/// Remembers the last state seen so every transition is reported once.
#[derive(Debug, Clone)]
pub struct Application {
    pub spec: AppSpec,
    pub job: JobRecord,
    pub task: TaskId,
    last_state: TaskState,
}

impl Application {
    pub fn new(spec: AppSpec, job: JobRecord, task: TaskId) -> Self {
        info!("Instantiating a {}: [[user: {}]] [[uid: {}]]", spec.name, job.user, job.uid);
        Application { spec, job, task, last_state: TaskState::New }
    }

    pub fn uid(&self) -> &str {
        &self.job.uid
    }

    pub fn last_state(&self) -> TaskState {
        self.last_state
    }

    /// Check the engine for a new state, returning it if it changed.
    pub fn status_changed(&mut self, engine: &impl Engine) -> Option<TaskState> {
        let new = engine.state(self.task).unwrap_or(TaskState::Unknown);
        if new == self.last_state {
            return None;
        }
        info!("{}: job status changed from '{}' to '{}'.", self.spec.name, self.last_state, new);
        self.last_state = new;
        self.job.status = new.into();
        match new {
            TaskState::Stopped => {
                critical!("Job '{}' has been suspended for an unknown reason!!!", self.job.uid)
            }
            TaskState::Terminated => self.terminated(engine.outcome(self.task)),
            TaskState::Unknown => {
                warn!("Lost track of job '{}', still waiting for it.", self.job.uid)
            }
            _ => {}
        }
        Some(new)
    }

    fn terminated(&self, outcome: Option<Outcome>) {
        match outcome {
            Some(Outcome::Success) => {
                info!("Job '{}' terminated successfully!", self.job.uid);
                info!("The output of the application is in '{}'.", self.spec.output_dir.display());
            }
            Some(Outcome::Failed(code)) => {
                let code = code.map_or_else(|| "none, not started".to_string(), |c| c.to_string());
                critical!("Job '{}' terminated with unexpected EXIT CODE: {}!", self.job.uid, code);
            }
            Some(Outcome::Uncollected) => {
                critical!("Job '{}' ended but its output could not be collected!", self.job.uid);
            }
            Some(Outcome::Killed) | None => {
                warn!("Job '{}' apparently was killed or crashed!", self.job.uid)
            }
        }
    }
}
