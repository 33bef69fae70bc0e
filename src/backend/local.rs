use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::process::{Child, Command};
use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::backend::app::AppSpec;
use crate::backend::config::Resource;
use crate::backend::state::{EngineStats, Outcome, TaskState};
use crate::backend::{BackendError, Engine, TaskId};

/// Consecutive failed polls after which a task is given up.
const MAX_POLL_FAILURES: u32 = 10;

struct Task {
    spec: AppSpec,
    workdir: PathBuf,
    state: TaskState,
    /// Result of the input copy, `None` once it has been received.
    staging: Option<oneshot::Receiver<Result<(), BackendError>>>,
    cancel: Arc<AtomicBool>,
    child: Option<Child>,
    kill_requested: bool,
    poll_failures: u32,
    outcome: Option<Outcome>,
}

/// Input copy into a task's working directory, run on the blocking pool.
struct Staging {
    uid: String,
    workdir: PathBuf,
    inputs: Vec<PathBuf>,
    cancel: Arc<AtomicBool>,
}

/// Runs applications as child processes on this machine.
///
/// Each task gets a working directory `<resourcedir>/<uid>` holding its
/// staged inputs. Inputs are copied in the background and the task stays NEW
/// until the copy is done. When the process exits, the declared outputs and
/// the combined stdout/stderr file are moved into the task's output
/// directory and the working directory is removed. If the outputs can't be
/// collected the working directory is kept.
///
/// Must be used from within a tokio runtime.
pub struct LocalEngine {
    resource: Resource,
    tasks: BTreeMap<TaskId, Task>,
    next_id: TaskId,
}

impl LocalEngine {
    pub fn new(resource: Resource) -> Self {
        info!("Creating local engine for resource '{}'.", resource.name);
        LocalEngine { resource, tasks: BTreeMap::new(), next_id: 1 }
    }
}

/// Catch missing or unusable inputs before anything is copied.
fn check_inputs(app: &AppSpec) -> Result<(), BackendError> {
    for input in &app.inputs {
        let usable = match fs::metadata(input) {
            Ok(meta) if meta.is_file() && input.file_name().is_some() => Ok(()),
            Ok(_) => Err(io::Error::new(io::ErrorKind::InvalidInput, "not a file")),
            Err(err) => Err(err),
        };
        usable.map_err(|source| BackendError::Staging {
            uid: app.uid.clone(),
            path: input.clone(),
            source,
        })?;
    }
    Ok(())
}

impl Staging {
    fn run(self) -> Result<(), BackendError> {
        let staging = |path: &Path, source: io::Error| BackendError::Staging {
            uid: self.uid.clone(),
            path: path.to_path_buf(),
            source,
        };
        if self.workdir.exists() {
            warn!("Working directory '{}' exists, replacing it.", self.workdir.display());
            fs::remove_dir_all(&self.workdir).map_err(|err| staging(&self.workdir, err))?;
        }
        fs::create_dir_all(&self.workdir).map_err(|err| staging(&self.workdir, err))?;

        for input in &self.inputs {
            if self.cancel.load(Ordering::Relaxed) {
                let cancelled = io::Error::new(io::ErrorKind::Interrupted, "staging cancelled");
                return Err(staging(input, cancelled));
            }
            let Some(name) = input.file_name() else {
                let not_a_file = io::Error::new(io::ErrorKind::InvalidInput, "not a file");
                return Err(staging(input, not_a_file));
            };
            debug!("Staging '{}' into '{}'.", input.display(), self.workdir.display());
            fs::copy(input, self.workdir.join(name)).map_err(|err| staging(input, err))?;
        }
        Ok(())
    }
}

impl Engine for LocalEngine {
    fn submit(&mut self, app: &AppSpec) -> Result<TaskId, BackendError> {
        check_inputs(app)?;
        let id = self.next_id;
        self.next_id += 1;
        let workdir = self.resource.resourcedir.join(&app.uid);
        let cancel = Arc::new(AtomicBool::new(false));
        let staging = Staging {
            uid: app.uid.clone(),
            workdir: workdir.clone(),
            inputs: app.inputs.clone(),
            cancel: Arc::clone(&cancel),
        };
        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            // the receiver is only gone when the engine was dropped
            let _ = tx.send(staging.run());
        });
        info!(
            "Task {} ({} for job '{}') staging into '{}'.",
            id,
            app.name,
            app.uid,
            workdir.display()
        );
        self.tasks.insert(id, Task {
            spec: app.clone(),
            workdir,
            state: TaskState::New,
            staging: Some(rx),
            cancel,
            child: None,
            kill_requested: false,
            poll_failures: 0,
            outcome: None,
        });
        Ok(id)
    }

    fn progress(&mut self) {
        for (id, task) in self.tasks.iter_mut() {
            match task.state {
                TaskState::New => task.start(*id),
                TaskState::Submitted
                | TaskState::Running
                | TaskState::Terminating
                | TaskState::Unknown => task.poll(*id),
                TaskState::Terminated | TaskState::Stopped => {}
            }
        }
    }

    fn state(&self, task: TaskId) -> Option<TaskState> {
        self.tasks.get(&task).map(|t| t.state)
    }

    fn outcome(&self, task: TaskId) -> Option<Outcome> {
        self.tasks.get(&task).and_then(|t| t.outcome)
    }

    fn kill(&mut self, id: TaskId) -> Result<(), BackendError> {
        let task = self.tasks.get_mut(&id).ok_or(BackendError::UnknownTask(id))?;
        if task.state == TaskState::Terminated {
            return Ok(());
        }
        info!("Killing task {} (job '{}').", id, task.spec.uid);
        task.kill_requested = true;
        task.cancel.store(true, Ordering::Relaxed);
        if let Some(child) = task.child.as_mut() {
            if let Err(err) = child.start_kill() {
                warn!("Unable to signal task {}: {}", id, err);
            }
        }
        task.state = TaskState::Terminating;
        Ok(())
    }

    fn remove(&mut self, id: TaskId) -> bool {
        match self.tasks.get(&id) {
            Some(task) if task.state == TaskState::Terminated => {
                self.tasks.remove(&id);
                true
            }
            _ => false,
        }
    }

    fn stats(&self) -> EngineStats {
        EngineStats::from_states(self.tasks.values().map(|t| t.state))
    }

    fn resource_dirs_clean(&self) -> bool {
        let dir = &self.resource.resourcedir;
        info!("Checking resource dir for resource '{}': {}", self.resource.name, dir.display());
        let entries: Vec<String> = match fs::read_dir(dir) {
            Ok(entries) => {
                entries.flatten().map(|e| e.file_name().to_string_lossy().into_owned()).collect()
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => return true,
            Err(err) => {
                warn!("Unable to list resource dir '{}': {}", dir.display(), err);
                return false;
            }
        };
        if entries.is_empty() {
            true
        } else {
            warn!("Resource dir unclean: {:?}", entries);
            false
        }
    }

    fn output_root(&self) -> &Path {
        &self.resource.spooldir
    }
}

impl Task {
    /// Result of the input copy, `None` while it is still running.
    fn staging_done(&mut self) -> Option<Result<(), BackendError>> {
        let Some(rx) = self.staging.as_mut() else {
            return Some(Ok(()));
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(BackendError::Staging {
                uid: self.spec.uid.clone(),
                path: self.workdir.clone(),
                source: io::Error::new(io::ErrorKind::Other, "staging aborted"),
            }),
        };
        self.staging = None;
        Some(result)
    }

    fn start(&mut self, id: TaskId) {
        match self.staging_done() {
            None => return,
            Some(Err(err)) => {
                error!("Unable to stage task {}: {}", id, err);
                self.finish(id, Outcome::Failed(None));
                return;
            }
            Some(Ok(())) => {}
        }
        match self.spawn() {
            Ok(child) => {
                debug!("Task {} started: {:?}", id, self.spec.arguments);
                self.child = Some(child);
                self.state = TaskState::Submitted;
            }
            Err(err) => {
                error!("Unable to start task {} ({:?}): {}", id, self.spec.arguments, err);
                self.finish(id, Outcome::Failed(None));
            }
        }
    }

    fn spawn(&self) -> io::Result<Child> {
        let (program, args) = self
            .spec
            .arguments
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;
        let stdout = File::create(self.workdir.join(&self.spec.stdout))?;
        let stderr = stdout.try_clone()?;
        Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
    }

    fn poll(&mut self, id: TaskId) {
        // a killed task waits for its input copy to stop
        match self.staging_done() {
            None => return,
            Some(Err(err)) => debug!("Staging of task {} ended: {}", id, err),
            Some(Ok(())) => {}
        }
        let Some(child) = self.child.as_mut() else {
            // killed before it was started
            self.finish(id, Outcome::Killed);
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Task {} exited: {}", id, status);
                let outcome = Outcome::from_exit(status, self.kill_requested);
                self.finish(id, outcome);
            }
            Ok(None) => {
                self.poll_failures = 0;
                if matches!(self.state, TaskState::Submitted | TaskState::Unknown) {
                    self.state = TaskState::Running;
                }
            }
            Err(err) => {
                self.poll_failures += 1;
                error!("Unable to poll task {} ({} times): {}", id, self.poll_failures, err);
                if self.poll_failures >= MAX_POLL_FAILURES {
                    error!("Giving up on task {}, killing it.", id);
                    if let Err(err) = child.start_kill() {
                        warn!("Unable to signal task {}: {}", id, err);
                    }
                    self.finish(id, Outcome::Failed(None));
                } else if self.state != TaskState::Terminating {
                    self.state = TaskState::Unknown;
                }
            }
        }
    }

    fn finish(&mut self, id: TaskId, outcome: Outcome) {
        self.child = None;
        let outcome = match self.collect_outputs(id) {
            Ok(()) => {
                if let Err(err) = fs::remove_dir_all(&self.workdir) {
                    if err.kind() != io::ErrorKind::NotFound {
                        let workdir = self.workdir.display();
                        warn!("Unable to remove working directory '{}': {}", workdir, err);
                    }
                }
                outcome
            }
            Err(err) => {
                error!(
                    "Unable to collect outputs of task {} into '{}', leaving them in '{}': {}",
                    id,
                    self.spec.output_dir.display(),
                    self.workdir.display(),
                    err
                );
                Outcome::Uncollected
            }
        };
        self.outcome = Some(outcome);
        self.state = TaskState::Terminated;
    }

    fn collect_outputs(&self, id: TaskId) -> io::Result<()> {
        let produced: Vec<&String> = self
            .spec
            .outputs
            .iter()
            .chain(std::iter::once(&self.spec.stdout))
            .filter(|name| self.workdir.join(name).exists())
            .collect();
        if produced.is_empty() {
            debug!("Task {} produced no outputs.", id);
            return Ok(());
        }
        let target = &self.spec.output_dir;
        fs::create_dir_all(target)?;
        let mut result = Ok(());
        for name in produced {
            let source = self.workdir.join(name);
            let destination = target.join(name);
            if destination.is_dir() {
                let _ = fs::remove_dir_all(&destination);
            }
            if let Err(err) = move_output(&source, &destination) {
                warn!(
                    "Unable to collect '{}' into '{}': {}",
                    source.display(),
                    destination.display(),
                    err
                );
                result = result.and(Err(err));
            }
        }
        result
    }
}

/// Rename `source` to `destination`, falling back to copy and remove when
/// the rename fails, e.g. across filesystems.
fn move_output(source: &Path, destination: &Path) -> io::Result<()> {
    if let Err(err) = fs::rename(source, destination) {
        debug!("Renaming '{}' failed ({}), copying it instead.", source.display(), err);
        copy_recursively(source, destination)?;
        if source.is_dir() {
            fs::remove_dir_all(source)?;
        } else {
            fs::remove_file(source)?;
        }
    }
    Ok(())
}

fn copy_recursively(source: &Path, destination: &Path) -> io::Result<()> {
    if !source.is_dir() {
        return fs::copy(source, destination).map(|_| ());
    }
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        copy_recursively(&entry.path(), &destination.join(entry.file_name()))?;
    }
    Ok(())
}
