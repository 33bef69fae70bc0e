use std::future::Future;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::backend::app::{build_app, Application};
use crate::backend::state::{EngineStats, TaskState};
use crate::backend::{BackendError, Engine};
use crate::critical;
use crate::job::parse::JOBFILE_VERSION;
use crate::job::record::JobRecord;
use crate::queue::shared::{QueueSet, SharedQueue};
use crate::spool::transfer::Collision;
use crate::spool::tree::SpoolDirs;
use crate::spool::{FAILED_SUFFIX, JOBFILE_SUFFIX};
use crate::spooler::request::{take_request, Request, SpoolerStatus};

/// Default pause between two iterations of the spooler loop.
pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Drives jobs from the queues through the execution engine.
///
/// Each tick handles at most one operator request and, while running,
/// services deletion requests, advances the engine and dispatches the next
/// job if the engine is idle.
pub struct JobSpooler<E: Engine> {
    queues: QueueSet,
    dirs: SpoolDirs,
    engine: E,
    apps: Vec<Application>,
    status: SpoolerStatus,
    tick: Duration,
    kill_attempts: usize,
    kill_interval: Duration,
}

impl<E: Engine> JobSpooler<E> {
    /// Refuses to start if the engine's resource directory isn't clean.
    pub fn new(queues: QueueSet, dirs: SpoolDirs, engine: E) -> Result<Self, BackendError> {
        if !engine.resource_dirs_clean() {
            return Err(BackendError::ResourceDirUnclean);
        }
        info!("Created JobSpooler.");
        Ok(JobSpooler {
            queues,
            dirs,
            engine,
            apps: Vec::new(),
            status: SpoolerStatus::Run,
            tick: DEFAULT_TICK,
            kill_attempts: 20,
            kill_interval: Duration::from_millis(100),
        })
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// How often, and how long apart, the engine is checked after a kill.
    #[cfg(test)]
    pub fn with_kill_wait(mut self, attempts: usize, interval: Duration) -> Self {
        self.kill_attempts = attempts;
        self.kill_interval = interval;
        self
    }

    #[cfg(test)]
    pub fn status(&self) -> SpoolerStatus {
        self.status
    }

    #[cfg(test)]
    pub fn apps(&self) -> &[Application] {
        &self.apps
    }

    #[cfg(test)]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    #[cfg(test)]
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Run until a shutdown request arrives or `interrupt` completes, then
    /// clean up. BLOCKS for the lifetime of the queue manager.
    pub async fn spool(&mut self, interrupt: impl Future<Output = ()>) {
        info!("{}", "*".repeat(80));
        info!("HRM spooler running (expected jobfile version: {}).", JOBFILE_VERSION);
        info!("{}", "*".repeat(80));
        tokio::pin!(interrupt);
        loop {
            if self.step().await == SpoolerStatus::Shutdown {
                break;
            }
            tokio::select! {
                _ = &mut interrupt => {
                    info!("Received interrupt, stopping queue manager.");
                    break;
                }
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
        self.cleanup().await;
    }

    /// One iteration of the spooler loop.
    pub async fn step(&mut self) -> SpoolerStatus {
        self.check_status_request();
        if self.status == SpoolerStatus::Run {
            // deletions first, so a job slated for removal is never dispatched
            self.check_for_jobs_to_delete().await;
            self.advance();
            self.dispatch();
        }
        self.status
    }

    /// Consume one pending operator request, if any.
    pub fn check_status_request(&mut self) -> Option<Request> {
        let request = take_request(&self.dirs.requests)?;
        self.apply(request);
        Some(request)
    }

    pub fn apply(&mut self, request: Request) {
        let status = match request {
            Request::Refresh => {
                info!("Received spooler queue status refresh request.");
                for queue in self.queues.iter() {
                    queue.refresh();
                }
                return;
            }
            Request::Shutdown => SpoolerStatus::Shutdown,
            Request::Pause => SpoolerStatus::Pause,
            Request::Run => SpoolerStatus::Run,
        };
        if status != self.status {
            warn!("Received spooler status change request: {} -> {}", self.status, status);
            self.status = status;
        }
    }

    /// Kill dispatched jobs requested for deletion, then drop pending ones.
    pub async fn check_for_jobs_to_delete(&mut self) {
        let doomed: Vec<String> = self
            .apps
            .iter()
            .filter(|app| {
                self.queue_of(&app.job).map_or(false, |q| q.is_marked_for_deletion(app.uid()))
            })
            .map(|app| app.uid().to_string())
            .collect();
        for uid in doomed {
            let queue = self
                .apps
                .iter()
                .find(|app| app.uid() == uid)
                .and_then(|app| self.queue_of(&app.job))
                .cloned();
            self.kill_running_job(&uid).await;
            if let Some(queue) = queue {
                queue.forget_deletion(&uid);
            }
        }

        for queue in self.queues.iter() {
            for mut job in queue.process_deletion_list() {
                retire(&mut job, &self.dirs);
            }
        }
    }

    /// Poll the engine and propagate state changes into the queues.
    pub fn advance(&mut self) {
        self.engine.progress();
        let mut finished = Vec::new();
        for (index, app) in self.apps.iter_mut().enumerate() {
            let Some(state) = app.status_changed(&self.engine) else {
                continue;
            };
            if let Some(queue) = self.queues.get(app.job.jobtype()) {
                queue.set_status(app.uid(), state.into());
            }
            if state == TaskState::Terminated {
                finished.push(index);
            }
        }
        for index in finished.into_iter().rev() {
            let mut app = self.apps.remove(index);
            retire(&mut app.job, &self.dirs);
            self.engine.remove(app.task);
        }
    }

    /// Hand the next job to the engine, unless it has pending or running work.
    pub fn dispatch(&mut self) -> bool {
        let stats = self.engine_status();
        if stats.busy() {
            // the engine misbehaves when given more tasks than it can run
            return false;
        }
        let queues: Vec<SharedQueue> = self.queues.iter().cloned().collect();
        for queue in queues {
            if let Some(job) = queue.next_job() {
                debug!(
                    "Queue '{}': {} queued, {} processing.",
                    queue.jobtype(),
                    queue.num_jobs_queued(),
                    queue.num_jobs_processing()
                );
                debug!("Current joblist: {:?}", queue.joblist());
                self.submit(job, &queue);
                return true;
            }
        }
        false
    }

    fn submit(&mut self, mut job: JobRecord, queue: &SharedQueue) {
        let submitted = build_app(&job, self.engine.output_root())
            .and_then(|spec| self.engine.submit(&spec).map(|task| (spec, task)));
        match submitted {
            Ok((spec, task)) => {
                info!("Adding another job to the engine.");
                self.apps.push(Application::new(spec, job, task));
                if let Some(report) = queue.report() {
                    info!("Queue '{}':\n{}", queue.jobtype(), report);
                }
            }
            Err(err) => {
                critical!(
                    "Unable to instantiate application for job '{}', removing it: {}",
                    job.uid,
                    err
                );
                queue.remove(&job.uid);
                let done = &self.dirs.done;
                if let Err(err) = job.move_jobfile(done, FAILED_SUFFIX, Collision::Disambiguate) {
                    error!("Unable to move job file of '{}' to 'done': {}", job.uid, err);
                }
            }
        }
    }

    /// Kill a dispatched job and wait a bounded time for it to terminate.
    ///
    /// The job leaves its queue either way. Returns whether it terminated.
    pub async fn kill_running_job(&mut self, uid: &str) -> bool {
        let Some(index) = self.apps.iter().position(|app| app.uid() == uid) else {
            warn!("No dispatched job '{}' to kill.", uid);
            return false;
        };
        let task = self.apps[index].task;
        warn!("<KILLING> [{}] {}", self.apps[index].job.user, self.apps[index].spec.name);
        if let Err(err) = self.engine.kill(task) {
            error!("Unable to kill job '{}': {}", uid, err);
        }

        let mut terminated = false;
        for attempt in 0..self.kill_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.kill_interval).await;
            }
            self.engine.progress();
            self.apps[index].status_changed(&self.engine);
            if self.apps[index].last_state() == TaskState::Terminated {
                terminated = true;
                break;
            }
        }

        let queue = self.queue_of(&self.apps[index].job).cloned();
        if terminated {
            warn!("App has terminated, removing from list of apps.");
            let mut app = self.apps.remove(index);
            retire(&mut app.job, &self.dirs);
            self.engine.remove(app.task);
        } else {
            critical!(
                "Expected status 'TERMINATED' for job '{}', found '{}'!",
                uid,
                self.apps[index].last_state()
            );
        }
        if let Some(queue) = queue {
            queue.remove(uid);
        }
        self.engine_status();
        terminated
    }

    /// Stop all dispatched jobs and check the resource directories.
    pub async fn cleanup(&mut self) {
        warn!("Queue Manager shutdown initiated.");
        info!("QM shutdown: cleaning up spooler.");
        if !self.apps.is_empty() {
            warn!("v{}v", "-".repeat(80));
            warn!("Unfinished jobs, trying to stop them:");
            let uids: Vec<String> = self.apps.iter().map(|app| app.uid().to_string()).collect();
            for uid in uids {
                if let Some(app) = self.apps.iter().find(|app| app.uid() == uid) {
                    warn!("Status of running job '{}': {}", uid, app.job.status);
                }
                self.kill_running_job(&uid).await;
            }
            warn!("^{}^", "-".repeat(80));
            self.engine.progress();
            let stats = self.engine_status();
            let alive = stats.running + stats.terminating;
            if alive > 0 {
                critical!("Killing jobs failed, {} still running.", alive);
            } else {
                info!("Successfully terminated remaining jobs, none left.");
            }
        }
        info!("QM shutdown: spooler cleanup completed.");
        warn!("QM shutdown: checking resource directories.");
        if !self.engine.resource_dirs_clean() {
            warn!("Resource directories are not clean after shutdown.");
        }
        warn!("QM shutdown: resource directories check completed.");
    }

    fn engine_status(&self) -> EngineStats {
        let stats = self.engine.stats();
        debug!("Engine: {}", stats);
        stats
    }

    fn queue_of(&self, job: &JobRecord) -> Option<&SharedQueue> {
        self.queues.get(job.jobtype())
    }
}

/// Move a job's file to `done`, it has left the queue for good.
fn retire(job: &mut JobRecord, dirs: &SpoolDirs) {
    if let Err(err) = job.move_jobfile(&dirs.done, JOBFILE_SUFFIX, Collision::Overwrite) {
        error!("Unable to move job file of '{}' to 'done': {}", job.uid, err);
    }
}
