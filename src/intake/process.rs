use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::critical;
use crate::intake::read::{read_jobfile, DEFAULT_BACKOFF};
use crate::job::parse::content_uid;
use crate::job::record::{JobRecord, JobType};
use crate::queue::shared::QueueSet;
use crate::spool::transfer::{move_atomic, Collision};
use crate::spool::tree::SpoolDirs;
use crate::spool::{INVALID_SUFFIX, JOBFILE_SUFFIX};

/// What happened to one incoming job file.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    /// Claimed into `cur` and appended to its queue.
    Queued { uid: String },
    /// A deletion request, handed to the queues and retired to `done`.
    Deletion { ids: Vec<String> },
    /// Moved to `done` without being queued.
    Quarantined { uid: String },
    /// Nothing could be done, the file (if any) was left in place.
    Dropped,
}

/// Turns files appearing in the incoming directory into queued jobs.
#[derive(Debug, Clone)]
pub struct JobIntake {
    queues: QueueSet,
    dirs: SpoolDirs,
    backoff: Vec<Duration>,
}

impl JobIntake {
    pub fn new(queues: QueueSet, dirs: SpoolDirs) -> Self {
        JobIntake { queues, dirs, backoff: DEFAULT_BACKOFF.to_vec() }
    }

    #[cfg(test)]
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Process incoming paths until the sending side goes away.
    pub async fn run(self, mut incoming: UnboundedReceiver<PathBuf>) {
        while let Some(path) = incoming.recv().await {
            match self.process_jobfile(&path).await {
                IntakeOutcome::Queued { uid } => {
                    debug!("'{}' queued as job '{}'.", path.display(), uid)
                }
                IntakeOutcome::Deletion { ids } => {
                    debug!("'{}' requested deletion of {:?}.", path.display(), ids)
                }
                IntakeOutcome::Quarantined { uid } => {
                    debug!("'{}' (job '{}') retired without queueing.", path.display(), uid)
                }
                IntakeOutcome::Dropped => {}
            }
        }
        info!("Job intake finished.");
    }

    /// Read, parse and route a single job file.
    ///
    /// Never fails: malformed jobs are quarantined and unreadable files are
    /// left alone, so one bad submission cannot stop the intake.
    pub async fn process_jobfile(&self, path: &Path) -> IntakeOutcome {
        let raw = match read_jobfile(path, &self.backoff).await {
            Ok(raw) => raw,
            Err(err) => {
                error!("Unable to read job file '{}', ignoring it: {}", path.display(), err);
                return IntakeOutcome::Dropped;
            }
        };

        let job = match JobRecord::parse(&raw) {
            Ok(job) => job.with_jobfile(path),
            Err(err) => {
                let uid = content_uid(&raw);
                warn!("Job file '{}' is invalid: {}", path.display(), err);
                return self.quarantine(path, &uid, INVALID_SUFFIX);
            }
        };

        match job.jobtype() {
            JobType::DeleteJobs => self.handle_deletion(job),
            jobtype => self.enqueue(job, jobtype),
        }
    }

    fn handle_deletion(&self, mut job: JobRecord) -> IntakeOutcome {
        let ids = job.deletion_ids().to_vec();
        info!("Received deletion request '{}' for {} job(s): {:?}", job.uid, ids.len(), ids);
        self.queues.route_deletions(&ids);
        if let Err(err) = job.move_jobfile(&self.dirs.done, JOBFILE_SUFFIX, Collision::Overwrite) {
            error!("Unable to retire deletion request '{}': {}", job.uid, err);
        }
        IntakeOutcome::Deletion { ids }
    }

    fn enqueue(&self, mut job: JobRecord, jobtype: JobType) -> IntakeOutcome {
        let Some(queue) = self.queues.get(jobtype) else {
            critical!(
                "No queue for jobtype '{}' (job '{}'), moving it to 'done'.",
                jobtype,
                job.uid
            );
            return self.quarantine_job(job);
        };
        if queue.contains(&job.uid) {
            warn!("Job '{}' is already queued, moving the duplicate to 'done'.", job.uid);
            return self.quarantine_job(job);
        }
        if let Err(err) = job.move_jobfile(&self.dirs.cur, JOBFILE_SUFFIX, Collision::Overwrite) {
            error!("Unable to claim job '{}': {}", job.uid, err);
            return IntakeOutcome::Dropped;
        }
        let uid = job.uid.clone();
        let mut claimed = job.clone();
        match queue.append(job) {
            Ok(()) => {
                info!("Job '{}' added to queue '{}'.", uid, jobtype);
                IntakeOutcome::Queued { uid }
            }
            Err(err) => {
                warn!("Unable to queue job '{}': {}", uid, err);
                let moved = claimed.move_jobfile(
                    &self.dirs.done,
                    JOBFILE_SUFFIX,
                    Collision::Disambiguate,
                );
                if let Err(err) = moved {
                    error!("Unable to move job '{}' out of 'cur': {}", uid, err);
                }
                IntakeOutcome::Quarantined { uid }
            }
        }
    }

    fn quarantine_job(&self, job: JobRecord) -> IntakeOutcome {
        match job.jobfile.as_deref() {
            Some(path) => self.quarantine(path, &job.uid, JOBFILE_SUFFIX),
            None => IntakeOutcome::Quarantined { uid: job.uid },
        }
    }

    fn quarantine(&self, path: &Path, uid: &str, suffix: &str) -> IntakeOutcome {
        let name = format!("{uid}{suffix}");
        if let Err(err) = move_atomic(path, &self.dirs.done, &name, Collision::Disambiguate) {
            error!("Unable to quarantine job file '{}': {}", path.display(), err);
            return IntakeOutcome::Dropped;
        }
        IntakeOutcome::Quarantined { uid: uid.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::job::status::JobStatus;
    use crate::queue::shared::SharedQueue;
    use crate::spool::tree::list_files;

    const DECON: &str = "\
[hrmjobfile]
version = 7
username = user01
useremail = user01@example.org
timestamp = 1437152020.75
jobtype = hucore

[hucore]
tasktype = decon
executable = /usr/local/bin/hucore
template = /data/decon.hgsb

[inputfiles]
file1 = /data/a.h5
";

    fn setup() -> (TempDir, SpoolDirs, SharedQueue, JobIntake) {
        let base = TempDir::new().unwrap();
        let dirs = SpoolDirs::setup(base.path()).unwrap().dirs;
        let queue = SharedQueue::new(JobType::Hucore);
        let mut queues = QueueSet::new();
        queues.insert(queue.clone());
        let intake = JobIntake::new(queues, dirs.clone()).with_backoff(vec![Duration::ZERO]);
        (base, dirs, queue, intake)
    }

    fn submit(dirs: &SpoolDirs, name: &str, content: &str) -> PathBuf {
        let path = dirs.new.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn names(dir: &Path) -> Vec<String> {
        list_files(dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn valid_job_is_claimed_and_queued() {
        let (_base, dirs, queue, intake) = setup();
        let path = submit(&dirs, "hrm_jobfile_x", DECON);
        let uid = content_uid(DECON);

        let outcome = intake.process_jobfile(&path).await;

        assert_eq!(outcome, IntakeOutcome::Queued { uid: uid.clone() });
        assert!(names(&dirs.new).is_empty());
        assert_eq!(names(&dirs.cur), vec![format!("{uid}.jobfile")]);
        let job = queue.get(&uid).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.jobfile, Some(dirs.cur.join(format!("{uid}.jobfile"))));
    }

    #[tokio::test]
    async fn malformed_job_is_quarantined_as_invalid() {
        let (_base, dirs, queue, intake) = setup();
        let content = DECON.replace("version = 7", "version = 6");
        let path = submit(&dirs, "hrm_jobfile_bad", &content);

        let outcome = intake.process_jobfile(&path).await;

        let uid = content_uid(&content);
        assert_eq!(outcome, IntakeOutcome::Quarantined { uid: uid.clone() });
        assert_eq!(names(&dirs.done), vec![format!("{uid}.invalid")]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn duplicate_job_does_not_replace_queued_file() {
        let (_base, dirs, queue, intake) = setup();
        let first = submit(&dirs, "first", DECON);
        intake.process_jobfile(&first).await;
        let second = submit(&dirs, "second", DECON);

        let outcome = intake.process_jobfile(&second).await;

        assert!(matches!(outcome, IntakeOutcome::Quarantined { .. }));
        assert_eq!(names(&dirs.cur).len(), 1);
        assert_eq!(names(&dirs.done).len(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn deletion_request_is_routed_and_retired() {
        let (_base, dirs, queue, intake) = setup();
        let content = "\
[hrmjobfile]
version = 7
username = user01
useremail = user01@example.org
timestamp = 1437152020.75
jobtype = deletejobs

[deletejobs]
ids = abc, def
";
        let path = submit(&dirs, "hrm_delete", content);

        let outcome = intake.process_jobfile(&path).await;

        let ids = vec!["abc".to_string(), "def".to_string()];
        assert_eq!(outcome, IntakeOutcome::Deletion { ids });
        assert_eq!(queue.deletion_list(), vec!["abc", "def"]);
        assert_eq!(names(&dirs.done), vec![format!("{}.jobfile", content_uid(content))]);
        assert!(names(&dirs.new).is_empty());
    }

    #[tokio::test]
    async fn job_without_queue_is_quarantined() {
        let base = TempDir::new().unwrap();
        let dirs = SpoolDirs::setup(base.path()).unwrap().dirs;
        let intake =
            JobIntake::new(QueueSet::new(), dirs.clone()).with_backoff(vec![Duration::ZERO]);
        let path = submit(&dirs, "orphan", DECON);

        let outcome = intake.process_jobfile(&path).await;

        assert!(matches!(outcome, IntakeOutcome::Quarantined { .. }));
        assert_eq!(names(&dirs.done), vec![format!("{}.jobfile", content_uid(DECON))]);
    }

    #[tokio::test]
    async fn unreadable_event_is_dropped_without_move() {
        let (_base, dirs, _queue, intake) = setup();
        let empty = submit(&dirs, "empty", "");

        assert_eq!(intake.process_jobfile(&empty).await, IntakeOutcome::Dropped);
        assert_eq!(intake.process_jobfile(&dirs.new.join("gone")).await, IntakeOutcome::Dropped);
        assert_eq!(names(&dirs.new), vec!["empty"]);
        assert!(names(&dirs.done).is_empty());
    }

    #[tokio::test]
    async fn run_drains_channel() {
        let (_base, dirs, queue, intake) = setup();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(submit(&dirs, "a", DECON)).unwrap();
        drop(tx);

        intake.run(rx).await;

        assert_eq!(queue.len(), 1);
    }
}
