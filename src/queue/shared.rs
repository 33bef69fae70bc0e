use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use crate::job::record::{JobRecord, JobType};
use crate::job::status::JobStatus;
use crate::queue::scheduler::{JobQueue, QueueError};
use crate::queue::status::{QueueSnapshot, StatusFile};

/// A [`JobQueue`] shared between the intake task and the spooler.
///
/// Every operation takes the lock for its own duration only. Operations that
/// change the queue publish a status snapshot afterwards, outside the lock.
#[derive(Debug, Clone)]
pub struct SharedQueue {
    jobtype: JobType,
    inner: Arc<Mutex<JobQueue>>,
    status: Option<Arc<StatusFile>>,
}

impl SharedQueue {
    pub fn new(jobtype: JobType) -> Self {
        SharedQueue { jobtype, inner: Arc::new(Mutex::new(JobQueue::new())), status: None }
    }

    /// Keep a JSON status file up to date with the queue contents.
    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status = Some(Arc::new(StatusFile::new(path)));
        self
    }

    pub fn jobtype(&self) -> JobType {
        self.jobtype
    }

    pub fn append(&self, job: JobRecord) -> Result<(), QueueError> {
        self.modify(|queue| queue.append(job))
    }

    pub fn next_job(&self) -> Option<JobRecord> {
        self.modify(JobQueue::next_job)
    }

    pub fn remove(&self, uid: &str) -> Option<JobRecord> {
        self.modify(|queue| queue.remove(uid))
    }

    pub fn set_status(&self, uid: &str, status: JobStatus) -> bool {
        self.modify(|queue| queue.set_status(uid, status))
    }

    pub fn request_deletion(&self, ids: &[String]) {
        self.modify(|queue| queue.request_deletion(ids.iter().cloned()))
    }

    pub fn process_deletion_list(&self) -> Vec<JobRecord> {
        self.modify(JobQueue::process_deletion_list)
    }

    pub fn forget_deletion(&self, uid: &str) -> bool {
        self.modify(|queue| queue.forget_deletion(uid))
    }

    pub fn is_marked_for_deletion(&self, uid: &str) -> bool {
        self.lock().is_marked_for_deletion(uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.lock().contains(uid)
    }

    #[cfg(test)]
    pub fn get(&self, uid: &str) -> Option<JobRecord> {
        self.lock().get(uid).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn num_jobs_queued(&self) -> usize {
        self.lock().num_jobs_queued()
    }

    pub fn num_jobs_processing(&self) -> usize {
        self.lock().num_jobs_processing()
    }

    pub fn joblist(&self) -> Vec<String> {
        self.lock().joblist()
    }

    #[cfg(test)]
    pub fn deletion_list(&self) -> Vec<String> {
        self.lock().deletion_list().to_vec()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.lock().snapshot()
    }

    /// Render the human readable report, logging a warning if that fails.
    pub fn report(&self) -> Option<String> {
        match self.lock().report() {
            Ok(report) => Some(report),
            Err(err) => {
                warn!("Unable to render report of queue '{}': {}", self.jobtype, err);
                None
            }
        }
    }

    /// Log the queue report and rewrite the status file unconditionally.
    pub fn refresh(&self) {
        let snapshot = self.snapshot();
        if let Some(report) = self.report() {
            info!("Queue '{}':\n{}", self.jobtype, report);
        }
        self.publish(&snapshot);
    }

    fn modify<R>(&self, f: impl FnOnce(&mut JobQueue) -> R) -> R {
        let (result, snapshot) = {
            let mut queue = self.lock();
            let before = queue.generation();
            let result = f(&mut *queue);
            let snapshot = (queue.generation() != before).then(|| queue.snapshot());
            (result, snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.publish(&snapshot);
        }
        result
    }

    fn publish(&self, snapshot: &QueueSnapshot) {
        let Some(status) = &self.status else {
            return;
        };
        if let Err(err) = status.write(snapshot) {
            warn!("Unable to write status file '{}': {}", status.path().display(), err);
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobQueue> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The active queues, one per job type that is dispatched to the backend.
#[derive(Debug, Clone, Default)]
pub struct QueueSet {
    queues: BTreeMap<JobType, SharedQueue>,
}

impl QueueSet {
    pub fn new() -> Self {
        QueueSet::default()
    }

    pub fn insert(&mut self, queue: SharedQueue) {
        self.queues.insert(queue.jobtype(), queue);
    }

    pub fn get(&self, jobtype: JobType) -> Option<&SharedQueue> {
        self.queues.get(&jobtype)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedQueue> {
        self.queues.values()
    }

    /// Hand deletion requests to the queues.
    ///
    /// A UID known to a queue goes to that queue. Unknown UIDs go to every
    /// queue, so they are caught if the job shows up later.
    pub fn route_deletions(&self, ids: &[String]) {
        for uid in ids {
            let owners: Vec<&SharedQueue> =
                self.iter().filter(|queue| queue.contains(uid)).collect();
            let targets = if owners.is_empty() { self.iter().collect() } else { owners };
            for queue in targets {
                info!("Job '{}' requested for deletion in queue '{}'.", uid, queue.jobtype());
                queue.request_deletion(std::slice::from_ref(uid));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::job::record::{Bookkeeping, HucoreTask, Payload, TaskType};

    fn job(user: &str, uid: &str) -> JobRecord {
        JobRecord {
            uid: uid.to_string(),
            version: "7".to_string(),
            user: user.to_string(),
            email: String::new(),
            timestamp: 1.0,
            payload: Payload::Hucore(HucoreTask {
                tasktype: TaskType::Preview,
                executable: "hucore".to_string(),
                template: "p.hgsb".to_string(),
                infiles: vec!["in.tif".to_string()],
            }),
            status: JobStatus::NotAvailable,
            bookkeeping: Bookkeeping::default(),
            jobfile: None,
        }
    }

    fn status_ids(path: &std::path::Path) -> Vec<String> {
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        value["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn mutations_publish_status_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hucore.json");
        let queue = SharedQueue::new(JobType::Hucore).with_status_file(&path);

        queue.append(job("a", "a1")).unwrap();
        queue.append(job("b", "b1")).unwrap();
        assert_eq!(status_ids(&path), vec!["a1", "b1"]);

        let next = queue.next_job().unwrap();
        queue.set_status(&next.uid, JobStatus::Terminated);
        assert_eq!(status_ids(&path), vec!["b1"]);
    }

    #[test]
    fn clones_share_the_queue() {
        let queue = SharedQueue::new(JobType::Hucore);
        let intake = queue.clone();
        let handle = std::thread::spawn(move || intake.append(job("a", "a1")));
        handle.join().unwrap().unwrap();
        assert!(queue.contains("a1"));
        assert_eq!(queue.num_jobs_queued(), 1);
    }

    #[test]
    fn deletions_go_to_the_owning_queue() {
        let mut set = QueueSet::new();
        set.insert(SharedQueue::new(JobType::Hucore));
        set.insert(SharedQueue::new(JobType::DeleteJobs));
        let hucore = set.get(JobType::Hucore).unwrap().clone();
        let other = set.get(JobType::DeleteJobs).unwrap().clone();
        hucore.append(job("a", "known")).unwrap();

        set.route_deletions(&["known".to_string(), "unknown".to_string()]);

        assert_eq!(hucore.deletion_list(), vec!["known", "unknown"]);
        assert_eq!(other.deletion_list(), vec!["unknown"]);
    }
}
