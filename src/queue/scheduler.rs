use std::collections::HashMap;

use log::{debug, info, warn};
use thiserror::Error;

use crate::job::record::JobRecord;
use crate::job::status::JobStatus;
use crate::queue::ring::CategoryRing;
use crate::queue::status::{self, JobSummary, QueueSnapshot};

#[derive(Debug, Error, PartialEq)]
pub enum QueueError {
    #[error("job with UID '{0}' is already in the queue")]
    Duplicate(String),
}

/// Fair job queue with one FIFO per category (the submitting user).
///
/// Jobs move from a category FIFO into `processing` when handed out by
/// [`JobQueue::next_job`] and leave the queue entirely once they reach a
/// terminal status or are removed. Every mutation bumps `generation`, which
/// orders status snapshots taken from different threads.
#[derive(Debug, Default)]
pub struct JobQueue {
    ring: CategoryRing,
    jobs: HashMap<String, JobRecord>,
    processing: Vec<String>,
    deletion_list: Vec<String>,
    generation: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        JobQueue::default()
    }

    /// Add a job to the back of its category's FIFO.
    pub fn append(&mut self, mut job: JobRecord) -> Result<(), QueueError> {
        if self.jobs.contains_key(&job.uid) {
            warn!("Job with UID '{}' is already in this queue, refusing to add it.", job.uid);
            return Err(QueueError::Duplicate(job.uid));
        }
        let category = job.category().to_string();
        if self.ring.push(&category, job.uid.clone()) {
            debug!("Added new queue category '{}'.", category);
        }
        job.status = JobStatus::Queued;
        debug!("Enqueued job '{}' for '{}'.", job.uid, category);
        self.jobs.insert(job.uid.clone(), job);
        self.touch();
        Ok(())
    }

    /// Hand out the next job in round-robin order and mark it as processing.
    ///
    /// The returned record is a copy, the queue keeps the authoritative one.
    pub fn next_job(&mut self) -> Option<JobRecord> {
        let (category, uid) = self.ring.pop()?;
        debug!("Retrieving next job: category '{}', UID '{}'.", category, uid);
        self.processing.push(uid.clone());
        self.touch();
        self.jobs.get(&uid).cloned()
    }

    /// Remove a job, whether it is still pending or already processing.
    pub fn remove(&mut self, uid: &str) -> Option<JobRecord> {
        let job = self.jobs.get(uid)?;
        if let Some(index) = self.processing.iter().position(|p| p == uid) {
            debug!("Removing job '{}' from the processing list.", uid);
            self.processing.remove(index);
        } else if self.ring.remove(job.category(), uid) {
            debug!("Removing pending job '{}' of category '{}'.", uid, job.category());
        }
        let removed = self.jobs.remove(uid);
        self.touch();
        removed
    }

    /// Update the status of a job, removing it once it is terminal.
    ///
    /// Returns `false` for UIDs unknown to this queue.
    pub fn set_status(&mut self, uid: &str, status: JobStatus) -> bool {
        let Some(job) = self.jobs.get_mut(uid) else {
            debug!("Not updating status of unknown job '{}'.", uid);
            return false;
        };
        if job.status != status {
            info!("Status of job '{}' changed: {} -> {}.", uid, job.status, status);
            job.status = status;
            self.touch();
        }
        if status.is_terminal() {
            self.remove(uid);
        }
        true
    }

    /// Record UIDs whose jobs should be cancelled at the next opportunity.
    pub fn request_deletion<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for uid in ids {
            let uid = uid.into();
            if !self.deletion_list.contains(&uid) {
                debug!("Job '{}' marked for deletion.", uid);
                self.deletion_list.push(uid);
            }
        }
    }

    pub fn is_marked_for_deletion(&self, uid: &str) -> bool {
        self.deletion_list.iter().any(|d| d == uid)
    }

    /// Drop a deletion request, e.g. after the job was killed.
    pub fn forget_deletion(&mut self, uid: &str) -> bool {
        let before = self.deletion_list.len();
        self.deletion_list.retain(|d| d != uid);
        before != self.deletion_list.len()
    }

    #[cfg(test)]
    pub fn deletion_list(&self) -> &[String] {
        &self.deletion_list
    }

    /// Remove pending jobs that were requested for deletion.
    ///
    /// A request is consumed only when its job was actually removed. UIDs
    /// not (yet) known here and jobs already processing stay on the list,
    /// the latter are killed by the spooler.
    pub fn process_deletion_list(&mut self) -> Vec<JobRecord> {
        let mut removed = Vec::new();
        let mut pending = Vec::new();
        for uid in std::mem::take(&mut self.deletion_list) {
            if self.processing.contains(&uid) {
                pending.push(uid);
                continue;
            }
            match self.remove(&uid) {
                Some(job) => {
                    info!("Job '{}' was removed from the queue.", uid);
                    removed.push(job);
                }
                None => pending.push(uid),
            }
        }
        self.deletion_list = pending;
        removed
    }

    /// Pending UIDs in the order they will be dispatched.
    pub fn joblist(&self) -> Vec<String> {
        self.ring.interleaved()
    }

    /// Pending jobs in dispatch order.
    pub fn queue_details(&self) -> Vec<&JobRecord> {
        self.ring.interleaved().iter().filter_map(|uid| self.jobs.get(uid)).collect()
    }

    /// Jobs handed out for processing, in dispatch order.
    pub fn processing_details(&self) -> Vec<&JobRecord> {
        self.processing.iter().filter_map(|uid| self.jobs.get(uid)).collect()
    }

    #[cfg(test)]
    pub fn processing(&self) -> &[String] {
        &self.processing
    }

    #[cfg(test)]
    pub fn categories(&self) -> Vec<&str> {
        self.ring.categories()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.jobs.contains_key(uid)
    }

    #[cfg(test)]
    pub fn get(&self, uid: &str) -> Option<&JobRecord> {
        self.jobs.get(uid)
    }

    /// Total number of jobs, pending and processing.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn num_jobs_queued(&self) -> usize {
        self.ring.len()
    }

    pub fn num_jobs_processing(&self) -> usize {
        self.processing.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let jobs = self
            .processing_details()
            .into_iter()
            .chain(self.queue_details())
            .map(JobSummary::from_record)
            .collect();
        QueueSnapshot { jobs, generation: self.generation }
    }

    /// Human readable dump of the queue contents.
    pub fn report(&self) -> Result<String, tinytemplate::error::Error> {
        status::render_report(&self.processing_details(), &self.queue_details())
    }

    fn touch(&mut self) {
        self.generation += 1;
    }
}
