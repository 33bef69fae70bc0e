use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::debug;
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::job::record::JobRecord;
use crate::job::status::JobStatus;

/// One entry of the JSON status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: String,
    /// First input file of the job.
    pub file: String,
    pub username: String,
    #[serde(rename = "jobType")]
    pub job_type: String,
    pub status: JobStatus,
    pub server: String,
    pub progress: String,
    pub pid: String,
    pub start: String,
    pub queued: f64,
}

impl JobSummary {
    pub fn from_record(job: &JobRecord) -> Self {
        JobSummary {
            id: job.uid.clone(),
            file: job.infiles().first().cloned().unwrap_or_default(),
            username: job.user.clone(),
            job_type: job.jobtype().to_string(),
            status: job.status,
            server: job.bookkeeping.server.clone(),
            progress: job.bookkeeping.progress.clone(),
            pid: job.bookkeeping.pid.clone(),
            start: job.bookkeeping.start.clone(),
            queued: job.timestamp,
        }
    }
}

/// Queue contents at one point in time: processing jobs first, then pending
/// jobs in dispatch order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub jobs: Vec<JobSummary>,
    /// Queue generation the snapshot was taken at, used to order writes.
    #[serde(skip)]
    pub generation: u64,
}

impl QueueSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// The JSON status file of one queue.
///
/// Snapshots are taken under the queue lock but written after releasing it,
/// so writes from different threads may arrive out of order. A snapshot
/// older than the last one written is dropped.
#[derive(Debug)]
pub struct StatusFile {
    path: PathBuf,
    written: Mutex<Option<u64>>,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StatusFile { path: path.into(), written: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot (temp file + rename). Returns `false` if it was
    /// skipped as outdated.
    pub fn write(&self, snapshot: &QueueSnapshot) -> io::Result<bool> {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if written.map_or(false, |generation| generation > snapshot.generation) {
            debug!("Skipping outdated status snapshot (generation {}).", snapshot.generation);
            return Ok(false);
        }
        let json = snapshot.to_json().map_err(io::Error::from)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        *written = Some(snapshot.generation);
        Ok(true)
    }
}

/// Rendering context for one line of the human readable report
#[derive(Serialize)]
struct ReportLine {
    user: String,
    email: String,
    uid: String,
    files: String,
    status: String,
}

impl ReportLine {
    fn from_record(job: &JobRecord) -> Self {
        ReportLine {
            user: job.user.clone(),
            email: job.email.clone(),
            uid: job.uid.clone(),
            files: format!("{:?}", job.infiles()),
            status: job.status.to_string(),
        }
    }
}

/// Rendering context for the human readable report
#[derive(Serialize)]
struct ReportContext {
    processing: Vec<ReportLine>,
    has_processing: bool,
    queued: Vec<ReportLine>,
    has_queued: bool,
}

/// Render the human readable queue report using TinyTemplate
pub fn render_report(
    processing: &[&JobRecord],
    queued: &[&JobRecord],
) -> Result<String, tinytemplate::error::Error> {
    /// included report template
    static REPORT: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/queue_status.txt"));
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template("report", REPORT)?;

    let context = ReportContext {
        processing: processing.iter().map(|job| ReportLine::from_record(job)).collect(),
        has_processing: !processing.is_empty(),
        queued: queued.iter().map(|job| ReportLine::from_record(job)).collect(),
        has_queued: !queued.is_empty(),
    };
    tt.render("report", &context)
}
