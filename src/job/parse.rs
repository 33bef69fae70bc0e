use chrono::Utc;
use log::{debug, info, warn};
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::job::ini::{Document, Section, SyntaxError};
use crate::job::record::{Bookkeeping, HucoreTask, JobRecord, JobType, Payload, TaskType};
use crate::job::status::JobStatus;

/// The only job description version this queue manager accepts.
pub const JOBFILE_VERSION: &str = "7";

/// Timestamp keyword asking the parser to fill in the current time.
pub const TIMESTAMP_ON_PARSING: &str = "on_parsing";

const ENVELOPE: &str = "hrmjobfile";
const HUCORE: &str = "hucore";
const INPUTFILES: &str = "inputfiles";
const DELETEJOBS: &str = "deletejobs";

/// A job description that can't be turned into a JobRecord.
///
/// These are content problems only; failing to read the file is reported as
/// an `std::io::Error` by the intake and never ends up here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("malformed job description, {0}")]
    Syntax(#[from] SyntaxError),
    #[error("no sections found in job description")]
    NoSections,
    #[error("section '{0}' is missing")]
    MissingSection(String),
    #[error("can't find option '{option}' in section '{section}'")]
    MissingOption { section: String, option: String },
    #[error("section '{section}' contains unknown options, jobfile is invalid: {keys:?}")]
    UnknownOptions { section: String, keys: Vec<String> },
    #[error("unexpected jobfile version '{found}', expected '{}'", JOBFILE_VERSION)]
    VersionMismatch { found: String },
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("unknown jobtype '{0}'")]
    UnknownJobType(String),
    #[error("tasktype invalid: {0}")]
    InvalidTaskType(String),
    #[error("no input files defined")]
    NoInputFiles,
}

/// SHA-1 hex digest of a job description, used as the job's UID.
pub fn content_uid(raw: &str) -> String {
    hex::encode(Sha1::digest(raw.as_bytes()))
}

struct Envelope {
    version: String,
    user: String,
    email: String,
    timestamp: String,
    jobtype: String,
}

impl JobRecord {
    /// Parse and validate raw job description text.
    ///
    /// The UID is computed from the raw text before anything is interpreted.
    /// With `timestamp = on_parsing` the current time is used instead and the
    /// UID is derived from that timestamp, so the same text can be submitted
    /// repeatedly while testing.
    pub fn parse(raw: &str) -> Result<JobRecord, ParseError> {
        let mut uid = content_uid(raw);
        let mut doc = Document::parse(raw)?;
        if doc.is_empty() {
            return Err(ParseError::NoSections);
        }
        debug!("Job description sections: {:?}", doc.section_names());

        let envelope = parse_envelope(&mut doc)?;
        if envelope.version != JOBFILE_VERSION {
            return Err(ParseError::VersionMismatch { found: envelope.version });
        }

        let timestamp = if envelope.timestamp == TIMESTAMP_ON_PARSING {
            let now = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
            uid = content_uid(&now.to_string());
            warn!("==={}", " WARNING ===".repeat(8));
            warn!("\"timestamp = {TIMESTAMP_ON_PARSING}\" is meant for testing only!!!");
            warn!("==={}", " WARNING ===".repeat(8));
            now
        } else {
            envelope
                .timestamp
                .parse::<f64>()
                .ok()
                .filter(|ts| ts.is_finite())
                .ok_or_else(|| ParseError::InvalidTimestamp(envelope.timestamp.clone()))?
        };

        let payload = match JobType::from_name(&envelope.jobtype) {
            Some(JobType::Hucore) => parse_hucore(&mut doc)?,
            Some(JobType::DeleteJobs) => parse_deletejobs(&mut doc)?,
            None => return Err(ParseError::UnknownJobType(envelope.jobtype)),
        };

        Ok(JobRecord {
            uid,
            version: envelope.version,
            user: envelope.user,
            email: envelope.email,
            timestamp,
            payload,
            status: JobStatus::NotAvailable,
            bookkeeping: Bookkeeping::default(),
            jobfile: None,
        })
    }
}

fn parse_envelope(doc: &mut Document) -> Result<Envelope, ParseError> {
    let section = required_section(doc, ENVELOPE)?;
    let envelope = Envelope {
        version: take_option(section, ENVELOPE, "version")?,
        user: take_option(section, ENVELOPE, "username")?,
        email: take_option(section, ENVELOPE, "useremail")?,
        timestamp: take_option(section, ENVELOPE, "timestamp")?,
        jobtype: take_option(section, ENVELOPE, "jobtype")?,
    };
    reject_remaining(section, ENVELOPE)?;
    Ok(envelope)
}

fn parse_hucore(doc: &mut Document) -> Result<Payload, ParseError> {
    let section = required_section(doc, HUCORE)?;
    let tasktype = take_option(section, HUCORE, "tasktype")?;
    let executable = take_option(section, HUCORE, "executable")?;
    let template = take_option(section, HUCORE, "template")?;
    reject_remaining(section, HUCORE)?;
    let tasktype = TaskType::from_name(&tasktype).ok_or(ParseError::InvalidTaskType(tasktype))?;

    let infiles: Vec<String> = required_section(doc, INPUTFILES)?
        .drain()
        .into_iter()
        .map(|(_, path)| path)
        .collect();
    if infiles.is_empty() {
        return Err(ParseError::NoInputFiles);
    }

    Ok(Payload::Hucore(HucoreTask { tasktype, executable, template, infiles }))
}

fn parse_deletejobs(doc: &mut Document) -> Result<Payload, ParseError> {
    let section = required_section(doc, DELETEJOBS)?;
    let ids = take_option(section, DELETEJOBS, "ids")?;
    reject_remaining(section, DELETEJOBS)?;

    let ids: Vec<String> = ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    for id in &ids {
        info!("Request to --- DELETE --- job '{id}'");
    }
    Ok(Payload::DeleteJobs { ids })
}

fn required_section<'a>(doc: &'a mut Document, name: &str) -> Result<&'a mut Section, ParseError> {
    doc.section_mut(name).ok_or_else(|| ParseError::MissingSection(name.to_string()))
}

fn take_option(section: &mut Section, name: &str, option: &str) -> Result<String, ParseError> {
    section.take(option).ok_or_else(|| ParseError::MissingOption {
        section: name.to_string(),
        option: option.to_string(),
    })
}

/// Every option of a section must have been consumed by now.
fn reject_remaining(section: &Section, name: &str) -> Result<(), ParseError> {
    if section.is_empty() {
        Ok(())
    } else {
        Err(ParseError::UnknownOptions { section: name.to_string(), keys: section.keys() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECON: &str = "\
[hrmjobfile]
version = 7
username = user01
useremail = user01@example.org
timestamp = 1437152020.751692
jobtype = hucore

[hucore]
tasktype = decon
executable = /usr/local/bin/hucore
template = /data/user01/templates/decon_it-3.hgsb

[inputfiles]
file1 = /data/user01/src/faba128.h5
file2 = /data/user01/src/faba064.h5
file3 = /data/user01/src/faba032.h5
";

    const DELETE: &str = "\
[hrmjobfile]
version = 7
username = user01
useremail = user01@example.org
timestamp = 1437152020.751692
jobtype = deletejobs

[deletejobs]
ids = aaa, bbb ,ccc
";

    #[test]
    fn parses_deconvolution_job() {
        let job = JobRecord::parse(DECON).unwrap();
        let task = job.hucore().unwrap();

        assert_eq!(job.uid, content_uid(DECON));
        assert_eq!(job.uid.len(), 40);
        assert_eq!(job.user, "user01");
        assert_eq!(job.email, "user01@example.org");
        assert_eq!(job.timestamp, 1437152020.751692);
        assert_eq!(job.status, JobStatus::NotAvailable);
        assert_eq!(task.tasktype, TaskType::Decon);
        assert_eq!(task.executable, "/usr/local/bin/hucore");
        assert_eq!(task.infiles, vec![
            "/data/user01/src/faba128.h5",
            "/data/user01/src/faba064.h5",
            "/data/user01/src/faba032.h5",
        ]);
    }

    #[test]
    fn uid_is_deterministic() {
        let first = JobRecord::parse(DECON).unwrap();
        let second = JobRecord::parse(DECON).unwrap();
        assert_eq!(first.uid, second.uid);

        let other = JobRecord::parse(&DECON.replace("user01", "user02")).unwrap();
        assert_ne!(first.uid, other.uid);
    }

    #[test]
    fn rejects_unknown_envelope_option() {
        let text = DECON.replace("jobtype = hucore", "jobtype = hucore\npriority = high");
        let err = JobRecord::parse(&text).unwrap_err();
        assert_eq!(err, ParseError::UnknownOptions {
            section: "hrmjobfile".to_string(),
            keys: vec!["priority".to_string()],
        });
    }

    #[test]
    fn rejects_unknown_hucore_option() {
        let text = DECON.replace("tasktype = decon", "tasktype = decon\nthreads = 4");
        let err = JobRecord::parse(&text).unwrap_err();
        assert!(matches!(err, ParseError::UnknownOptions { section, .. } if section == "hucore"));
    }

    #[test]
    fn version_mismatch_differs_from_missing_version() {
        let mismatch = JobRecord::parse(&DECON.replace("version = 7", "version = 5")).unwrap_err();
        assert_eq!(mismatch, ParseError::VersionMismatch { found: "5".to_string() });

        let missing = JobRecord::parse(&DECON.replace("version = 7\n", "")).unwrap_err();
        assert_eq!(missing, ParseError::MissingOption {
            section: "hrmjobfile".to_string(),
            option: "version".to_string(),
        });
    }

    #[test]
    fn rejects_invalid_tasktype() {
        let err =
            JobRecord::parse(&DECON.replace("tasktype = decon", "tasktype = snr")).unwrap_err();
        assert_eq!(err, ParseError::InvalidTaskType("snr".to_string()));
    }

    #[test]
    fn rejects_missing_or_empty_inputfiles() {
        let without = DECON.split("[inputfiles]").next().unwrap().to_string();
        let err = JobRecord::parse(&without).unwrap_err();
        assert_eq!(err, ParseError::MissingSection("inputfiles".to_string()));

        let empty = format!("{without}[inputfiles]\n");
        assert_eq!(JobRecord::parse(&empty).unwrap_err(), ParseError::NoInputFiles);
    }

    #[test]
    fn rejects_bad_timestamp_and_jobtype() {
        let err = JobRecord::parse(&DECON.replace("1437152020.751692", "yesterday")).unwrap_err();
        assert_eq!(err, ParseError::InvalidTimestamp("yesterday".to_string()));

        let err =
            JobRecord::parse(&DECON.replace("jobtype = hucore", "jobtype = omero")).unwrap_err();
        assert_eq!(err, ParseError::UnknownJobType("omero".to_string()));
    }

    #[test]
    fn rejects_text_without_sections() {
        assert_eq!(JobRecord::parse("# empty\n").unwrap_err(), ParseError::NoSections);
        assert!(matches!(JobRecord::parse("version = 7\n"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn timestamp_on_parsing_replaces_uid() {
        let text = DECON.replace("1437152020.751692", TIMESTAMP_ON_PARSING);
        let job = JobRecord::parse(&text).unwrap();
        assert_ne!(job.uid, content_uid(&text));
        assert_eq!(job.uid, content_uid(&job.timestamp.to_string()));
        assert!(job.timestamp > 1437152020.0);
    }

    #[test]
    fn parses_deletion_ids() {
        let job = JobRecord::parse(DELETE).unwrap();
        assert_eq!(job.jobtype(), JobType::DeleteJobs);
        assert_eq!(job.deletion_ids(), ["aaa", "bbb", "ccc"]);
        assert!(job.infiles().is_empty());
    }

    #[test]
    fn deletion_ids_may_be_empty_but_not_absent() {
        let empty = JobRecord::parse(&DELETE.replace("aaa, bbb ,ccc", "")).unwrap();
        assert!(empty.deletion_ids().is_empty());

        let absent = JobRecord::parse(&DELETE.replace("ids = aaa, bbb ,ccc\n", "")).unwrap_err();
        assert_eq!(absent, ParseError::MissingOption {
            section: "deletejobs".to_string(),
            option: "ids".to_string(),
        });
    }
}
