//! On-disk spool: the mailbox between job submission and processing
//!
//! Each job is backed by exactly one file that is renamed from `spool/new` to
//! `spool/cur` and finally to `spool/done`, so after a crash it is always in
//! one unambiguous place.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Create and check the spooling directory tree
pub mod tree;
/// Move job files between spooling directories
pub mod transfer;

/// Suffix of job files owned by the queue manager.
pub const JOBFILE_SUFFIX: &str = ".jobfile";
/// Marker for job files that could not be parsed.
pub const INVALID_SUFFIX: &str = ".invalid";
/// Marker for jobs the backend refused to instantiate.
pub const FAILED_SUFFIX: &str = ".failed";

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("directory '{0}' exists, but it is not writable for us")]
    NotWritable(PathBuf),
    #[error("'{0}' exists, but it is not a directory")]
    NotADirectory(PathBuf),
    #[error("error creating spool directory '{path}': {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("error listing spool directory '{path}': {source}")]
    List { path: PathBuf, source: io::Error },
    #[error("error moving '{from}' to '{to}': {source}")]
    Move { from: PathBuf, to: PathBuf, source: io::Error },
}
