//! Job descriptions submitted through the spool directory
//!
//! A job description is an ini-style text file. Parsing it yields a typed
//! [`record::JobRecord`] whose UID is derived from the file content.

/// Typed job record and the job types it can describe
pub mod record;
/// Status vocabulary shared by the queue and the execution backend
pub mod status;
/// Section / key-value grammar of job description files
pub mod ini;
/// Validate job description text and turn it into a JobRecord
pub mod parse;
