//! Picking up job files from the incoming spool directory
//!
//! A file system watcher feeds new paths into a channel, and a single intake
//! task reads, parses and routes them into the queues. Files found at startup
//! are replayed through the same path.

/// Read job files that may still be in the middle of being written
pub mod read;
/// Parse, claim and route a job file
pub mod process;
/// Watch the incoming directory for new files
pub mod watch;
