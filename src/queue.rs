//! Fair scheduling of jobs across submitting users
//!
//! Each job type dispatched to the backend has its own queue. Within a queue,
//! users take turns: every call to `next_job` moves on to the next user that
//! has pending work, and each user's jobs are handed out in submission order.

/// Round-robin rotation over per-category FIFOs
pub mod ring;
/// The job queue itself: append, dispatch, removal, deletion requests
pub mod scheduler;
/// JSON status snapshot and human readable report
pub mod status;
/// Thread-safe queue handle and the set of active queues
pub mod shared;
