//! The spooler loop dispatching queued jobs to the execution engine
//!
//! Operators control the loop by dropping an empty file named `shutdown`,
//! `refresh`, `pause` or `run` into `<base>/queue/requests`.

/// Operator requests and spooler states
pub mod request;
/// Signals ending the spooler loop
pub mod signal;
/// The loop itself: deletion handling, dispatch, shutdown
pub mod spool;
