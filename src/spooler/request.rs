use std::fmt;
use std::fs;
use std::path::Path;

use log::{debug, error};

/// Operator request, signalled by an empty file of that name in the
/// requests directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Shutdown,
    Refresh,
    Pause,
    Run,
}

impl Request {
    /// Requests in the order they are looked for.
    pub const ALL: [Request; 4] =
        [Request::Shutdown, Request::Refresh, Request::Pause, Request::Run];

    pub const fn file_name(self) -> &'static str {
        match self {
            Request::Shutdown => "shutdown",
            Request::Refresh => "refresh",
            Request::Pause => "pause",
            Request::Run => "run",
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// State of the spooler loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpoolerStatus {
    Run,
    Pause,
    Shutdown,
}

impl fmt::Display for SpoolerStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SpoolerStatus::Run => write!(f, "run"),
            SpoolerStatus::Pause => write!(f, "pause"),
            SpoolerStatus::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Consume at most one request file from `dir`.
pub fn take_request(dir: &Path) -> Option<Request> {
    let request = Request::ALL.into_iter().find(|request| dir.join(request.file_name()).exists())?;
    let path = dir.join(request.file_name());
    debug!("Found request file '{}'.", path.display());
    if let Err(err) = fs::remove_file(&path) {
        error!("Unable to remove request file '{}': {}", path.display(), err);
    }
    Some(request)
}
