use std::io;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};

/// Waits before each read attempt. A creation event may arrive before the
/// submitter finished writing, so empty reads are retried.
pub const DEFAULT_BACKOFF: [Duration; 6] = [
    Duration::ZERO,
    Duration::from_millis(10),
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_secs(2),
    Duration::from_secs(5),
];

/// Read a job file, retrying empty reads along the backoff schedule.
///
/// A missing file fails immediately. A file that is still empty (or not
/// readable for us) when the schedule is exhausted is an error as well.
/// Invalid UTF-8 is replaced rather than rejected, so such a file reaches
/// the parser and gets quarantined as malformed.
pub async fn read_jobfile(path: &Path, backoff: &[Duration]) -> io::Result<String> {
    let mut last_error = None;
    for (attempt, delay) in backoff.iter().enumerate() {
        if !delay.is_zero() {
            tokio::time::sleep(*delay).await;
        }
        match tokio::fs::read(path).await {
            Ok(bytes) if !bytes.is_empty() => {
                info!("Read job file '{}' ({} bytes).", path.display(), bytes.len());
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            Ok(_) => {
                let attempt = attempt + 1;
                debug!("Job file '{}' is empty (attempt {}), retrying.", path.display(), attempt);
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                debug!(
                    "Job file '{}' not readable yet (attempt {}): {}",
                    path.display(),
                    attempt + 1,
                    err
                );
                last_error = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    warn!("Giving up reading job file '{}' after {} attempts.", path.display(), backoff.len());
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("job file '{}' is still empty", path.display()),
        )
    }))
}
