use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::job::record::JobType;
use crate::spool::SpoolError;

/// The spooling directory tree below a base directory:
///
/// ```text
/// <base>
///   |-- queue
///   |   |-- requests
///   |   `-- status
///   `-- spool
///       |-- cur
///       |-- done
///       `-- new
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SpoolDirs {
    pub base: PathBuf,
    /// Incoming job descriptions (watched).
    pub new: PathBuf,
    /// Jobs claimed by a queue.
    pub cur: PathBuf,
    /// Terminal jobs, completed or quarantined.
    pub done: PathBuf,
    /// Operator control files.
    pub requests: PathBuf,
    /// JSON status snapshots.
    pub status: PathBuf,
}

/// What was found in the spool when the queue manager started.
#[derive(Debug)]
pub struct Startup {
    pub dirs: SpoolDirs,
    /// Files left in `cur` by an unclean shutdown. They are not re-queued.
    pub orphaned: Vec<PathBuf>,
}

impl SpoolDirs {
    pub fn layout(base: &Path) -> Self {
        let spool = base.join("spool");
        let queue = base.join("queue");
        SpoolDirs {
            base: base.to_path_buf(),
            new: spool.join("new"),
            cur: spool.join("cur"),
            done: spool.join("done"),
            requests: queue.join("requests"),
            status: queue.join("status"),
        }
    }

    /// Create (or check) the tree and look for leftovers from a previous run.
    pub fn setup(base: &Path) -> Result<Startup, SpoolError> {
        let dirs = SpoolDirs::layout(base);
        dirs.ensure()?;
        info!("Runtime directories: {:#?}", dirs);

        // picked up once the watcher runs
        for file in dirs.list_new()? {
            warn!("Found existing file in 'new' directory: {}", file.display());
        }

        let orphaned = list_files(&dirs.cur)?;
        if !orphaned.is_empty() {
            warn!("{} WARNING {}", "=".repeat(60), "=".repeat(60));
            warn!(
                "Spooling directory '{}' non-empty, this could be due to an unclean shutdown \
                 of the Queue Manager!",
                dirs.cur.display()
            );
            for file in &orphaned {
                warn!("- file: {}", file.display());
            }
            warn!("{} WARNING {}", "=".repeat(60), "=".repeat(60));
        }

        Ok(Startup { dirs, orphaned })
    }

    /// Make sure all five directories exist and are writable.
    pub fn ensure(&self) -> Result<(), SpoolError> {
        for dir in self.all() {
            ensure_dir(dir)?;
        }
        Ok(())
    }

    pub fn list_new(&self) -> Result<Vec<PathBuf>, SpoolError> {
        list_files(&self.new)
    }

    /// Status snapshot file of the queue handling `jobtype`.
    pub fn status_file(&self, jobtype: JobType) -> PathBuf {
        self.status.join(format!("{jobtype}.json"))
    }

    fn all(&self) -> [&Path; 5] {
        [&self.new, &self.cur, &self.done, &self.status, &self.requests]
    }
}

fn ensure_dir(dir: &Path) -> Result<(), SpoolError> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(SpoolError::NotADirectory(dir.to_path_buf()));
        }
        if !is_writable(dir) {
            return Err(SpoolError::NotWritable(dir.to_path_buf()));
        }
        debug!("Spool directory '{}' is fine.", dir.display());
        return Ok(());
    }
    fs::create_dir_all(dir)
        .map_err(|source| SpoolError::Create { path: dir.to_path_buf(), source })?;
    info!("Created spool directory '{}'.", dir.display());
    Ok(())
}

/// Probe by creating (and removing) a file, permission bits alone don't
/// tell whether *we* may write.
fn is_writable(dir: &Path) -> bool {
    let probe = dir.join(format!(".hrm-qm-probe-{}", std::process::id()));
    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(_) => fs::remove_file(&probe).is_ok(),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => fs::remove_file(&probe).is_ok(),
        Err(_) => false,
    }
}

/// Regular files in `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, SpoolError> {
    let list = |dir: &Path| -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    };
    list(dir).map_err(|source| SpoolError::List { path: dir.to_path_buf(), source })
}
