use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::info;

use crate::spool::SpoolError;

/// What to do when the target file name is already taken.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Collision {
    /// Replace the existing file (regular cur / done transitions).
    Overwrite,
    /// Append a time-based suffix to the new name (quarantine moves).
    Disambiguate,
}

/// Rename `source` into `target_dir` as `name`.
///
/// This is a single rename, never a copy, so the file is visible in exactly
/// one spool directory at any time.
pub fn move_atomic(
    source: &Path,
    target_dir: &Path,
    name: &str,
    collision: Collision,
) -> Result<PathBuf, SpoolError> {
    let mut target = target_dir.join(name);
    if collision == Collision::Disambiguate && target.exists() {
        target = target_dir.join(format!("{}.{}", name, epoch_suffix()));
    }
    info!("Moving file '{}' to '{}'.", source.display(), target.display());
    fs::rename(source, &target).map_err(|source_err| SpoolError::Move {
        from: source.to_path_buf(),
        to: target.clone(),
        source: source_err,
    })?;
    Ok(target)
}

/// Seconds since the epoch with microseconds, e.g. `1437152020.751692`.
fn epoch_suffix() -> String {
    let now = Utc::now();
    format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn spool() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let new = dir.path().join("new");
        let cur = dir.path().join("cur");
        fs::create_dir(&new).unwrap();
        fs::create_dir(&cur).unwrap();
        (dir, new, cur)
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn moves_file_under_new_name() {
        let (_dir, new, cur) = spool();
        let source = new.join("hrm_jobfile_Ab12");
        fs::write(&source, "job").unwrap();

        let moved = move_atomic(&source, &cur, "c0ffee.jobfile", Collision::Overwrite).unwrap();

        assert_eq!(moved, cur.join("c0ffee.jobfile"));
        assert!(entries(&new).is_empty());
        assert_eq!(entries(&cur), vec!["c0ffee.jobfile"]);
        assert_eq!(fs::read_to_string(moved).unwrap(), "job");
    }

    #[test]
    fn overwrite_replaces_existing_target() {
        let (_dir, new, cur) = spool();
        fs::write(cur.join("c0ffee.jobfile"), "old").unwrap();
        let source = new.join("incoming");
        fs::write(&source, "new").unwrap();

        move_atomic(&source, &cur, "c0ffee.jobfile", Collision::Overwrite).unwrap();

        assert_eq!(entries(&cur), vec!["c0ffee.jobfile"]);
        assert_eq!(fs::read_to_string(cur.join("c0ffee.jobfile")).unwrap(), "new");
    }

    #[test]
    fn disambiguate_keeps_existing_target() {
        let (_dir, new, cur) = spool();
        fs::write(cur.join("c0ffee.invalid"), "old").unwrap();
        let source = new.join("incoming");
        fs::write(&source, "new").unwrap();

        let moved = move_atomic(&source, &cur, "c0ffee.invalid", Collision::Disambiguate).unwrap();

        assert_ne!(moved, cur.join("c0ffee.invalid"));
        assert!(moved.file_name().unwrap().to_string_lossy().starts_with("c0ffee.invalid."));
        assert_eq!(entries(&cur).len(), 2);
        assert_eq!(fs::read_to_string(cur.join("c0ffee.invalid")).unwrap(), "old");
    }

    #[test]
    fn missing_source_is_reported() {
        let (_dir, new, cur) = spool();
        let err =
            move_atomic(&new.join("gone"), &cur, "x.jobfile", Collision::Overwrite).unwrap_err();
        assert!(matches!(err, SpoolError::Move { .. }));
    }
}
