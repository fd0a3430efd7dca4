//! Output slot naming and the delete-or-backup dance around it.
//!
//! A slot is a numbered `N.mp3` file inside the output directory. Nothing is
//! kept in memory: every call re-derives its slot from the directory listing.

use std::io;
use std::path::{Path, PathBuf};

use strum::{Display, EnumString};
use tracing::{info, warn};

use crate::error::ConvertError;

/// Extension of every stored file.
pub const AUDIO_EXT: &str = "mp3";

/// Slot used by [`SlotPolicy::Fixed`].
pub const FIXED_SLOT: u64 = 1;

/// How the next output file is named. A deployment runs exactly one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum SlotPolicy {
    /// Always write `1.mp3`, displacing whatever was there.
    #[default]
    #[strum(serialize = "fixed")]
    Fixed,
    /// Write `max(N) + 1`; earlier files accumulate.
    #[strum(to_string = "increment", serialize = "auto-increment")]
    AutoIncrement,
}

/// A numbered output file inside the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSlot(pub u64);

impl OutputSlot {
    pub fn file_name(&self) -> String {
        format!("{}.{AUDIO_EXT}", self.0)
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Highest purely numeric file stem in `dir`, plus one. A missing or empty
/// directory yields slot 1.
pub fn next_numeric_slot(dir: &Path) -> io::Result<OutputSlot> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(OutputSlot(1)),
        Err(e) => return Err(e),
    };

    let mut max = 0u64;
    for entry in entries {
        let path = entry?.path();
        if let Some(n) = numeric_stem(&path) {
            max = max.max(n);
        }
    }
    Ok(OutputSlot(max.saturating_add(1)))
}

fn numeric_stem(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// File operations used when clearing and filling a slot.
///
/// Production goes straight to [`std::fs`]; tests substitute failures.
pub(crate) trait FileOps {
    fn remove(&self, path: &Path) -> io::Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
}

pub(crate) struct StdFs;

impl FileOps for StdFs {
    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        std::fs::copy(from, to)
    }
}

/// What [`clear_slot`] did with the previous occupant.
#[derive(Debug)]
pub enum ClearOutcome {
    Vacant,
    Removed,
    BackedUp(PathBuf),
    /// Neither delete nor rename worked; the occupant is still there.
    Left(io::Error),
}

/// Make room at `path`: delete the current occupant, or, when it is locked,
/// move it aside to `<stem>_backup_<unix-seconds>.mp3`.
///
/// Never fails; whatever could not be done is logged and reported in the
/// outcome so the caller can carry on.
pub fn clear_slot(path: &Path) -> ClearOutcome {
    clear_slot_with(&StdFs, path)
}

fn clear_slot_with(fs: &impl FileOps, path: &Path) -> ClearOutcome {
    if !path.exists() {
        return ClearOutcome::Vacant;
    }

    match fs.remove(path) {
        Ok(()) => {
            info!(path = %path.display(), "removed previous output");
            ClearOutcome::Removed
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => ClearOutcome::Vacant,
        Err(e) if is_lock_conflict(&e) => {
            let backup = backup_path(path, chrono::Utc::now().timestamp());
            if backup.exists() {
                if let Err(e) = fs.remove(&backup) {
                    warn!(path = %backup.display(), error = %e, "could not remove stale backup");
                }
            }
            match fs.rename(path, &backup) {
                Ok(()) => {
                    info!(path = %path.display(), backup = %backup.display(), "previous output locked; moved aside");
                    ClearOutcome::BackedUp(backup)
                }
                Err(rename_err) => {
                    warn!(path = %path.display(), error = %rename_err, "could not move locked output aside");
                    ClearOutcome::Left(rename_err)
                }
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not remove previous output");
            ClearOutcome::Left(e)
        }
    }
}

/// Timestamped sibling of `path`, e.g. `1.mp3` → `1_backup_1700000000.mp3`.
pub fn backup_path(path: &Path, unix_secs: i64) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    path.with_file_name(format!("{stem}_backup_{unix_secs}.{AUDIO_EXT}"))
}

/// Sharing/lock violations surface as permission errors on Windows and as
/// busy errors elsewhere.
pub fn is_lock_conflict(e: &io::Error) -> bool {
    const ERROR_SHARING_VIOLATION: i32 = 32;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy
    ) || (cfg!(windows)
        && matches!(
            e.raw_os_error(),
            Some(ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION)
        ))
}

/// Move `temp` into `target`, clearing `target` first.
///
/// Falls back to copy-then-delete when a rename is impossible (for example
/// across devices); `temp` is removed only once the copy succeeded.
pub fn persist(temp: &Path, target: &Path) -> Result<(), ConvertError> {
    persist_with(&StdFs, temp, target)
}

fn persist_with(fs: &impl FileOps, temp: &Path, target: &Path) -> Result<(), ConvertError> {
    if let ClearOutcome::Left(e) = clear_slot_with(fs, target) {
        warn!(path = %target.display(), error = %e, "target still occupied; attempting overwrite");
    }

    if let Err(rename_err) = fs.rename(temp, target) {
        warn!(
            from = %temp.display(),
            to = %target.display(),
            error = %rename_err,
            "rename failed; falling back to copy"
        );
        fs.copy(temp, target)
            .map_err(|e| ConvertError::persist(target, e))?;
        if let Err(e) = fs.remove(temp) {
            warn!(path = %temp.display(), error = %e, "copied output but could not remove temporary file");
        }
    }

    if !target.is_file() {
        return Err(ConvertError::persist(target, "file missing after move"));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tracing_test::traced_test;

    fn touch(dir: &Path, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn next_slot_skips_non_numeric_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1.mp3", "2.mp3", "5.mp3", "notanumber.mp3"] {
            touch(dir.path(), name, b"x");
        }
        assert_eq!(next_numeric_slot(dir.path()).unwrap(), OutputSlot(6));
    }

    #[test]
    fn next_slot_ignores_backups_and_mixed_stems() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["3.mp3", "1_backup_1700000000.mp3", "12a.mp3", "temp.mp3", "99.mp3.part"] {
            touch(dir.path(), name, b"x");
        }
        assert_eq!(next_numeric_slot(dir.path()).unwrap(), OutputSlot(4));
    }

    #[test]
    fn next_slot_of_empty_or_missing_dir_is_one() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_numeric_slot(dir.path()).unwrap(), OutputSlot(1));
        assert_eq!(
            next_numeric_slot(&dir.path().join("absent")).unwrap(),
            OutputSlot(1)
        );
    }

    #[test]
    fn slot_policy_parses_config_values() {
        assert_eq!("fixed".parse::<SlotPolicy>().unwrap(), SlotPolicy::Fixed);
        assert_eq!("Increment".parse::<SlotPolicy>().unwrap(), SlotPolicy::AutoIncrement);
        assert_eq!("auto-increment".parse::<SlotPolicy>().unwrap(), SlotPolicy::AutoIncrement);
        assert!("random".parse::<SlotPolicy>().is_err());
        assert_eq!(SlotPolicy::AutoIncrement.to_string(), "increment");
    }

    #[test]
    fn clear_slot_removes_occupant() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "1.mp3", b"old");

        assert!(matches!(clear_slot(&path), ClearOutcome::Removed));
        assert!(!path.exists());
        assert!(matches!(clear_slot(&path), ClearOutcome::Vacant));
    }

    #[test]
    fn backup_name_keeps_stem_and_timestamp() {
        let backup = backup_path(Path::new("upload/1.mp3"), 1_700_000_000);
        assert_eq!(backup, Path::new("upload/1_backup_1700000000.mp3"));
    }

    #[test]
    fn permission_errors_count_as_lock_conflicts() {
        assert!(is_lock_conflict(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_lock_conflict(&io::Error::from(io::ErrorKind::NotFound)));
    }

    #[test]
    fn persist_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let temp = touch(dir.path(), "temp.mp3", b"new");
        let target = touch(dir.path(), "1.mp3", b"old");

        persist(&temp, &target).unwrap();
        assert!(!temp.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    /// Real filesystem, except for the operations switched to fail.
    #[derive(Default)]
    struct Faulty {
        remove: Option<io::ErrorKind>,
        rename: Option<io::ErrorKind>,
        copy: Option<io::ErrorKind>,
    }

    fn fail_or<T>(kind: Option<io::ErrorKind>, op: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
        match kind {
            Some(kind) => Err(io::Error::from(kind)),
            None => op(),
        }
    }

    impl FileOps for Faulty {
        fn remove(&self, path: &Path) -> io::Result<()> {
            fail_or(self.remove, || StdFs.remove(path))
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            fail_or(self.rename, || StdFs.rename(from, to))
        }

        fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
            fail_or(self.copy, || StdFs.copy(from, to))
        }
    }

    #[test]
    #[traced_test]
    fn locked_occupant_is_moved_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "1.mp3", b"old");
        let fs = Faulty {
            remove: Some(io::ErrorKind::PermissionDenied),
            ..Faulty::default()
        };

        let backup = match clear_slot_with(&fs, &path) {
            ClearOutcome::BackedUp(backup) => backup,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert!(!path.exists());
        assert_eq!(std::fs::read(&backup).unwrap(), b"old");
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("1_backup_") && name.ends_with(".mp3"), "{name}");
        assert!(logs_contain("moved aside"));
    }

    #[test]
    #[traced_test]
    fn stale_backup_that_cannot_be_removed_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "1.mp3", b"old");
        let now = chrono::Utc::now().timestamp();
        for secs in [now, now + 1] {
            std::fs::write(backup_path(&path, secs), b"stale").unwrap();
        }
        let fs = Faulty {
            remove: Some(io::ErrorKind::PermissionDenied),
            ..Faulty::default()
        };

        let outcome = clear_slot_with(&fs, &path);
        assert!(logs_contain("could not remove stale backup"));
        if cfg!(unix) {
            assert!(matches!(outcome, ClearOutcome::BackedUp(_)));
        }
    }

    #[test]
    fn occupant_that_cannot_move_is_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "1.mp3", b"old");
        let fs = Faulty {
            remove: Some(io::ErrorKind::PermissionDenied),
            rename: Some(io::ErrorKind::PermissionDenied),
            ..Faulty::default()
        };

        assert!(matches!(clear_slot_with(&fs, &path), ClearOutcome::Left(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
    }

    #[test]
    fn unmovable_occupant_is_overwritten_by_copy() {
        let dir = tempfile::tempdir().unwrap();
        let temp = touch(dir.path(), "temp.mp3", b"new");
        let target = touch(dir.path(), "1.mp3", b"old");
        let fs = Faulty {
            remove: Some(io::ErrorKind::PermissionDenied),
            rename: Some(io::ErrorKind::PermissionDenied),
            ..Faulty::default()
        };

        persist_with(&fs, &temp, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        // Removing the temp file was refused too; it is left behind.
        assert!(temp.exists());
    }

    #[test]
    fn failed_rename_falls_back_to_copy_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let temp = touch(dir.path(), "temp.mp3", b"new");
        let target = dir.path().join("1.mp3");
        let fs = Faulty {
            rename: Some(io::ErrorKind::CrossesDevices),
            ..Faulty::default()
        };

        persist_with(&fs, &temp, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!temp.exists());
    }

    #[test]
    fn failed_copy_keeps_temp_and_reports_persist_failure() {
        let dir = tempfile::tempdir().unwrap();
        let temp = touch(dir.path(), "temp.mp3", b"new");
        let target = dir.path().join("1.mp3");
        let fs = Faulty {
            rename: Some(io::ErrorKind::CrossesDevices),
            copy: Some(io::ErrorKind::StorageFull),
            ..Faulty::default()
        };

        let err = persist_with(&fs, &temp, &target).unwrap_err();
        assert!(matches!(err, ConvertError::PersistFailure { ref path, .. } if *path == target));
        assert_eq!(std::fs::read(&temp).unwrap(), b"new");
        assert!(!target.exists());
    }

    #[test]
    fn persist_without_temp_is_persist_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = persist(&dir.path().join("temp.mp3"), &dir.path().join("1.mp3")).unwrap_err();
        assert!(matches!(err, ConvertError::PersistFailure { .. }));
    }
}
