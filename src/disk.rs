//! Disk Filler: exhaust free space in a directory

use crate::command::{Executor, Mode, FILL_DIRECTORY};
use crate::error::{KaboomError, Result};
use std::path::Path;

/// Fill `path` (or `path/subpath`) with zeroes until the filesystem is full.
///
/// No command is built unless the target is an existing, writable directory.
pub fn fill(executor: &mut Executor<'_>, path: &Path, subpath: Option<&str>) -> Result<()> {
    let target = match subpath {
        Some(sub) => path.join(sub),
        None => path.to_path_buf(),
    };

    if !is_writable_dir(&target) {
        return Err(KaboomError::NotWritableDirectory(target));
    }

    executor.build_and_run(&FILL_DIRECTORY, &target, None, Mode::Foreground)
}

#[cfg(unix)]
fn is_writable_dir(path: &Path) -> bool {
    use nix::unistd::{access, AccessFlags};
    path.is_dir() && access(path, AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
fn is_writable_dir(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_dir() && !meta.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::launcher::RecordingLauncher;
    use crate::reporter::MemoryReporter;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_fill_announces_dd_into_subdirectory() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("pg_wal")).unwrap();

        let launcher = RecordingLauncher::new();
        let mut reporter = MemoryReporter::new();
        {
            let mut executor = Executor::new(&launcher, &mut reporter, false);
            fill(&mut executor, temp.path(), Some("pg_wal")).unwrap();
        }

        let expected = format!(
            "(dry-run) /bin/dd if=/dev/zero of={}/pg_wal/pg_kaboom.fill bs=1M",
            temp.path().display()
        );
        assert_eq!(reporter.messages(), vec![expected.as_str()]);
        assert!(launcher.launched().is_empty());
    }

    #[test]
    fn test_fill_runs_in_foreground_when_executing() {
        let temp = TempDir::new().unwrap();
        let launcher = RecordingLauncher::new();
        let mut reporter = MemoryReporter::new();
        {
            let mut executor = Executor::new(&launcher, &mut reporter, true);
            fill(&mut executor, temp.path(), None).unwrap();
        }
        assert_eq!(launcher.launched().len(), 1);
        assert_eq!(launcher.launched()[0].1, Mode::Foreground);
    }

    #[test]
    fn test_missing_and_non_directory_targets_rejected() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain");
        fs::write(&file, b"x").unwrap();

        let launcher = RecordingLauncher::new();
        let mut reporter = MemoryReporter::new();
        {
            let mut executor = Executor::new(&launcher, &mut reporter, true);
            let err = fill(&mut executor, temp.path(), Some("does-not-exist")).unwrap_err();
            assert!(matches!(err, KaboomError::NotWritableDirectory(_)));
            let err = fill(&mut executor, &file, None).unwrap_err();
            assert!(matches!(err, KaboomError::NotWritableDirectory(_)));
        }
        assert!(reporter.notices.is_empty());
        assert!(launcher.launched().is_empty());
    }

    #[test]
    fn test_read_only_directory_rejected() {
        if nix::unistd::geteuid().is_root() {
            // root passes access(W_OK) everywhere
            return;
        }
        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        let launcher = RecordingLauncher::new();
        let mut reporter = MemoryReporter::new();
        let mut executor = Executor::new(&launcher, &mut reporter, true);
        let err = fill(&mut executor, &locked, None).unwrap_err();
        assert!(matches!(err, KaboomError::NotWritableDirectory(_)));

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
