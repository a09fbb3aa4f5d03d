//! Filesystem helpers for the dispatch engine.

use crate::core::error::{Error, Result};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Allocate a fresh extraction directory named `<filepath>-<name>-<n>`.
///
/// `n` starts at `start` and is bumped until `mkdir` succeeds, which also
/// resolves creation races between workers. Returns the directory and the
/// counter value that won.
pub fn allocate_unpack_dir(file_path: &Path, name: &str, start: u64) -> Result<(PathBuf, u64)> {
    let mut counter = start;
    loop {
        let dir = PathBuf::from(format!("{}-{}-{}", file_path.display(), name, counter));
        match std::fs::create_dir(&dir) {
            Ok(()) => return Ok((dir, counter)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                counter += 1;
            }
            Err(e) => return Err(Error::DirectoryAccess { path: dir, source: e }),
        }
    }
}

/// Recursively remove a directory, restoring `u+rwx` on everything first.
///
/// Unpackers can leave read-only files and directories behind; an unreadable
/// directory cannot even be listed, so permissions are restored top-down
/// before removal. Symlinks are never chmod'ed: on platforms where chmod
/// follows the link that would alter the target.
pub fn remove_dir_forced(dir: &Path) {
    for entry in WalkDir::new(dir).into_iter().flatten() {
        if entry.path_is_symlink() {
            continue;
        }
        make_accessible(entry.path());
    }
    let _ = std::fs::remove_dir_all(dir);
}

#[cfg(unix)]
fn make_accessible(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = path.symlink_metadata() {
        let mut perms = meta.permissions();
        perms.set_mode(perms.mode() | 0o700);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn make_accessible(path: &Path) {
    if let Ok(meta) = path.symlink_metadata() {
        let mut perms = meta.permissions();
        perms.set_readonly(false);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_unpack_dir_bumps_counter() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("input.bin");
        std::fs::write(&file, b"data").unwrap();

        let (first, n1) = allocate_unpack_dir(&file, "gzip", 1).unwrap();
        assert!(first.ends_with("input.bin-gzip-1"));
        assert_eq!(n1, 1);

        let (second, n2) = allocate_unpack_dir(&file, "gzip", 1).unwrap();
        assert!(second.ends_with("input.bin-gzip-2"));
        assert_eq!(n2, 2);
    }

    #[test]
    #[cfg(unix)]
    fn test_remove_dir_forced_handles_readonly() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("attempt");
        let nested = target.join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("file"), b"x").unwrap();

        // Lock the tree down the way a hostile archive would.
        std::fs::set_permissions(nested.join("file"), std::fs::Permissions::from_mode(0o000))
            .unwrap();
        std::fs::set_permissions(&nested, std::fs::Permissions::from_mode(0o000)).unwrap();

        remove_dir_forced(&target);
        assert!(!target.exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_remove_dir_forced_leaves_symlink_targets_alone() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        std::fs::write(&outside, b"keep").unwrap();
        std::fs::set_permissions(&outside, std::fs::Permissions::from_mode(0o444)).unwrap();

        let target = dir.path().join("attempt");
        std::fs::create_dir(&target).unwrap();
        std::os::unix::fs::symlink(&outside, target.join("link")).unwrap();

        remove_dir_forced(&target);
        assert!(!target.exists());
        let mode = outside.metadata().unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o444);
    }
}
