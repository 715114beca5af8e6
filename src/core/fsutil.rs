//! core::fsutil
//!
//! Shared atomic-write helpers used by the Git Operations facade and the
//! Archiver (§5: "failure and success archives are written with tempfile +
//! fsync + atomic rename to prevent torn files; existing archives are
//! version-bumped rather than overwritten").

use std::fs::File;
use std::path::{Path, PathBuf};

/// A `.tmp`-suffixed sibling path to write into before an atomic rename.
pub fn tmp_path_for_atomic_write(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    target.with_file_name(name)
}

pub fn fsync_file(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// If `target` already exists, find the first unused `<stem>_vN<ext>` name
/// alongside it; otherwise return `target` unchanged.
pub fn version_bumped(target: &Path) -> PathBuf {
    if !target.exists() {
        return target.to_path_buf();
    }
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = target.extension().map(|e| e.to_string_lossy().into_owned());
    let parent = target.parent().unwrap_or_else(|| Path::new("."));

    let mut n = 2;
    loop {
        let name = match &ext {
            Some(ext) => format!("{stem}_v{n}.{ext}"),
            None => format!("{stem}_v{n}"),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_path_suffixes_filename() {
        let p = tmp_path_for_atomic_write(Path::new("/a/b/out.zip"));
        assert_eq!(p, PathBuf::from("/a/b/out.zip.tmp"));
    }

    #[test]
    fn version_bump_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("issue_1_diff.zip");
        std::fs::write(&target, b"x").unwrap();
        let bumped = version_bumped(&target);
        assert_eq!(bumped, dir.path().join("issue_1_diff_v2.zip"));

        std::fs::write(&bumped, b"x").unwrap();
        let bumped2 = version_bumped(&target);
        assert_eq!(bumped2, dir.path().join("issue_1_diff_v3.zip"));
    }

    #[test]
    fn version_bump_noop_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fresh.zip");
        assert_eq!(version_bumped(&target), target);
    }
}
