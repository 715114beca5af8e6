//! archive
//!
//! The Archiver (C15, §4.15): deterministic success, failure, and diff-bundle
//! zips, always written atomically (tempfile + fsync + rename) and
//! version-bumped rather than overwritten if the target already exists.

use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::ZipWriter;

use crate::core::fsutil::{fsync_file, tmp_path_for_atomic_write, version_bumped};
use crate::core::{Category, RunnerError, Stage};
use crate::git::ops::GitOps;
use crate::logging::Logger;

fn finalize_atomic(tmp: &Path, target: &Path) -> Result<PathBuf, RunnerError> {
    fsync_file(tmp).map_err(|e| RunnerError::new(Stage::Archive, Category::Internal, format!("fsync: {e}")))?;
    let out = version_bumped(target);
    std::fs::rename(tmp, &out).map_err(|e| {
        RunnerError::new(Stage::Archive, Category::Internal, format!("rename to {}: {e}", out.display()))
    })?;
    Ok(out)
}

/// `git archive HEAD` (or `treeish`) of `repo`, written to a version-bumped
/// sibling of `target` if `target` already exists.
pub fn write_success_archive(
    logger: &mut Logger,
    repo: &Path,
    treeish: &str,
    target: &Path,
) -> Result<PathBuf, RunnerError> {
    let out = version_bumped(target);
    let ops = GitOps::new(repo);
    ops.git_archive(logger, &out, treeish)?;
    Ok(out)
}

fn add_file(zip: &mut ZipWriter<std::fs::File>, name: &str, data: &[u8], opts: FileOptions) -> std::io::Result<()> {
    zip.start_file(name, opts)?;
    zip.write_all(data)
}

/// `workspace/<paths>`, `logs/<...>`, `patches/<name>` for a failed run.
/// When there's nothing worth archiving, writes a deterministic `README.txt`
/// explaining why, per §4.15.
pub fn write_failure_archive(
    workspace_repo: Option<&Path>,
    logs: &[PathBuf],
    patch_blobs: &[(String, Vec<u8>)],
    target: &Path,
) -> Result<PathBuf, RunnerError> {
    let out = version_bumped(target);
    let tmp = tmp_path_for_atomic_write(&out);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            RunnerError::new(Stage::Archive, Category::Internal, format!("mkdir: {e}"))
        })?;
    }

    let file = std::fs::File::create(&tmp)
        .map_err(|e| RunnerError::new(Stage::Archive, Category::Internal, format!("create {}: {e}", tmp.display())))?;
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default();
    let mut wrote_anything = false;

    if let Some(ws) = workspace_repo.filter(|p| p.exists()) {
        for entry in WalkDir::new(ws).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(ws).unwrap_or(entry.path());
            let rel_str = rel.to_string_lossy();
            if rel_str.starts_with(".git/") || rel_str.starts_with(".am_patch/") {
                continue;
            }
            if let Ok(data) = std::fs::read(entry.path()) {
                let name = format!("workspace/{rel_str}");
                add_file(&mut zip, &name, &data, opts).map_err(|e| {
                    RunnerError::new(Stage::Archive, Category::Internal, format!("zip write {name}: {e}"))
                })?;
                wrote_anything = true;
            }
        }
    }

    for log_path in logs {
        if let Ok(data) = std::fs::read(log_path) {
            let name = format!("logs/{}", log_path.file_name().unwrap_or_default().to_string_lossy());
            add_file(&mut zip, &name, &data, opts).map_err(|e| {
                RunnerError::new(Stage::Archive, Category::Internal, format!("zip write {name}: {e}"))
            })?;
            wrote_anything = true;
        }
    }

    for (name, data) in patch_blobs {
        let entry_name = format!("patches/{name}");
        add_file(&mut zip, &entry_name, data, opts).map_err(|e| {
            RunnerError::new(Stage::Archive, Category::Internal, format!("zip write {entry_name}: {e}"))
        })?;
        wrote_anything = true;
    }

    if !wrote_anything {
        let readme = b"no workspace, logs, or patch content were available to archive for this failure.\n";
        add_file(&mut zip, "README.txt", readme, opts).map_err(|e| {
            RunnerError::new(Stage::Archive, Category::Internal, format!("zip write README.txt: {e}"))
        })?;
    }

    zip.finish().map_err(|e| RunnerError::new(Stage::Archive, Category::Internal, format!("zip finish: {e}")))?;
    finalize_atomic(&tmp, &out)
}

/// `diff/<path>.patch` per promoted path, all issue logs under `logs/`, and
/// a manifest listing `base_sha`, promoted paths, and the logs included.
pub fn write_diff_bundle(
    logger: &mut Logger,
    live_repo: &Path,
    base_sha: &str,
    promoted_paths: &[String],
    logs: &[PathBuf],
    target: &Path,
) -> Result<PathBuf, RunnerError> {
    let out = version_bumped(target);
    let tmp = tmp_path_for_atomic_write(&out);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            RunnerError::new(Stage::Archive, Category::Internal, format!("mkdir: {e}"))
        })?;
    }

    let file = std::fs::File::create(&tmp)
        .map_err(|e| RunnerError::new(Stage::Archive, Category::Internal, format!("create {}: {e}", tmp.display())))?;
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default();

    let ops = GitOps::new(live_repo);
    let mut manifest = String::new();
    manifest.push_str(&format!("base_sha={base_sha}\n"));
    manifest.push_str(&format!("promoted_paths={}\n", promoted_paths.join(",")));

    for path in promoted_paths {
        let diff_text = ops.unified_diff_since(logger, base_sha, path)?;
        let entry_name = format!("diff/{path}.patch");
        add_file(&mut zip, &entry_name, diff_text.as_bytes(), opts).map_err(|e| {
            RunnerError::new(Stage::Archive, Category::Internal, format!("zip write {entry_name}: {e}"))
        })?;
    }

    let mut log_names = Vec::new();
    for log_path in logs {
        if let Ok(data) = std::fs::read(log_path) {
            let name = log_path.file_name().unwrap_or_default().to_string_lossy().into_owned();
            let entry_name = format!("logs/{name}");
            add_file(&mut zip, &entry_name, &data, opts).map_err(|e| {
                RunnerError::new(Stage::Archive, Category::Internal, format!("zip write {entry_name}: {e}"))
            })?;
            log_names.push(name);
        }
    }
    manifest.push_str(&format!("logs={}\n", log_names.join(",")));

    add_file(&mut zip, "manifest.txt", manifest.as_bytes(), opts).map_err(|e| {
        RunnerError::new(Stage::Archive, Category::Internal, format!("zip write manifest.txt: {e}"))
    })?;

    zip.finish().map_err(|e| RunnerError::new(Stage::Archive, Category::Internal, format!("zip finish: {e}")))?;
    finalize_atomic(&tmp, &out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_zip_names(path: &Path) -> Vec<String> {
        let file = std::fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn failure_archive_writes_readme_when_nothing_to_archive() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("issue_1_attempt1_failure.zip");
        let out = write_failure_archive(None, &[], &[], &target).unwrap();
        assert_eq!(read_zip_names(&out), vec!["README.txt".to_string()]);
    }

    #[test]
    fn failure_archive_bundles_patch_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("issue_1_attempt1_failure.zip");
        let blobs = vec![("issue_1.patch".to_string(), b"diff --git a/x b/x\n".to_vec())];
        let out = write_failure_archive(None, &[], &blobs, &target).unwrap();
        assert_eq!(read_zip_names(&out), vec!["patches/issue_1.patch".to_string()]);
    }

    #[test]
    fn version_bumps_instead_of_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("issue_1_attempt1_failure.zip");
        write_failure_archive(None, &[], &[], &target).unwrap();
        let second = write_failure_archive(None, &[], &[], &target).unwrap();
        assert_eq!(second.file_name().unwrap().to_string_lossy(), "issue_1_attempt1_failure_v2.zip");
    }
}
