//! live_guard
//!
//! The Live-Repo Guard (C12, §4.12): snapshot the live repo's porcelain
//! status before any live-touching work, and recapture at a configured
//! checkpoint; any difference means something outside the patch/gates
//! contract mutated the live tree.

use std::path::Path;

use crate::core::config::LiveRepoGuardScope;
use crate::core::{Category, RunnerError, Stage};
use crate::git::ops::GitOps;
use crate::logging::Logger;

/// A `git status --porcelain` snapshot of the live repo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(Vec<String>);

/// Capture the live repo's current status.
pub fn snapshot(logger: &mut Logger, live_repo: &Path) -> Result<Snapshot, RunnerError> {
    let ops = GitOps::new(live_repo);
    Ok(Snapshot(ops.status_porcelain(logger)?))
}

/// Fail `SECURITY/LIVE_REPO_CHANGED` if `before` and `after` disagree.
pub fn assert_unchanged(before: &Snapshot, after: &Snapshot) -> Result<(), RunnerError> {
    if before == after {
        return Ok(());
    }
    let added: Vec<&String> = after.0.iter().filter(|l| !before.0.contains(l)).collect();
    let removed: Vec<&String> = before.0.iter().filter(|l| !after.0.contains(l)).collect();
    Err(RunnerError::new(
        Stage::Security,
        Category::LiveChanged,
        format!(
            "live repository changed unexpectedly (added: {:?}, removed: {:?})",
            added, removed
        ),
    ))
}

/// Whether the guard should recapture after gates, per the configured scope.
pub fn recapture_after_gates(scope: LiveRepoGuardScope) -> bool {
    matches!(scope, LiveRepoGuardScope::PatchAndGates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Level;
    use std::process::Command;

    fn init_repo() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().to_path_buf();
        Command::new("git").args(["init", "-q", "-b", "main"]).current_dir(&repo).output().unwrap();
        Command::new("git").args(["config", "user.email", "a@b.c"]).current_dir(&repo).output().unwrap();
        Command::new("git").args(["config", "user.name", "a"]).current_dir(&repo).output().unwrap();
        std::fs::write(repo.join("README.md"), "hi\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(&repo).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(&repo).output().unwrap();
        (dir, repo)
    }

    fn logger(dir: &Path) -> Logger {
        Logger::new(&dir.join("log.txt"), &dir.join("current_log"), Level::Quiet, Level::Quiet).unwrap()
    }

    #[test]
    fn unchanged_repo_passes() {
        let (dir, repo) = init_repo();
        let mut logger = logger(dir.path());
        let before = snapshot(&mut logger, &repo).unwrap();
        let after = snapshot(&mut logger, &repo).unwrap();
        assert!(assert_unchanged(&before, &after).is_ok());
    }

    #[test]
    fn drift_fails_live_changed() {
        let (dir, repo) = init_repo();
        let mut logger = logger(dir.path());
        let before = snapshot(&mut logger, &repo).unwrap();
        std::fs::write(repo.join("intruder.txt"), "oops\n").unwrap();
        let after = snapshot(&mut logger, &repo).unwrap();
        let err = assert_unchanged(&before, &after).unwrap_err();
        assert_eq!(err.category, Category::LiveChanged);
    }

    #[test]
    fn scope_controls_post_gate_recapture() {
        assert!(!recapture_after_gates(LiveRepoGuardScope::Patch));
        assert!(recapture_after_gates(LiveRepoGuardScope::PatchAndGates));
    }
}
