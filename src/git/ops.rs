//! git::ops
//!
//! Typed, logged wrappers over the `git` binary, grounded directly on
//! the original implementation's `git_ops.py`.

use std::path::Path;

use crate::core::fsutil::{fsync_dir, fsync_file, tmp_path_for_atomic_write};
use crate::core::{Category, RunnerError, Stage};
use crate::logging::Logger;

/// A file's status and path from `git show --name-status`, normalised to
/// `A`/`M`/`D` (renames and copies are expanded into a delete+add pair).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameStatus {
    pub status: char,
    pub path: String,
}

/// Stateless facade bundling the repo path; every call is logged via the
/// caller's [`Logger`].
pub struct GitOps<'a> {
    pub repo: &'a Path,
}

impl<'a> GitOps<'a> {
    pub fn new(repo: &'a Path) -> Self {
        GitOps { repo }
    }

    fn git(&self, logger: &mut Logger, args: &[&str]) -> Result<String, RunnerError> {
        let argv: Vec<String> = std::iter::once("git".to_string())
            .chain(args.iter().map(|s| s.to_string()))
            .collect();
        let r = logger.run_logged(&argv, Some(self.repo), &[]);
        if !r.ok() {
            return Err(RunnerError::new(
                Stage::Preflight,
                Category::Git,
                format!("git {} failed (rc={})", args.join(" "), r.returncode),
            ));
        }
        Ok(r.stdout.trim().to_string())
    }

    pub fn fetch(&self, logger: &mut Logger) -> Result<(), RunnerError> {
        self.git(logger, &["fetch", "--prune"])?;
        Ok(())
    }

    pub fn current_branch(&self, logger: &mut Logger) -> Result<String, RunnerError> {
        self.git(logger, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn head_sha(&self, logger: &mut Logger) -> Result<String, RunnerError> {
        self.git(logger, &["rev-parse", "HEAD"])
    }

    pub fn origin_ahead_count(&self, logger: &mut Logger, branch: &str) -> Result<u64, RunnerError> {
        let spec = format!("{branch}..origin/{branch}");
        let out = self.git(logger, &["rev-list", "--count", &spec])?;
        out.parse().map_err(|_| {
            RunnerError::new(
                Stage::Preflight,
                Category::Git,
                format!("unexpected rev-list output: {out:?}"),
            )
        })
    }

    pub fn require_branch(&self, logger: &mut Logger, branch: &str) -> Result<(), RunnerError> {
        let current = self.current_branch(logger)?;
        if current != branch {
            return Err(RunnerError::new(
                Stage::Preflight,
                Category::Git,
                format!("must be on branch {branch}, but is {current}"),
            ));
        }
        Ok(())
    }

    pub fn require_up_to_date(&self, logger: &mut Logger, branch: &str) -> Result<(), RunnerError> {
        let ahead = self.origin_ahead_count(logger, branch)?;
        if ahead > 0 {
            return Err(RunnerError::new(
                Stage::Preflight,
                Category::Git,
                format!("origin/{branch} is ahead by {ahead} commits"),
            ));
        }
        Ok(())
    }

    pub fn file_diff_since(
        &self,
        logger: &mut Logger,
        base_sha: &str,
        paths: &[String],
    ) -> Result<Vec<String>, RunnerError> {
        let spec = format!("{base_sha}..HEAD");
        let mut args = vec!["diff", "--name-only", &spec, "--"];
        args.extend(paths.iter().map(|s| s.as_str()));
        let out = self.git(logger, &args).map_err(|e| {
            RunnerError::new(Stage::Promotion, Category::Git, e.message)
        })?;
        Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    pub fn unified_diff_since(
        &self,
        logger: &mut Logger,
        base_sha: &str,
        rel_path: &str,
    ) -> Result<String, RunnerError> {
        let spec = format!("{base_sha}..HEAD");
        let argv = vec![
            "git".to_string(),
            "diff".to_string(),
            "--no-color".to_string(),
            spec,
            "--".to_string(),
            rel_path.to_string(),
        ];
        let r = logger.run_logged(&argv, Some(self.repo), &[]);
        if !r.ok() {
            return Err(RunnerError::new(
                Stage::Promotion,
                Category::Git,
                format!("git diff failed (rc={})", r.returncode),
            ));
        }
        Ok(r.stdout)
    }

    /// Stage everything (or commit whatever is already staged) and commit.
    pub fn commit(
        &self,
        logger: &mut Logger,
        message: &str,
        stage_all: bool,
    ) -> Result<String, RunnerError> {
        if stage_all {
            let status = self.git(logger, &["status", "--porcelain"]).map_err(|e| {
                RunnerError::new(Stage::Promotion, Category::Git, e.message)
            })?;
            if status.trim().is_empty() {
                return Err(RunnerError::new(
                    Stage::Promotion,
                    Category::Noop,
                    "no changes to commit",
                ));
            }
            self.git(logger, &["add", "-A"]).map_err(|e| {
                RunnerError::new(Stage::Promotion, Category::Git, e.message)
            })?;
        } else {
            let staged = self.git(logger, &["diff", "--cached", "--name-only"]).map_err(|e| {
                RunnerError::new(Stage::Promotion, Category::Git, e.message)
            })?;
            if staged.trim().is_empty() {
                return Err(RunnerError::new(
                    Stage::Promotion,
                    Category::Noop,
                    "no staged changes to commit",
                ));
            }
        }

        self.git(logger, &["commit", "-m", message]).map_err(|e| {
            RunnerError::new(Stage::Promotion, Category::Git, e.message)
        })?;
        self.head_sha(logger)
    }

    /// Push; on failure either returns `Ok(false)` (if `allow_fail`) or a
    /// `RunnerError`.
    pub fn push(&self, logger: &mut Logger, branch: &str, allow_fail: bool) -> Result<bool, RunnerError> {
        let argv = vec!["git".to_string(), "push".to_string(), "origin".to_string(), branch.to_string()];
        let r = logger.run_logged(&argv, Some(self.repo), &[]);
        if r.ok() {
            return Ok(true);
        }
        if allow_fail {
            logger.warning_core("git_push=FAIL (allowed); local commit remains");
            return Ok(false);
        }
        Err(RunnerError::new(Stage::Promotion, Category::Git, "git push failed"))
    }

    pub fn files_changed_since(
        &self,
        logger: &mut Logger,
        base_sha: &str,
        files: &[String],
    ) -> Vec<String> {
        let mut changed = Vec::new();
        for f in files {
            let spec = format!("{base_sha}..HEAD");
            if let Ok(out) = self.git(logger, &["diff", "--name-only", &spec, "--", f]) {
                if !out.trim().is_empty() {
                    changed.push(f.clone());
                }
            }
        }
        changed
    }

    /// `git archive HEAD` (or `treeish`) written atomically to `out_zip`.
    pub fn git_archive(
        &self,
        logger: &mut Logger,
        out_zip: &Path,
        treeish: &str,
    ) -> Result<(), RunnerError> {
        if let Some(parent) = out_zip.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let tmp_path = tmp_path_for_atomic_write(out_zip);
        let _ = std::fs::remove_file(&tmp_path);

        let argv = vec![
            "git".to_string(),
            "archive".to_string(),
            "--format=zip".to_string(),
            "-o".to_string(),
            tmp_path.to_string_lossy().into_owned(),
            treeish.to_string(),
        ];
        let r = logger.run_logged(&argv, Some(self.repo), &[]);
        let result = if !r.ok() {
            Err(RunnerError::new(
                Stage::Archive,
                Category::Git,
                format!("git archive failed (rc={})", r.returncode),
            ))
        } else {
            fsync_file(&tmp_path).map_err(|e| {
                RunnerError::new(Stage::Archive, Category::Git, format!("fsync failed: {e}"))
            })
            .and_then(|()| {
                std::fs::rename(&tmp_path, out_zip).map_err(|e| {
                    RunnerError::new(Stage::Archive, Category::Git, format!("rename failed: {e}"))
                })
            })
            .and_then(|()| {
                if let Some(parent) = out_zip.parent() {
                    let _ = fsync_dir(parent);
                }
                Ok(())
            })
        };

        let _ = std::fs::remove_file(&tmp_path);
        result
    }

    /// `git show --name-status` for one commit, normalised to `(status, path)`
    /// pairs with renames/copies expanded per the original's contract.
    pub fn commit_changed_files_name_status(
        &self,
        logger: &mut Logger,
        commit_sha: &str,
    ) -> Result<Vec<NameStatus>, RunnerError> {
        let argv = vec![
            "git".to_string(),
            "show".to_string(),
            "--name-status".to_string(),
            "--pretty=format:".to_string(),
            commit_sha.to_string(),
        ];
        let r = logger.run_logged(&argv, Some(self.repo), &[]);
        if !r.ok() {
            return Err(RunnerError::new(
                Stage::Promotion,
                Category::Git,
                format!("git show name-status failed (rc={})", r.returncode),
            ));
        }

        let mut out = Vec::new();
        for raw in r.stdout.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            let status = parts[0].trim();
            if status.is_empty() {
                continue;
            }

            if matches!(status, "A" | "M" | "D") {
                if let Some(path) = parts.get(1) {
                    if !path.trim().is_empty() {
                        out.push(NameStatus {
                            status: status.chars().next().unwrap(),
                            path: path.trim().to_string(),
                        });
                    }
                }
                continue;
            }

            if let Some(rest) = status.strip_prefix('R') {
                let _ = rest;
                if parts.len() >= 3 {
                    let old = parts[1].trim();
                    let new = parts[2].trim();
                    if !old.is_empty() {
                        out.push(NameStatus { status: 'D', path: old.to_string() });
                    }
                    if !new.is_empty() {
                        out.push(NameStatus { status: 'A', path: new.to_string() });
                    }
                }
                continue;
            }

            if status.starts_with('C') && parts.len() >= 3 {
                let new = parts[2].trim();
                if !new.is_empty() {
                    out.push(NameStatus { status: 'A', path: new.to_string() });
                }
                continue;
            }

            if let Some(last) = parts.last() {
                if !last.trim().is_empty() {
                    out.push(NameStatus { status: 'M', path: last.trim().to_string() });
                }
            }
        }

        Ok(out)
    }

    /// Sorted porcelain output, used by the live-repo guard (§4.12).
    pub fn status_porcelain(&self, logger: &mut Logger) -> Result<Vec<String>, RunnerError> {
        let out = self.git(logger, &["status", "--porcelain"]).map_err(|e| {
            RunnerError::new(Stage::Security, Category::Git, e.message)
        })?;
        let mut lines: Vec<String> = out.lines().map(str::to_string).collect();
        lines.sort();
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{Level, Logger};
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
        Logger::new(
            &dir.join("log.txt"),
            &dir.join("current_log"),
            Level::Quiet,
            Level::Quiet,
        )
        .unwrap()
    }

    #[test]
    fn current_branch_and_head_sha() {
        let (dir, repo) = init_repo();
        let ops = GitOps::new(&repo);
        let mut logger = logger(dir.path());
        assert_eq!(ops.current_branch(&mut logger).unwrap(), "main");
        assert_eq!(ops.head_sha(&mut logger).unwrap().len(), 40);
    }

    #[test]
    fn commit_with_nothing_staged_is_noop_error() {
        let (dir, repo) = init_repo();
        let ops = GitOps::new(&repo);
        let mut logger = logger(dir.path());
        let err = ops.commit(&mut logger, "msg", true).unwrap_err();
        assert_eq!(err.category, Category::Noop);
    }

    #[test]
    fn commit_stages_and_returns_new_sha() {
        let (dir, repo) = init_repo();
        let ops = GitOps::new(&repo);
        let mut logger = logger(dir.path());
        std::fs::write(repo.join("x.txt"), "content\n").unwrap();
        let sha = ops.commit(&mut logger, "add x", true).unwrap();
        assert_eq!(sha.len(), 40);

        let changes = ops.commit_changed_files_name_status(&mut logger, &sha).unwrap();
        assert_eq!(changes, vec![NameStatus { status: 'A', path: "x.txt".to_string() }]);
    }
}
