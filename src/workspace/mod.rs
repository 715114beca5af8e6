//! workspace
//!
//! The Workspace Manager (C7): create/reuse a per-issue clone of the live
//! repository, checkpoint it before patching, roll it back on failure, and
//! delete it when the policy calls for that. Grounded directly on the
//! original implementation's `workspace.py`.

pub mod state;

pub use state::IssueState;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{Category, RunnerError, Stage};
use crate::logging::Logger;

/// `workspaces/issue_<ID>/meta.json`: `{base_sha, attempt, message}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Meta {
    base_sha: String,
    attempt: u32,
    message: Option<String>,
}

fn read_meta(path: &Path) -> Meta {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn write_meta(path: &Path, meta: &Meta) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(meta).expect("Meta serializes");
    std::fs::write(path, json)
}

/// A live, on-disk workspace: its own clone, independent of the live repo's
/// `.git`, rooted at `workspaces/issue_<ID>/`.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub repo: PathBuf,
    pub meta_path: PathBuf,
    pub base_sha: String,
    pub attempt: u32,
    pub message: Option<String>,
}

impl Workspace {
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
    pub fn oldlogs_dir(&self) -> PathBuf {
        self.root.join("oldlogs")
    }
    pub fn patches_dir(&self) -> PathBuf {
        self.root.join("patches")
    }
    pub fn oldpatches_dir(&self) -> PathBuf {
        self.root.join("oldpatches")
    }
    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }
}

/// A pre-patch snapshot: `clean` needs only reset+clean to roll back;
/// `stash` must also reapply the preserved stash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkpoint {
    Clean,
    Stash { stash_ref: String },
}

fn git_logged(logger: &mut Logger, repo: &Path, args: &[&str]) -> crate::process::RunOutput {
    let argv: Vec<String> = std::iter::once("git".to_string())
        .chain(args.iter().map(|s| s.to_string()))
        .collect();
    logger.run_logged(&argv, Some(repo), &[])
}

/// Open a workspace that must already exist (used by finalize-workspace
/// mode, which never creates one).
pub fn open_existing(
    workspaces_dir: &Path,
    issue_id: &str,
    issue_dir_template: &str,
) -> Result<Workspace, RunnerError> {
    let ws_root = workspaces_dir.join(issue_dir_template.replace("{issue}", issue_id));
    let repo_dir = ws_root.join("repo");
    let meta_path = ws_root.join("meta.json");
    if !repo_dir.exists() {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::Other("WORKSPACE".to_string()),
            format!("workspace not found: {}", repo_dir.display()),
        ));
    }
    let meta = read_meta(&meta_path);
    Ok(Workspace {
        root: ws_root,
        repo: repo_dir,
        meta_path,
        base_sha: meta.base_sha,
        attempt: meta.attempt,
        message: meta.message,
    })
}

/// Create (first run) or reuse (subsequent runs) the per-issue workspace.
#[allow(clippy::too_many_arguments)]
pub fn ensure_workspace(
    logger: &mut Logger,
    workspaces_dir: &Path,
    issue_id: &str,
    live_repo: &Path,
    base_sha: &str,
    update: bool,
    soft_reset: bool,
    message: Option<&str>,
    issue_dir_template: &str,
) -> Result<Workspace, RunnerError> {
    let ws_root = workspaces_dir.join(issue_dir_template.replace("{issue}", issue_id));
    let repo_dir = ws_root.join("repo");
    let meta_path = ws_root.join("meta.json");

    for sub in ["logs", "oldlogs", "patches", "oldpatches"] {
        std::fs::create_dir_all(ws_root.join(sub)).ok();
    }

    let mut meta = read_meta(&meta_path);
    let attempt = meta.attempt + 1;

    let git_err = |stage: Stage, msg: &str| RunnerError::new(stage, Category::Git, msg);

    if !repo_dir.exists() {
        logger.section("WORKSPACE CREATE");
        logger.info_core(&format!("workspace=create issue={issue_id} base_sha={base_sha}"));
        std::fs::create_dir_all(&ws_root).map_err(|e| {
            RunnerError::new(Stage::Preflight, Category::Other("WORKSPACE".to_string()), e.to_string())
        })?;

        let argv = vec![
            "git".to_string(),
            "clone".to_string(),
            live_repo.to_string_lossy().into_owned(),
            repo_dir.to_string_lossy().into_owned(),
        ];
        if !logger.run_logged(&argv, None, &[]).ok() {
            return Err(git_err(Stage::Preflight, "git clone failed while creating workspace"));
        }
        if !git_logged(logger, &repo_dir, &["checkout", base_sha]).ok() {
            return Err(git_err(Stage::Preflight, &format!("git checkout {base_sha} failed in workspace")));
        }

        meta = Meta {
            base_sha: base_sha.to_string(),
            attempt,
            message: message.map(String::from),
        };
        write_meta(&meta_path, &meta).ok();
    } else {
        logger.section("WORKSPACE REUSE");
        logger.info_core(&format!("workspace=reuse issue={issue_id} base_sha={base_sha}"));
        let mut persisted = if meta.base_sha.is_empty() {
            base_sha.to_string()
        } else {
            meta.base_sha.clone()
        };

        if soft_reset {
            if !git_logged(logger, &repo_dir, &["reset", "--hard", &persisted]).ok() {
                return Err(git_err(Stage::Preflight, "workspace soft reset failed"));
            }
            if !git_logged(logger, &repo_dir, &["clean", "-fdx"]).ok() {
                return Err(git_err(Stage::Preflight, "workspace clean failed"));
            }
        }

        if update {
            if !git_logged(logger, &repo_dir, &["fetch", "--prune"]).ok() {
                return Err(git_err(Stage::Preflight, "workspace fetch failed"));
            }
            if !git_logged(logger, &repo_dir, &["reset", "--hard", base_sha]).ok() {
                return Err(git_err(Stage::Preflight, "workspace update reset failed"));
            }
            persisted = base_sha.to_string();
        }

        meta.base_sha = persisted;
        meta.attempt = attempt;
        write_meta(&meta_path, &meta).ok();
    }

    let meta = read_meta(&meta_path);
    Ok(Workspace {
        root: ws_root,
        repo: repo_dir,
        meta_path,
        base_sha: if meta.base_sha.is_empty() { base_sha.to_string() } else { meta.base_sha },
        attempt,
        message: meta.message,
    })
}

pub fn delete_workspace(logger: &mut Logger, ws: &Workspace) {
    logger.section("WORKSPACE DELETE");
    logger.info_core(&format!("workspace=delete root={}", ws.root.display()));
    let _ = std::fs::remove_dir_all(&ws.root);
}

/// Snapshot the workspace before patching: `clean` if there's nothing to
/// preserve, otherwise stash-and-reapply so the run starts from the same
/// tree it would roll back to.
pub fn create_checkpoint(
    logger: &mut Logger,
    repo: &Path,
    enabled: bool,
) -> Result<Option<Checkpoint>, RunnerError> {
    if !enabled {
        logger.section("WORKSPACE CHECKPOINT");
        logger.warning_core("checkpoint=SKIP (disabled)");
        return Ok(None);
    }

    logger.section("WORKSPACE CHECKPOINT");
    let status = git_logged(logger, repo, &["status", "--porcelain", "--untracked-files=all"]);
    if !status.ok() {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::Git,
            "failed to read workspace status for checkpoint",
        ));
    }
    if status.stdout.trim().is_empty() {
        logger.line("checkpoint=CLEAN (workspace clean; no stash)");
        logger.info_core("checkpoint=CLEAN");
        return Ok(Some(Checkpoint::Clean));
    }

    let marker = "am_patch_checkpoint";
    if !git_logged(logger, repo, &["stash", "push", "-u", "-m", marker]).ok() {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::Git,
            "failed to create workspace checkpoint (git stash push)",
        ));
    }

    let list = git_logged(logger, repo, &["stash", "list"]);
    if !list.ok() {
        return Err(RunnerError::new(Stage::Preflight, Category::Git, "failed to list workspace stashes"));
    }
    let stash_ref = list
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| line.contains(marker))
        .and_then(|line| line.split_once(':'))
        .map(|(ref_, _)| ref_.trim().to_string());

    let Some(stash_ref) = stash_ref else {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::Git,
            "workspace checkpoint stash not found after creation",
        ));
    };

    if !git_logged(logger, repo, &["stash", "apply", "--index", &stash_ref]).ok() {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::Git,
            "failed to re-apply workspace checkpoint stash",
        ));
    }

    logger.line(&format!("checkpoint_stash_ref={stash_ref}"));
    logger.info_core(&format!("checkpoint=STASH ref={stash_ref}"));
    Ok(Some(Checkpoint::Stash { stash_ref }))
}

pub fn drop_checkpoint(logger: &mut Logger, repo: &Path, ckpt: Option<&Checkpoint>) {
    if let Some(Checkpoint::Stash { stash_ref }) = ckpt {
        logger.section("WORKSPACE CHECKPOINT DROP");
        let _ = git_logged(logger, repo, &["stash", "drop", stash_ref]);
    }
}

pub fn rollback_to_checkpoint(
    logger: &mut Logger,
    repo: &Path,
    ckpt: Option<&Checkpoint>,
) -> Result<(), RunnerError> {
    let Some(ckpt) = ckpt else {
        logger.section("WORKSPACE ROLLBACK");
        logger.warning_core("rollback=SKIP (no checkpoint)");
        return Ok(());
    };

    logger.section("WORKSPACE ROLLBACK");
    let kind = match ckpt {
        Checkpoint::Clean => "clean",
        Checkpoint::Stash { .. } => "stash",
    };
    logger.info_core(&format!("rollback_kind={kind}"));

    if !git_logged(logger, repo, &["reset", "--hard"]).ok() {
        return Err(RunnerError::new(Stage::Rollback, Category::Git, "git reset --hard failed during rollback"));
    }
    if !git_logged(logger, repo, &["clean", "-fd"]).ok() {
        return Err(RunnerError::new(Stage::Rollback, Category::Git, "git clean -fd failed during rollback"));
    }

    if let Checkpoint::Stash { stash_ref } = ckpt {
        logger.line(&format!("rollback_to={stash_ref}"));
        if !git_logged(logger, repo, &["stash", "apply", "--index", stash_ref]).ok() {
            return Err(RunnerError::new(Stage::Rollback, Category::Git, "git stash apply failed during rollback"));
        }
        let _ = git_logged(logger, repo, &["stash", "drop", stash_ref]);
    } else {
        logger.line("rollback_to=CLEAN (reset+clean only)");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Level;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        Command::new("git").args(["init", "-q", "-b", "main"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.email", "a@b.c"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.name", "a"]).current_dir(dir).output().unwrap();
        std::fs::write(dir.join("f.txt"), "x\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir).output().unwrap();
    }

    fn head_sha(dir: &Path) -> String {
        String::from_utf8(
            Command::new("git").args(["rev-parse", "HEAD"]).current_dir(dir).output().unwrap().stdout,
        )
        .unwrap()
        .trim()
        .to_string()
    }

    fn logger(dir: &Path) -> Logger {
        Logger::new(&dir.join("log.txt"), &dir.join("current_log"), Level::Quiet, Level::Quiet).unwrap()
    }

    #[test]
    fn create_then_reuse_workspace() {
        let root = tempfile::tempdir().unwrap();
        let live = root.path().join("live");
        std::fs::create_dir_all(&live).unwrap();
        init_repo(&live);
        let sha = head_sha(&live);

        let workspaces_dir = root.path().join("patches").join("workspaces");
        let mut logger = logger(root.path());

        let ws = ensure_workspace(
            &mut logger, &workspaces_dir, "42", &live, &sha, false, false, Some("msg"), "issue_{issue}",
        )
        .unwrap();
        assert_eq!(ws.base_sha, sha);
        assert_eq!(ws.attempt, 1);
        assert!(ws.repo.join(".git").exists());

        let ws2 = ensure_workspace(
            &mut logger, &workspaces_dir, "42", &live, &sha, false, false, Some("msg"), "issue_{issue}",
        )
        .unwrap();
        assert_eq!(ws2.attempt, 2);
        assert_eq!(ws2.base_sha, sha);
    }

    #[test]
    fn open_existing_fails_when_absent() {
        let root = tempfile::tempdir().unwrap();
        let err = open_existing(&root.path().join("workspaces"), "1", "issue_{issue}").unwrap_err();
        assert_eq!(err.stage, Stage::Preflight);
    }

    #[test]
    fn checkpoint_on_clean_tree_is_clean_kind() {
        let root = tempfile::tempdir().unwrap();
        init_repo(root.path());
        let mut logger = logger(root.path());
        let ckpt = create_checkpoint(&mut logger, root.path(), true).unwrap();
        assert_eq!(ckpt, Some(Checkpoint::Clean));
    }

    #[test]
    fn checkpoint_disabled_returns_none() {
        let root = tempfile::tempdir().unwrap();
        init_repo(root.path());
        let mut logger = logger(root.path());
        assert_eq!(create_checkpoint(&mut logger, root.path(), false).unwrap(), None);
    }
}
