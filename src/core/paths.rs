//! core::paths
//!
//! Deterministic path layout, per §4.6.
//!
//! ```text
//! <repo_root>/<patch_dir>/
//!   logs/<template>.log
//!   workspaces/issue_<ID>/
//!     repo/
//!     meta.json
//!     state.json
//!     logs/  oldlogs/
//!     patches/  oldpatches/
//!   successful/    unsuccessful/
//!   artifacts/
//!   am_patch.lock
//!   current_log
//! ```
//!
//! All paths are computed from [`crate::core::config::Policy`]; nothing here
//! reads the environment directly.

use std::path::{Path, PathBuf};

use crate::core::types::IssueId;

/// Centralized path routing for one run.
#[derive(Debug, Clone)]
pub struct Paths {
    pub repo_root: PathBuf,
    pub patch_dir: PathBuf,
}

impl Paths {
    pub fn new(repo_root: impl Into<PathBuf>, patch_dir_name: &str) -> Self {
        let repo_root = repo_root.into();
        let patch_dir = repo_root.join(patch_dir_name);
        Paths {
            repo_root,
            patch_dir,
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.patch_dir.join("logs")
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.patch_dir.join("workspaces")
    }

    pub fn successful_dir(&self) -> PathBuf {
        self.patch_dir.join("successful")
    }

    pub fn unsuccessful_dir(&self) -> PathBuf {
        self.patch_dir.join("unsuccessful")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.patch_dir.join("artifacts")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.patch_dir.join("am_patch.lock")
    }

    pub fn current_log_symlink(&self) -> PathBuf {
        self.patch_dir.join("current_log")
    }

    pub fn workspace_root(&self, issue: &IssueId, template: &str) -> PathBuf {
        self.workspaces_dir()
            .join(template.replace("{issue}", issue.as_str()))
    }

    /// Ensure every top-level directory in the layout exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            self.logs_dir(),
            self.workspaces_dir(),
            self.successful_dir(),
            self.unsuccessful_dir(),
            self.artifacts_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Is `candidate` contained within `ancestor` after lexical normalisation?
    pub fn is_under(ancestor: &Path, candidate: &Path) -> bool {
        let a = dunce_normalize(ancestor);
        let c = dunce_normalize(candidate);
        c.starts_with(&a)
    }
}

/// Normalise a path without requiring it to exist (no symlink resolution),
/// used for patch-root containment checks (§4.8) where the candidate may
/// not exist yet.
fn dunce_normalize(p: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Filename templates controlled by Policy, per §4.6.
#[derive(Debug, Clone)]
pub struct Templates {
    pub log_issue: String,
    pub log_finalize: String,
    pub success_archive: String,
    pub issue_dir: String,
}

impl Default for Templates {
    fn default() -> Self {
        Templates {
            log_issue: "am_patch_issue_{issue}_{ts}.log".to_string(),
            log_finalize: "am_patch_finalize_{ts}.log".to_string(),
            success_archive: "{repo}-{branch}.zip".to_string(),
            issue_dir: "issue_{issue}".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_at_patch_dir() {
        let paths = Paths::new("/repo", "patches");
        assert_eq!(paths.patch_dir, PathBuf::from("/repo/patches"));
        assert_eq!(paths.logs_dir(), PathBuf::from("/repo/patches/logs"));
        assert_eq!(paths.lock_path(), PathBuf::from("/repo/patches/am_patch.lock"));
    }

    #[test]
    fn is_under_rejects_traversal() {
        let root = Path::new("/repo/patches");
        assert!(Paths::is_under(root, Path::new("/repo/patches/issue_1.py")));
        assert!(!Paths::is_under(root, Path::new("/repo/patches/../secrets")));
    }
}
