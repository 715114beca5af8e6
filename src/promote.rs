//! promote
//!
//! The Promoter (C13, §4.13): copy files from a workspace back into the
//! live repository, resolving conflicts with files the live repo grew on
//! its own since the workspace was cut.

use std::path::Path;

use crate::core::config::LiveChangedResolution;
use crate::core::{Category, RunnerError, Stage};
use crate::git::ops::GitOps;
use crate::logging::Logger;

/// A file's disposition during promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteAction {
    Copy,
    Delete,
}

#[derive(Debug, Clone)]
pub struct PromotePlan {
    pub actions: Vec<(String, PromoteAction)>,
    pub dropped_live_changed: Vec<String>,
}

/// Resolve which files actually get promoted, applying the live-changed
/// policy. `workspace_present` tells us copy-vs-delete per path.
pub fn plan_promotion(
    logger: &mut Logger,
    live_repo: &Path,
    base_sha: &str,
    files_to_promote: &[String],
    workspace_present: impl Fn(&str) -> bool,
    resolution: LiveChangedResolution,
) -> Result<PromotePlan, RunnerError> {
    let ops = GitOps::new(live_repo);
    let files = files_to_promote.to_vec();
    let live_changed = ops.files_changed_since(logger, base_sha, &files);

    if !live_changed.is_empty() && matches!(resolution, LiveChangedResolution::Fail) {
        return Err(RunnerError::new(
            Stage::Promotion,
            Category::LiveChanged,
            format!(
                "live-changed since workspace base: {}",
                live_changed.join(", ")
            ),
        ));
    }

    let drop: Vec<String> = if matches!(resolution, LiveChangedResolution::OverwriteWorkspace) {
        live_changed.clone()
    } else {
        Vec::new()
    };

    let actions = files
        .iter()
        .filter(|f| !drop.contains(f))
        .map(|f| {
            let action = if workspace_present(f) {
                PromoteAction::Copy
            } else {
                PromoteAction::Delete
            };
            (f.clone(), action)
        })
        .collect();

    Ok(PromotePlan {
        actions,
        dropped_live_changed: drop,
    })
}

/// Apply a [`PromotePlan`]: copy/delete files between `workspace_repo` and
/// `live_repo`, preserving mode bits, then stage the result in the live
/// repo.
pub fn apply_promotion(
    logger: &mut Logger,
    workspace_repo: &Path,
    live_repo: &Path,
    plan: &PromotePlan,
) -> Result<(), RunnerError> {
    for (rel, action) in &plan.actions {
        let live_path = live_repo.join(rel);
        match action {
            PromoteAction::Copy => {
                let src = workspace_repo.join(rel);
                if let Some(parent) = live_path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RunnerError::new(Stage::Promotion, Category::Internal, format!("mkdir {rel}: {e}"))
                    })?;
                }
                std::fs::copy(&src, &live_path).map_err(|e| {
                    RunnerError::new(Stage::Promotion, Category::Internal, format!("copy {rel}: {e}"))
                })?;
                copy_permissions(&src, &live_path);
            }
            PromoteAction::Delete => {
                if live_path.exists() {
                    std::fs::remove_file(&live_path).map_err(|e| {
                        RunnerError::new(Stage::Promotion, Category::Internal, format!("delete {rel}: {e}"))
                    })?;
                }
            }
        }
    }

    if plan.actions.is_empty() {
        return Ok(());
    }

    let ops = GitOps::new(live_repo);
    let mut argv = vec!["git".to_string(), "add".to_string(), "--".to_string()];
    argv.extend(plan.actions.iter().map(|(f, _)| f.clone()));
    let r = logger.run_logged(&argv, Some(live_repo), &[]);
    if !r.ok() {
        return Err(RunnerError::new(
            Stage::Promotion,
            Category::Git,
            format!("git add failed (rc={})", r.returncode),
        ));
    }
    let _ = ops;
    Ok(())
}

#[cfg(unix)]
fn copy_permissions(src: &Path, dst: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(src) {
        let _ = std::fs::set_permissions(dst, std::fs::Permissions::from_mode(meta.permissions().mode()));
    }
}

#[cfg(not(unix))]
fn copy_permissions(_src: &Path, _dst: &Path) {}
