//! engine::runner
//!
//! Phase-by-phase execution: threads the Logger, RunLock, Workspace, and
//! every collaborator module together into one run, tracking the primary
//! failure (if any) separately from diagnostic secondary failures, and
//! deferring rollback until after a failure archive has been written
//! (§4.16, §7).

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::archive;
use crate::cli::ParsedArgs;
use crate::core::config::{LiveChangedResolution, Policy, ResolvedPolicy, RollbackPolicy};
use crate::core::ops::lock::{LockConflictPolicy, RunLock};
use crate::core::paths::Paths;
use crate::core::types::{Category, IssueId, Phase, RunMode, RunnerError, Stage};
use crate::gates;
use crate::git::ops::GitOps;
use crate::live_guard;
use crate::logging::event::{Event, EventSink};
use crate::logging::{Level, Logger};
use crate::patch;
use crate::promote;
use crate::scope;
use crate::workspace::{self, IssueState, Workspace};

use super::plan;

/// What the final `RESULT:`/`STAGE:`/`REASON:` surface needs (§7).
#[derive(Debug, Clone, Default)]
pub struct FinalSummary {
    pub ok: bool,
    pub stages: Vec<String>,
    pub reason: Option<String>,
    pub commit_sha: Option<String>,
    pub pushed: Option<bool>,
    pub committed_files: Vec<(char, String)>,
    pub log_path: PathBuf,
    pub exit_code: i32,
}

impl FinalSummary {
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.ok {
            lines.push("RESULT: SUCCESS".to_string());
            for (status, path) in &self.committed_files {
                lines.push(format!("{status} {path}"));
            }
            if let Some(sha) = &self.commit_sha {
                lines.push(format!("COMMIT: {sha}"));
            }
            if let Some(pushed) = self.pushed {
                lines.push(format!("PUSH: {}", if pushed { "OK" } else { "FAIL" }));
            }
        } else {
            lines.push("RESULT: FAIL".to_string());
            lines.push(format!("STAGE: {}", self.stages.join(",")));
            if let Some(reason) = &self.reason {
                lines.push(format!("REASON: {reason}"));
            }
        }
        lines.push(format!("LOG: {}", self.log_path.display()));
        lines
    }
}

fn ts_now() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

fn level_or(opt: &Option<String>, default: Level) -> Level {
    opt.as_deref().map(Level::parse).unwrap_or(default)
}

/// Parse `git status --porcelain` lines to the set of repo-relative paths
/// they report, following a rename's arrow to its destination.
fn touched_from_porcelain(lines: &[String]) -> BTreeSet<String> {
    lines
        .iter()
        .filter_map(|line| {
            let rest = line.get(3..)?;
            let path = rest.split(" -> ").last().unwrap_or(rest);
            let path = path.trim().trim_matches('"');
            if path.is_empty() {
                None
            } else {
                Some(path.to_string())
            }
        })
        .collect()
}

fn render_template(template: &str, issue: Option<&str>, attempt: Option<u32>, repo: Option<&str>, branch: Option<&str>) -> String {
    let mut s = template.to_string();
    if let Some(issue) = issue {
        s = s.replace("{issue}", issue);
    }
    if let Some(attempt) = attempt {
        s = s.replace("{attempt}", &attempt.to_string());
    }
    if let Some(repo) = repo {
        s = s.replace("{repo}", repo);
    }
    if let Some(branch) = branch {
        s = s.replace("{branch}", branch);
    }
    s
}

/// Orchestrate one invocation end to end: acquire the lock, build the
/// logger, dispatch to the mode-specific flow, and always release the lock
/// on return (via [`RunLock`]'s `Drop`).
pub fn execute(parsed: &ParsedArgs, resolved: &ResolvedPolicy) -> FinalSummary {
    let policy = &resolved.policy;
    let repo_root = policy
        .repo_root
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let paths = Paths::new(repo_root.clone(), &policy.patch_dir);
    if let Err(e) = paths.ensure_dirs() {
        return FinalSummary {
            ok: false,
            stages: vec![Stage::Bootstrap.to_string()],
            reason: Some(format!("failed to create runner directories: {e}")),
            log_path: PathBuf::new(),
            exit_code: 2,
            ..Default::default()
        };
    }

    let lock_policy = if policy.lock_on_conflict == "steal" {
        LockConflictPolicy::Steal { ttl: std::time::Duration::from_secs(policy.lock_steal_ttl_secs) }
    } else {
        LockConflictPolicy::Fail
    };
    let lock = match RunLock::acquire(&paths.lock_path(), lock_policy) {
        Ok(l) => l,
        Err(e) => {
            return FinalSummary {
                ok: false,
                stages: vec![Stage::Bootstrap.to_string()],
                reason: Some(format!("could not acquire run lock: {e}")),
                log_path: PathBuf::new(),
                exit_code: 2,
                ..Default::default()
            };
        }
    };

    let ts = ts_now();
    let issue_str = parsed.issue_id.as_ref().map(|i| i.as_str().to_string());
    let log_name = if matches!(parsed.mode, RunMode::FinalizeLive) {
        crate::logging::new_log_name(&policy.log_template_finalize, None, &ts)
    } else {
        crate::logging::new_log_name(&policy.log_template_issue, issue_str.as_deref(), &ts)
    };
    let log_path = paths.logs_dir().join(&log_name);
    let screen_level = level_or(&parsed.raw.verbosity, Level::Normal);
    let file_level = level_or(&parsed.raw.log_level, Level::Verbose);
    let mut logger = match Logger::new(&log_path, &paths.current_log_symlink(), screen_level, file_level) {
        Ok(l) => l,
        Err(e) => {
            return FinalSummary {
                ok: false,
                stages: vec![Stage::Bootstrap.to_string()],
                reason: Some(format!("failed to open log file: {e}")),
                log_path,
                exit_code: 2,
                ..Default::default()
            };
        }
    };

    let event_path = log_path.with_extension("ndjson");
    let mut sink = EventSink::create(&event_path).ok();
    let mode_label = match parsed.mode {
        RunMode::Workspace => "workspace",
        RunMode::FinalizeLive => "finalize_live",
        RunMode::FinalizeWorkspace => "finalize_workspace",
        RunMode::RerunLatest => "rerun_latest",
        RunMode::ShowConfig => "show_config",
    };
    if let Some(sink) = sink.as_mut() {
        sink.emit(&Event::hello(mode_label, issue_str.as_deref()));
    }
    logger.section(&format!("AM-PATCH RUN mode={mode_label}"));

    let mut summary = match parsed.mode {
        RunMode::Workspace | RunMode::RerunLatest => {
            run_workspace_flow(&mut logger, sink.as_mut(), &paths, policy, parsed, &repo_root)
        }
        RunMode::FinalizeLive => run_finalize_live_flow(&mut logger, sink.as_mut(), &paths, policy, parsed, &repo_root),
        RunMode::FinalizeWorkspace => {
            run_finalize_workspace_flow(&mut logger, sink.as_mut(), &paths, policy, parsed, &repo_root)
        }
        RunMode::ShowConfig => FinalSummary { ok: true, log_path: log_path.clone(), exit_code: 0, ..Default::default() },
    };
    summary.log_path = log_path;

    if let Some(sink) = sink.as_mut() {
        sink.emit(&Event::result(
            summary.ok,
            summary.stages.first().map(String::as_str),
            summary.reason.as_deref(),
            summary.commit_sha.as_deref(),
        ));
    }
    for line in summary.render() {
        logger.summary(&line);
    }

    drop(lock);
    summary
}

fn run_phase<'a>(logger: &mut Logger, sink: Option<&'a mut EventSink>, phase: Phase) -> Option<&'a mut EventSink> {
    logger.section(&phase.to_string());
    if let Some(sink) = sink {
        sink.emit(&Event::phase_start(&phase.to_string()));
        return Some(sink);
    }
    None
}

fn end_phase(logger: &mut Logger, sink: Option<&mut EventSink>, phase: Phase, ok: bool) {
    logger.info_core(&format!("phase={} ok={ok}", phase));
    if let Some(sink) = sink {
        sink.emit(&Event::phase_end(&phase.to_string(), ok));
    }
}

/// Normal `ISSUE_ID MESSAGE [PATCH_PATH]` / `-l [ISSUE_ID]` flow: clone or
/// reuse a workspace, apply the patch, gate it, and (unless `test_mode`)
/// promote, commit, push, and archive.
fn run_workspace_flow(
    logger: &mut Logger,
    mut sink: Option<&mut EventSink>,
    paths: &Paths,
    policy: &Policy,
    parsed: &ParsedArgs,
    repo_root: &std::path::Path,
) -> FinalSummary {
    let test_mode = parsed.raw.test_mode || policy.test_mode;
    let rerun_latest = matches!(parsed.mode, RunMode::RerunLatest);
    let plan = plan::build(parsed.mode, test_mode, policy.commit_and_push);

    let ops = GitOps::new(repo_root);
    sink = run_phase(logger, sink, Phase::Preflight);
    if let Err(e) = ops.fetch(logger) {
        return fail(logger, Stage::Preflight, e.message, policy);
    }
    if policy.enforce_main_branch && !policy.allow_non_main && !parsed.raw.allow_non_main {
        if let Err(e) = ops.require_branch(logger, &policy.default_branch) {
            return fail(logger, Stage::Preflight, e.message, policy);
        }
    }
    if policy.require_up_to_date && !policy.skip_up_to_date {
        if let Err(e) = ops.require_up_to_date(logger, &policy.default_branch) {
            return fail(logger, Stage::Preflight, e.message, policy);
        }
    }
    let base_sha = match ops.head_sha(logger) {
        Ok(s) => s,
        Err(e) => return fail(logger, Stage::Preflight, e.message, policy),
    };

    let issue_id = match resolve_issue_id(parsed, &paths.workspaces_dir(), rerun_latest) {
        Ok(id) => id,
        Err(e) => return fail(logger, Stage::Preflight, e.message, policy),
    };

    let mut live_before = match live_guard::snapshot(logger, repo_root) {
        Ok(s) => s,
        Err(e) => return fail(logger, Stage::Security, e.message, policy),
    };
    end_phase(logger, sink.as_deref_mut(), Phase::Preflight, true);

    sink = run_phase(logger, sink, Phase::Workspace);
    let ws = match workspace::ensure_workspace(
        logger,
        &paths.workspaces_dir(),
        issue_id.as_str(),
        repo_root,
        &base_sha,
        parsed.raw.update_workspace || policy.update_workspace,
        policy.soft_reset_workspace,
        parsed.commit_message.as_deref(),
        "issue_{issue}",
    ) {
        Ok(ws) => ws,
        Err(e) => return fail(logger, Stage::Preflight, e.message, policy),
    };
    let checkpoint = match workspace::create_checkpoint(logger, &ws.repo, true) {
        Ok(c) => c,
        Err(e) => return fail(logger, Stage::Preflight, e.message, policy),
    };
    let mut issue_state = IssueState::load(&ws.state_path(), &ws.base_sha);
    end_phase(logger, sink.as_deref_mut(), Phase::Workspace, true);

    sink = run_phase(logger, sink, Phase::Patch);
    let patch_plan = match patch::resolve_patch_plan(
        rerun_latest,
        parsed.patch_input.as_deref(),
        parsed.rerun_hint.as_deref(),
        issue_id.as_str(),
        &paths.patch_dir,
        parsed.raw.unified_patch || policy.unified_patch,
        policy.ascii_only_patch,
    ) {
        Ok(p) => p,
        Err(e) => return fail(logger, Stage::Preflight, e.message, policy),
    };

    let mut declared: BTreeSet<String> = patch_plan.files_declared.iter().cloned().collect();
    let mut primary_failure: Option<RunnerError> = None;
    let mut applied_any = true;

    if patch_plan.unified_mode {
        match patch::run_unified_patch_bundle(logger, &patch_plan.patch_script, &ws.repo, policy.ascii_only_patch, None) {
            Ok(result) => {
                declared.extend(result.declared_files.iter().cloned());
                applied_any = result.applied_ok > 0;
                if result.applied_fail > 0 && result.applied_ok == 0 {
                    primary_failure = Some(RunnerError::new(
                        Stage::Patch,
                        Category::PatchSyntax,
                        format!("all {} patch entries failed to apply", result.applied_fail),
                    ));
                } else if result.applied_fail > 0 && !policy.gates_on_partial_apply {
                    primary_failure = Some(RunnerError::new(
                        Stage::Patch,
                        Category::PatchSyntax,
                        format!("{} of {} patch entries failed to apply", result.applied_fail, result.applied_fail + result.applied_ok),
                    ));
                }
            }
            Err(e) => {
                applied_any = false;
                primary_failure = Some(e);
            }
        }
    } else if let Err(e) = patch::run_patch(logger, &patch_plan.patch_script, &ws.repo, policy.patch_jail, policy.patch_jail_unshare_net) {
        applied_any = false;
        primary_failure = Some(e);
    }

    if primary_failure.is_some() && !applied_any && !policy.gates_on_zero_apply {
        let e = primary_failure.unwrap();
        end_phase(logger, sink.as_deref_mut(), Phase::Patch, false);
        return finish_failure(
            logger, sink, paths, policy, Stage::Patch, e.message, &issue_id, &ws, checkpoint.as_ref(),
            test_mode, &[],
        );
    }
    end_phase(logger, sink.as_deref_mut(), Phase::Patch, primary_failure.is_none());

    if primary_failure.is_none() && policy.live_repo_guard {
        match live_guard::snapshot(logger, repo_root) {
            Ok(snap) => match live_guard::assert_unchanged(&live_before, &snap) {
                Ok(()) => {
                    if !live_guard::recapture_after_gates(policy.live_repo_guard_scope) {
                        live_before = snap;
                    }
                }
                Err(e) => primary_failure = Some(e),
            },
            Err(e) => primary_failure = Some(e),
        }
    }

    let after_status = match GitOps::new(&ws.repo).status_porcelain(logger) {
        Ok(lines) => touched_from_porcelain(&lines),
        Err(e) => return finish_failure(
            logger, sink, paths, policy, Stage::Scope, e.message, &issue_id, &ws, checkpoint.as_ref(), test_mode, &[],
        ),
    };

    sink = run_phase(logger, sink, Phase::GatesWorkspace);
    let scope_report = match primary_failure.as_ref() {
        Some(_) => None,
        None => match scope::evaluate(policy, &declared, &after_status) {
            Ok(r) => Some(r),
            Err(e) => {
                primary_failure = Some(e);
                None
            }
        },
    };

    let mut touched_vec: Vec<String> = scope_report
        .as_ref()
        .map(|r| r.touched.iter().cloned().collect())
        .unwrap_or_else(|| after_status.iter().cloned().collect());
    let declared_vec: Vec<String> = declared.iter().cloned().collect();

    let mut legalized_vec: Vec<String> = Vec::new();
    let diagnostic_gates = primary_failure.is_some();
    if !diagnostic_gates || policy.gates_on_partial_apply || policy.gates_on_zero_apply {
        match gates::run_pipeline(logger, sink.as_deref_mut(), policy, &ws.repo, &declared_vec, &touched_vec, Some(repo_root)) {
            Ok(results) => {
                legalized_vec = results.into_iter().flat_map(|r| r.legalized).collect();
                touched_vec.extend(legalized_vec.iter().cloned());
            }
            Err(e) => {
                if let Some(existing) = primary_failure.as_mut() {
                    existing.message = format!(
                        "{} (diagnostic gates also ran against the partially/zero-applied patch and failed: {})",
                        existing.message, e.message
                    );
                } else {
                    primary_failure = Some(e);
                }
            }
        }
    }
    end_phase(logger, sink.as_deref_mut(), Phase::GatesWorkspace, primary_failure.is_none());

    if primary_failure.is_none() && policy.live_repo_guard {
        match live_guard::snapshot(logger, repo_root) {
            Ok(snap) => match live_guard::assert_unchanged(&live_before, &snap) {
                Ok(()) => {
                    if live_guard::recapture_after_gates(policy.live_repo_guard_scope) {
                        live_before = snap;
                    }
                }
                Err(e) => primary_failure = Some(e),
            },
            Err(e) => primary_failure = Some(e),
        }
    }

    if let Some(e) = primary_failure {
        return finish_failure(
            logger, sink, paths, policy, e.stage, e.message, &issue_id, &ws, checkpoint.as_ref(), test_mode, &touched_vec,
        );
    }

    if let Some(report) = &scope_report {
        issue_state.extend_allowed(report.touched.iter().cloned());
        issue_state.extend_allowed(legalized_vec.iter().cloned());
        let _ = issue_state.save(&ws.state_path());
    }

    if test_mode {
        workspace::drop_checkpoint(logger, &ws.repo, checkpoint.as_ref());
        if policy.delete_workspace_on_success {
            workspace::delete_workspace(logger, &ws);
        }
        return FinalSummary { ok: true, exit_code: 0, ..Default::default() };
    }

    sink = run_phase(logger, sink, Phase::Promote);
    let to_promote: Vec<String> = declared_vec
        .iter()
        .chain(touched_vec.iter())
        .filter(|f| issue_state.is_allowed(f) || policy.blessed_gate_outputs.iter().any(|b| b == *f))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let promote_plan = match promote::plan_promotion(
        logger,
        repo_root,
        &ws.base_sha,
        &to_promote,
        |f| ws.repo.join(f).exists(),
        policy.live_changed_resolution,
    ) {
        Ok(p) => p,
        Err(e) => {
            end_phase(logger, sink.as_deref_mut(), Phase::Promote, false);
            return finish_failure(
                logger, sink, paths, policy, e.stage, e.message, &issue_id, &ws, checkpoint.as_ref(), test_mode, &touched_vec,
            );
        }
    };
    if let Err(e) = promote::apply_promotion(logger, &ws.repo, repo_root, &promote_plan) {
        end_phase(logger, sink.as_deref_mut(), Phase::Promote, false);
        return finish_failure(
            logger, sink, paths, policy, e.stage, e.message, &issue_id, &ws, checkpoint.as_ref(), test_mode, &touched_vec,
        );
    }
    end_phase(logger, sink.as_deref_mut(), Phase::Promote, true);

    if policy.live_repo_guard {
        let after = match live_guard::snapshot(logger, repo_root) {
            Ok(s) => s,
            Err(e) => return finish_failure(
                logger, sink, paths, policy, Stage::Security, e.message, &issue_id, &ws, checkpoint.as_ref(), test_mode, &touched_vec,
            ),
        };
        if let Err(e) = live_guard::assert_unchanged(&live_before, &after) {
            return finish_failure(
                logger, sink, paths, policy, e.stage, e.message, &issue_id, &ws, checkpoint.as_ref(), test_mode, &touched_vec,
            );
        }
    }

    let mut commit_sha = None;
    let mut pushed = None;
    let mut committed_files = Vec::new();
    if policy.commit_and_push {
        sink = run_phase(logger, sink, Phase::Commit);
        let message = parsed
            .commit_message
            .clone()
            .or_else(|| ws.message.clone())
            .unwrap_or_else(|| format!("promote issue {}", issue_id.as_str()));
        match ops.commit(logger, &message, true) {
            Ok(sha) => {
                if let Ok(changes) = ops.commit_changed_files_name_status(logger, &sha) {
                    committed_files = changes.into_iter().map(|c| (c.status, c.path)).collect();
                }
                commit_sha = Some(sha);
                end_phase(logger, sink.as_deref_mut(), Phase::Commit, true);
            }
            Err(e) if e.category == Category::Noop => {
                end_phase(logger, sink.as_deref_mut(), Phase::Commit, true);
            }
            Err(e) => {
                end_phase(logger, sink.as_deref_mut(), Phase::Commit, false);
                return finish_failure(
                    logger, sink, paths, policy, e.stage, e.message, &issue_id, &ws, checkpoint.as_ref(), test_mode, &touched_vec,
                );
            }
        }

        if commit_sha.is_some() {
            sink = run_phase(logger, sink, Phase::Push);
            match ops.push(logger, &policy.default_branch, policy.allow_push_fail) {
                Ok(ok) => {
                    pushed = Some(ok);
                    end_phase(logger, sink.as_deref_mut(), Phase::Push, ok);
                }
                Err(e) => {
                    end_phase(logger, sink.as_deref_mut(), Phase::Push, false);
                    return finish_failure(
                        logger, sink, paths, policy, e.stage, e.message, &issue_id, &ws, checkpoint.as_ref(), test_mode, &touched_vec,
                    );
                }
            }
        }
    }

    sink = run_phase(logger, sink, Phase::Archive);
    let repo_name = repo_root.file_name().map(|n| n.to_string_lossy().into_owned());
    let archive_name = render_template(&policy.success_archive_name, None, None, repo_name.as_deref(), Some(&policy.default_branch));
    let _ = archive::write_success_archive(logger, repo_root, commit_sha.as_deref().unwrap_or("HEAD"), &paths.successful_dir().join(archive_name));
    let diff_bundle_name = render_template(&policy.diff_bundle_name, Some(issue_id.as_str()), Some(ws.attempt), repo_name.as_deref(), Some(&policy.default_branch));
    let diff_logs = vec![logger.symlink_path().to_path_buf()];
    let _ = archive::write_diff_bundle(
        logger,
        repo_root,
        &base_sha,
        &to_promote,
        &diff_logs,
        &paths.artifacts_dir().join(diff_bundle_name),
    );
    end_phase(logger, sink.as_deref_mut(), Phase::Archive, true);

    run_phase(logger, sink, Phase::Cleanup);
    workspace::drop_checkpoint(logger, &ws.repo, checkpoint.as_ref());
    if policy.delete_workspace_on_success {
        workspace::delete_workspace(logger, &ws);
    }

    let _ = plan;
    FinalSummary {
        ok: true,
        commit_sha,
        pushed,
        committed_files,
        exit_code: 0,
        ..Default::default()
    }
}

/// Shortcut used for genuinely unrecoverable early errors (before a
/// workspace exists), where no diagnostic archive is possible.
fn fail(logger: &mut Logger, stage: Stage, message: String, policy: &Policy) -> FinalSummary {
    logger.error_core(&format!("{stage}: {message}"));
    let _ = policy;
    FinalSummary {
        ok: false,
        stages: vec![stage.to_string()],
        reason: Some(message),
        exit_code: 1,
        ..Default::default()
    }
}

/// A workspace-stage failure: write the failure archive, then roll back
/// per policy, then return the final summary. §7: rollback is always
/// deferred until after the diagnostic archive exists.
#[allow(clippy::too_many_arguments)]
fn finish_failure(
    logger: &mut Logger,
    _sink: Option<&mut EventSink>,
    paths: &Paths,
    policy: &Policy,
    stage: Stage,
    message: String,
    issue_id: &IssueId,
    ws: &Workspace,
    checkpoint: Option<&workspace::Checkpoint>,
    test_mode: bool,
    touched: &[String],
) -> FinalSummary {
    logger.error_core(&format!("{stage}: {message}"));

    let failure_name = render_template(&policy.failure_archive_name, Some(issue_id.as_str()), Some(ws.attempt), None, None);
    let logs = vec![logger.symlink_path().to_path_buf()];
    let patch_blobs: Vec<(String, Vec<u8>)> = std::fs::read_dir(ws.patches_dir())
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            std::fs::read(e.path()).ok().map(|data| (name, data))
        })
        .collect();
    let _ = archive::write_failure_archive(
        Some(&ws.repo),
        &logs,
        &patch_blobs,
        &paths.unsuccessful_dir().join(failure_name),
    );

    let applied_zero = touched.is_empty();
    let should_rollback = !policy.no_rollback
        && match policy.rollback_workspace_on_fail {
            RollbackPolicy::Never => false,
            RollbackPolicy::Always => true,
            RollbackPolicy::NoneApplied => applied_zero,
        };
    if should_rollback {
        let _ = workspace::rollback_to_checkpoint(logger, &ws.repo, checkpoint);
    }
    if test_mode {
        // test_mode always tears down the workspace regardless of outcome.
        workspace::delete_workspace(logger, ws);
    }

    FinalSummary {
        ok: false,
        stages: vec![stage.to_string()],
        reason: Some(message),
        exit_code: 1,
        ..Default::default()
    }
}

fn resolve_issue_id(parsed: &ParsedArgs, workspaces_dir: &std::path::Path, rerun_latest: bool) -> Result<IssueId, RunnerError> {
    if let Some(id) = &parsed.issue_id {
        return Ok(id.clone());
    }
    if !rerun_latest {
        return Err(RunnerError::new(Stage::Preflight, Category::Manifest, "no issue id given"));
    }
    let mut candidates: Vec<(std::time::SystemTime, String)> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(workspaces_dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_prefix("issue_") {
                if let Ok(meta) = entry.metadata() {
                    if let Ok(mtime) = meta.modified() {
                        candidates.push((mtime, id.to_string()));
                    }
                }
            }
        }
    }
    candidates.sort();
    candidates
        .pop()
        .map(|(_, id)| IssueId::parse(&id))
        .transpose()
        .map_err(|e| RunnerError::new(Stage::Preflight, Category::Manifest, e.to_string()))?
        .ok_or_else(|| RunnerError::new(Stage::Preflight, Category::Manifest, "no prior workspace to re-run"))
}

/// `-f MESSAGE`: gate and commit+push the live repo directly, no workspace.
fn run_finalize_live_flow(
    logger: &mut Logger,
    mut sink: Option<&mut EventSink>,
    paths: &Paths,
    policy: &Policy,
    parsed: &ParsedArgs,
    repo_root: &std::path::Path,
) -> FinalSummary {
    let ops = GitOps::new(repo_root);
    sink = run_phase(logger, sink, Phase::Preflight);
    if let Err(e) = ops.fetch(logger) {
        return fail(logger, Stage::Preflight, e.message, policy);
    }
    if policy.enforce_main_branch && !policy.allow_non_main && !parsed.raw.allow_non_main {
        if let Err(e) = ops.require_branch(logger, &policy.default_branch) {
            return fail(logger, Stage::Preflight, e.message, policy);
        }
    }
    end_phase(logger, sink.as_deref_mut(), Phase::Preflight, true);

    sink = run_phase(logger, sink, Phase::GatesLive);
    let status = match ops.status_porcelain(logger) {
        Ok(lines) => touched_from_porcelain(&lines),
        Err(e) => return fail(logger, Stage::Gates, e.message, policy),
    };
    let touched: Vec<String> = status.into_iter().collect();
    if let Err(e) = gates::run_pipeline(logger, sink.as_deref_mut(), policy, repo_root, &[], &touched, None) {
        end_phase(logger, sink.as_deref_mut(), Phase::GatesLive, false);
        return finish_finalize_failure(logger, paths, policy, e.stage, e.message);
    }
    end_phase(logger, sink.as_deref_mut(), Phase::GatesLive, true);

    let mut commit_sha = None;
    let mut pushed = None;
    let mut committed_files = Vec::new();
    if policy.commit_and_push {
        sink = run_phase(logger, sink, Phase::Commit);
        let message = parsed.commit_message.clone().unwrap_or_default();
        match ops.commit(logger, &message, true) {
            Ok(sha) => {
                if let Ok(changes) = ops.commit_changed_files_name_status(logger, &sha) {
                    committed_files = changes.into_iter().map(|c| (c.status, c.path)).collect();
                }
                commit_sha = Some(sha);
                end_phase(logger, sink.as_deref_mut(), Phase::Commit, true);
            }
            Err(e) if e.category == Category::Noop => end_phase(logger, sink.as_deref_mut(), Phase::Commit, true),
            Err(e) => {
                end_phase(logger, sink.as_deref_mut(), Phase::Commit, false);
                return finish_finalize_failure(logger, paths, policy, e.stage, e.message);
            }
        }
        if commit_sha.is_some() {
            sink = run_phase(logger, sink, Phase::Push);
            match ops.push(logger, &policy.default_branch, policy.allow_push_fail) {
                Ok(ok) => {
                    pushed = Some(ok);
                    end_phase(logger, sink.as_deref_mut(), Phase::Push, ok);
                }
                Err(e) => {
                    end_phase(logger, sink.as_deref_mut(), Phase::Push, false);
                    return finish_finalize_failure(logger, paths, policy, e.stage, e.message);
                }
            }
        }
    }

    sink = run_phase(logger, sink, Phase::Archive);
    let repo_name = repo_root.file_name().map(|n| n.to_string_lossy().into_owned());
    let archive_name = render_template(&policy.success_archive_name, None, None, repo_name.as_deref(), Some(&policy.default_branch));
    let _ = archive::write_success_archive(logger, repo_root, commit_sha.as_deref().unwrap_or("HEAD"), &paths.successful_dir().join(archive_name));
    end_phase(logger, sink, Phase::Archive, true);

    FinalSummary { ok: true, commit_sha, pushed, committed_files, exit_code: 0, ..Default::default() }
}

/// `--finalize-workspace ISSUE_ID`: promote a previously-gated workspace
/// (already test-moded to completion) into the live repo, then commit+push.
fn run_finalize_workspace_flow(
    logger: &mut Logger,
    mut sink: Option<&mut EventSink>,
    paths: &Paths,
    policy: &Policy,
    parsed: &ParsedArgs,
    repo_root: &std::path::Path,
) -> FinalSummary {
    let Some(issue_id) = &parsed.issue_id else {
        return fail(logger, Stage::Preflight, "finalize-workspace requires an issue id".to_string(), policy);
    };

    sink = run_phase(logger, sink, Phase::Preflight);
    let ops = GitOps::new(repo_root);
    if let Err(e) = ops.fetch(logger) {
        return fail(logger, Stage::Preflight, e.message, policy);
    }
    let ws = match workspace::open_existing(&paths.workspaces_dir(), issue_id.as_str(), "issue_{issue}") {
        Ok(ws) => ws,
        Err(e) => return fail(logger, Stage::Preflight, e.message, policy),
    };
    let issue_state = IssueState::load(&ws.state_path(), &ws.base_sha);
    end_phase(logger, sink.as_deref_mut(), Phase::Preflight, true);

    sink = run_phase(logger, sink, Phase::Promote);
    let to_promote: Vec<String> = issue_state.allowed_union.iter().cloned().collect();
    let promote_plan = match promote::plan_promotion(
        logger,
        repo_root,
        &ws.base_sha,
        &to_promote,
        |f| ws.repo.join(f).exists(),
        policy.live_changed_resolution,
    ) {
        Ok(p) => p,
        Err(e) => {
            end_phase(logger, sink.as_deref_mut(), Phase::Promote, false);
            return finish_finalize_failure(logger, paths, policy, e.stage, e.message);
        }
    };
    if let Err(e) = promote::apply_promotion(logger, &ws.repo, repo_root, &promote_plan) {
        end_phase(logger, sink.as_deref_mut(), Phase::Promote, false);
        return finish_finalize_failure(logger, paths, policy, e.stage, e.message);
    }
    end_phase(logger, sink.as_deref_mut(), Phase::Promote, true);

    sink = run_phase(logger, sink, Phase::GatesLive);
    if let Err(e) = gates::run_pipeline(logger, sink.as_deref_mut(), policy, repo_root, &to_promote, &to_promote, None) {
        end_phase(logger, sink.as_deref_mut(), Phase::GatesLive, false);
        return finish_finalize_failure(logger, paths, policy, e.stage, e.message);
    }
    end_phase(logger, sink.as_deref_mut(), Phase::GatesLive, true);

    let mut commit_sha = None;
    let mut pushed = None;
    let mut committed_files = Vec::new();
    if policy.commit_and_push {
        sink = run_phase(logger, sink, Phase::Commit);
        let message = ws.message.clone().unwrap_or_else(|| format!("promote issue {}", issue_id.as_str()));
        match ops.commit(logger, &message, true) {
            Ok(sha) => {
                if let Ok(changes) = ops.commit_changed_files_name_status(logger, &sha) {
                    committed_files = changes.into_iter().map(|c| (c.status, c.path)).collect();
                }
                commit_sha = Some(sha);
                end_phase(logger, sink.as_deref_mut(), Phase::Commit, true);
            }
            Err(e) if e.category == Category::Noop => end_phase(logger, sink.as_deref_mut(), Phase::Commit, true),
            Err(e) => {
                end_phase(logger, sink.as_deref_mut(), Phase::Commit, false);
                return finish_finalize_failure(logger, paths, policy, e.stage, e.message);
            }
        }
        if commit_sha.is_some() {
            sink = run_phase(logger, sink, Phase::Push);
            match ops.push(logger, &policy.default_branch, policy.allow_push_fail) {
                Ok(ok) => {
                    pushed = Some(ok);
                    end_phase(logger, sink.as_deref_mut(), Phase::Push, ok);
                }
                Err(e) => {
                    end_phase(logger, sink.as_deref_mut(), Phase::Push, false);
                    return finish_finalize_failure(logger, paths, policy, e.stage, e.message);
                }
            }
        }
    }

    sink = run_phase(logger, sink, Phase::Archive);
    let repo_name = repo_root.file_name().map(|n| n.to_string_lossy().into_owned());
    let archive_name = render_template(&policy.success_archive_name, None, None, repo_name.as_deref(), Some(&policy.default_branch));
    let _ = archive::write_success_archive(logger, repo_root, commit_sha.as_deref().unwrap_or("HEAD"), &paths.successful_dir().join(archive_name));
    let diff_bundle_name = render_template(&policy.diff_bundle_name, Some(issue_id.as_str()), Some(ws.attempt), repo_name.as_deref(), Some(&policy.default_branch));
    let diff_logs = vec![logger.symlink_path().to_path_buf()];
    let _ = archive::write_diff_bundle(
        logger,
        repo_root,
        &ws.base_sha,
        &to_promote,
        &diff_logs,
        &paths.artifacts_dir().join(diff_bundle_name),
    );
    end_phase(logger, sink.as_deref_mut(), Phase::Archive, true);

    run_phase(logger, sink, Phase::Cleanup);
    if policy.delete_workspace_on_success {
        workspace::delete_workspace(logger, &ws);
    }

    FinalSummary { ok: true, commit_sha, pushed, committed_files, exit_code: 0, ..Default::default() }
}

fn finish_finalize_failure(logger: &mut Logger, paths: &Paths, policy: &Policy, stage: Stage, message: String) -> FinalSummary {
    logger.error_core(&format!("{stage}: {message}"));
    let logs = vec![logger.symlink_path().to_path_buf()];
    let failure_name = render_template(&policy.failure_archive_name, None, Some(1), None, None);
    let _ = archive::write_failure_archive(None, &logs, &[], &paths.unsuccessful_dir().join(failure_name));
    FinalSummary {
        ok: false,
        stages: vec![stage.to_string()],
        reason: Some(message),
        exit_code: 1,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touched_from_porcelain_follows_rename_arrow() {
        let lines = vec![" M a.txt".to_string(), "R  old.txt -> new.txt".to_string()];
        let touched = touched_from_porcelain(&lines);
        assert!(touched.contains("a.txt"));
        assert!(touched.contains("new.txt"));
        assert!(!touched.contains("old.txt"));
    }

    #[test]
    fn render_template_substitutes_known_placeholders() {
        let s = render_template("issue_{issue}_attempt{attempt}_failure.zip", Some("7"), Some(3), None, None);
        assert_eq!(s, "issue_7_attempt3_failure.zip");
    }

    #[test]
    fn final_summary_renders_success_then_failure() {
        let ok = FinalSummary { ok: true, commit_sha: Some("abc".to_string()), exit_code: 0, ..Default::default() };
        assert!(ok.render()[0].starts_with("RESULT: SUCCESS"));

        let fail = FinalSummary {
            ok: false,
            stages: vec!["PATCH".to_string()],
            reason: Some("boom".to_string()),
            exit_code: 1,
            ..Default::default()
        };
        let lines = fail.render();
        assert_eq!(lines[0], "RESULT: FAIL");
        assert_eq!(lines[1], "STAGE: PATCH");
        assert_eq!(lines[2], "REASON: boom");
    }
}
