//! `-f MESSAGE` (finalize-live) and `--finalize-workspace ISSUE_ID`: the two
//! entry points that skip straight to gating/promoting already-made
//! changes instead of driving a fresh patch through a workspace.

mod support;

use am_patch::workspace::state::IssueState;
use support::{init_live_repo, run, scratch_logger, write_config};

#[test]
fn finalize_live_gates_and_commits_a_direct_live_edit() {
    let live = init_live_repo();
    std::fs::write(live.path().join("README.md"), "hello\nupdated\n").unwrap();

    let config = write_config(live.path(), &[]);
    let summary = run(&config, &["-f", "update readme"]);

    assert!(summary.ok, "expected success, got {summary:?}");
    assert!(summary.commit_sha.is_some());
    assert_eq!(summary.pushed, Some(true));
    assert_eq!(live.log_subjects().first().unwrap(), "update readme");
}

#[test]
fn finalize_live_is_a_noop_with_no_pending_changes() {
    let live = init_live_repo();
    let config = write_config(live.path(), &[]);

    let summary = run(&config, &["-f", "nothing to commit"]);

    assert!(summary.ok, "a clean tree should still gate and archive cleanly, got {summary:?}");
    assert!(summary.commit_sha.is_none());
}

#[test]
fn finalize_workspace_promotes_a_previously_gated_workspace() {
    let live = init_live_repo();
    let base_sha = live.head_sha();

    let workspaces_dir = live.path().join("patches/workspaces");
    let mut logger = scratch_logger(&live.path().join("scratch"));
    let ws = am_patch::workspace::ensure_workspace(
        &mut logger,
        &workspaces_dir,
        "60",
        live.path(),
        &base_sha,
        false,
        false,
        Some("ship issue 60"),
        "issue_{issue}",
    )
    .unwrap();
    std::fs::write(ws.repo.join("feature.txt"), "shipped\n").unwrap();

    let mut state = IssueState::load(&ws.state_path(), &ws.base_sha);
    state.extend_allowed(["feature.txt".to_string()]);
    state.save(&ws.state_path()).unwrap();

    let config = write_config(live.path(), &[]);
    let summary = run(&config, &["--finalize-workspace", "60"]);

    assert!(summary.ok, "expected success, got {summary:?}");
    assert_eq!(
        std::fs::read_to_string(live.path().join("feature.txt")).unwrap(),
        "shipped\n"
    );
    assert_eq!(live.log_subjects().first().unwrap(), "ship issue 60");
    assert!(!live.path().join("patches/workspaces/issue_60").exists(), "delete_workspace_on_success should clean up");
}
