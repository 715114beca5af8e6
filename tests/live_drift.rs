//! The Promoter must never clobber a change that landed in the live repo
//! after a workspace was cut: under `overwrite_workspace` it drops the
//! conflicting file and promotes everything else.

mod support;

use support::{init_live_repo, run, scratch_logger, unified_patch_adding, write_config, write_patch_input};

#[test]
fn overwrite_workspace_drops_the_file_that_drifted_live() {
    let live = init_live_repo();

    // Seed shared.txt and capture the sha a workspace will be cut from.
    let base_sha = live.commit_file("shared.txt", "original\n");

    // Simulate a workspace left over from an earlier attempt: its own clone
    // at base_sha, with an uncommitted edit to shared.txt sitting in it.
    let workspaces_dir = live.path().join("patches/workspaces");
    let mut logger = scratch_logger(&live.path().join("scratch"));
    let ws = am_patch::workspace::ensure_workspace(
        &mut logger,
        &workspaces_dir,
        "55",
        live.path(),
        &base_sha,
        false,
        false,
        None,
        "issue_{issue}",
    )
    .unwrap();
    std::fs::write(ws.repo.join("shared.txt"), "workspace-edit\n").unwrap();

    // Now the live repo moves on without the workspace.
    live.commit_file("shared.txt", "live-edit\n");

    let config = write_config(
        live.path(),
        &["live_changed_resolution = \"overwrite_workspace\"", "allow_outside_files = true"],
    );
    write_patch_input(live.path(), "55", &unified_patch_adding("new_file.txt", "fresh"));

    let summary = run(&config, &["55", "promote partial"]);

    assert!(summary.ok, "expected success, got {summary:?}");
    assert_eq!(
        std::fs::read_to_string(live.path().join("shared.txt")).unwrap(),
        "live-edit\n",
        "the live edit to shared.txt must survive, not get clobbered by the stale workspace copy"
    );
    assert_eq!(
        std::fs::read_to_string(live.path().join("new_file.txt")).unwrap(),
        "fresh\n"
    );
    assert!(!summary.committed_files.iter().any(|(_, path)| path == "shared.txt"));
    assert!(summary.committed_files.iter().any(|(_, path)| path == "new_file.txt"));
}
