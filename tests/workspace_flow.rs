//! End to end coverage of the default `ISSUE_ID MESSAGE` grammar: a happy
//! path that promotes, commits, pushes and archives, and `--test-mode`,
//! which must stop short of every live-repo side effect.

mod support;

use support::{init_live_repo, run, unified_patch_adding, write_config, write_patch_input};

#[test]
fn happy_path_commits_pushes_and_archives() {
    let live = init_live_repo();
    let config = write_config(live.path(), &[]);
    write_patch_input(live.path(), "42", &unified_patch_adding("docs/x.txt", "marker"));

    let summary = run(&config, &["42", "add marker doc"]);

    assert!(summary.ok, "expected success, got {summary:?}");
    assert_eq!(summary.exit_code, 0);
    assert!(summary.commit_sha.is_some());
    assert_eq!(summary.pushed, Some(true));
    assert!(summary
        .committed_files
        .iter()
        .any(|(status, path)| *status == 'A' && path == "docs/x.txt"));

    assert_eq!(
        std::fs::read_to_string(live.path().join("docs/x.txt")).unwrap(),
        "marker\n"
    );

    assert!(!live.path().join("patches/workspaces/issue_42").exists());

    let successful: Vec<_> = std::fs::read_dir(live.path().join("patches/successful"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(successful.len(), 1, "expected exactly one success archive");

    let artifacts: Vec<_> = std::fs::read_dir(live.path().join("patches/artifacts"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(artifacts.contains(&"issue_42_diff.zip".to_string()));

    assert_eq!(live.log_subjects().first().unwrap(), "add marker doc");
}

#[test]
fn test_mode_gates_without_touching_the_live_repo() {
    let live = init_live_repo();
    let before_sha = live.head_sha();
    let config = write_config(live.path(), &[]);
    write_patch_input(live.path(), "7", &unified_patch_adding("docs/y.txt", "marker"));

    let summary = run(&config, &["7", "try it", "--test-mode"]);

    assert!(summary.ok, "expected success, got {summary:?}");
    assert_eq!(summary.exit_code, 0);
    assert!(summary.commit_sha.is_none());
    assert!(summary.pushed.is_none());

    assert_eq!(live.head_sha(), before_sha, "test-mode must not commit to the live repo");
    assert!(!live.path().join("docs/y.txt").exists());
    assert!(!live.path().join("patches/workspaces/issue_7").exists());
    let successful: Vec<_> = std::fs::read_dir(live.path().join("patches/successful"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert!(successful.is_empty(), "test-mode must not archive anything");
}

#[test]
fn rerun_latest_replays_the_most_recent_archived_input() {
    let live = init_live_repo();
    let config = write_config(live.path(), &[]);

    // An older, already-attempted input lives in unsuccessful/; it should be
    // picked over a same-issue default that was never run.
    let unsuccessful = live.path().join("patches/unsuccessful");
    std::fs::create_dir_all(&unsuccessful).unwrap();
    std::fs::write(
        unsuccessful.join("issue_42.patch"),
        unified_patch_adding("docs/old.txt", "stale"),
    )
    .unwrap();
    // Force a newer mtime on the archived candidate than anything else.
    std::thread::sleep(std::time::Duration::from_millis(10));
    std::fs::write(
        unsuccessful.join("issue_42_v2.patch"),
        unified_patch_adding("docs/new.txt", "fresh"),
    )
    .unwrap();

    let summary = run(&config, &["42", "--rerun-latest"]);

    assert!(summary.ok, "expected success, got {summary:?}");
    assert!(live.path().join("docs/new.txt").exists());
    assert!(!live.path().join("docs/old.txt").exists());
    assert_eq!(
        live.log_subjects().first().unwrap(),
        "promote issue 42",
        "rerun-latest has no commit message of its own and should fall back to a generated one"
    );
}
