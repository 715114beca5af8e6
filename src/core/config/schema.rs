//! core::config::schema
//!
//! The `Policy` struct: every field the runner consults, with its default.
//!
//! Field-for-field this mirrors `Policy` in the original `am_patch/config.py`
//! (see SPEC_FULL.md §B/§D) - the distillation's "resolved configuration"
//! entity from spec.md §3.

use serde::{Deserialize, Serialize};

/// Promotion conflict-resolution strategy when a promoted file changed live
/// since the workspace was cut, per §4.13.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveChangedResolution {
    Fail,
    OverwriteLive,
    OverwriteWorkspace,
}

impl std::fmt::Display for LiveChangedResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LiveChangedResolution::Fail => "fail",
            LiveChangedResolution::OverwriteLive => "overwrite_live",
            LiveChangedResolution::OverwriteWorkspace => "overwrite_workspace",
        };
        f.write_str(s)
    }
}

/// Scope of the live-repo guard, per §4.12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveRepoGuardScope {
    Patch,
    PatchAndGates,
}

/// Rollback-on-failure policy, per §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    Never,
    Always,
    NoneApplied,
}

/// One entry of the monolith gate's path-prefix -> area map (§4.11.1).
///
/// `dynamic`, when set, names a pattern such as `"plugins.<name>"`: any file
/// under `prefix` gets its own sub-area `plugins.<name>` (one name per
/// immediate subdirectory of `prefix`) instead of collapsing into `area`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonolithArea {
    pub prefix: String,
    pub area: String,
    pub dynamic: Option<String>,
}

/// The resolved configuration consulted by every phase.
///
/// Every field here corresponds 1:1 with a row in spec.md §6's option
/// table (or its SPEC_FULL.md §D gate-default extension). Defaults below
/// are the original implementation's literal defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub repo_root: Option<String>,
    pub patch_dir: String,
    pub default_branch: String,

    pub require_up_to_date: bool,
    pub skip_up_to_date: bool,
    pub enforce_main_branch: bool,
    pub allow_non_main: bool,

    pub update_workspace: bool,
    pub soft_reset_workspace: bool,
    pub test_mode: bool,
    pub delete_workspace_on_success: bool,

    pub ascii_only_patch: bool,
    pub no_op_fail: bool,
    pub allow_no_op: bool,
    pub enforce_allowed_files: bool,
    pub allow_outside_files: bool,
    pub declared_untouched_fail: bool,
    pub allow_declared_untouched: bool,
    pub unified_patch: bool,

    pub run_all_tests: bool,
    pub gates_allow_fail: bool,
    pub gates_skip_compile: bool,
    pub gates_skip_ruff: bool,
    pub gates_skip_pytest: bool,
    pub gates_skip_mypy: bool,
    pub gates_order: Vec<String>,
    pub gates_on_partial_apply: bool,
    pub gates_on_zero_apply: bool,

    pub compile_targets: Vec<String>,
    pub compile_exclude: Vec<String>,

    pub ruff_format: bool,
    pub ruff_autofix: bool,
    pub ruff_autofix_legalize_outside: bool,
    pub ruff_targets: Vec<String>,

    pub pytest_targets: Vec<String>,
    pub pytest_use_venv: bool,

    pub mypy_targets: Vec<String>,

    pub docs_watch_include: Vec<String>,
    pub docs_watch_exclude: Vec<String>,
    pub docs_required_paths: Vec<String>,

    pub js_extensions: Vec<String>,

    pub monolith_mode: String,
    pub monolith_on_parse_error: String,
    pub monolith_areas: Vec<MonolithArea>,
    pub monolith_core_areas: Vec<String>,
    pub monolith_catchall_basenames: Vec<String>,
    pub monolith_catchall_dirs: Vec<String>,
    pub monolith_catchall_allowlist: Vec<String>,
    pub monolith_new_file_max_loc: usize,
    pub monolith_new_file_max_exports: usize,
    pub monolith_new_file_max_imports: usize,
    pub monolith_large_loc: usize,
    pub monolith_huge_loc: usize,
    pub monolith_large_allow_loc_increase: usize,
    pub monolith_large_allow_exports_delta: usize,
    pub monolith_large_allow_imports_delta: usize,
    pub monolith_huge_allow_loc_increase: usize,
    pub monolith_huge_allow_exports_delta: usize,
    pub monolith_huge_allow_imports_delta: usize,
    pub monolith_compute_fanin: bool,
    pub monolith_hub_fanin_delta: usize,
    pub monolith_hub_fanout_delta: usize,
    pub monolith_crossarea_min_distinct_areas: usize,

    pub fail_if_live_files_changed: bool,
    pub live_changed_resolution: LiveChangedResolution,

    pub commit_and_push: bool,
    pub allow_push_fail: bool,

    pub no_rollback: bool,
    pub rollback_workspace_on_fail: RollbackPolicy,

    pub live_repo_guard: bool,
    pub live_repo_guard_scope: LiveRepoGuardScope,

    pub patch_jail: bool,
    pub patch_jail_unshare_net: bool,

    pub post_success_audit: bool,
    pub audit_rubric_guard: bool,

    pub lock_on_conflict: String,
    pub lock_steal_ttl_secs: u64,

    pub blessed_gate_outputs: Vec<String>,
    pub ignore_globs: Vec<String>,

    pub log_template_issue: String,
    pub log_template_finalize: String,
    pub success_archive_name: String,
    pub failure_archive_name: String,
    pub diff_bundle_name: String,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            repo_root: None,
            patch_dir: "patches".to_string(),
            default_branch: "main".to_string(),

            require_up_to_date: true,
            skip_up_to_date: false,
            enforce_main_branch: true,
            allow_non_main: false,

            update_workspace: false,
            soft_reset_workspace: false,
            test_mode: false,
            delete_workspace_on_success: true,

            ascii_only_patch: true,
            no_op_fail: true,
            allow_no_op: false,
            enforce_allowed_files: true,
            allow_outside_files: false,
            declared_untouched_fail: true,
            allow_declared_untouched: false,
            unified_patch: false,

            run_all_tests: true,
            gates_allow_fail: false,
            gates_skip_compile: false,
            gates_skip_ruff: false,
            gates_skip_pytest: false,
            gates_skip_mypy: false,
            gates_order: vec!["compile", "ruff", "pytest", "mypy"]
                .into_iter()
                .map(String::from)
                .collect(),
            gates_on_partial_apply: false,
            gates_on_zero_apply: false,

            compile_targets: vec![".".to_string()],
            compile_exclude: Vec::new(),

            ruff_format: true,
            ruff_autofix: true,
            ruff_autofix_legalize_outside: true,
            ruff_targets: vec!["src".to_string(), "tests".to_string()],

            pytest_targets: vec!["tests".to_string()],
            pytest_use_venv: true,

            mypy_targets: vec!["src".to_string()],

            docs_watch_include: Vec::new(),
            docs_watch_exclude: Vec::new(),
            docs_required_paths: Vec::new(),

            js_extensions: vec![".js".to_string(), ".mjs".to_string(), ".cjs".to_string()],

            monolith_mode: "warn_only".to_string(),
            monolith_on_parse_error: "warn".to_string(),
            monolith_areas: Vec::new(),
            monolith_core_areas: Vec::new(),
            monolith_catchall_basenames: vec![
                "utils.py".to_string(),
                "helpers.py".to_string(),
                "misc.py".to_string(),
                "common.py".to_string(),
            ],
            monolith_catchall_dirs: vec!["utils".to_string()],
            monolith_catchall_allowlist: Vec::new(),
            monolith_new_file_max_loc: 400,
            monolith_new_file_max_exports: 20,
            monolith_new_file_max_imports: 25,
            monolith_large_loc: 800,
            monolith_huge_loc: 1500,
            monolith_large_allow_loc_increase: 80,
            monolith_large_allow_exports_delta: 5,
            monolith_large_allow_imports_delta: 5,
            monolith_huge_allow_loc_increase: 40,
            monolith_huge_allow_exports_delta: 2,
            monolith_huge_allow_imports_delta: 2,
            monolith_compute_fanin: false,
            monolith_hub_fanin_delta: 999_999,
            monolith_hub_fanout_delta: 999_999,
            monolith_crossarea_min_distinct_areas: 3,

            fail_if_live_files_changed: true,
            live_changed_resolution: LiveChangedResolution::Fail,

            commit_and_push: true,
            allow_push_fail: true,

            no_rollback: false,
            rollback_workspace_on_fail: RollbackPolicy::NoneApplied,

            live_repo_guard: true,
            live_repo_guard_scope: LiveRepoGuardScope::Patch,

            patch_jail: true,
            patch_jail_unshare_net: true,

            post_success_audit: true,
            audit_rubric_guard: true,

            lock_on_conflict: "fail".to_string(),
            lock_steal_ttl_secs: 3600,

            blessed_gate_outputs: vec!["audit/results/pytest_junit.xml".to_string()],
            ignore_globs: Vec::new(),

            log_template_issue: "am_patch_issue_{issue}_{ts}.log".to_string(),
            log_template_finalize: "am_patch_finalize_{ts}.log".to_string(),
            success_archive_name: "{repo}-{branch}.zip".to_string(),
            failure_archive_name: "issue_{issue}_attempt{attempt}_failure.zip".to_string(),
            diff_bundle_name: "issue_{issue}_diff.zip".to_string(),
        }
    }
}
