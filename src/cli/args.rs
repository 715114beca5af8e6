//! cli::args
//!
//! Raw flag definitions (clap derive) plus the grammar resolver that turns
//! them, together with whatever positionals followed, into a [`ParsedArgs`]
//! carrying one of the three mode grammars from §4.5.
//!
//! clap's subcommand model doesn't fit this grammar - the three modes share
//! one flat flag set and are disambiguated by which positionals/flags are
//! present, not by a leading verb - so parsing happens in two steps: clap
//! resolves flags and collects leftover positionals, then [`resolve`]
//! decides the mode.

use clap::Parser;

use crate::core::types::{IssueId, IssueIdError, RunMode};

/// Flat flag set shared by all three mode grammars.
#[derive(Parser, Debug)]
#[command(name = "am-patch", about = "Applies a patch to a throwaway workspace, gates it, and promotes it to the live repo", disable_help_flag = true)]
pub struct RawArgs {
    /// Positional arguments: `ISSUE_ID MESSAGE [PATCH_PATH]` for workspace mode,
    /// `[ISSUE_ID [HINT]]` under `-l`/`--rerun-latest`, empty otherwise.
    pub positionals: Vec<String>,

    /// Finalize-live mode: commit the live repo with this message. Must be the final token.
    #[arg(short = 'f', long = "finalize-live", value_name = "MESSAGE")]
    pub finalize_live: Option<String>,

    /// Finalize-workspace mode: promote+commit using the workspace's stored message.
    #[arg(long = "finalize-workspace", value_name = "ISSUE_ID")]
    pub finalize_workspace: Option<String>,

    /// Re-run the most recently seen patch input for `ISSUE_ID` (or the most recent overall).
    #[arg(short = 'l', long = "rerun-latest")]
    pub rerun_latest: bool,

    /// Apply + gate in the workspace, then stop before promotion.
    #[arg(long = "test-mode")]
    pub test_mode: bool,

    /// Refresh the workspace (fetch + reset + clean) before patching.
    #[arg(long = "update-workspace")]
    pub update_workspace: bool,

    /// Force unified-diff classification of the patch input.
    #[arg(short = 'u', long = "unified-patch")]
    pub unified_patch: bool,

    #[arg(long = "allow-non-main")]
    pub allow_non_main: bool,

    #[arg(long = "allow-no-op")]
    pub allow_no_op: bool,

    #[arg(long = "allow-outside-files")]
    pub allow_outside_files: bool,

    #[arg(long = "allow-untouched-files")]
    pub allow_untouched_files: bool,

    #[arg(long = "allow-gates-fail")]
    pub allow_gates_fail: bool,

    /// Keep running every gate in the order even after one fails.
    #[arg(long = "run-all-gates")]
    pub run_all_gates: bool,

    #[arg(long = "skip-compile")]
    pub skip_compile: bool,
    #[arg(long = "skip-ruff")]
    pub skip_ruff: bool,
    #[arg(long = "skip-pytest")]
    pub skip_pytest: bool,
    #[arg(long = "skip-mypy")]
    pub skip_mypy: bool,

    /// Comma-separated gate order override, e.g. `pytest,mypy,ruff`.
    #[arg(long = "gates-order", value_name = "LIST")]
    pub gates_order: Option<String>,

    /// Screen verbosity: quiet|normal|warning|verbose|debug.
    #[arg(long = "verbosity", value_name = "LEVEL")]
    pub verbosity: Option<String>,

    /// File-sink log level: quiet|normal|warning|verbose|debug.
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Path to the TOML config file (default: `<patch_dir>/config.toml`).
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<String>,

    /// Print the resolved configuration and exit.
    #[arg(long = "show-config")]
    pub show_config: bool,

    /// Repeatable `KEY=VALUE` policy override.
    #[arg(long = "override", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Short usage summary.
    #[arg(short = 'h', long = "help")]
    pub help: bool,

    /// Full help, including every flag and its default.
    #[arg(short = 'H', long = "full-help")]
    pub full_help: bool,
}

/// Errors turning raw flags + positionals into a coherent mode.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("issue id must be all digits, got {0:?}")]
    BadIssueId(#[from] IssueIdError),

    #[error(
        "workspace mode needs ISSUE_ID MESSAGE [PATCH_PATH], got {0} positional argument(s)"
    )]
    BadPositionalCount(usize),

    #[error("-f/--finalize-live MESSAGE must be the final token; unexpected trailing argument(s): {0:?}")]
    TrailingAfterFinalizeLive(Vec<String>),

    #[error("--finalize-workspace takes no positional arguments, got {0:?}")]
    TrailingAfterFinalizeWorkspace(Vec<String>),

    #[error("--finalize-live and --finalize-workspace are mutually exclusive")]
    ConflictingFinalizeModes,

    #[error(
        "-l/--rerun-latest takes at most ISSUE_ID [HINT], got {0} positional argument(s)"
    )]
    BadRerunLatestPositionalCount(usize),

    #[error("unknown verbosity/log level {0:?}; expected one of quiet|normal|warning|verbose|debug")]
    BadLevel(String),
}

/// A fully-resolved invocation: which mode, plus whatever that mode needs.
#[derive(Debug, Clone)]
pub struct ParsedArgs {
    pub mode: RunMode,
    pub issue_id: Option<IssueId>,
    pub commit_message: Option<String>,
    pub patch_input: Option<String>,
    /// `-l`'s optional second positional: a patch-name fragment (exact stem
    /// or `_vN` archive variant) that narrows which of an issue's candidate
    /// patches to re-run, per §4.8 step 1. `None` falls back to matching the
    /// `issue_<ID>` prefix.
    pub rerun_hint: Option<String>,
    pub raw: ResolvedFlags,
}

/// The flag portion of [`RawArgs`], stripped of positionals, kept around for
/// [`crate::core::config`] CLI-override application.
#[derive(Debug, Clone)]
pub struct ResolvedFlags {
    pub rerun_latest: bool,
    pub test_mode: bool,
    pub update_workspace: bool,
    pub unified_patch: bool,
    pub allow_non_main: bool,
    pub allow_no_op: bool,
    pub allow_outside_files: bool,
    pub allow_untouched_files: bool,
    pub allow_gates_fail: bool,
    pub run_all_gates: bool,
    pub skip_compile: bool,
    pub skip_ruff: bool,
    pub skip_pytest: bool,
    pub skip_mypy: bool,
    pub gates_order: Option<Vec<String>>,
    pub verbosity: Option<String>,
    pub log_level: Option<String>,
    pub config_path: Option<String>,
    pub show_config: bool,
    pub overrides: Vec<String>,
}

fn validate_level(label: &str, level: &Option<String>) -> Result<(), CliError> {
    if let Some(l) = level {
        let ok = matches!(l.as_str(), "quiet" | "normal" | "warning" | "verbose" | "debug");
        if !ok {
            return Err(CliError::BadLevel(format!("{label}={l}")));
        }
    }
    Ok(())
}

/// Turn parsed flags + leftover positionals into one of the three mode
/// grammars, per §4.5.
pub fn resolve(raw: RawArgs) -> Result<ParsedArgs, CliError> {
    validate_level("verbosity", &raw.verbosity)?;
    validate_level("log-level", &raw.log_level)?;

    if raw.finalize_live.is_some() && raw.finalize_workspace.is_some() {
        return Err(CliError::ConflictingFinalizeModes);
    }

    let flags = ResolvedFlags {
        rerun_latest: raw.rerun_latest,
        test_mode: raw.test_mode,
        update_workspace: raw.update_workspace,
        unified_patch: raw.unified_patch,
        allow_non_main: raw.allow_non_main,
        allow_no_op: raw.allow_no_op,
        allow_outside_files: raw.allow_outside_files,
        allow_untouched_files: raw.allow_untouched_files,
        allow_gates_fail: raw.allow_gates_fail,
        run_all_gates: raw.run_all_gates,
        skip_compile: raw.skip_compile,
        skip_ruff: raw.skip_ruff,
        skip_pytest: raw.skip_pytest,
        skip_mypy: raw.skip_mypy,
        gates_order: raw
            .gates_order
            .as_ref()
            .map(|s| s.split(',').map(|x| x.trim().to_string()).collect()),
        verbosity: raw.verbosity.clone(),
        log_level: raw.log_level.clone(),
        config_path: raw.config_path.clone(),
        show_config: raw.show_config,
        overrides: raw.overrides.clone(),
    };

    if raw.show_config {
        return Ok(ParsedArgs {
            mode: RunMode::ShowConfig,
            issue_id: None,
            commit_message: None,
            patch_input: None,
            rerun_hint: None,
            raw: flags,
        });
    }

    if let Some(message) = raw.finalize_live {
        if !raw.positionals.is_empty() {
            return Err(CliError::TrailingAfterFinalizeLive(raw.positionals));
        }
        return Ok(ParsedArgs {
            mode: RunMode::FinalizeLive,
            issue_id: None,
            commit_message: Some(message),
            patch_input: None,
            rerun_hint: None,
            raw: flags,
        });
    }

    if let Some(issue) = raw.finalize_workspace {
        if !raw.positionals.is_empty() {
            return Err(CliError::TrailingAfterFinalizeWorkspace(raw.positionals));
        }
        return Ok(ParsedArgs {
            mode: RunMode::FinalizeWorkspace,
            issue_id: Some(IssueId::parse(&issue)?),
            commit_message: None,
            patch_input: None,
            rerun_hint: None,
            raw: flags,
        });
    }

    if raw.rerun_latest {
        let (issue_id, rerun_hint) = match raw.positionals.len() {
            0 => (None, None),
            1 => (Some(IssueId::parse(&raw.positionals[0])?), None),
            2 => (Some(IssueId::parse(&raw.positionals[0])?), Some(raw.positionals[1].clone())),
            n => return Err(CliError::BadRerunLatestPositionalCount(n)),
        };
        return Ok(ParsedArgs {
            mode: RunMode::RerunLatest,
            issue_id,
            commit_message: None,
            patch_input: None,
            rerun_hint,
            raw: flags,
        });
    }

    match raw.positionals.len() {
        2 | 3 => {
            let issue_id = IssueId::parse(&raw.positionals[0])?;
            let message = raw.positionals[1].clone();
            let patch_input = raw.positionals.get(2).cloned();
            Ok(ParsedArgs {
                mode: RunMode::Workspace,
                issue_id: Some(issue_id),
                commit_message: Some(message),
                patch_input,
                rerun_hint: None,
                raw: flags,
            })
        }
        n => Err(CliError::BadPositionalCount(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    fn parse(args: &[&str]) -> Result<ParsedArgs, CliError> {
        let mut full = vec!["am-patch"];
        full.extend_from_slice(args);
        let raw = RawArgs::parse_from(full);
        resolve(raw)
    }

    #[test]
    fn workspace_mode_minimal() {
        let parsed = parse(&["42", "fix the thing"]).unwrap();
        assert_eq!(parsed.mode, RunMode::Workspace);
        assert_eq!(parsed.issue_id.unwrap().as_str(), "42");
        assert_eq!(parsed.commit_message.unwrap(), "fix the thing");
        assert!(parsed.patch_input.is_none());
    }

    #[test]
    fn workspace_mode_with_patch_path() {
        let parsed = parse(&["42", "fix it", "patches/issue_42.patch"]).unwrap();
        assert_eq!(parsed.patch_input.unwrap(), "patches/issue_42.patch");
    }

    #[test]
    fn non_numeric_issue_id_rejected() {
        let err = parse(&["abc", "msg"]).unwrap_err();
        assert!(matches!(err, CliError::BadIssueId(_)));
    }

    #[test]
    fn finalize_live_mode() {
        let parsed = parse(&["-f", "ship it"]).unwrap();
        assert_eq!(parsed.mode, RunMode::FinalizeLive);
        assert_eq!(parsed.commit_message.unwrap(), "ship it");
    }

    #[test]
    fn finalize_live_rejects_trailing_tokens() {
        let err = parse(&["-f", "ship it", "extra"]).unwrap_err();
        assert!(matches!(err, CliError::TrailingAfterFinalizeLive(_)));
    }

    #[test]
    fn finalize_workspace_mode() {
        let parsed = parse(&["--finalize-workspace", "17"]).unwrap();
        assert_eq!(parsed.mode, RunMode::FinalizeWorkspace);
        assert_eq!(parsed.issue_id.unwrap().as_str(), "17");
    }

    #[test]
    fn conflicting_finalize_modes_rejected() {
        let err = parse(&["-f", "msg", "--finalize-workspace", "1"]);
        assert!(err.is_err());
    }

    #[test]
    fn rerun_latest_with_issue() {
        let parsed = parse(&["-l", "9"]).unwrap();
        assert_eq!(parsed.mode, RunMode::RerunLatest);
        assert_eq!(parsed.issue_id.unwrap().as_str(), "9");
        assert_eq!(parsed.rerun_hint, None);
    }

    #[test]
    fn rerun_latest_with_issue_and_hint() {
        let parsed = parse(&["-l", "9", "issue_9_v2"]).unwrap();
        assert_eq!(parsed.mode, RunMode::RerunLatest);
        assert_eq!(parsed.issue_id.unwrap().as_str(), "9");
        assert_eq!(parsed.rerun_hint, Some("issue_9_v2".to_string()));
    }

    #[test]
    fn rerun_latest_rejects_more_than_two_positionals() {
        let err = parse(&["-l", "9", "issue_9_v2", "extra"]).unwrap_err();
        assert!(matches!(err, CliError::BadRerunLatestPositionalCount(3)));
    }

    #[test]
    fn show_config_short_circuits_mode() {
        let parsed = parse(&["--show-config"]).unwrap();
        assert_eq!(parsed.mode, RunMode::ShowConfig);
    }

    #[test]
    fn gates_order_override_splits_on_comma() {
        let parsed = parse(&["--gates-order", "pytest,mypy", "42", "msg"]).unwrap();
        assert_eq!(
            parsed.raw.gates_order.unwrap(),
            vec!["pytest".to_string(), "mypy".to_string()]
        );
    }

    #[test]
    fn bad_verbosity_rejected() {
        let err = parse(&["--verbosity", "loud", "42", "msg"]).unwrap_err();
        assert!(matches!(err, CliError::BadLevel(_)));
    }
}
