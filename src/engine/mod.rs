//! engine
//!
//! Orchestrates the full command lifecycle: parse argv, resolve the policy
//! (defaults -> config file -> CLI overrides), then execute the chosen mode
//! and print the final summary (§4.16).

pub mod plan;
pub mod runner;

pub use plan::{build, ExecutionPlan};
pub use runner::{execute, FinalSummary};

use std::path::{Path, PathBuf};

use toml::Value as TomlValue;

use crate::cli::{self, Invocation, ParsedArgs, ResolvedFlags};
use crate::core::config::{ConfigError, Policy, ResolvedPolicy};

/// Errors that can stop a run before `runner::execute` is ever reached.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Cli(#[from] cli::CliError),
    #[error("{0}")]
    Config(#[from] ConfigError),
}

fn default_config_path() -> PathBuf {
    Path::new(&Policy::default().patch_dir).join("config.toml")
}

/// Apply every flag in [`ResolvedFlags`] that the user actually set onto
/// `resolved`, tagging each with `Source::Cli`. Booleans are additive
/// (`false` means "not passed", not "force off"), matching the flags'
/// meaning as enable-switches in [`crate::cli::args::RawArgs`].
fn apply_cli_overrides(resolved: &mut ResolvedPolicy, raw: &ResolvedFlags) -> Result<(), ConfigError> {
    let mut set_bool = |key: &str, value: bool| -> Result<(), ConfigError> {
        if value {
            resolved.apply_cli_field(key, TomlValue::Boolean(true))?;
        }
        Ok(())
    };

    set_bool("test_mode", raw.test_mode)?;
    set_bool("update_workspace", raw.update_workspace)?;
    set_bool("unified_patch", raw.unified_patch)?;
    set_bool("allow_non_main", raw.allow_non_main)?;
    set_bool("allow_no_op", raw.allow_no_op)?;
    set_bool("allow_outside_files", raw.allow_outside_files)?;
    set_bool("allow_declared_untouched", raw.allow_untouched_files)?;
    set_bool("gates_allow_fail", raw.allow_gates_fail)?;
    set_bool("run_all_tests", raw.run_all_gates)?;
    set_bool("gates_skip_compile", raw.skip_compile)?;
    set_bool("gates_skip_ruff", raw.skip_ruff)?;
    set_bool("gates_skip_pytest", raw.skip_pytest)?;
    set_bool("gates_skip_mypy", raw.skip_mypy)?;

    if let Some(order) = &raw.gates_order {
        resolved.apply_cli_field(
            "gates_order",
            TomlValue::Array(order.iter().cloned().map(TomlValue::String).collect()),
        )?;
    }

    for raw_override in &raw.overrides {
        resolved.apply_override_str(raw_override)?;
    }

    Ok(())
}

/// Resolve the policy for one invocation: defaults, the TOML config file
/// (explicit `--config` or `<patch_dir>/config.toml`), then CLI overrides.
pub fn resolve_policy(parsed: &ParsedArgs) -> Result<ResolvedPolicy, EngineError> {
    let config_path = parsed
        .raw
        .config_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let (raw_config, _existed) = crate::core::config::load_config_file(&config_path)?;
    let mut resolved = ResolvedPolicy::from_config_file(&raw_config)?;
    apply_cli_overrides(&mut resolved, &parsed.raw)?;
    Ok(resolved)
}

/// Full entry point: parse argv, resolve config, execute, print, return the
/// process exit code. Never panics on user-facing errors - everything short
/// of a bug is reported on stdout/stderr and reflected in the exit code.
pub fn run<I, T>(argv: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let parsed = match cli::parse(argv) {
        Ok(Invocation::Run(parsed)) => parsed,
        Ok(Invocation::ShortHelp(text)) | Ok(Invocation::FullHelp(text)) => {
            println!("{text}");
            return 0;
        }
        Err(e) => {
            eprintln!("am-patch: {e}");
            return 2;
        }
    };

    let resolved = match resolve_policy(&parsed) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("am-patch: {e}");
            return 2;
        }
    };

    if matches!(parsed.mode, crate::core::types::RunMode::ShowConfig) {
        println!("{}", resolved.render());
        return 0;
    }

    let summary = runner::execute(&parsed, &resolved);
    for line in summary.render() {
        println!("{line}");
    }
    summary.exit_code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_policy_applies_boolean_cli_flags() {
        let parsed = cli::parse(["am-patch", "--test-mode", "42", "fix it"]).unwrap();
        let crate::cli::Invocation::Run(parsed) = parsed else { panic!("expected Run") };
        let resolved = resolve_policy(&parsed).unwrap();
        assert!(resolved.policy.test_mode);
    }

    #[test]
    fn resolve_policy_leaves_unset_bools_at_default() {
        let parsed = cli::parse(["am-patch", "42", "fix it"]).unwrap();
        let crate::cli::Invocation::Run(parsed) = parsed else { panic!("expected Run") };
        let resolved = resolve_policy(&parsed).unwrap();
        assert!(!resolved.policy.test_mode);
    }

    #[test]
    fn resolve_policy_applies_repeatable_override() {
        let parsed = cli::parse(["am-patch", "--override", "allow_no_op=true", "42", "fix it"]).unwrap();
        let crate::cli::Invocation::Run(parsed) = parsed else { panic!("expected Run") };
        let resolved = resolve_policy(&parsed).unwrap();
        assert!(resolved.policy.allow_no_op);
    }

    #[test]
    fn run_show_config_prints_and_exits_zero() {
        let code = run(["am-patch", "--show-config"]);
        assert_eq!(code, 0);
    }
}
