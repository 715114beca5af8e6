//! core::config
//!
//! Configuration resolution: defaults -> TOML file -> CLI overrides, per §4.4.
//!
//! # Precedence
//!
//! 1. Built-in defaults ([`schema::Policy::default`])
//! 2. Flattened TOML file (`[git]`, `[paths]`, `[workspace]`, `[patch]`,
//!    `[scope]`, `[gates]`, `[promotion]`, `[security]`, `[logging]`,
//!    `[audit]` sections are merged into one namespace; see
//!    SPEC_FULL.md §C.1 for the recognised legacy aliases)
//! 3. CLI overrides (named flags, then repeatable `--override KEY=VALUE`)
//!
//! Every field's provenance (`default` | `config` | `cli`) is tracked so
//! `show_config` can render it deterministically (§4.4).

pub mod schema;

pub use schema::{LiveChangedResolution, LiveRepoGuardScope, MonolithArea, Policy, RollbackPolicy};

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use toml::Value as TomlValue;

/// Where a field's current value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Default,
    Config,
    Cli,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Source::Default => "default",
            Source::Config => "config",
            Source::Cli => "cli",
        })
    }
}

/// Errors from configuration loading/merging.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("override must be KEY=VALUE, got {0:?}")]
    BadOverride(String),
}

/// A Policy plus a record of where each field's value came from.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub policy: Policy,
    sources: BTreeMap<String, Source>,
}

const SECTIONS: &[&str] = &[
    "git", "paths", "workspace", "patch", "scope", "gates", "promotion", "security", "logging",
    "audit",
];

/// Flatten `[section]` tables into one top-level namespace (first write wins,
/// i.e. an explicit top-level key beats a same-named key nested in a
/// section), and apply the legacy-alias compatibility rules of
/// SPEC_FULL.md §C.1.
fn flatten_sections(raw: &TomlValue) -> BTreeMap<String, TomlValue> {
    let mut out = BTreeMap::new();
    if let Some(table) = raw.as_table() {
        for (k, v) in table {
            out.insert(k.clone(), v.clone());
        }
        for section in SECTIONS {
            if let Some(TomlValue::Table(sec)) = table.get(*section) {
                for (k, v) in sec {
                    out.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }
    }

    if out.contains_key("order") && !out.contains_key("gates_order") {
        if let Some(v) = out.get("order").cloned() {
            out.insert("gates_order".to_string(), v);
        }
    }
    if out.contains_key("enforce_files_only") && !out.contains_key("enforce_allowed_files") {
        if let Some(v) = out.get("enforce_files_only").cloned() {
            out.insert("enforce_allowed_files".to_string(), v);
        }
    }
    if out.contains_key("rollback_on_failure") && !out.contains_key("no_rollback") {
        if let Some(TomlValue::Boolean(b)) = out.get("rollback_on_failure") {
            out.insert("no_rollback".to_string(), TomlValue::Boolean(!b));
        }
    }
    if out.contains_key("delete_on_success") && !out.contains_key("delete_workspace_on_success") {
        if let Some(v) = out.get("delete_on_success").cloned() {
            out.insert("delete_workspace_on_success".to_string(), v);
        }
    }

    out
}

/// Load and flatten a TOML config file. Returns `(map, existed)`.
pub fn load_config_file(path: &Path) -> Result<(BTreeMap<String, TomlValue>, bool), ConfigError> {
    if !path.exists() {
        return Ok((BTreeMap::new(), false));
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let value: TomlValue = toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok((flatten_sections(&value), true))
}

fn as_bool(v: &TomlValue) -> Option<bool> {
    v.as_bool()
}

fn as_monolith_areas(v: &TomlValue) -> Option<Vec<schema::MonolithArea>> {
    let items = v.as_array()?;
    items
        .iter()
        .map(|item| {
            let t = item.as_table()?;
            let prefix = t.get("prefix")?.as_str()?.to_string();
            let area = t.get("area")?.as_str()?.to_string();
            let dynamic = t.get("dynamic").and_then(|d| d.as_str()).map(String::from);
            Some(schema::MonolithArea { prefix, area, dynamic })
        })
        .collect()
}

fn as_str_list(v: &TomlValue) -> Option<Vec<String>> {
    match v {
        TomlValue::Array(items) => Some(
            items
                .iter()
                .filter_map(|x| x.as_str().map(String::from))
                .collect(),
        ),
        TomlValue::String(s) => Some(vec![s.clone()]),
        _ => None,
    }
}

/// Apply one `key=value` pair onto `policy`, returning `true` if the key was
/// recognised. Shared by TOML-file application and CLI/`--override` parsing.
fn apply_field(policy: &mut Policy, key: &str, value: &TomlValue) -> Result<bool, ConfigError> {
    macro_rules! bool_field {
        ($field:ident) => {{
            policy.$field = as_bool(value).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: "expected boolean".to_string(),
            })?;
            return Ok(true);
        }};
    }
    macro_rules! list_field {
        ($field:ident) => {{
            policy.$field = as_str_list(value).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: "expected string or list of strings".to_string(),
            })?;
            return Ok(true);
        }};
    }
    macro_rules! usize_field {
        ($field:ident) => {{
            policy.$field = value
                .as_integer()
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "expected integer".to_string(),
                })? as usize;
            return Ok(true);
        }};
    }

    match key {
        "repo_root" => {
            policy.repo_root = value.as_str().map(String::from);
            return Ok(true);
        }
        "patch_dir" => {
            policy.patch_dir = value
                .as_str()
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "expected string".to_string(),
                })?
                .to_string();
            return Ok(true);
        }
        "default_branch" => {
            policy.default_branch = value.as_str().unwrap_or_default().to_string();
            return Ok(true);
        }
        "require_up_to_date" => bool_field!(require_up_to_date),
        "skip_up_to_date" => bool_field!(skip_up_to_date),
        "enforce_main_branch" => bool_field!(enforce_main_branch),
        "allow_non_main" => bool_field!(allow_non_main),
        "update_workspace" => bool_field!(update_workspace),
        "soft_reset_workspace" => bool_field!(soft_reset_workspace),
        "test_mode" => bool_field!(test_mode),
        "delete_workspace_on_success" => bool_field!(delete_workspace_on_success),
        "ascii_only_patch" => bool_field!(ascii_only_patch),
        "no_op_fail" => bool_field!(no_op_fail),
        "allow_no_op" => bool_field!(allow_no_op),
        "enforce_allowed_files" => bool_field!(enforce_allowed_files),
        "allow_outside_files" => bool_field!(allow_outside_files),
        "declared_untouched_fail" => bool_field!(declared_untouched_fail),
        "allow_declared_untouched" => bool_field!(allow_declared_untouched),
        "unified_patch" => bool_field!(unified_patch),
        "run_all_tests" => bool_field!(run_all_tests),
        "gates_allow_fail" => bool_field!(gates_allow_fail),
        "gates_skip_compile" => bool_field!(gates_skip_compile),
        "gates_skip_ruff" => bool_field!(gates_skip_ruff),
        "gates_skip_pytest" => bool_field!(gates_skip_pytest),
        "gates_skip_mypy" => bool_field!(gates_skip_mypy),
        "gates_order" => list_field!(gates_order),
        "gates_on_partial_apply" => bool_field!(gates_on_partial_apply),
        "gates_on_zero_apply" => bool_field!(gates_on_zero_apply),
        "compile_targets" => list_field!(compile_targets),
        "compile_exclude" => list_field!(compile_exclude),
        "ruff_format" => bool_field!(ruff_format),
        "ruff_autofix" => bool_field!(ruff_autofix),
        "ruff_autofix_legalize_outside" => bool_field!(ruff_autofix_legalize_outside),
        "ruff_targets" => list_field!(ruff_targets),
        "pytest_targets" => list_field!(pytest_targets),
        "pytest_use_venv" => bool_field!(pytest_use_venv),
        "mypy_targets" => list_field!(mypy_targets),
        "docs_watch_include" => list_field!(docs_watch_include),
        "docs_watch_exclude" => list_field!(docs_watch_exclude),
        "docs_required_paths" => list_field!(docs_required_paths),
        "js_extensions" => list_field!(js_extensions),
        "monolith_mode" => {
            let s = value.as_str().unwrap_or("warn_only");
            if !matches!(s, "strict" | "warn_only" | "report_only") {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!(
                        "invalid monolith_mode={s:?}; allowed: strict|warn_only|report_only"
                    ),
                });
            }
            policy.monolith_mode = s.to_string();
            return Ok(true);
        }
        "monolith_on_parse_error" => {
            let s = value.as_str().unwrap_or("warn");
            if !matches!(s, "fail" | "warn") {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("invalid monolith_on_parse_error={s:?}; allowed: fail|warn"),
                });
            }
            policy.monolith_on_parse_error = s.to_string();
            return Ok(true);
        }
        "monolith_areas" => {
            policy.monolith_areas = as_monolith_areas(value).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                message: "expected array of {prefix, area, dynamic?} tables".to_string(),
            })?;
            return Ok(true);
        }
        "monolith_core_areas" => list_field!(monolith_core_areas),
        "monolith_catchall_basenames" => list_field!(monolith_catchall_basenames),
        "monolith_catchall_dirs" => list_field!(monolith_catchall_dirs),
        "monolith_catchall_allowlist" => list_field!(monolith_catchall_allowlist),
        "monolith_new_file_max_loc" => usize_field!(monolith_new_file_max_loc),
        "monolith_new_file_max_exports" => usize_field!(monolith_new_file_max_exports),
        "monolith_new_file_max_imports" => usize_field!(monolith_new_file_max_imports),
        "monolith_large_loc" => usize_field!(monolith_large_loc),
        "monolith_huge_loc" => usize_field!(monolith_huge_loc),
        "monolith_large_allow_loc_increase" => usize_field!(monolith_large_allow_loc_increase),
        "monolith_large_allow_exports_delta" => usize_field!(monolith_large_allow_exports_delta),
        "monolith_large_allow_imports_delta" => usize_field!(monolith_large_allow_imports_delta),
        "monolith_huge_allow_loc_increase" => usize_field!(monolith_huge_allow_loc_increase),
        "monolith_huge_allow_exports_delta" => usize_field!(monolith_huge_allow_exports_delta),
        "monolith_huge_allow_imports_delta" => usize_field!(monolith_huge_allow_imports_delta),
        "monolith_compute_fanin" => bool_field!(monolith_compute_fanin),
        "monolith_hub_fanin_delta" => usize_field!(monolith_hub_fanin_delta),
        "monolith_hub_fanout_delta" => usize_field!(monolith_hub_fanout_delta),
        "monolith_crossarea_min_distinct_areas" => usize_field!(monolith_crossarea_min_distinct_areas),
        "fail_if_live_files_changed" => bool_field!(fail_if_live_files_changed),
        "live_changed_resolution" => {
            let s = value.as_str().unwrap_or("fail");
            policy.live_changed_resolution = match s {
                "fail" => LiveChangedResolution::Fail,
                "overwrite_live" => LiveChangedResolution::OverwriteLive,
                "overwrite_workspace" => LiveChangedResolution::OverwriteWorkspace,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!(
                            "invalid live_changed_resolution={other:?}; allowed: \
                             fail|overwrite_live|overwrite_workspace"
                        ),
                    })
                }
            };
            return Ok(true);
        }
        "commit_and_push" => bool_field!(commit_and_push),
        "allow_push_fail" => bool_field!(allow_push_fail),
        "no_rollback" => bool_field!(no_rollback),
        "rollback_workspace_on_fail" => {
            let s = value.as_str().unwrap_or("none_applied");
            policy.rollback_workspace_on_fail = match s {
                "never" => RollbackPolicy::Never,
                "always" => RollbackPolicy::Always,
                "none_applied" => RollbackPolicy::NoneApplied,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!(
                            "invalid rollback_workspace_on_fail={other:?}; allowed: \
                             never|always|none_applied"
                        ),
                    })
                }
            };
            return Ok(true);
        }
        "live_repo_guard" => bool_field!(live_repo_guard),
        "live_repo_guard_scope" => {
            let s = value.as_str().unwrap_or("patch");
            policy.live_repo_guard_scope = match s {
                "patch" => LiveRepoGuardScope::Patch,
                "patch_and_gates" => LiveRepoGuardScope::PatchAndGates,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: format!("invalid live_repo_guard_scope={other:?}"),
                    })
                }
            };
            return Ok(true);
        }
        "patch_jail" => bool_field!(patch_jail),
        "patch_jail_unshare_net" => bool_field!(patch_jail_unshare_net),
        "post_success_audit" => bool_field!(post_success_audit),
        "audit_rubric_guard" => bool_field!(audit_rubric_guard),
        "lock_on_conflict" => {
            policy.lock_on_conflict = value.as_str().unwrap_or("fail").to_string();
            return Ok(true);
        }
        "lock_steal_ttl_secs" => {
            policy.lock_steal_ttl_secs =
                value
                    .as_integer()
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: "expected integer".to_string(),
                    })? as u64;
            return Ok(true);
        }
        "blessed_gate_outputs" => list_field!(blessed_gate_outputs),
        "ignore_globs" => list_field!(ignore_globs),
        "log_template_issue" => {
            policy.log_template_issue = value.as_str().unwrap_or_default().to_string();
            return Ok(true);
        }
        "log_template_finalize" => {
            policy.log_template_finalize = value.as_str().unwrap_or_default().to_string();
            return Ok(true);
        }
        "success_archive_name" => {
            policy.success_archive_name = value.as_str().unwrap_or_default().to_string();
            return Ok(true);
        }
        "failure_archive_name" => {
            policy.failure_archive_name = value.as_str().unwrap_or_default().to_string();
            return Ok(true);
        }
        "diff_bundle_name" => {
            policy.diff_bundle_name = value.as_str().unwrap_or_default().to_string();
            return Ok(true);
        }
        _ => Ok(false),
    }
}

impl ResolvedPolicy {
    /// Resolve defaults -> TOML file -> (caller applies CLI overrides next).
    pub fn from_config_file(raw: &BTreeMap<String, TomlValue>) -> Result<Self, ConfigError> {
        let mut policy = Policy::default();
        let mut sources = BTreeMap::new();
        for (key, value) in raw {
            if apply_field(&mut policy, key, value)? {
                sources.insert(key.clone(), Source::Config);
            }
        }
        Ok(ResolvedPolicy { policy, sources })
    }

    /// Apply one named CLI override (a flag the CLI parser resolved to a
    /// concrete value), marking its provenance as `cli`.
    pub fn apply_cli_field(&mut self, key: &str, value: TomlValue) -> Result<(), ConfigError> {
        if apply_field(&mut self.policy, key, &value)? {
            self.sources.insert(key.to_string(), Source::Cli);
        }
        Ok(())
    }

    /// Apply a repeatable `--override KEY=VALUE`, with the original's typed
    /// coercion rules (bool, bracketed/comma list, integer, else string).
    pub fn apply_override_str(&mut self, raw: &str) -> Result<(), ConfigError> {
        let (key, value) = parse_override_kv(raw)?;
        self.apply_cli_field(&key, value)
    }

    /// Stable, sorted `key=value (src=...)` rendering for `show_config`
    /// (§4.4): deterministic regardless of argument order.
    pub fn render(&self) -> String {
        let json = serde_json::to_value(&self.policy).expect("Policy serializes");
        let mut lines = Vec::new();
        if let serde_json::Value::Object(map) = json {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            for key in keys {
                let value = &map[&key];
                let src = self
                    .sources
                    .get(&key)
                    .copied()
                    .unwrap_or(Source::Default);
                lines.push(format!("{key}={value} (src={src})"));
            }
        }
        lines.join("\n")
    }

    pub fn source_of(&self, key: &str) -> Source {
        self.sources.get(key).copied().unwrap_or(Source::Default)
    }
}

/// Parse `KEY=VALUE`, coercing `true`/`false` to bool, `[a, b]` or `a,b` to
/// a list, plain integers to int, and anything else to a string - matching
/// `config.py:_parse_override_kv`.
fn parse_override_kv(s: &str) -> Result<(String, TomlValue), ConfigError> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| ConfigError::BadOverride(s.to_string()))?;
    let k = k.trim().to_string();
    let v = v.trim();

    if v.eq_ignore_ascii_case("true") {
        return Ok((k, TomlValue::Boolean(true)));
    }
    if v.eq_ignore_ascii_case("false") {
        return Ok((k, TomlValue::Boolean(false)));
    }
    if v.starts_with('[') && v.ends_with(']') {
        let inner = &v[1..v.len() - 1];
        let items = split_list(inner);
        return Ok((
            k,
            TomlValue::Array(items.into_iter().map(TomlValue::String).collect()),
        ));
    }
    if v.contains(',') {
        let items = split_list(v);
        return Ok((
            k,
            TomlValue::Array(items.into_iter().map(TomlValue::String).collect()),
        ));
    }
    if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        if let Ok(i) = v.parse::<i64>() {
            return Ok((k, TomlValue::Integer(i)));
        }
    }
    Ok((k, TomlValue::String(v.to_string())))
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_default_provenance() {
        let resolved = ResolvedPolicy::from_config_file(&BTreeMap::new()).unwrap();
        assert_eq!(resolved.source_of("default_branch"), Source::Default);
        assert_eq!(resolved.policy.default_branch, "main");
    }

    #[test]
    fn config_file_field_gets_config_provenance() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "default_branch".to_string(),
            TomlValue::String("develop".to_string()),
        );
        let resolved = ResolvedPolicy::from_config_file(&raw).unwrap();
        assert_eq!(resolved.policy.default_branch, "develop");
        assert_eq!(resolved.source_of("default_branch"), Source::Config);
    }

    #[test]
    fn cli_override_wins_and_is_tagged() {
        let mut resolved = ResolvedPolicy::from_config_file(&BTreeMap::new()).unwrap();
        resolved.apply_override_str("allow_no_op=true").unwrap();
        assert!(resolved.policy.allow_no_op);
        assert_eq!(resolved.source_of("allow_no_op"), Source::Cli);
    }

    #[test]
    fn override_parses_bracket_list() {
        let mut resolved = ResolvedPolicy::from_config_file(&BTreeMap::new()).unwrap();
        resolved
            .apply_override_str("ruff_targets=[src, lib]")
            .unwrap();
        assert_eq!(resolved.policy.ruff_targets, vec!["src", "lib"]);
    }

    #[test]
    fn legacy_alias_order_maps_to_gates_order() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "order".to_string(),
            TomlValue::Array(vec![TomlValue::String("pytest".to_string())]),
        );
        let flat = {
            let mut t = toml::map::Map::new();
            t.insert("order".to_string(), raw.remove("order").unwrap());
            flatten_sections(&TomlValue::Table(t))
        };
        let resolved = ResolvedPolicy::from_config_file(&flat).unwrap();
        assert_eq!(resolved.policy.gates_order, vec!["pytest".to_string()]);
    }

    #[test]
    fn invalid_live_changed_resolution_rejected() {
        let mut raw = BTreeMap::new();
        raw.insert(
            "live_changed_resolution".to_string(),
            TomlValue::String("bogus".to_string()),
        );
        let err = ResolvedPolicy::from_config_file(&raw);
        assert!(err.is_err());
    }

    #[test]
    fn show_config_is_order_independent() {
        let mut a = ResolvedPolicy::from_config_file(&BTreeMap::new()).unwrap();
        a.apply_override_str("allow_no_op=true").unwrap();
        a.apply_override_str("test_mode=true").unwrap();

        let mut b = ResolvedPolicy::from_config_file(&BTreeMap::new()).unwrap();
        b.apply_override_str("test_mode=true").unwrap();
        b.apply_override_str("allow_no_op=true").unwrap();

        assert_eq!(a.render(), b.render());
    }
}
