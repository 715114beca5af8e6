//! gates
//!
//! The Gate Pipeline (C11, §4.11): an ordered battery of quality checks run
//! via the Command Runner, each interpreted purely by exit code.

pub mod monolith;

use std::path::Path;

use crate::core::config::Policy;
use crate::core::{Category, RunnerError, Stage};
use crate::git::GitOps;
use crate::logging::event::{Event, EventSink};
use crate::logging::Logger;

#[derive(Debug, Clone)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub skipped: bool,
    pub detail: String,
    /// Paths a gate wrote outside the declared set that it wants legalised
    /// into the issue's allowed-union rather than treated as a violation.
    /// Only `ruff`, when `ruff_autofix_legalize_outside` is set, ever
    /// populates this.
    pub legalized: Vec<String>,
}

impl GateResult {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        GateResult { name: name.to_string(), passed: true, skipped: false, detail: detail.into(), legalized: Vec::new() }
    }
    fn fail(name: &str, detail: impl Into<String>) -> Self {
        GateResult { name: name.to_string(), passed: false, skipped: false, detail: detail.into(), legalized: Vec::new() }
    }
    fn skip(name: &str) -> Self {
        GateResult { name: name.to_string(), passed: true, skipped: true, detail: "skipped".to_string(), legalized: Vec::new() }
    }
}

fn status_paths(logger: &mut Logger, workdir: &Path) -> std::collections::BTreeSet<String> {
    GitOps::new(workdir)
        .status_porcelain(logger)
        .unwrap_or_default()
        .iter()
        .filter_map(|line| {
            let rest = line.get(3..)?;
            let path = rest.split(" -> ").last().unwrap_or(rest).trim().trim_matches('"');
            if path.is_empty() { None } else { Some(path.to_string()) }
        })
        .collect()
}

/// Paths that became dirty between `before` and `after` (an autofix pass)
/// and fall outside `declared` - candidates to legalise into the
/// allowed-union rather than block on.
fn newly_dirty_outside_declared(
    before: &std::collections::BTreeSet<String>,
    after: &std::collections::BTreeSet<String>,
    declared: &[String],
) -> Vec<String> {
    after
        .difference(before)
        .filter(|p| !declared.iter().any(|d| *d == **p))
        .cloned()
        .collect()
}

fn run_exe(logger: &mut Logger, workdir: &Path, argv: &[String], env: &[(String, String)]) -> (bool, String) {
    let r = logger.run_logged(argv, Some(workdir), env);
    (r.ok(), if r.ok() { String::new() } else { format!("rc={} stderr={}", r.returncode, r.stderr.trim()) })
}

fn gate_compile(policy: &Policy, logger: &mut Logger, workdir: &Path) -> GateResult {
    let mut argv = vec!["python3".to_string(), "-m".to_string(), "compileall".to_string(), "-q".to_string()];
    for ex in &policy.compile_exclude {
        argv.push("-x".to_string());
        argv.push(ex.clone());
    }
    argv.extend(policy.compile_targets.iter().cloned());
    let (ok, detail) = run_exe(logger, workdir, &argv, &[]);
    if ok { GateResult::pass("compile", "") } else { GateResult::fail("compile", detail) }
}

fn gate_ruff(policy: &Policy, logger: &mut Logger, workdir: &Path, declared: &[String]) -> GateResult {
    if policy.ruff_format {
        let mut argv = vec!["ruff".to_string(), "format".to_string()];
        argv.extend(policy.ruff_targets.iter().cloned());
        run_exe(logger, workdir, &argv, &[]);
    }

    let mut check = vec!["ruff".to_string(), "check".to_string()];
    check.extend(policy.ruff_targets.iter().cloned());
    let (ok, detail) = run_exe(logger, workdir, &check, &[]);
    if ok {
        return GateResult::pass("ruff", "");
    }

    if policy.ruff_autofix {
        let before = status_paths(logger, workdir);
        let mut fix = check.clone();
        fix.push("--fix".to_string());
        run_exe(logger, workdir, &fix, &[]);
        let (ok2, detail2) = run_exe(logger, workdir, &check, &[]);

        let mut result = if ok2 { GateResult::pass("ruff", "fixed") } else { GateResult::fail("ruff", detail2) };
        if policy.ruff_autofix_legalize_outside {
            let after = status_paths(logger, workdir);
            result.legalized = newly_dirty_outside_declared(&before, &after, declared);
        }
        return result;
    }

    GateResult::fail("ruff", detail)
}

fn gate_pytest(policy: &Policy, logger: &mut Logger, workdir: &Path) -> GateResult {
    let mut argv = vec!["pytest".to_string()];
    argv.extend(policy.pytest_targets.iter().cloned());

    let env = if policy.pytest_use_venv {
        let venv = workdir.join(".venv");
        let bin = venv.join("bin");
        let existing_path = std::env::var("PATH").unwrap_or_default();
        vec![
            ("VIRTUAL_ENV".to_string(), venv.to_string_lossy().into_owned()),
            ("PATH".to_string(), format!("{}:{}", bin.to_string_lossy(), existing_path)),
        ]
    } else {
        Vec::new()
    };

    let (ok, detail) = run_exe(logger, workdir, &argv, &env);
    if ok { GateResult::pass("pytest", "") } else { GateResult::fail("pytest", detail) }
}

fn gate_mypy(policy: &Policy, logger: &mut Logger, workdir: &Path) -> GateResult {
    let mut argv = vec!["mypy".to_string()];
    argv.extend(policy.mypy_targets.iter().cloned());
    let (ok, detail) = run_exe(logger, workdir, &argv, &[]);
    if ok { GateResult::pass("mypy", "") } else { GateResult::fail("mypy", detail) }
}

fn path_matches_any(path: &str, globs: &[String]) -> bool {
    globs.iter().any(|g| {
        if let Some(prefix) = g.strip_suffix('*') {
            path.starts_with(prefix)
        } else {
            path == g
        }
    })
}

fn gate_docs(policy: &Policy, delta: &[String]) -> GateResult {
    let watched = delta.iter().any(|p| {
        path_matches_any(p, &policy.docs_watch_include) && !path_matches_any(p, &policy.docs_watch_exclude)
    });
    if !watched {
        return GateResult::pass("docs", "no watched paths in delta");
    }
    let missing: Vec<&String> = policy
        .docs_required_paths
        .iter()
        .filter(|req| !delta.iter().any(|p| p == *req))
        .collect();
    if missing.is_empty() {
        GateResult::pass("docs", "")
    } else {
        GateResult::fail(
            "docs",
            format!("watched source changed without updating: {:?}", missing),
        )
    }
}

fn gate_js(policy: &Policy, logger: &mut Logger, workdir: &Path, touched: &[String]) -> GateResult {
    let js_files: Vec<&String> = touched
        .iter()
        .filter(|p| policy.js_extensions.iter().any(|ext| p.ends_with(ext.as_str())))
        .filter(|p| workdir.join(p).exists())
        .collect();
    if js_files.is_empty() {
        return GateResult::pass("js", "no js files touched");
    }
    for f in &js_files {
        let argv = vec!["node".to_string(), "--check".to_string(), (*f).clone()];
        let (ok, detail) = run_exe(logger, workdir, &argv, &[]);
        if !ok {
            return GateResult::fail("js", format!("{f}: {detail}"));
        }
    }
    GateResult::pass("js", "")
}

/// Run every gate named in `policy.gates_order`, honoring skip flags,
/// `allow_fail`, and `run_all_tests`, emitting `OK:<gate>`/`FAIL:<gate>`
/// progress to `sink`.
pub fn run_pipeline(
    logger: &mut Logger,
    sink: Option<&mut EventSink>,
    policy: &Policy,
    workdir: &Path,
    declared: &[String],
    touched: &[String],
    monolith_baseline: Option<&Path>,
) -> Result<Vec<GateResult>, RunnerError> {
    let mut sink = sink;
    let mut results = Vec::new();
    let mut any_failed = false;

    for kind in &policy.gates_order {
        let skip = match kind.as_str() {
            "compile" => policy.gates_skip_compile,
            "ruff" => policy.gates_skip_ruff,
            "pytest" => policy.gates_skip_pytest,
            "mypy" => policy.gates_skip_mypy,
            _ => false,
        };

        let result = if skip {
            GateResult::skip(kind)
        } else {
            match kind.as_str() {
                "compile" => gate_compile(policy, logger, workdir),
                "ruff" => gate_ruff(policy, logger, workdir, declared),
                "pytest" => gate_pytest(policy, logger, workdir),
                "mypy" => gate_mypy(policy, logger, workdir),
                "docs" => gate_docs(policy, touched),
                "js" => gate_js(policy, logger, workdir, touched),
                "monolith" => monolith::run(policy, workdir, monolith_baseline, touched),
                other => GateResult::fail(other, format!("unknown gate kind: {other}")),
            }
        };

        if let Some(sink) = sink.as_deref_mut() {
            sink.emit(&Event::gate(&result.name, result.passed, Some(result.detail.as_str())));
        }
        logger.line(&format!(
            "{}:{}",
            if result.passed { "OK" } else { "FAIL" },
            result.name
        ));

        let failed = !result.passed;
        results.push(result);

        if failed {
            any_failed = true;
            if !policy.gates_allow_fail && !policy.run_all_tests {
                break;
            }
        }
    }

    if any_failed && !policy.gates_allow_fail {
        let failed_names: Vec<&str> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.name.as_str())
            .collect();
        return Err(RunnerError::new(
            Stage::Gates,
            Category::Gates,
            format!("gate(s) failed: {}", failed_names.join(", ")),
        ));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn legalize_outside_ignores_files_already_declared() {
        let before: BTreeSet<String> = BTreeSet::new();
        let after: BTreeSet<String> = ["a.py".to_string(), "b.py".to_string()].into_iter().collect();
        let legalized = newly_dirty_outside_declared(&before, &after, &["a.py".to_string()]);
        assert_eq!(legalized, vec!["b.py".to_string()]);
    }

    #[test]
    fn legalize_outside_ignores_files_dirty_before_the_autofix_ran() {
        let before: BTreeSet<String> = ["already_dirty.py".to_string()].into_iter().collect();
        let after: BTreeSet<String> = ["already_dirty.py".to_string(), "fresh.py".to_string()].into_iter().collect();
        let legalized = newly_dirty_outside_declared(&before, &after, &[]);
        assert_eq!(legalized, vec!["fresh.py".to_string()]);
    }

    #[test]
    fn docs_gate_passes_when_no_watched_paths_touched() {
        let mut policy = Policy::default();
        policy.docs_watch_include = vec!["src/".to_string()];
        policy.docs_required_paths = vec!["docs/CHANGELOG.md".to_string()];
        let result = gate_docs(&policy, &["tests/a.py".to_string()]);
        assert!(result.passed);
    }

    #[test]
    fn docs_gate_fails_when_watched_path_changed_without_docs() {
        let mut policy = Policy::default();
        policy.docs_watch_include = vec!["src/".to_string()];
        policy.docs_required_paths = vec!["docs/CHANGELOG.md".to_string()];
        let result = gate_docs(&policy, &["src/lib.rs".to_string()]);
        assert!(!result.passed);
    }

    #[test]
    fn docs_gate_passes_when_required_doc_present_in_delta() {
        let mut policy = Policy::default();
        policy.docs_watch_include = vec!["src/".to_string()];
        policy.docs_required_paths = vec!["docs/CHANGELOG.md".to_string()];
        let result = gate_docs(&policy, &["src/lib.rs".to_string(), "docs/CHANGELOG.md".to_string()]);
        assert!(result.passed);
    }
}
