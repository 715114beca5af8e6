//! scope
//!
//! The Scope Enforcer (C10, §4.10): compares what the patch declared it
//! would touch against what actually changed in the workspace, and fails
//! closed on no-ops, out-of-scope writes, or declared-but-untouched paths.

use std::collections::BTreeSet;

use crate::core::config::Policy;
use crate::core::{Category, RunnerError, Stage};

/// Prefixes that belong to the runner itself, never the patch under test.
const RUNNER_WORKFILE_PREFIXES: &[&str] = &[
    ".am_patch/",
    ".pytest_cache/",
    "__pycache__/",
    ".ruff_cache/",
    ".mypy_cache/",
];

fn glob_match(pattern: &str, path: &str) -> bool {
    fn inner(pat: &[u8], s: &[u8]) -> bool {
        match (pat.first(), s.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pat[1..], s) || (!s.is_empty() && inner(pat, &s[1..]))
            }
            (Some(&p), Some(&c)) if p == c => inner(&pat[1..], &s[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), path.as_bytes())
}

fn is_runner_workfile(path: &str) -> bool {
    if RUNNER_WORKFILE_PREFIXES.iter().any(|p| path.starts_with(p) || path.contains(&format!("/{p}"))) {
        return true;
    }
    path.ends_with(".pyc")
}

/// The result of comparing declared vs. actually-touched files, per §4.10.
#[derive(Debug, Clone, Default)]
pub struct ScopeReport {
    pub touched: BTreeSet<String>,
    pub outside: BTreeSet<String>,
    pub untouched_declared: BTreeSet<String>,
}

/// Evaluate scope for one patch attempt. `after_status` is the set of
/// repo-relative paths reported changed by `git status`/`diff` after
/// patching; `declared` is what the patch said it would touch.
pub fn evaluate(
    policy: &Policy,
    declared: &BTreeSet<String>,
    after_status: &BTreeSet<String>,
) -> Result<ScopeReport, RunnerError> {
    let touched: BTreeSet<String> = after_status
        .iter()
        .filter(|p| !is_runner_workfile(p))
        .filter(|p| !policy.ignore_globs.iter().any(|g| glob_match(g, p)))
        .cloned()
        .collect();

    if touched.is_empty() && !policy.allow_no_op {
        return Err(RunnerError::new(
            Stage::Scope,
            Category::Noop,
            "patch touched no files outside runner-managed paths",
        ));
    }

    let blessed: BTreeSet<&str> = policy.blessed_gate_outputs.iter().map(|s| s.as_str()).collect();
    let outside: BTreeSet<String> = touched
        .iter()
        .filter(|p| !declared.contains(*p) && !blessed.contains(p.as_str()))
        .cloned()
        .collect();

    if !outside.is_empty() && !policy.allow_outside_files {
        return Err(RunnerError::new(
            Stage::Scope,
            Category::Scope,
            format!("patch touched files outside its declared scope: {}", join(&outside)),
        ));
    }

    let untouched_declared: BTreeSet<String> = declared.difference(&touched).cloned().collect();
    if !untouched_declared.is_empty() && !policy.allow_declared_untouched {
        return Err(RunnerError::new(
            Stage::Scope,
            Category::Scope,
            format!("patch declared files it never touched: {}", join(&untouched_declared)),
        ));
    }

    Ok(ScopeReport {
        touched,
        outside,
        untouched_declared,
    })
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Policy {
        Policy::default()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn noop_fails_by_default() {
        let p = policy();
        let err = evaluate(&p, &set(&["a.py"]), &set(&[])).unwrap_err();
        assert_eq!(err.category, Category::Noop);
    }

    #[test]
    fn noop_allowed_when_flagged() {
        let mut p = policy();
        p.allow_no_op = true;
        let report = evaluate(&p, &set(&[]), &set(&[])).unwrap();
        assert!(report.touched.is_empty());
    }

    #[test]
    fn runner_workfiles_excluded_from_touched() {
        let p = policy();
        let report = evaluate(
            &p,
            &set(&["a.py"]),
            &set(&["a.py", ".am_patch/inputs/x.patch", "__pycache__/a.pyc"]),
        )
        .unwrap();
        assert_eq!(report.touched, set(&["a.py"]));
    }

    #[test]
    fn outside_files_fail_unless_allowed() {
        let p = policy();
        let err = evaluate(&p, &set(&["a.py"]), &set(&["a.py", "b.py"])).unwrap_err();
        assert_eq!(err.category, Category::Scope);

        let mut p2 = policy();
        p2.allow_outside_files = true;
        let report = evaluate(&p2, &set(&["a.py"]), &set(&["a.py", "b.py"])).unwrap();
        assert_eq!(report.outside, set(&["b.py"]));
    }

    #[test]
    fn blessed_gate_outputs_never_count_as_outside() {
        let mut p = policy();
        p.blessed_gate_outputs = vec!["audit/results/pytest_junit.xml".to_string()];
        let report = evaluate(
            &p,
            &set(&["a.py"]),
            &set(&["a.py", "audit/results/pytest_junit.xml"]),
        )
        .unwrap();
        assert!(report.outside.is_empty());
    }

    #[test]
    fn untouched_declared_fails_unless_allowed() {
        let p = policy();
        let err = evaluate(&p, &set(&["a.py", "b.py"]), &set(&["a.py"])).unwrap_err();
        assert_eq!(err.category, Category::Scope);

        let mut p2 = policy();
        p2.allow_declared_untouched = true;
        let report = evaluate(&p2, &set(&["a.py", "b.py"]), &set(&["a.py"])).unwrap();
        assert_eq!(report.untouched_declared, set(&["b.py"]));
    }

    #[test]
    fn ignore_globs_exclude_matching_paths() {
        let mut p = policy();
        p.ignore_globs = vec!["*.log".to_string()];
        let report = evaluate(&p, &set(&["a.py"]), &set(&["a.py", "run.log"])).unwrap();
        assert_eq!(report.touched, set(&["a.py"]));
    }
}
