//! patch::unified
//!
//! Unified-diff bundle application (§4.9): decode a `.patch` or the
//! `.patch` entries of a `.zip`, infer the strip depth by probing which
//! prefix yields the most existing targets in the workspace, rewrite
//! headers to that depth, and apply with `git apply --whitespace=nowarn`.

use std::collections::BTreeSet;
use std::path::Path;

use walkdir::WalkDir;

use crate::core::{Category, RunnerError, Stage};
use crate::logging::Logger;

#[derive(Debug, Clone)]
pub struct UnifiedPatchFailure {
    pub name: String,
    pub data: Vec<u8>,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct UnifiedPatchResult {
    pub applied_ok: u32,
    pub applied_fail: u32,
    pub declared_files: Vec<String>,
    pub touched_files: Vec<String>,
    pub failures: Vec<UnifiedPatchFailure>,
}

fn ascii_check(data: &[u8], label: &str) -> Result<(), RunnerError> {
    if data.is_ascii() {
        Ok(())
    } else {
        Err(RunnerError::new(
            Stage::Preflight,
            Category::PatchAscii,
            format!("patch contains non-ascii characters: {label}"),
        ))
    }
}

fn parse_unified_header_paths(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            line.strip_prefix("--- ")
                .or_else(|| line.strip_prefix("+++ "))
                .map(|rest| rest.trim().split('\t').next().unwrap_or("").trim().to_string())
        })
        .collect()
}

fn normalize_patch_path(p: &str) -> String {
    let mut p = p.trim();
    if p == "/dev/null" || p == "dev/null" {
        return "/dev/null".to_string();
    }
    for prefix in ["a/", "b/"] {
        if let Some(rest) = p.strip_prefix(prefix) {
            p = rest;
            break;
        }
    }
    p.strip_prefix("./").unwrap_or(p).trim().to_string()
}

fn split_abs_like(p: &str) -> Vec<String> {
    p.trim()
        .trim_start_matches('/')
        .split('/')
        .filter(|x| !x.is_empty())
        .map(String::from)
        .collect()
}

fn candidate_strips(parts: &[String]) -> Vec<(usize, String)> {
    (0..parts.len())
        .filter_map(|i| {
            let rel = parts[i..].join("/");
            (!rel.is_empty()).then_some((i, rel))
        })
        .collect()
}

/// Probe every strip depth against the workspace tree; unambiguous iff one
/// depth strictly maximizes the count of existing targets.
fn infer_strip_depth(repo: &Path, paths: &[String]) -> Option<usize> {
    let mut scored = std::collections::BTreeMap::new();
    for raw in paths {
        let n = normalize_patch_path(raw);
        if n == "/dev/null" || n.is_empty() {
            continue;
        }
        let parts = split_abs_like(&n);
        for (i, rel) in candidate_strips(&parts) {
            if repo.join(&rel).exists() {
                *scored.entry(i).or_insert(0) += 1;
            }
        }
    }
    if scored.is_empty() {
        return Some(0);
    }
    let best = *scored.values().max().unwrap();
    let best_ns: Vec<usize> = scored
        .iter()
        .filter(|(_, &v)| v == best)
        .map(|(&n, _)| n)
        .collect();
    (best_ns.len() == 1).then_some(best_ns[0])
}

fn rewrite_patch_paths(text: &str, strip: usize) -> (String, Vec<String>) {
    let mut touched = Vec::new();
    let mut seen = BTreeSet::new();
    let mut out = String::new();

    for line in text.split_inclusive('\n') {
        if let Some(stripped) = line.strip_prefix("diff --git ") {
            let parts: Vec<&str> = stripped.trim_end_matches('\n').split_whitespace().collect();
            if parts.len() >= 2 {
                let a_norm = normalize_patch_path(parts[0]);
                let b_norm = normalize_patch_path(parts[1]);
                let a_parts = split_abs_like(&a_norm);
                let b_parts = split_abs_like(&b_norm);
                let mut a_rel = if strip < a_parts.len() { a_parts[strip..].join("/") } else { a_parts.join("/") };
                let mut b_rel = if strip < b_parts.len() { b_parts[strip..].join("/") } else { b_parts.join("/") };
                if a_rel.starts_with('/') || a_rel.split('/').any(|c| c == "..") {
                    a_rel = "/dev/null".to_string();
                }
                if b_rel.starts_with('/') || b_rel.split('/').any(|c| c == "..") {
                    b_rel = "/dev/null".to_string();
                }
                out.push_str(&format!("diff --git a/{a_rel} b/{b_rel}\n"));
                continue;
            }
        }
        if let Some(rest) = line.strip_prefix("--- ").or_else(|| line.strip_prefix("+++ ")) {
            let prefix = &line[..4];
            let rest = rest.trim_end_matches('\n');
            let path_part = rest.split('\t').next().unwrap_or("").trim();
            let norm = normalize_patch_path(path_part);
            if norm == "/dev/null" || norm.is_empty() {
                out.push_str(prefix);
                out.push_str("/dev/null\n");
                continue;
            }
            let parts = split_abs_like(&norm);
            let mut rel = if strip < parts.len() { parts[strip..].join("/") } else { parts.join("/") };
            if rel.starts_with('/') || rel.split('/').any(|c| c == "..") {
                rel = "/dev/null".to_string();
            }
            out.push_str(prefix);
            out.push_str(&rel);
            out.push('\n');
            if rel != "/dev/null" && !rel.is_empty() && seen.insert(rel.clone()) {
                touched.push(rel);
            }
            continue;
        }
        out.push_str(line);
    }

    (out, touched)
}

fn resolve_touched_best_effort(repo: &Path, raw_paths: &[String], strip: Option<usize>) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = BTreeSet::new();

    let all_files: Vec<String> = WalkDir::new(repo)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(repo)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();

    for raw in raw_paths {
        let n = normalize_patch_path(raw);
        if n == "/dev/null" || n.is_empty() {
            continue;
        }
        let parts = split_abs_like(&n);

        if let Some(strip) = strip {
            let rel = if strip < parts.len() { parts[strip..].join("/") } else { parts.join("/") };
            if !rel.is_empty() && seen.insert(rel.clone()) {
                out.push(rel);
            }
            continue;
        }

        let tail_len = parts.len().min(6);
        let tail = parts[parts.len() - tail_len..].join("/");
        let candidates: Vec<&String> = all_files
            .iter()
            .filter(|f| f.ends_with(&format!("/{tail}")) || **f == tail)
            .collect();
        if candidates.len() == 1 {
            let rel = candidates[0].clone();
            if seen.insert(rel.clone()) {
                out.push(rel);
            }
        }
    }
    out.sort();
    out
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = crate::core::fsutil::tmp_path_for_atomic_write(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

fn patch_entries_from(src: &Path, ascii_only: bool) -> Result<Vec<(String, Vec<u8>)>, RunnerError> {
    let ext = src.extension().map(|e| e.to_string_lossy().to_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "patch" => {
            let data = std::fs::read(src).map_err(|e| {
                RunnerError::new(Stage::Preflight, Category::PatchPath, format!("failed to read {}: {e}", src.display()))
            })?;
            if ascii_only {
                ascii_check(&data, &src.to_string_lossy())?;
            }
            let name = src.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            Ok(vec![(name, data)])
        }
        "zip" => {
            let file = std::fs::File::open(src).map_err(|e| {
                RunnerError::new(Stage::Preflight, Category::PatchPath, format!("failed to open {}: {e}", src.display()))
            })?;
            let mut archive = zip::ZipArchive::new(file).map_err(|e| {
                RunnerError::new(Stage::Preflight, Category::PatchPath, format!("bad zip {}: {e}", src.display()))
            })?;
            let mut names: Vec<String> = (0..archive.len())
                .filter_map(|i| archive.by_index(i).ok().map(|f| f.name().to_string()))
                .filter(|n| n.ends_with(".patch"))
                .collect();
            names.sort();

            let mut entries = Vec::new();
            for name in names {
                if Path::new(&name).is_absolute() || name.split('/').any(|c| c == "..") {
                    continue;
                }
                let mut zf = archive.by_name(&name).map_err(|e| {
                    RunnerError::new(Stage::Preflight, Category::PatchPath, format!("missing entry {name}: {e}"))
                })?;
                let mut data = Vec::new();
                std::io::copy(&mut zf, &mut data).map_err(|e| {
                    RunnerError::new(Stage::Preflight, Category::PatchPath, format!("failed reading {name}: {e}"))
                })?;
                if ascii_only {
                    ascii_check(&data, &format!("{}:{name}", src.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()))?;
                }
                let short_name = Path::new(&name)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or(name);
                entries.push((short_name, data));
            }
            Ok(entries)
        }
        other => Err(RunnerError::new(
            Stage::Preflight,
            Category::PatchPath,
            format!("unified patch input must be .patch or .zip, got .{other}"),
        )),
    }
}

/// Apply every `.patch` entry in `patch_input` against `workspace_repo`, in
/// sorted order, per §4.9. Per-entry failures don't abort the bundle.
pub fn run_unified_patch_bundle(
    logger: &mut Logger,
    patch_input: &Path,
    workspace_repo: &Path,
    ascii_only: bool,
    strip_override: Option<usize>,
) -> Result<UnifiedPatchResult, RunnerError> {
    if !patch_input.exists() {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::PatchPath,
            format!("patch input not found: {}", patch_input.display()),
        ));
    }

    let entries = patch_entries_from(patch_input, ascii_only)?;

    let mut applied_ok = 0u32;
    let mut applied_fail = 0u32;
    let mut failures = Vec::new();
    let mut declared_all = BTreeSet::new();
    let mut touched_all = BTreeSet::new();

    for (name, data) in entries {
        let text = String::from_utf8_lossy(&data).into_owned();
        let raw_paths = parse_unified_header_paths(&text);

        logger.section("UNIFIED PATCH (attempt)");
        logger.line(&format!("patch_name={name}"));

        let strip = if let Some(strip) = strip_override {
            logger.line(&format!("patch_strip={strip} (config)"));
            Some(strip)
        } else {
            let inferred = infer_strip_depth(workspace_repo, &raw_paths);
            match inferred {
                Some(s) => logger.line(&format!("patch_strip={s} (inferred)")),
                None => logger.line("patch_strip=AMBIGUOUS"),
            }
            inferred
        };

        let touched_resolved = resolve_touched_best_effort(workspace_repo, &raw_paths, strip);
        for p in &touched_resolved {
            touched_all.insert(p.clone());
            declared_all.insert(p.clone());
        }

        let Some(strip) = strip else {
            applied_fail += 1;
            let reason = "ambiguous strip depth; set unified_patch_strip to disambiguate".to_string();
            logger.line(&format!("result=FAIL reason={reason}"));
            failures.push(UnifiedPatchFailure { name, data, reason });
            continue;
        };

        let (rewritten_text, rewritten_touched) = rewrite_patch_paths(&text, strip);
        for p in &rewritten_touched {
            touched_all.insert(p.clone());
            declared_all.insert(p.clone());
        }

        let patch_path = workspace_repo.join(".am_patch").join("inputs").join(&name);
        if let Err(e) = write_atomic(&patch_path, rewritten_text.as_bytes()) {
            applied_fail += 1;
            let reason = format!("failed to stage rewritten patch: {e}");
            logger.line(&format!("result=FAIL reason={reason}"));
            failures.push(UnifiedPatchFailure { name, data, reason });
            continue;
        }

        let argv = vec![
            "git".to_string(),
            "apply".to_string(),
            "--whitespace=nowarn".to_string(),
            patch_path.to_string_lossy().into_owned(),
        ];
        let output = logger.run_logged(&argv, Some(workspace_repo), &[]);
        if !output.ok() {
            applied_fail += 1;
            let reason = format!("git apply failed (rc={})", output.returncode);
            logger.line(&format!("result=FAIL reason={reason}"));
            failures.push(UnifiedPatchFailure { name, data, reason });
            continue;
        }

        applied_ok += 1;
        logger.line("result=OK");
    }

    let declared_files: Vec<String> = declared_all.into_iter().collect();
    let touched_files: Vec<String> = touched_all.into_iter().collect();

    logger.section("UNIFIED PATCH (summary)");
    logger.line(&format!("applied_ok={applied_ok}"));
    logger.line(&format!("applied_fail={applied_fail}"));
    logger.line(&format!("declared_files={}", declared_files.join(",")));
    logger.line(&format!("touched_files={}", touched_files.join(",")));
    if !failures.is_empty() {
        logger.line(&format!(
            "failed_patches={}",
            failures.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(",")
        ));
    }

    Ok(UnifiedPatchResult {
        applied_ok,
        applied_fail,
        declared_files,
        touched_files,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Level;
    use std::process::Command;

    fn init_repo(dir: &Path) {
        Command::new("git").args(["init", "-q", "-b", "main"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.email", "a@b.c"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["config", "user.name", "a"]).current_dir(dir).output().unwrap();
        std::fs::write(dir.join("README.md"), "hi\n").unwrap();
        Command::new("git").args(["add", "-A"]).current_dir(dir).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir).output().unwrap();
    }

    fn logger(dir: &Path) -> Logger {
        Logger::new(&dir.join("log.txt"), &dir.join("current_log"), Level::Quiet, Level::Quiet).unwrap()
    }

    #[test]
    fn normalize_strips_ab_prefixes() {
        assert_eq!(normalize_patch_path("a/src/main.rs"), "src/main.rs");
        assert_eq!(normalize_patch_path("b/src/main.rs"), "src/main.rs");
        assert_eq!(normalize_patch_path("/dev/null"), "/dev/null");
    }

    #[test]
    fn applies_simple_patch_adding_file() {
        let root = tempfile::tempdir().unwrap();
        init_repo(root.path());
        let mut logger = logger(root.path());

        let patch_text = "diff --git a/docs/x.txt b/docs/x.txt\nnew file mode 100644\nindex 0000000..1111111\n--- /dev/null\n+++ b/docs/x.txt\n@@ -0,0 +1 @@\n+marker\n";
        let patch_path = root.path().join("issue_42.patch");
        std::fs::write(&patch_path, patch_text).unwrap();

        let result = run_unified_patch_bundle(&mut logger, &patch_path, root.path(), true, None).unwrap();
        assert_eq!(result.applied_ok, 1);
        assert_eq!(result.applied_fail, 0);
        assert!(root.path().join("docs/x.txt").exists());
        assert_eq!(std::fs::read_to_string(root.path().join("docs/x.txt")).unwrap(), "marker\n");
    }

    #[test]
    fn ascii_check_rejects_non_ascii_patch() {
        let root = tempfile::tempdir().unwrap();
        init_repo(root.path());
        let mut logger = logger(root.path());
        let patch_path = root.path().join("issue_1.patch");
        std::fs::write(&patch_path, "diff --git a/x b/x\n# café\n").unwrap();
        let err = run_unified_patch_bundle(&mut logger, &patch_path, root.path(), true, None).unwrap_err();
        assert_eq!(err.category, Category::PatchAscii);
    }
}
