//! patch::input
//!
//! Patch input selection (§4.8): `--rerun-latest` archive pick, an explicit
//! path, or the default `patches/issue_<ID>.<ext>` lookup; then unified-vs-
//! script classification.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::core::paths::Paths;
use crate::core::{Category, RunnerError, Stage};

use super::script::precheck_patch_script;

/// A resolved patch input, ready for execution.
#[derive(Debug, Clone)]
pub struct PatchPlan {
    pub patch_script: PathBuf,
    pub unified_mode: bool,
    pub files_declared: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchInputError {
    #[error("no candidate input found for issue {issue_id} under {dir}")]
    NoCandidate { issue_id: String, dir: PathBuf },

    #[error("ambiguous default patch input for issue {issue_id}: {candidates:?}")]
    Ambiguous {
        issue_id: String,
        candidates: Vec<String>,
    },

    #[error("unsupported patch extension: {0}")]
    UnsupportedExtension(String),

    #[error("explicit --unified-patch requires a .patch/.zip input, got {0}")]
    ExplicitUnifiedMismatch(PathBuf),

    #[error("zip {0} has no .patch entries")]
    ZipHasNoPatchEntries(PathBuf),
}

/// The three recognised default extensions, tried in a fixed, deterministic
/// order when exactly one exists.
const DEFAULT_EXTENSIONS: [&str; 3] = ["py", "patch", "zip"];

/// `patches/issue_<ID>.<ext>` if unique; falls back to `.py` when none
/// exist yet (the canonical "not yet written" default), mirroring
/// `choose_default_patch_input`.
pub fn choose_default_patch_input(
    patch_dir: &Path,
    issue_id: &str,
) -> Result<PathBuf, PatchInputError> {
    let mut existing = Vec::new();
    for ext in DEFAULT_EXTENSIONS {
        let candidate = patch_dir.join(format!("issue_{issue_id}.{ext}"));
        if candidate.exists() {
            existing.push(candidate);
        }
    }
    match existing.len() {
        0 => Ok(patch_dir.join(format!("issue_{issue_id}.py"))),
        1 => Ok(existing.into_iter().next().unwrap()),
        _ => Err(PatchInputError::Ambiguous {
            issue_id: issue_id.to_string(),
            candidates: existing
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect(),
        }),
    }
}

fn zip_has_patch_entry(path: &Path) -> bool {
    std::fs::File::open(path)
        .ok()
        .and_then(|f| zip::ZipArchive::new(f).ok())
        .map(|mut archive| {
            (0..archive.len()).any(|i| {
                archive
                    .by_index(i)
                    .map(|entry| entry.name().ends_with(".patch"))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

/// `.patch` is always unified; `.zip` is unified iff it contains at least
/// one `.patch` entry; `.py` is always a script. Explicit `--unified-patch`
/// requires `.patch`/`.zip`.
pub fn decide_unified_mode(path: &Path, explicit_unified: bool) -> Result<bool, PatchInputError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let auto = match ext.as_str() {
        "patch" => true,
        "py" => false,
        "zip" => zip_has_patch_entry(path),
        other => return Err(PatchInputError::UnsupportedExtension(other.to_string())),
    };

    if ext == "zip" && !auto {
        return Err(PatchInputError::ZipHasNoPatchEntries(path.to_path_buf()));
    }

    if explicit_unified && !auto {
        return Err(PatchInputError::ExplicitUnifiedMismatch(path.to_path_buf()));
    }

    Ok(if explicit_unified { true } else { auto })
}

fn iter_candidate_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            match p.extension().map(|e| e.to_string_lossy().to_lowercase()) {
                Some(ext) if ext == "py" || ext == "patch" => true,
                Some(ext) if ext == "zip" => zip_has_patch_entry(p),
                _ => false,
            }
        })
        .collect()
}

/// Scan `patch_dir`, `patch_dir/successful`, `patch_dir/unsuccessful` for the
/// most recently modified candidate matching `hint_name` (exact stem or
/// `_vN` archive variant) or, absent a hint, the `issue_<ID>` prefix.
pub fn select_latest_issue_patch(
    patch_dir: &Path,
    issue_id: &str,
    hint_name: Option<&str>,
) -> Result<PathBuf, PatchInputError> {
    let dirs = [
        patch_dir.to_path_buf(),
        patch_dir.join("successful"),
        patch_dir.join("unsuccessful"),
    ];

    let issue_prefix = format!("issue_{issue_id}");
    let hint_stem = hint_name.map(|h| {
        Path::new(h)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    let mut candidates = Vec::new();
    for dir in &dirs {
        for path in iter_candidate_files(dir) {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let matches = if let Some(hint_stem) = &hint_stem {
                stem == *hint_stem
                    || stem
                        .strip_prefix(&format!("{hint_stem}_v"))
                        .map(|tail| !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()))
                        .unwrap_or(false)
            } else {
                name.starts_with(&issue_prefix)
            };

            if matches {
                candidates.push(path);
            }
        }
    }

    if candidates.is_empty() {
        return Err(PatchInputError::NoCandidate {
            issue_id: issue_id.to_string(),
            dir: patch_dir.to_path_buf(),
        });
    }

    candidates.sort_by_key(|p| {
        let mtime = std::fs::metadata(p)
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        (mtime, p.clone())
    });
    Ok(candidates.pop().unwrap())
}

/// Parse a patch script's top-level `FILES = [...]` assignment.
pub fn load_files(patch_script: &Path) -> Result<Vec<String>, RunnerError> {
    let text = std::fs::read_to_string(patch_script).map_err(|e| {
        RunnerError::new(
            Stage::Preflight,
            Category::Manifest,
            format!("failed to read patch script: {e}"),
        )
    })?;

    let re = Regex::new(r"(?ms)^FILES\s*=\s*\[(.*?)\]").expect("valid regex");
    let Some(caps) = re.captures(&text) else {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::PatchFiles,
            "patch script must define FILES=[...] at top-level",
        ));
    };

    let inner = &caps[1];
    let entry_re = Regex::new(r#"["']([^"']+)["']"#).expect("valid regex");
    Ok(entry_re
        .captures_iter(inner)
        .map(|c| c[1].to_string())
        .collect())
}

/// Resolve the patch input for this run, per §4.8.
#[allow(clippy::too_many_arguments)]
pub fn resolve_patch_plan(
    rerun_latest: bool,
    explicit_patch: Option<&str>,
    hint_name: Option<&str>,
    issue_id: &str,
    patch_root: &Path,
    explicit_unified: bool,
    ascii_only: bool,
) -> Result<PatchPlan, RunnerError> {
    let patch_script = if rerun_latest {
        select_latest_issue_patch(patch_root, issue_id, hint_name).map_err(|e| {
            RunnerError::new(Stage::Preflight, Category::Manifest, e.to_string())
        })?
    } else if let Some(raw) = explicit_patch {
        let raw_path = Path::new(raw);
        if raw_path.is_absolute() {
            raw_path.to_path_buf()
        } else {
            let cand_cwd = std::env::current_dir()
                .unwrap_or_default()
                .join(raw_path);
            let cand_patchdir = patch_root.join(raw_path);
            if cand_cwd.exists() && Paths::is_under(patch_root, &cand_cwd) {
                cand_cwd
            } else if cand_patchdir.exists() {
                cand_patchdir
            } else {
                return Err(RunnerError::new(
                    Stage::Preflight,
                    Category::Manifest,
                    format!(
                        "patch script not found (tried: {} and {})",
                        cand_cwd.display(),
                        cand_patchdir.display()
                    ),
                ));
            }
        }
    } else {
        choose_default_patch_input(patch_root, issue_id).map_err(|e| {
            RunnerError::new(Stage::Preflight, Category::Manifest, e.to_string())
        })?
    };

    if !patch_script.exists() {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::Manifest,
            format!("patch script not found: {}", patch_script.display()),
        ));
    }
    if !Paths::is_under(patch_root, &patch_script) {
        return Err(RunnerError::new(
            Stage::Preflight,
            Category::PatchPath,
            format!(
                "patch script must be under {} (got {})",
                patch_root.display(),
                patch_script.display()
            ),
        ));
    }

    let unified_mode = decide_unified_mode(&patch_script, explicit_unified).map_err(|e| {
        RunnerError::new(Stage::Preflight, Category::PatchPath, e.to_string())
    })?;

    if !unified_mode {
        precheck_patch_script(&patch_script, ascii_only)?;
    }

    let files_declared = if unified_mode {
        Vec::new()
    } else {
        load_files(&patch_script)?
    };

    Ok(PatchPlan {
        patch_script,
        unified_mode,
        files_declared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_input_falls_back_to_py_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let chosen = choose_default_patch_input(dir.path(), "42").unwrap();
        assert_eq!(chosen.file_name().unwrap(), "issue_42.py");
    }

    #[test]
    fn default_input_prefers_unique_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("issue_42.patch"), "x").unwrap();
        let chosen = choose_default_patch_input(dir.path(), "42").unwrap();
        assert_eq!(chosen.file_name().unwrap(), "issue_42.patch");
    }

    #[test]
    fn default_input_ambiguous_when_multiple_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("issue_7.py"), "x").unwrap();
        std::fs::write(dir.path().join("issue_7.patch"), "y").unwrap();
        assert!(matches!(
            choose_default_patch_input(dir.path(), "7"),
            Err(PatchInputError::Ambiguous { .. })
        ));
    }

    #[test]
    fn unified_mode_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let py = dir.path().join("x.py");
        let patch = dir.path().join("x.patch");
        std::fs::write(&py, "print(1)").unwrap();
        std::fs::write(&patch, "diff --git a/a b/a\n").unwrap();

        assert!(!decide_unified_mode(&py, false).unwrap());
        assert!(decide_unified_mode(&patch, false).unwrap());
        assert!(decide_unified_mode(&patch, true).unwrap());
        assert!(decide_unified_mode(&py, true).is_err());
    }

    #[test]
    fn load_files_parses_top_level_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("issue_1.py");
        std::fs::write(&script, "FILES = [\"a/b.txt\", 'c.txt']\n\ndef run():\n    pass\n").unwrap();
        let files = load_files(&script).unwrap();
        assert_eq!(files, vec!["a/b.txt".to_string(), "c.txt".to_string()]);
    }
}
