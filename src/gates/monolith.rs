//! gates::monolith
//!
//! The structural "no monoliths" guard (§4.11.1): classifies every touched
//! file into a configured *area*, computes `(loc, exports, imports)` via a
//! Python-syntax-aware line scan, and raises one of six flag categories -
//! Catchall, New-file thresholds, Growth thresholds, Hub thresholds,
//! Cross-area, and Core boundary - subject to `monolith_mode` and
//! `monolith_on_parse_error`.
//!
//! Hub (fan-in/fan-out) checks only run when `monolith_compute_fanin` is
//! set, and even then fan-in is approximated over the touched batch rather
//! than a whole-repo import graph - consistent with every grounding
//! fixture for this gate disabling it by default.

use std::collections::BTreeSet;
use std::path::Path;

use crate::core::config::{MonolithArea, Policy};

use super::GateResult;

struct FileStats {
    loc: usize,
    exports: usize,
    imports: Vec<String>,
}

fn parse_stats(path: &Path) -> Result<FileStats, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let mut exports = 0usize;
    let mut imports = Vec::new();
    for line in text.lines() {
        let indented = line.starts_with(' ') || line.starts_with('\t');
        let t = line.trim_start();
        if !indented && (t.starts_with("def ") || t.starts_with("class ")) {
            exports += 1;
        }
        if let Some(rest) = t.strip_prefix("import ") {
            for part in rest.split(',') {
                if let Some(name) = part.split_whitespace().next() {
                    imports.push(name.to_string());
                }
            }
        } else if let Some(rest) = t.strip_prefix("from ") {
            if let Some(module) = rest.split_whitespace().next() {
                imports.push(module.to_string());
            }
        }
    }
    Ok(FileStats { loc: text.lines().count(), exports, imports })
}

/// Longest-prefix match of `path_like` against `areas`, resolving dynamic
/// plugin sub-areas (e.g. `plugins/foo/...` under a `{prefix: "plugins/",
/// dynamic: "plugins.<name>"}` entry becomes area `"plugins.foo"`).
fn classify(path_like: &str, areas: &[MonolithArea]) -> Option<String> {
    let best = areas
        .iter()
        .filter(|a| path_like.starts_with(a.prefix.as_str()))
        .max_by_key(|a| a.prefix.len())?;
    match &best.dynamic {
        None => Some(best.area.clone()),
        Some(pattern) => {
            let rest = path_like[best.prefix.len()..].trim_start_matches('/');
            match rest.split('/').next() {
                Some(sub) if !sub.is_empty() => Some(pattern.replace("<name>", sub)),
                _ => Some(best.area.clone()),
            }
        }
    }
}

/// Areas referenced by `imports`, tried both as a literal dotted-to-slash
/// path and with a conventional `src/` prefix (area maps are defined in
/// filesystem-prefix terms; imports are dotted module names).
fn resolve_import_areas(imports: &[String], areas: &[MonolithArea]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for imp in imports {
        let slash = imp.replace('.', "/");
        if let Some(area) = classify(&slash, areas) {
            out.insert(area);
            continue;
        }
        if let Some(area) = classify(&format!("src/{slash}"), areas) {
            out.insert(area);
        }
    }
    out
}

fn is_catchall(rel: &str, policy: &Policy) -> bool {
    if policy.monolith_catchall_allowlist.iter().any(|a| a == rel) {
        return false;
    }
    let p = Path::new(rel);
    let basename = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    if policy.monolith_catchall_basenames.iter().any(|b| *b == basename) {
        return true;
    }
    p.parent()
        .and_then(|parent| parent.file_name())
        .map(|n| policy.monolith_catchall_dirs.iter().any(|d| *d == n.to_string_lossy()))
        .unwrap_or(false)
}

/// Count of other touched files whose imports resolve to `rel`'s module
/// path. Approximates fan-in over the current batch only (see module doc).
fn fanin_count(rel: &str, parsed: &[(String, FileStats)]) -> usize {
    let id = rel.trim_end_matches(".py");
    let id_no_src = id.strip_prefix("src/").unwrap_or(id);
    parsed
        .iter()
        .filter(|(other, _)| other != rel)
        .filter(|(_, stats)| {
            stats.imports.iter().any(|imp| {
                let slash = imp.replace('.', "/");
                slash == id || slash == id_no_src
            })
        })
        .count()
}

struct Flag {
    tag: &'static str,
    path: String,
    reason: String,
    /// Whether this flag can fail the gate outright under `strict` mode.
    /// Only `MONO.PARSE` ever carries a configurable severity
    /// (`monolith_on_parse_error`); every other category is always hard.
    hard: bool,
}

fn scan(policy: &Policy, workdir: &Path, baseline: Option<&Path>, touched: &[String]) -> Vec<Flag> {
    let mut flags = Vec::new();

    let mut parsed: Vec<(String, FileStats)> = Vec::new();
    for rel in touched.iter().filter(|p| p.ends_with(".py")) {
        let abs = workdir.join(rel);
        if !abs.is_file() {
            continue;
        }
        match parse_stats(&abs) {
            Ok(stats) => parsed.push((rel.clone(), stats)),
            Err(e) => flags.push(Flag {
                tag: "MONO.PARSE",
                path: rel.clone(),
                reason: format!("failed to parse: {e}"),
                hard: policy.monolith_on_parse_error == "fail",
            }),
        }
    }

    for (rel, stats) in &parsed {
        if is_catchall(rel, policy) {
            flags.push(Flag {
                tag: "MONO.CATCHALL",
                path: rel.clone(),
                reason: "catchall filename/dir not allow-listed".to_string(),
                hard: true,
            });
        }

        let baseline_stats = baseline.and_then(|b| {
            let bp = b.join(rel);
            if bp.is_file() { parse_stats(&bp).ok() } else { None }
        });

        match &baseline_stats {
            None => {
                if stats.loc > policy.monolith_new_file_max_loc {
                    flags.push(Flag {
                        tag: "MONO.NEWFILE",
                        path: rel.clone(),
                        reason: format!("{} loc exceeds new-file cap of {}", stats.loc, policy.monolith_new_file_max_loc),
                        hard: true,
                    });
                }
                if stats.exports > policy.monolith_new_file_max_exports {
                    flags.push(Flag {
                        tag: "MONO.NEWFILE",
                        path: rel.clone(),
                        reason: format!(
                            "{} exports exceeds new-file cap of {}",
                            stats.exports, policy.monolith_new_file_max_exports
                        ),
                        hard: true,
                    });
                }
                if stats.imports.len() > policy.monolith_new_file_max_imports {
                    flags.push(Flag {
                        tag: "MONO.NEWFILE",
                        path: rel.clone(),
                        reason: format!(
                            "{} imports exceeds new-file cap of {}",
                            stats.imports.len(),
                            policy.monolith_new_file_max_imports
                        ),
                        hard: true,
                    });
                }
            }
            Some(base) => {
                let tier = if stats.loc > policy.monolith_huge_loc {
                    Some((
                        "huge",
                        policy.monolith_huge_allow_loc_increase,
                        policy.monolith_huge_allow_exports_delta,
                        policy.monolith_huge_allow_imports_delta,
                    ))
                } else if stats.loc > policy.monolith_large_loc {
                    Some((
                        "large",
                        policy.monolith_large_allow_loc_increase,
                        policy.monolith_large_allow_exports_delta,
                        policy.monolith_large_allow_imports_delta,
                    ))
                } else {
                    None
                };
                if let Some((tier_name, allow_loc, allow_exports, allow_imports)) = tier {
                    let loc_delta = stats.loc.saturating_sub(base.loc);
                    let exports_delta = stats.exports.saturating_sub(base.exports);
                    let imports_delta = stats.imports.len().saturating_sub(base.imports.len());
                    if loc_delta > allow_loc || exports_delta > allow_exports || imports_delta > allow_imports {
                        flags.push(Flag {
                            tag: "MONO.GROWTH",
                            path: rel.clone(),
                            reason: format!(
                                "{tier_name} file grew past allowance (loc+{loc_delta} exports+{exports_delta} imports+{imports_delta})"
                            ),
                            hard: true,
                        });
                    }
                }
            }
        }

        if policy.monolith_compute_fanin {
            let fanout_delta = baseline_stats
                .as_ref()
                .map(|b| stats.imports.len().saturating_sub(b.imports.len()))
                .unwrap_or(stats.imports.len());
            if fanout_delta > policy.monolith_hub_fanout_delta {
                flags.push(Flag {
                    tag: "MONO.HUB",
                    path: rel.clone(),
                    reason: format!("fan-out delta {fanout_delta} exceeds {}", policy.monolith_hub_fanout_delta),
                    hard: true,
                });
            }
            let fanin = fanin_count(rel, &parsed);
            if fanin > policy.monolith_hub_fanin_delta {
                flags.push(Flag {
                    tag: "MONO.HUB",
                    path: rel.clone(),
                    reason: format!("fan-in {fanin} exceeds delta budget {}", policy.monolith_hub_fanin_delta),
                    hard: true,
                });
            }
        }

        let import_areas = resolve_import_areas(&stats.imports, &policy.monolith_areas);
        if import_areas.len() > policy.monolith_crossarea_min_distinct_areas {
            flags.push(Flag {
                tag: "MONO.CROSSAREA",
                path: rel.clone(),
                reason: format!(
                    "imports span {} areas, over the {} allowed",
                    import_areas.len(),
                    policy.monolith_crossarea_min_distinct_areas
                ),
                hard: true,
            });
        }

        if let Some(own_area) = classify(rel, &policy.monolith_areas) {
            if policy.monolith_core_areas.iter().any(|c| *c == own_area) {
                if let Some(foreign) = import_areas
                    .iter()
                    .find(|a| !policy.monolith_core_areas.contains(a) && **a != own_area)
                {
                    flags.push(Flag {
                        tag: "MONO.COREBOUND",
                        path: rel.clone(),
                        reason: format!("core area {own_area:?} imports non-core area {foreign:?}"),
                        hard: true,
                    });
                }
            }
        }
    }

    flags
}

fn render(flags: &[&Flag]) -> String {
    flags.iter().map(|f| format!("{}: {}: {}", f.tag, f.path, f.reason)).collect::<Vec<_>>().join("; ")
}

/// Run the guard over `touched` files under `workdir`, per `policy.monolith_mode`
/// and `policy.monolith_on_parse_error`. `baseline`, when given, is the
/// pre-change tree used for Growth-threshold deltas; without one every
/// touched file is treated as new (Growth checks never fire).
pub fn run(policy: &Policy, workdir: &Path, baseline: Option<&Path>, touched: &[String]) -> GateResult {
    let flags = scan(policy, workdir, baseline, touched);
    if flags.is_empty() {
        return GateResult { name: "monolith".to_string(), passed: true, skipped: false, detail: String::new(), legalized: Vec::new() };
    }

    let all: Vec<&Flag> = flags.iter().collect();
    let hard: Vec<&Flag> = flags.iter().filter(|f| f.hard).collect();
    let warn_result = || GateResult {
        name: "monolith".to_string(),
        passed: true,
        skipped: false,
        detail: format!("MONOLITH: WARN: {}", render(&all)),
        legalized: Vec::new(),
    };

    match policy.monolith_mode.as_str() {
        "strict" => {
            if hard.is_empty() {
                warn_result()
            } else {
                GateResult { name: "monolith".to_string(), passed: false, skipped: false, detail: render(&hard), legalized: Vec::new() }
            }
        }
        "warn_only" => warn_result(),
        "report_only" => warn_result(),
        _ => warn_result(),
    }
}
