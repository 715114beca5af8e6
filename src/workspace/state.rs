//! workspace::state
//!
//! Persistent per-issue state (`state.json`): the allowed-union of
//! repo-relative paths legitimately touched across attempts for an issue
//! (§3). Monotonically growing - promotion is always filtered to this set
//! plus the blessed gate outputs.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// `workspaces/issue_<ID>/state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueState {
    pub base_sha: String,
    pub allowed_union: BTreeSet<String>,
}

impl IssueState {
    /// Load existing state for `base_sha`, or start a fresh one if none
    /// exists yet (or it belongs to a different `base_sha`, which only
    /// happens when the workspace itself was refreshed).
    pub fn load(state_path: &Path, base_sha: &str) -> Self {
        let loaded = std::fs::read_to_string(state_path)
            .ok()
            .and_then(|s| serde_json::from_str::<IssueState>(&s).ok());
        match loaded {
            Some(state) => state,
            None => IssueState {
                base_sha: base_sha.to_string(),
                allowed_union: BTreeSet::new(),
            },
        }
    }

    pub fn save(&self, state_path: &Path) -> std::io::Result<()> {
        if let Some(parent) = state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).expect("IssueState serializes");
        std::fs::write(state_path, json)
    }

    /// Grow the allowed-union with newly legitimised paths. Never shrinks.
    pub fn extend_allowed(&mut self, paths: impl IntoIterator<Item = String>) {
        self.allowed_union.extend(paths);
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        self.allowed_union.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_empty_union() {
        let dir = tempfile::tempdir().unwrap();
        let state = IssueState::load(&dir.path().join("state.json"), "abc");
        assert!(state.allowed_union.is_empty());
        assert_eq!(state.base_sha, "abc");
    }

    #[test]
    fn allowed_union_grows_monotonically_across_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = IssueState::load(&path, "abc");
        state.extend_allowed(["a.txt".to_string()]);
        state.save(&path).unwrap();

        let mut reloaded = IssueState::load(&path, "abc");
        assert!(reloaded.is_allowed("a.txt"));
        reloaded.extend_allowed(["b.txt".to_string()]);
        reloaded.save(&path).unwrap();

        let final_state = IssueState::load(&path, "abc");
        assert!(final_state.is_allowed("a.txt"));
        assert!(final_state.is_allowed("b.txt"));
        assert_eq!(final_state.allowed_union.len(), 2);
    }
}
