//! core
//!
//! Shared domain types, configuration, path layout, and locking.
//!
//! # Modules
//!
//! - [`types`] - `IssueId`, `Phase`, `Stage`, `Category`, `RunnerError`
//! - [`config`] - Policy schema, TOML/CLI merge, provenance tracking
//! - [`paths`] - deterministic layout under `<repo_root>/<patch_dir>/`
//! - [`ops`] - the cross-process run lock
//! - [`fsutil`] - atomic tempfile+fsync+rename and `_vN` version bumping

pub mod config;
pub mod fsutil;
pub mod ops;
pub mod paths;
pub mod types;

pub use types::{Category, IssueId, IssueIdError, Phase, Result, RunMode, RunnerError, Stage};
