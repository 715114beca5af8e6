//! core::types
//!
//! Shared domain types threaded through the pipeline.

use std::fmt;

/// A numeric issue identifier, always represented as its original digit string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueId(String);

impl IssueId {
    /// Parse an issue id, rejecting anything that isn't all-digits.
    pub fn parse(raw: &str) -> std::result::Result<Self, IssueIdError> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IssueIdError::NotNumeric(raw.to_string()));
        }
        Ok(IssueId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error parsing an [`IssueId`].
#[derive(Debug, thiserror::Error)]
pub enum IssueIdError {
    #[error("issue id must be all digits, got {0:?}")]
    NotNumeric(String),
}

/// The mode selected by the CLI grammar, one of the four run shapes in §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// `ISSUE_ID MESSAGE [PATCH_PATH]`
    Workspace,
    /// `... -f MESSAGE`
    FinalizeLive,
    /// `... --finalize-workspace ISSUE_ID`
    FinalizeWorkspace,
    /// `-l`/`--rerun-latest`
    RerunLatest,
    /// `--show-config`
    ShowConfig,
}

/// A phase of the execution plan, per §2 and §4.16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Preflight,
    Workspace,
    Patch,
    GatesWorkspace,
    Promote,
    GatesLive,
    Archive,
    Commit,
    Push,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Preflight => "PREFLIGHT",
            Phase::Workspace => "WORKSPACE",
            Phase::Patch => "PATCH",
            Phase::GatesWorkspace => "GATES_WORKSPACE",
            Phase::Promote => "PROMOTE",
            Phase::GatesLive => "GATES_LIVE",
            Phase::Archive => "ARCHIVE",
            Phase::Commit => "COMMIT",
            Phase::Push => "PUSH",
            Phase::Cleanup => "CLEANUP",
        };
        f.write_str(s)
    }
}

/// The stage taxonomy of a [`RunnerError`], per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Bootstrap,
    Preflight,
    Patch,
    Scope,
    Gates,
    Promotion,
    Archive,
    Posthook,
    Security,
    Rollback,
    Config,
    Audit,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Bootstrap => "BOOTSTRAP",
            Stage::Preflight => "PREFLIGHT",
            Stage::Patch => "PATCH",
            Stage::Scope => "SCOPE",
            Stage::Gates => "GATES",
            Stage::Promotion => "PROMOTION",
            Stage::Archive => "ARCHIVE",
            Stage::Posthook => "POSTHOOK",
            Stage::Security => "SECURITY",
            Stage::Rollback => "ROLLBACK",
            Stage::Config => "CONFIG",
            Stage::Audit => "AUDIT",
            Stage::Cleanup => "CLEANUP",
        };
        f.write_str(s)
    }
}

/// The category taxonomy of a [`RunnerError`], per §7.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    Git,
    Manifest,
    Scope,
    Noop,
    Gates,
    Promotion,
    Config,
    Internal,
    Security,
    LiveChanged,
    PatchAscii,
    PatchSyntax,
    PatchFiles,
    PatchPath,
    Lock,
    PytestVenv,
    AuditReportFailed,
    Other(String),
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: &str = match self {
            Category::Git => "GIT",
            Category::Manifest => "MANIFEST",
            Category::Scope => "SCOPE",
            Category::Noop => "NOOP",
            Category::Gates => "GATES",
            Category::Promotion => "PROMOTION",
            Category::Config => "CONFIG",
            Category::Internal => "INTERNAL",
            Category::Security => "SECURITY",
            Category::LiveChanged => "LIVE_CHANGED",
            Category::PatchAscii => "PATCH_ASCII",
            Category::PatchSyntax => "PATCH_SYNTAX",
            Category::PatchFiles => "PATCH_FILES",
            Category::PatchPath => "PATCH_PATH",
            Category::Lock => "LOCK",
            Category::PytestVenv => "PYTEST_VENV",
            Category::AuditReportFailed => "AUDIT_REPORT_FAILED",
            Category::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// The runner's single error type: `{stage, category, message}` per §7.
///
/// Every phase that can fail produces this; it is also the unit the
/// fingerprint record (§6, collaborator interfaces) is built from.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stage}/{category}: {message}")]
pub struct RunnerError {
    pub stage: Stage,
    pub category: Category,
    pub message: String,
}

impl RunnerError {
    pub fn new(stage: Stage, category: Category, message: impl Into<String>) -> Self {
        RunnerError {
            stage,
            category,
            message: message.into(),
        }
    }

    /// The deterministic `{stage, category, message}` record emitted for
    /// downstream orchestrators (§6, Fingerprint in the glossary).
    pub fn fingerprint(&self) -> String {
        format!("{}/{}: {}", self.stage, self.category, self.message)
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
