//! core::ops
//!
//! Cross-process exclusion for the runner workspace directory.

pub mod lock;

pub use lock::{LockConflictPolicy, LockError, RunLock};
