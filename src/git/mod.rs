//! git
//!
//! Git Operations (C14): thin, typed wrappers over `git fetch/status/diff/
//! commit/push/archive/rev-parse`, all going through [`crate::process::run`]
//! via the Logger so every invocation is recorded. No libgit2 binding -
//! the pipeline's contract is with the `git` binary's process surface, and
//! every phase already treats subprocess execution as the core primitive
//! (§9), so the wrappers here stay thin rather than re-implementing git's
//! object model.

pub mod ops;

pub use ops::GitOps;
