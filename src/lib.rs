//! am-patch - a patch-application runner
//!
//! `am-patch` takes a proposed change (a script that declares the files it
//! will touch, or a unified diff / zip of diffs), applies it inside an
//! ephemeral clone of a target repository, runs a configurable battery of
//! quality gates, and - only if every stage succeeds - promotes the result
//! back into the live repository with a commit and push.
//!
//! # Architecture
//!
//! The codebase follows a linear pipeline over a typed plan:
//!
//! - [`cli`] - argument parsing and the three positional grammars
//! - [`core`] - config, paths, locking, and shared domain types
//! - [`logging`] - the two-sink structured logger and NDJSON event stream
//! - [`process`] - captured subprocess execution
//! - [`git`] - typed wrappers over `git` invocations
//! - [`workspace`] - per-issue workspace lifecycle (clone, checkpoint, rollback)
//! - [`patch`] - patch input resolution and application (script jail / unified diff)
//! - [`scope`] - declared-vs-touched file set enforcement
//! - [`gates`] - the ordered gate pipeline
//! - [`live_guard`] - live-repo drift detection
//! - [`promote`] - copying promoted files back into the live repository
//! - [`archive`] - deterministic success/failure/diff-bundle archives
//! - [`engine`] - orchestrates all of the above into one run
//!
//! # Correctness invariants
//!
//! 1. The live repository is never mutated before promotion.
//! 2. A workspace's `base_sha` never changes unless a refresh is requested.
//! 3. Promotion is always filtered to the per-issue allowed-union.
//! 4. Every failing run still attempts to produce a diagnostic archive.

pub mod archive;
pub mod cli;
pub mod core;
pub mod engine;
pub mod gates;
pub mod git;
pub mod live_guard;
pub mod logging;
pub mod patch;
pub mod process;
pub mod promote;
pub mod scope;
pub mod workspace;
