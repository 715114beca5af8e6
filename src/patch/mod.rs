//! patch
//!
//! The Patch Input Resolver (C8) and Patch Executor (C9): pick the patch
//! input (explicit path, archive pick-latest, or default lookup), classify
//! it as script or unified, and apply it - a script under an optional
//! filesystem jail, a unified bundle via `git apply`.

pub mod input;
pub mod script;
pub mod unified;

pub use input::{resolve_patch_plan, PatchInputError, PatchPlan};
pub use script::run_patch;
pub use unified::{run_unified_patch_bundle, UnifiedPatchFailure, UnifiedPatchResult};
