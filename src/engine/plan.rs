//! engine::plan
//!
//! The materialised `ExecutionPlan` the engine walks, per §4.16: a fixed
//! phase sequence chosen once from the run mode and policy, before any
//! phase executes, so `phase_results.len() == plan.phases.len()` always.

use crate::core::types::{Phase, RunMode};

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub phases: Vec<Phase>,
}

/// Build the phase sequence for one invocation. Promotion-side phases are
/// omitted entirely in `test_mode`, matching §8 scenario 2.
pub fn build(mode: RunMode, test_mode: bool, commit_and_push: bool) -> ExecutionPlan {
    use Phase::*;

    let phases = match mode {
        RunMode::Workspace | RunMode::RerunLatest => {
            if test_mode {
                vec![Preflight, Workspace, Patch, GatesWorkspace, Cleanup]
            } else {
                let mut p = vec![Preflight, Workspace, Patch, GatesWorkspace, Promote];
                if commit_and_push {
                    p.push(Commit);
                    p.push(Push);
                }
                p.push(Archive);
                p.push(Cleanup);
                p
            }
        }
        RunMode::FinalizeLive => {
            let mut p = vec![Preflight, GatesLive];
            if commit_and_push {
                p.push(Commit);
                p.push(Push);
            }
            p.push(Archive);
            p
        }
        RunMode::FinalizeWorkspace => {
            let mut p = vec![Preflight, Promote, GatesLive];
            if commit_and_push {
                p.push(Commit);
                p.push(Push);
            }
            p.push(Archive);
            p.push(Cleanup);
            p
        }
        RunMode::ShowConfig => Vec::new(),
    };

    ExecutionPlan { phases }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_mode_full_run_includes_promotion() {
        let plan = build(RunMode::Workspace, false, true);
        assert!(plan.phases.contains(&Phase::Promote));
        assert!(plan.phases.contains(&Phase::Commit));
        assert!(plan.phases.contains(&Phase::Push));
    }

    #[test]
    fn test_mode_stops_before_promotion() {
        let plan = build(RunMode::Workspace, true, true);
        assert!(!plan.phases.contains(&Phase::Promote));
        assert!(!plan.phases.contains(&Phase::Commit));
        assert_eq!(plan.phases.last(), Some(&Phase::Cleanup));
    }

    #[test]
    fn commit_and_push_false_skips_those_phases() {
        let plan = build(RunMode::Workspace, false, false);
        assert!(!plan.phases.contains(&Phase::Commit));
        assert!(!plan.phases.contains(&Phase::Push));
        assert!(plan.phases.contains(&Phase::Promote));
    }
}
