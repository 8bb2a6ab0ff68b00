//! Progress callbacks for pipeline runs.

use enrichkit_shared::RunId;

use crate::context::{RunSnapshot, StepTrace};

/// Progress callback for reporting run status.
///
/// Called from branch tasks, possibly concurrently.
pub trait RunObserver: Send + Sync {
    /// Called when a step moves to `processing`.
    fn step_started(&self, run_id: RunId, branch_id: &str, step: &StepTrace);
    /// Called when a step reaches `completed` or `error`.
    fn step_finished(&self, run_id: RunId, branch_id: &str, step: &StepTrace);
    /// Called once the run reaches a final state.
    fn run_finished(&self, snapshot: &RunSnapshot);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl RunObserver for SilentObserver {
    fn step_started(&self, _run_id: RunId, _branch_id: &str, _step: &StepTrace) {}
    fn step_finished(&self, _run_id: RunId, _branch_id: &str, _step: &StepTrace) {}
    fn run_finished(&self, _snapshot: &RunSnapshot) {}
}
