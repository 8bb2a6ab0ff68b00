//! Per-run mutable state: the reference map and the branch-indexed trace.
//!
//! One [`ExecutionContext`] exists per run and is never shared with another
//! run. Branch tasks hold clones of the same handle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use enrichkit_shared::{EnrichError, RunId, SketchId};

use crate::definition::PipelineDefinition;

/// Values kept per trace entry for display.
pub const PREVIEW_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Assembling,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Error recorded on a trace entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceError {
    pub kind: String,
    pub message: String,
}

impl From<&EnrichError> for TraceError {
    fn from(e: &EnrichError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub step_id: String,
    pub plugin: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub input_count: usize,
    pub output_count: usize,
    /// First few output values.
    pub preview: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TraceError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchTrace {
    pub branch_id: String,
    pub name: String,
    pub steps: Vec<StepTrace>,
}

/// Point-in-time copy of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub sketch_id: SketchId,
    pub pipeline_digest: String,
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TraceError>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub references: IndexMap<String, Vec<Value>>,
    pub branches: Vec<BranchTrace>,
}

impl RunSnapshot {
    pub fn step(&self, branch_id: &str, step_id: &str) -> Option<&StepTrace> {
        self.branches
            .iter()
            .find(|b| b.branch_id == branch_id)?
            .steps
            .iter()
            .find(|s| s.step_id == step_id)
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Shared handle to one run's state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inner: Arc<RwLock<RunSnapshot>>,
}

impl ExecutionContext {
    /// Fresh context with every step `pending`.
    pub fn new(run_id: RunId, sketch_id: SketchId, definition: &PipelineDefinition) -> Self {
        let branches = definition
            .branches
            .iter()
            .map(|branch| BranchTrace {
                branch_id: branch.id.clone(),
                name: branch.name.clone(),
                steps: branch
                    .steps
                    .iter()
                    .map(|step| StepTrace {
                        step_id: step.step_id.clone(),
                        plugin: step.plugin.clone(),
                        status: StepStatus::Pending,
                        started_at: None,
                        finished_at: None,
                        input_count: 0,
                        output_count: 0,
                        preview: Vec::new(),
                        error: None,
                    })
                    .collect(),
            })
            .collect();

        Self {
            inner: Arc::new(RwLock::new(RunSnapshot {
                run_id,
                sketch_id,
                pipeline_digest: definition.digest(),
                state: RunState::Assembling,
                error: None,
                created_at: Utc::now(),
                finished_at: None,
                references: IndexMap::new(),
                branches,
            })),
        }
    }

    pub async fn snapshot(&self) -> RunSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn state(&self) -> RunState {
        self.inner.read().await.state
    }

    pub async fn set_state(&self, state: RunState) {
        let mut run = self.inner.write().await;
        run.state = state;
        if state.is_finished() {
            run.finished_at = Some(Utc::now());
        }
    }

    /// Mark the run failed before any step ran.
    pub async fn fail(&self, error: &EnrichError) {
        let mut run = self.inner.write().await;
        run.state = RunState::Failed;
        run.error = Some(error.into());
        run.finished_at = Some(Utc::now());
    }

    // -- Reference map ------------------------------------------------------

    /// Bind `name` once. A second bind is ignored and reported as `false`.
    pub async fn bind(&self, name: &str, values: Vec<Value>) -> bool {
        let mut run = self.inner.write().await;
        if run.references.contains_key(name) {
            warn!(reference = name, "reference already bound, keeping first value");
            return false;
        }
        run.references.insert(name.to_string(), values);
        true
    }

    /// Exact-name lookup; unbound names are `None`.
    pub async fn resolve(&self, name: &str) -> Option<Vec<Value>> {
        self.inner.read().await.references.get(name).cloned()
    }

    // -- Trace --------------------------------------------------------------

    async fn update_step(
        &self,
        branch: usize,
        step: usize,
        update: impl FnOnce(&mut StepTrace),
    ) -> Option<StepTrace> {
        let mut run = self.inner.write().await;
        let entry = run.branches.get_mut(branch)?.steps.get_mut(step)?;
        update(entry);
        Some(entry.clone())
    }

    pub async fn start_step(&self, branch: usize, step: usize, input_count: usize) -> Option<StepTrace> {
        self.update_step(branch, step, |entry| {
            entry.status = StepStatus::Processing;
            entry.started_at = Some(Utc::now());
            entry.input_count = input_count;
        })
        .await
    }

    pub async fn complete_step(&self, branch: usize, step: usize, outputs: &[Value]) -> Option<StepTrace> {
        self.update_step(branch, step, |entry| {
            entry.status = StepStatus::Completed;
            entry.finished_at = Some(Utc::now());
            entry.output_count = outputs.len();
            entry.preview = outputs.iter().take(PREVIEW_LIMIT).cloned().collect();
        })
        .await
    }

    pub async fn fail_step(&self, branch: usize, step: usize, error: TraceError) -> Option<StepTrace> {
        self.update_step(branch, step, |entry| {
            entry.status = StepStatus::Error;
            entry.finished_at = Some(Utc::now());
            entry.error = Some(error);
        })
        .await
    }

    /// Mark a branch's in-flight step as errored after its task died.
    pub async fn abort_branch(&self, branch: usize, message: &str) {
        let mut run = self.inner.write().await;
        let Some(trace) = run.branches.get_mut(branch) else {
            return;
        };
        for entry in trace
            .steps
            .iter_mut()
            .filter(|s| s.status == StepStatus::Processing)
        {
            entry.status = StepStatus::Error;
            entry.finished_at = Some(Utc::now());
            entry.error = Some(TraceError {
                kind: "aborted".into(),
                message: message.to_string(),
            });
        }
    }
}
