//! Pipeline orchestration: assemble every step, then run branches in
//! parallel and steps within a branch in order.
//!
//! Run states: `assembling → running → completed | failed | cancelled`.
//! Assembly is fail-fast; once running, a failing step is recorded on its
//! trace entry and the branch carries on with an empty value set.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use enrichkit_plugins::{Plugin, PluginContext, PluginRegistry};
use enrichkit_shared::{EnrichError, Result, RunId};
use enrichkit_types::Entity;

use crate::context::{ExecutionContext, RunSnapshot, RunState, TraceError};
use crate::definition::{InputRef, PipelineDefinition, StepDefinition};
use crate::observer::{RunObserver, SilentObserver};

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

enum StepRunner {
    Seed,
    Plugin(Box<Plugin>),
}

struct AssembledStep {
    definition: StepDefinition,
    runner: StepRunner,
}

struct AssembledBranch {
    id: String,
    steps: Vec<AssembledStep>,
}

/// A pipeline whose every step resolved to a live plugin.
pub struct AssembledPipeline {
    branches: Vec<AssembledBranch>,
}

impl AssembledPipeline {
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn step_count(&self) -> usize {
        self.branches.iter().map(|b| b.steps.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct RunHandle {
    context: ExecutionContext,
    cancel: CancellationToken,
    finished: CancellationToken,
}

/// Runs pipelines against a plugin registry.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<PluginRegistry>,
    base: PluginContext,
    observer: Arc<dyn RunObserver>,
    runs: Arc<RwLock<HashMap<RunId, RunHandle>>>,
}

impl Orchestrator {
    /// `base` supplies the catalog, vault, graph and sketch shared by runs;
    /// each run gets its own run id.
    pub fn new(registry: Arc<PluginRegistry>, base: PluginContext) -> Self {
        Self {
            registry,
            base,
            observer: Arc::new(SilentObserver),
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Resolve every step of every branch. The first unknown plugin fails
    /// the whole pipeline.
    pub fn assemble(
        &self,
        definition: &PipelineDefinition,
        context: &PluginContext,
    ) -> Result<AssembledPipeline> {
        let mut branches = Vec::with_capacity(definition.branches.len());
        for branch in &definition.branches {
            let mut steps = Vec::with_capacity(branch.steps.len());
            for step in &branch.steps {
                let runner = if step.is_seed() {
                    StepRunner::Seed
                } else {
                    match self.registry.get(&step.plugin, context) {
                        Ok(plugin) => StepRunner::Plugin(Box::new(plugin.with_params(step.params.clone()))),
                        Err(EnrichError::NotFound { .. }) => {
                            return Err(EnrichError::assembly(&step.step_id, &step.plugin));
                        }
                        Err(e) => return Err(e),
                    }
                };
                steps.push(AssembledStep {
                    definition: step.clone(),
                    runner,
                });
            }
            branches.push(AssembledBranch {
                id: branch.id.clone(),
                steps,
            });
        }
        Ok(AssembledPipeline { branches })
    }

    /// Run to completion and return the final trace. Never fails: errors
    /// are in the trace. The run's state is dropped once the trace is taken.
    pub async fn run(&self, definition: PipelineDefinition, seeds: Vec<Value>) -> RunSnapshot {
        let (run_id, handle) = self.prepare(&definition).await;
        self.execute(run_id, definition, seeds, handle.clone()).await;
        self.runs.write().await.remove(&run_id);
        handle.context.snapshot().await
    }

    /// Start a run in the background.
    pub async fn submit(&self, definition: PipelineDefinition, seeds: Vec<Value>) -> RunId {
        let (run_id, handle) = self.prepare(&definition).await;
        let this = self.clone();
        tokio::spawn(async move { this.execute(run_id, definition, seeds, handle).await });
        run_id
    }

    /// Current snapshot of a run.
    pub async fn get_trace(&self, run_id: RunId) -> Option<RunSnapshot> {
        let context = self.runs.read().await.get(&run_id)?.context.clone();
        Some(context.snapshot().await)
    }

    /// Wait until a run reaches a final state.
    pub async fn wait(&self, run_id: RunId) -> Option<RunSnapshot> {
        let handle = self.runs.read().await.get(&run_id)?.clone();
        handle.finished.cancelled().await;
        Some(handle.context.snapshot().await)
    }

    /// Request cooperative cancellation. In-flight steps finish; no new
    /// step starts. Returns `false` for unknown runs.
    pub async fn cancel(&self, run_id: RunId) -> bool {
        match self.runs.read().await.get(&run_id) {
            Some(handle) => {
                info!(%run_id, "cancellation requested");
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop a run's state, returning its last snapshot.
    pub async fn remove(&self, run_id: RunId) -> Option<RunSnapshot> {
        let handle = self.runs.write().await.remove(&run_id)?;
        Some(handle.context.snapshot().await)
    }

    async fn prepare(&self, definition: &PipelineDefinition) -> (RunId, RunHandle) {
        let run_id = RunId::new();
        let handle = RunHandle {
            context: ExecutionContext::new(run_id, self.base.sketch_id.clone(), definition),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        };
        self.runs.write().await.insert(run_id, handle.clone());
        (run_id, handle)
    }

    #[instrument(skip_all, fields(run_id = %run_id, sketch_id = %self.base.sketch_id))]
    async fn execute(
        &self,
        run_id: RunId,
        definition: PipelineDefinition,
        seeds: Vec<Value>,
        handle: RunHandle,
    ) {
        let ctx = handle.context.clone();
        let digest = definition.digest();
        info!(
            branches = definition.branches.len(),
            steps = definition.step_count(),
            seeds = seeds.len(),
            digest = %&digest[..12],
            "assembling run"
        );

        let assembled = match self.assemble(&definition, &self.base.for_run(run_id)) {
            Ok(assembled) => assembled,
            Err(e) => {
                error!(error = %e, "assembly failed, no step started");
                ctx.fail(&e).await;
                self.finish(&handle).await;
                return;
            }
        };

        ctx.set_state(RunState::Running).await;
        let tasks: Vec<_> = assembled
            .branches
            .into_iter()
            .enumerate()
            .map(|(index, branch)| {
                let runner = BranchRunner {
                    run_id,
                    index,
                    ctx: ctx.clone(),
                    cancel: handle.cancel.clone(),
                    observer: self.observer.clone(),
                };
                tokio::spawn(runner.run(branch, seeds.clone()))
            })
            .collect();

        for (index, joined) in join_all(tasks).await.into_iter().enumerate() {
            if let Err(e) = joined {
                error!(branch = index, error = %e, "branch task aborted");
                ctx.abort_branch(index, &e.to_string()).await;
            }
        }

        let state = if handle.cancel.is_cancelled() {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        ctx.set_state(state).await;
        self.finish(&handle).await;
    }

    async fn finish(&self, handle: &RunHandle) {
        let snapshot = handle.context.snapshot().await;
        info!(state = ?snapshot.state, "run finished");
        self.observer.run_finished(&snapshot);
        handle.finished.cancel();
    }
}

// ---------------------------------------------------------------------------
// Branch execution
// ---------------------------------------------------------------------------

struct BranchRunner {
    run_id: RunId,
    index: usize,
    ctx: ExecutionContext,
    cancel: CancellationToken,
    observer: Arc<dyn RunObserver>,
}

impl BranchRunner {
    async fn run(self, branch: AssembledBranch, seeds: Vec<Value>) {
        let mut current = seeds;

        for (step_index, step) in branch.steps.into_iter().enumerate() {
            let step_id = &step.definition.step_id;
            if self.cancel.is_cancelled() {
                info!(branch = %branch.id, step = %step_id, "run cancelled, remaining steps not started");
                break;
            }

            let inputs = resolve_inputs(&step.definition, &self.ctx, &current).await;
            if let Some(trace) = self.ctx.start_step(self.index, step_index, inputs.len()).await {
                self.observer.step_started(self.run_id, &branch.id, &trace);
            }

            let outcome = match &step.runner {
                StepRunner::Seed => Ok(inputs),
                StepRunner::Plugin(plugin) => plugin
                    .try_execute(inputs)
                    .await
                    .map(|entities| entities.iter().map(Entity::to_value).collect()),
            };

            let trace = match outcome {
                Ok(values) => {
                    for (output, reference) in &step.definition.outputs {
                        self.ctx
                            .bind(reference, StepDefinition::project(output, &values))
                            .await;
                    }
                    debug!(branch = %branch.id, step = %step_id, outputs = values.len(), "step completed");
                    let trace = self.ctx.complete_step(self.index, step_index, &values).await;
                    current = values;
                    trace
                }
                Err(e) => {
                    warn!(branch = %branch.id, step = %step_id, error = %e, "step failed, continuing branch");
                    current = Vec::new();
                    self.ctx
                        .fail_step(self.index, step_index, TraceError::from(&e))
                        .await
                }
            };
            if let Some(trace) = trace {
                self.observer.step_finished(self.run_id, &branch.id, &trace);
            }
        }
    }
}

/// Explicit sources first; when a step declares none, or they all resolve
/// to nothing, the branch's current values are used.
async fn resolve_inputs(
    step: &StepDefinition,
    ctx: &ExecutionContext,
    current: &[Value],
) -> Vec<Value> {
    if step.inputs.is_empty() {
        return current.to_vec();
    }

    let mut resolved = Vec::new();
    let mut pending: Vec<&InputRef> = step.inputs.values().rev().collect();
    while let Some(source) = pending.pop() {
        match source {
            InputRef::Reference(name) => match ctx.resolve(name).await {
                Some(values) => resolved.extend(values),
                None => debug!(step = %step.step_id, reference = %name, "unbound reference treated as absent"),
            },
            InputRef::Literal { literal } | InputRef::Value(literal) => match literal {
                Value::Array(items) => resolved.extend(items.iter().cloned()),
                other => resolved.push(other.clone()),
            },
            InputRef::List(items) => pending.extend(items.iter().rev()),
        }
    }

    if resolved.is_empty() {
        debug!(step = %step.step_id, "explicit inputs resolved to nothing, using branch values");
        return current.to_vec();
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StepStatus;
    use crate::definition::Branch;
    use async_trait::async_trait;
    use enrichkit_plugins::{
        CodeHooks, Invocation, ParameterSpec, PluginDescriptor, PluginKind, StaticResolver,
        register_builtin_plugins,
    };
    use enrichkit_types::TypeCatalog;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Counts calls; echoes usernames after an optional pause.
    struct Echo {
        calls: Arc<AtomicUsize>,
        started: Arc<Notify>,
        pause: Duration,
    }

    #[async_trait]
    impl CodeHooks for Echo {
        async fn fetch_one(&self, item: &Entity, call: &Invocation<'_>) -> Result<Vec<Entity>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            tokio::time::sleep(self.pause).await;
            Ok(vec![call.output(&item.to_value())?])
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        echo_calls: Arc<AtomicUsize>,
        echo_started: Arc<Notify>,
    }

    fn harness(echo_pause: Duration) -> Harness {
        let catalog = Arc::new(TypeCatalog::with_builtin_types());
        let mut registry = PluginRegistry::new();
        let resolver = StaticResolver::new()
            .with_host("example.com", &[IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))]);
        register_builtin_plugins(&mut registry, Arc::new(resolver));

        let echo_calls = Arc::new(AtomicUsize::new(0));
        let echo_started = Arc::new(Notify::new());
        registry.register_code(
            PluginDescriptor::new("echo", PluginKind::Transform, "Username", "Username"),
            Arc::new(Echo {
                calls: echo_calls.clone(),
                started: echo_started.clone(),
                pause: echo_pause,
            }),
        );
        registry.register_code(
            PluginDescriptor::new("needs_key", PluginKind::Enricher, "Domain", "Domain")
                .with_param(ParameterSpec::secret("api_key").required()),
            Arc::new(Echo {
                calls: Arc::new(AtomicUsize::new(0)),
                started: Arc::new(Notify::new()),
                pause: Duration::ZERO,
            }),
        );

        Harness {
            orchestrator: Orchestrator::new(Arc::new(registry), PluginContext::new(catalog)),
            echo_calls,
            echo_started,
        }
    }

    fn pipeline(branches: Vec<(&str, Vec<StepDefinition>)>) -> PipelineDefinition {
        PipelineDefinition {
            branches: branches
                .into_iter()
                .map(|(id, steps)| Branch {
                    id: id.into(),
                    name: String::new(),
                    steps,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn single_step_domain_to_ip() {
        let h = harness(Duration::ZERO);
        let definition = pipeline(vec![("b1", vec![StepDefinition::new("resolve", "domain_to_ip")])]);

        let snapshot = h.orchestrator.run(definition, vec![json!("example.com")]).await;
        assert_eq!(snapshot.state, RunState::Completed);
        let step = snapshot.step("b1", "resolve").unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.output_count, 1);
        let address = step.preview[0]["address"].as_str().unwrap();
        assert!(address.parse::<Ipv4Addr>().is_ok());
    }

    #[tokio::test]
    async fn run_releases_its_state() {
        let h = harness(Duration::ZERO);
        for _ in 0..3 {
            let definition = pipeline(vec![("b1", vec![StepDefinition::new("s1", "echo")])]);
            let snapshot = h.orchestrator.run(definition, vec![json!("alice")]).await;
            assert_eq!(snapshot.state, RunState::Completed);
            assert!(h.orchestrator.get_trace(snapshot.run_id).await.is_none());
        }
        assert!(h.orchestrator.runs.read().await.is_empty());

        let failed = pipeline(vec![("b1", vec![StepDefinition::new("s1", "nonexistent_plugin")])]);
        let snapshot = h.orchestrator.run(failed, vec![json!("alice")]).await;
        assert_eq!(snapshot.state, RunState::Failed);
        assert!(h.orchestrator.runs.read().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_plugin_fails_before_any_branch_starts() {
        let h = harness(Duration::ZERO);
        let definition = pipeline(vec![
            ("b1", vec![StepDefinition::new("s1", "nonexistent_plugin")]),
            ("b2", vec![StepDefinition::new("s1", "echo")]),
        ]);

        let snapshot = h.orchestrator.run(definition, vec![json!("alice")]).await;
        assert_eq!(snapshot.state, RunState::Failed);
        assert_eq!(snapshot.error.as_ref().unwrap().kind, "registry_assembly");
        assert!(snapshot.error.as_ref().unwrap().message.contains("nonexistent_plugin"));
        assert_eq!(h.echo_calls.load(Ordering::SeqCst), 0);
        assert_eq!(snapshot.step("b2", "s1").unwrap().status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn failing_step_does_not_abort_branch() {
        let h = harness(Duration::ZERO);
        let definition = pipeline(vec![(
            "b1",
            vec![
                StepDefinition::new("broken", "needs_key"),
                StepDefinition::new("independent", "email_to_domain").input(
                    "email",
                    InputRef::Literal {
                        literal: json!("alice@example.org"),
                    },
                ),
            ],
        )]);

        let snapshot = h.orchestrator.run(definition, vec![json!("example.com")]).await;
        assert_eq!(snapshot.state, RunState::Completed);
        let broken = snapshot.step("b1", "broken").unwrap();
        assert_eq!(broken.status, StepStatus::Error);
        assert_eq!(broken.error.as_ref().unwrap().kind, "configuration");
        let independent = snapshot.step("b1", "independent").unwrap();
        assert_eq!(independent.status, StepStatus::Completed);
        assert_eq!(independent.preview, vec![json!({"domain": "example.org"})]);
    }

    #[tokio::test]
    async fn step_after_error_sees_empty_values() {
        let h = harness(Duration::ZERO);
        let definition = pipeline(vec![(
            "b1",
            vec![
                StepDefinition::new("broken", "needs_key"),
                StepDefinition::new("resolve", "domain_to_ip"),
            ],
        )]);
        let snapshot = h.orchestrator.run(definition, vec![json!("example.com")]).await;
        let resolve = snapshot.step("b1", "resolve").unwrap();
        assert_eq!(resolve.status, StepStatus::Completed);
        assert_eq!(resolve.input_count, 0);
        assert_eq!(resolve.output_count, 0);
    }

    #[tokio::test]
    async fn references_wire_steps_and_fallback_uses_previous_output() {
        let h = harness(Duration::ZERO);
        let definition = pipeline(vec![(
            "b1",
            vec![
                StepDefinition::new("seeds", "seed").output("output", "domains"),
                StepDefinition::new("resolve", "domain_to_ip").output("address", "ips"),
                StepDefinition::new("collect", "seed").input("ips", InputRef::Reference("ips".into())),
                StepDefinition::new("optional", "seed")
                    .input("maybe", InputRef::Reference("never_bound".into())),
            ],
        )]);

        let snapshot = h.orchestrator.run(definition, vec![json!("example.com")]).await;
        assert_eq!(snapshot.references["domains"], vec![json!("example.com")]);
        assert_eq!(snapshot.references["ips"], vec![json!("93.184.216.34")]);
        assert_eq!(
            snapshot.step("b1", "collect").unwrap().preview,
            vec![json!("93.184.216.34")]
        );
        // Unbound reference: falls back to the predecessor's output.
        let optional = snapshot.step("b1", "optional").unwrap();
        assert_eq!(optional.status, StepStatus::Completed);
        assert_eq!(optional.preview, vec![json!("93.184.216.34")]);
    }

    #[tokio::test]
    async fn branches_are_independent() {
        let h = harness(Duration::ZERO);
        let definition = pipeline(vec![
            ("bad", vec![StepDefinition::new("s", "needs_key")]),
            ("good", vec![StepDefinition::new("s", "echo")]),
        ]);
        let snapshot = h.orchestrator.run(definition, vec![json!("alice")]).await;
        assert_eq!(snapshot.step("bad", "s").unwrap().status, StepStatus::Error);
        assert_eq!(snapshot.step("good", "s").unwrap().status, StepStatus::Completed);
        assert_eq!(snapshot.branches[0].branch_id, "bad");
    }

    #[tokio::test]
    async fn cancellation_keeps_finished_work() {
        let h = harness(Duration::from_millis(100));
        let definition = pipeline(vec![(
            "b1",
            vec![
                StepDefinition::new("slow", "echo"),
                StepDefinition::new("after", "echo"),
            ],
        )]);

        let run_id = h.orchestrator.submit(definition, vec![json!("alice")]).await;
        h.echo_started.notified().await;
        assert!(h.orchestrator.cancel(run_id).await);

        let snapshot = h.orchestrator.wait(run_id).await.unwrap();
        assert_eq!(snapshot.state, RunState::Cancelled);
        assert_eq!(snapshot.step("b1", "slow").unwrap().status, StepStatus::Completed);
        assert_eq!(snapshot.step("b1", "after").unwrap().status, StepStatus::Pending);
        assert_eq!(h.echo_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submit_and_get_trace() {
        let h = harness(Duration::ZERO);
        let definition = pipeline(vec![("b1", vec![StepDefinition::new("s", "echo")])]);
        let run_id = h.orchestrator.submit(definition, vec![json!("bob")]).await;

        let done = h.orchestrator.wait(run_id).await.unwrap();
        assert_eq!(done.state, RunState::Completed);
        let trace = h.orchestrator.get_trace(run_id).await.unwrap();
        assert_eq!(trace.run_id, run_id);
        assert!(h.orchestrator.remove(run_id).await.is_some());
        assert!(h.orchestrator.get_trace(run_id).await.is_none());
        assert!(!h.orchestrator.cancel(RunId::new()).await);
    }

    #[test]
    fn assemble_standalone() {
        let h = harness(Duration::ZERO);
        let ctx = PluginContext::new(Arc::new(TypeCatalog::with_builtin_types()));
        let ok = pipeline(vec![(
            "b1",
            vec![StepDefinition::new("a", "seed"), StepDefinition::new("b", "domain_to_ip")],
        )]);
        let assembled = h.orchestrator.assemble(&ok, &ctx).unwrap();
        assert_eq!(assembled.step_count(), 2);

        let bad = pipeline(vec![("b1", vec![StepDefinition::new("x", "missing")])]);
        match h.orchestrator.assemble(&bad, &ctx) {
            Err(EnrichError::RegistryAssembly { step_id, plugin }) => {
                assert_eq!(step_id, "x");
                assert_eq!(plugin, "missing");
            }
            _ => panic!("expected assembly error"),
        }
    }
}
