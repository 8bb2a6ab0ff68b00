//! Per-run collaborators handed to every plugin instance.

use std::sync::Arc;

use enrichkit_shared::{RunId, SketchId};
use enrichkit_types::TypeCatalog;

use crate::graph::{GraphSink, NoopGraph};
use crate::vault::{NoVault, SecretVault};

/// What a plugin instance can see of its run.
#[derive(Clone)]
pub struct PluginContext {
    pub run_id: RunId,
    pub sketch_id: SketchId,
    pub catalog: Arc<TypeCatalog>,
    pub vault: Arc<dyn SecretVault>,
    pub graph: Arc<dyn GraphSink>,
}

impl PluginContext {
    /// Context with a fresh run id, no vault, and a discarding graph.
    pub fn new(catalog: Arc<TypeCatalog>) -> Self {
        Self {
            run_id: RunId::new(),
            sketch_id: SketchId::default(),
            catalog,
            vault: Arc::new(NoVault),
            graph: Arc::new(NoopGraph),
        }
    }

    pub fn with_vault(mut self, vault: Arc<dyn SecretVault>) -> Self {
        self.vault = vault;
        self
    }

    pub fn with_graph(mut self, graph: Arc<dyn GraphSink>) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_sketch(mut self, sketch_id: SketchId) -> Self {
        self.sketch_id = sketch_id;
        self
    }

    /// Same collaborators, attributed to another run.
    pub fn for_run(&self, run_id: RunId) -> Self {
        Self {
            run_id,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("run_id", &self.run_id)
            .field("sketch_id", &self.sketch_id)
            .field("types", &self.catalog.len())
            .field("vault", &self.vault.name())
            .finish()
    }
}
