//! Graph write boundary, called from `postprocess`.
//!
//! Implementations must upsert: writing the same node or relationship twice
//! leaves one copy.

use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};

use enrichkit_shared::{Result, SketchId};
use enrichkit_types::{Entity, NodeRef};

/// Destination for discovered entities and relationships.
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn create_node(&self, sketch: &SketchId, entity: &Entity) -> Result<()>;

    async fn create_relationship(
        &self,
        sketch: &SketchId,
        from: &NodeRef,
        to: &NodeRef,
        label: &str,
    ) -> Result<()>;
}

/// Discards every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGraph;

#[async_trait]
impl GraphSink for NoopGraph {
    async fn create_node(&self, _sketch: &SketchId, _entity: &Entity) -> Result<()> {
        Ok(())
    }

    async fn create_relationship(
        &self,
        _sketch: &SketchId,
        _from: &NodeRef,
        _to: &NodeRef,
        _label: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// A relationship recorded by [`MemoryGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub sketch: SketchId,
    pub from: NodeRef,
    pub to: NodeRef,
    pub label: String,
}

/// In-process graph, keyed by sketch and node reference.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    nodes: Mutex<IndexMap<(SketchId, NodeRef), Entity>>,
    edges: Mutex<IndexSet<Edge>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored nodes in insertion order.
    pub fn nodes(&self) -> Vec<Entity> {
        self.nodes
            .lock()
            .map(|nodes| nodes.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn relationships(&self) -> Vec<Edge> {
        self.edges
            .lock()
            .map(|edges| edges.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GraphSink for MemoryGraph {
    async fn create_node(&self, sketch: &SketchId, entity: &Entity) -> Result<()> {
        if let Ok(mut nodes) = self.nodes.lock() {
            let key = (sketch.clone(), entity.node_ref());
            match nodes.get_mut(&key) {
                // Later writes add fields, never remove them.
                Some(existing) => {
                    for (field, value) in &entity.fields {
                        existing.fields.insert(field.clone(), value.clone());
                    }
                }
                None => {
                    nodes.insert(key, entity.clone());
                }
            }
        }
        Ok(())
    }

    async fn create_relationship(
        &self,
        sketch: &SketchId,
        from: &NodeRef,
        to: &NodeRef,
        label: &str,
    ) -> Result<()> {
        if let Ok(mut edges) = self.edges.lock() {
            edges.insert(Edge {
                sketch: sketch.clone(),
                from: from.clone(),
                to: to.clone(),
                label: label.to_string(),
            });
        }
        Ok(())
    }
}
