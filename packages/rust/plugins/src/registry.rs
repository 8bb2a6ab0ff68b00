//! Process-wide plugin catalog.
//!
//! Populated during startup, then shared read-only behind an `Arc`. Each
//! lookup builds a fresh [`Plugin`] bound to the caller's run context.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use enrichkit_connector::{ConnectorDocument, DocumentFormat, TemplateEngine};
use enrichkit_shared::{EnrichError, Result};
use enrichkit_types::TypeCatalog;

use crate::context::PluginContext;
use crate::contract::PluginDescriptor;
use crate::plugin::{CodeHooks, Plugin, PluginBody};
use crate::template::TemplateConnector;

/// Produces the body of a new plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> PluginBody + Send + Sync>;

#[derive(Clone)]
struct Entry {
    descriptor: Arc<PluginDescriptor>,
    factory: PluginFactory,
}

/// Plugins keyed by unique name.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    entries: IndexMap<String, Entry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Re-registering a name replaces the previous entry.
    pub fn register(
        &mut self,
        descriptor: PluginDescriptor,
        factory: impl Fn() -> PluginBody + Send + Sync + 'static,
    ) {
        let name = descriptor.name.clone();
        if self.entries.contains_key(&name) {
            warn!(plugin = %name, "replacing registered plugin");
        } else {
            debug!(plugin = %name, kind = %descriptor.kind, "registered plugin");
        }
        self.entries.insert(
            name,
            Entry {
                descriptor: Arc::new(descriptor),
                factory: Arc::new(factory),
            },
        );
    }

    /// Register hand-written hooks; instances share the hooks object.
    pub fn register_code(&mut self, descriptor: PluginDescriptor, hooks: Arc<dyn CodeHooks>) {
        self.register(descriptor, move || PluginBody::Code(hooks.clone()));
    }

    /// Register a connector under the name its document declares.
    pub fn register_template(&mut self, connector: TemplateConnector) {
        let descriptor = connector.descriptor();
        self.register(descriptor, move || PluginBody::Template(connector.clone()));
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Build a plugin instance bound to `context`.
    pub fn get(&self, name: &str, context: &PluginContext) -> Result<Plugin> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| EnrichError::not_found(name))?;
        Plugin::new(entry.descriptor.clone(), (entry.factory)(), context.clone())
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<PluginDescriptor>> {
        self.entries.get(name).map(|e| e.descriptor.clone())
    }

    /// Descriptors grouped by category, categories and names sorted.
    pub fn list_by_category(&self) -> BTreeMap<String, Vec<Arc<PluginDescriptor>>> {
        let mut grouped: BTreeMap<String, Vec<Arc<PluginDescriptor>>> = BTreeMap::new();
        for entry in self.entries.values() {
            grouped
                .entry(entry.descriptor.category.clone())
                .or_default()
                .push(entry.descriptor.clone());
        }
        for list in grouped.values_mut() {
            list.sort_by(|a, b| a.name.cmp(&b.name));
        }
        grouped
    }

    /// Descriptors accepting `type_name` as input (case-insensitive).
    pub fn list_by_input_type(&self, type_name: &str) -> Vec<Arc<PluginDescriptor>> {
        let mut found: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.descriptor.input_type.eq_ignore_ascii_case(type_name))
            .map(|e| e.descriptor.clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Descriptor plus derived input/output schemas, for authoring tools.
    pub fn describe(&self, name: &str, catalog: &TypeCatalog) -> Result<Value> {
        let descriptor = self
            .descriptor(name)
            .ok_or_else(|| EnrichError::not_found(name))?;
        let schema = |type_name: &str| {
            catalog
                .get(type_name)
                .map(|t| t.schema())
                .unwrap_or(Value::Null)
        };
        Ok(json!({
            "descriptor": descriptor.as_ref(),
            "requires_parameters": descriptor.requires_parameters(),
            "input_schema": schema(&descriptor.input_type),
            "output_schema": schema(&descriptor.output_type),
        }))
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Connector directory loading
// ---------------------------------------------------------------------------

/// Outcome of [`load_connector_dir`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub rejected: Vec<(PathBuf, String)>,
}

/// Register one template plugin per valid document in `dir`.
///
/// Files are read in name order; only `.yaml`, `.yml` and `.json` are
/// considered. Invalid documents are reported and never registered.
pub fn load_connector_dir(
    registry: &mut PluginRegistry,
    dir: &Path,
    catalog: &TypeCatalog,
    engine: &TemplateEngine,
) -> Result<LoadReport> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| EnrichError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && DocumentFormat::from_path(p).is_some())
        .collect();
    paths.sort();

    let mut report = LoadReport::default();
    for path in paths {
        match ConnectorDocument::from_path(&path, catalog) {
            Ok(document) => {
                let name = document.name.clone();
                registry.register_template(TemplateConnector::new(document, engine.clone()));
                report.loaded.push(name);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping invalid connector");
                report.rejected.push((path, e.to_string()));
            }
        }
    }

    info!(
        dir = %dir.display(),
        loaded = report.loaded.len(),
        rejected = report.rejected.len(),
        "connector directory loaded"
    );
    Ok(report)
}
