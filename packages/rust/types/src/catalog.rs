//! Process-wide catalog of entity types.
//!
//! Built once during startup, then shared read-only behind an `Arc`.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::descriptor::TypeDescriptor;

/// Maps type names to descriptors. Lookups are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    /// Keyed by lowercased name, kept in registration order.
    types: IndexMap<String, Arc<TypeDescriptor>>,
}

impl TypeCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding the built-in entity types.
    pub fn with_builtin_types() -> Self {
        let mut catalog = Self::new();
        for descriptor in crate::builtin::builtin_types() {
            catalog.register(descriptor);
        }
        catalog
    }

    /// Add or overwrite a descriptor by name.
    ///
    /// Overwriting keeps the original detection position.
    pub fn register(&mut self, descriptor: TypeDescriptor) {
        let key = descriptor.name().to_lowercase();
        if self.types.contains_key(&key) {
            debug!(name = descriptor.name(), "overwriting type descriptor");
        }
        self.types.insert(key, Arc::new(descriptor));
    }

    /// Look up a descriptor; `None` when the type is unknown.
    pub fn get(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(&name.to_lowercase())
    }

    /// Classify a raw string: the first type (in registration order) whose
    /// detection rule matches wins.
    pub fn detect(&self, raw: &str) -> Option<Arc<TypeDescriptor>> {
        self.types.values().find(|t| t.detects(raw)).cloned()
    }

    /// All descriptors in registration order.
    pub fn list(&self) -> impl Iterator<Item = &Arc<TypeDescriptor>> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
