//! Plugin contract, registry, and built-in plugins for enrichkit.
//!
//! This crate provides:
//! - [`Plugin`]: the four-stage lifecycle (resolve parameters, preprocess,
//!   fetch, postprocess) behind a failure boundary
//! - [`PluginRegistry`]: name → descriptor + factory, populated at startup
//! - [`TemplateConnector`]: plugins interpreted from connector documents
//! - [`SecretVault`] and [`GraphSink`]: boundaries to external collaborators

pub mod builtin;
pub mod context;
pub mod contract;
pub mod graph;
pub mod plugin;
pub mod registry;
pub mod template;
pub mod vault;

pub use builtin::{HostResolver, StaticResolver, SystemResolver, register_builtin_plugins};
pub use context::PluginContext;
pub use contract::{ParamKind, ParameterSpec, PluginDescriptor, PluginKind, ResolvedParams};
pub use graph::{Edge, GraphSink, MemoryGraph, NoopGraph};
pub use plugin::{CodeHooks, Invocation, Plugin, PluginBody};
pub use registry::{LoadReport, PluginFactory, PluginRegistry, load_connector_dir};
pub use template::TemplateConnector;
pub use vault::{EnvVault, MemoryVault, NoVault, SecretVault};
