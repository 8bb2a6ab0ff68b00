//! Shared error model, configuration, and identifiers for enrichkit.
//!
//! This crate is the foundation depended on by all other enrichkit crates.
//! It provides:
//! - [`EnrichError`]: the unified error taxonomy
//! - Identifiers ([`RunId`], [`SketchId`])
//! - Configuration ([`AppConfig`], [`HttpConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, HttpConfig, HttpSection, OrchestratorConfig, VaultConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{EnrichError, Result};
pub use types::{RunId, SketchId};
