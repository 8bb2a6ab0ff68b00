//! Application configuration for enrichkit.
//!
//! User config lives at `~/.enrichkit/enrichkit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnrichError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "enrichkit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".enrichkit";

// ---------------------------------------------------------------------------
// Config structs (matching enrichkit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Outbound HTTP settings for template connectors.
    #[serde(default)]
    pub http: HttpSection,

    /// Secret vault settings.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory of connector documents loaded at startup.
    #[serde(default = "default_connectors_dir")]
    pub connectors_dir: String,

    /// Sketch identifier used when none is given on the command line.
    #[serde(default = "default_sketch_id")]
    pub sketch_id: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            connectors_dir: default_connectors_dir(),
            sketch_id: default_sketch_id(),
        }
    }
}

fn default_connectors_dir() -> String {
    "connectors".into()
}
fn default_sketch_id() -> String {
    "default".into()
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSection {
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum redirects followed per call.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Disable the private-network check (local development only).
    #[serde(default)]
    pub allow_private_targets: bool,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
            allow_private_targets: false,
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_redirects() -> usize {
    5
}

/// `[vault]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Prefix prepended to a secret reference to form the env var name.
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            env_prefix: default_env_prefix(),
        }
    }
}

fn default_env_prefix() -> String {
    "ENRICHKIT_SECRET_".into()
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Run-level timeout applied by callers; 0 disables it.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout(),
        }
    }
}

fn default_run_timeout() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// HTTP config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime HTTP configuration for the connector call primitive.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum redirects followed per call.
    pub max_redirects: usize,
    /// Skip the private-network check.
    pub allow_private_targets: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for HttpConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.http.timeout_secs),
            max_redirects: config.http.max_redirects,
            allow_private_targets: config.http.allow_private_targets,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.enrichkit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EnrichError::configuration("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.enrichkit/enrichkit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EnrichError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        EnrichError::configuration(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EnrichError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config)
        .map_err(|e| EnrichError::configuration(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EnrichError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("connectors_dir"));
        assert!(toml_str.contains("ENRICHKIT_SECRET_"));
        assert!(toml_str.contains("allow_private_targets = false"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.http.timeout_secs, 30);
        assert_eq!(parsed.orchestrator.run_timeout_secs, 300);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[http]
timeout_secs = 5

[vault]
env_prefix = "OSINT_"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.http.max_redirects, 5);
        assert_eq!(config.vault.env_prefix, "OSINT_");
        assert_eq!(config.defaults.sketch_id, "default");
    }

    #[test]
    fn http_config_from_app_config() {
        let mut app = AppConfig::default();
        app.http.allow_private_targets = true;
        let http = HttpConfig::from(&app);
        assert_eq!(http.timeout, Duration::from_secs(30));
        assert_eq!(http.max_redirects, 5);
        assert!(http.allow_private_targets);
    }

    #[test]
    fn load_from_missing_file_is_io_error() {
        let err = load_config_from(Path::new("/nonexistent/enrichkit.toml")).unwrap_err();
        assert!(matches!(err, EnrichError::Io { .. }));
    }
}
