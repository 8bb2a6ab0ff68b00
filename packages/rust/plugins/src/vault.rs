//! Secret lookup boundary.
//!
//! Lookups happen on demand, may miss, and carry no caching guarantee.
//! Values are returned as [`SecretString`] so they never reach a log line.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::debug;

use enrichkit_shared::{Result, VaultConfig};

/// Resolves secret references to values.
#[async_trait]
pub trait SecretVault: Send + Sync {
    /// Look up `reference`; `Ok(None)` is a negative lookup, not an error.
    async fn get_secret(&self, reference: &str) -> Result<Option<SecretString>>;

    /// Human-readable backend name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Environment-backed vault
// ---------------------------------------------------------------------------

/// Reads secrets from environment variables: reference `shodan key` with
/// prefix `ENRICHKIT_SECRET_` maps to `ENRICHKIT_SECRET_SHODAN_KEY`.
#[derive(Debug, Clone)]
pub struct EnvVault {
    prefix: String,
}

impl EnvVault {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable consulted for `reference`.
    pub fn variable_for(&self, reference: &str) -> String {
        let suffix: String = reference
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{suffix}", self.prefix)
    }
}

impl From<&VaultConfig> for EnvVault {
    fn from(config: &VaultConfig) -> Self {
        Self::new(config.env_prefix.clone())
    }
}

#[async_trait]
impl SecretVault for EnvVault {
    async fn get_secret(&self, reference: &str) -> Result<Option<SecretString>> {
        let variable = self.variable_for(reference);
        match std::env::var(&variable) {
            Ok(value) if !value.is_empty() => Ok(Some(SecretString::from(value))),
            _ => {
                debug!(%variable, "secret not present in environment");
                Ok(None)
            }
        }
    }

    fn name(&self) -> &str {
        "env"
    }
}

// ---------------------------------------------------------------------------
// In-memory vault
// ---------------------------------------------------------------------------

/// Fixed reference → value map. Useful for tests and embedding.
#[derive(Default)]
pub struct MemoryVault {
    secrets: HashMap<String, SecretString>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, reference: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets
            .insert(reference.into(), SecretString::from(value.into()));
        self
    }
}

#[async_trait]
impl SecretVault for MemoryVault {
    async fn get_secret(&self, reference: &str) -> Result<Option<SecretString>> {
        Ok(self.secrets.get(reference).cloned())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Vault that never has anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVault;

#[async_trait]
impl SecretVault for NoVault {
    async fn get_secret(&self, _reference: &str) -> Result<Option<SecretString>> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "none"
    }
}
