//! Error types for enrichkit.
//!
//! Library crates use [`EnrichError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all enrichkit operations.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// A required parameter or secret could not be resolved, or the app
    /// config file is unusable.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Bad input item or malformed connector document.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Lookup of an unregistered plugin.
    #[error("plugin not found: {name}")]
    NotFound { name: String },

    /// A template referenced a variable with no value.
    #[error("render error: missing template variable '{variable}'")]
    Render { variable: String },

    /// An outbound call targeted a blocked network destination.
    #[error("blocked network target {url}: {reason}")]
    Ssrf { url: String, reason: String },

    /// Network or HTTP failure from the wrapped source.
    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        status: Option<u16>,
        retryable: bool,
    },

    /// A pipeline step names a plugin that is not registered.
    #[error("pipeline assembly failed at step '{step_id}': unknown plugin '{plugin}'")]
    RegistryAssembly { step_id: String, plugin: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EnrichError>;

impl EnrichError {
    /// Create a configuration error from any displayable message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn render(variable: impl Into<String>) -> Self {
        Self::Render {
            variable: variable.into(),
        }
    }

    pub fn ssrf(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Ssrf {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Upstream failure that a retry may fix (connect error, timeout).
    pub fn upstream_transient(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
            status: None,
            retryable: true,
        }
    }

    /// Upstream failure classified from an HTTP status: 5xx and 429 are
    /// retryable, everything else is final.
    pub fn upstream_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
            status: Some(status),
            retryable: status == 429 || (500..600).contains(&status),
        }
    }

    /// Upstream failure that no retry can fix (undecodable body, etc.).
    pub fn upstream_fatal(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
            status: None,
            retryable: false,
        }
    }

    pub fn assembly(step_id: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self::RegistryAssembly {
            step_id: step_id.into(),
            plugin: plugin.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Only upstream failures flagged retryable are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream {
                retryable: true,
                ..
            }
        )
    }

    /// Short machine-readable kind, used in run traces.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Render { .. } => "render",
            Self::Ssrf { .. } => "ssrf",
            Self::Upstream { .. } => "upstream",
            Self::RegistryAssembly { .. } => "registry_assembly",
            Self::Io { .. } => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = EnrichError::configuration("missing required parameter 'api_key'");
        assert_eq!(
            err.to_string(),
            "configuration error: missing required parameter 'api_key'"
        );

        let err = EnrichError::render("domain");
        assert!(err.to_string().contains("'domain'"));

        let err = EnrichError::assembly("step-1", "nonexistent_plugin");
        assert!(err.to_string().contains("nonexistent_plugin"));
    }

    #[test]
    fn status_classification() {
        assert!(EnrichError::upstream_status(503, "unavailable").is_retryable());
        assert!(EnrichError::upstream_status(429, "slow down").is_retryable());
        assert!(!EnrichError::upstream_status(404, "missing").is_retryable());
        assert!(!EnrichError::upstream_status(401, "denied").is_retryable());
        assert!(EnrichError::upstream_transient("connection reset").is_retryable());
        assert!(!EnrichError::upstream_fatal("bad json").is_retryable());
    }

    #[test]
    fn non_upstream_errors_never_retry() {
        assert!(!EnrichError::ssrf("http://127.0.0.1/", "loopback").is_retryable());
        assert!(!EnrichError::render("x").is_retryable());
        assert!(!EnrichError::validation("bad").is_retryable());
    }

    #[test]
    fn kinds_are_stable() {
        assert_eq!(EnrichError::not_found("x").kind(), "not_found");
        assert_eq!(EnrichError::ssrf("u", "r").kind(), "ssrf");
    }
}
