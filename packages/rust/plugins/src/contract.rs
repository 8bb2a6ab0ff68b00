//! Plugin descriptors and parameter schemas.

use std::collections::HashMap;
use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Closed set of plugin implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Hand-written, no network: reshapes one type into another.
    Transform,
    /// Hand-written, calls an external source.
    Enricher,
    /// Interpreted from a connector document.
    Template,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transform => "transform",
            Self::Enricher => "enricher",
            Self::Template => "template",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Plain,
    /// The supplied value is a vault reference, not the secret itself.
    VaultSecret,
    /// Must be an absolute http(s) URL.
    Url,
}

/// One declared plugin parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    fn of(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn plain(name: &str) -> Self {
        Self::of(name, ParamKind::Plain)
    }

    pub fn secret(name: &str) -> Self {
        Self::of(name, ParamKind::VaultSecret)
    }

    pub fn url(name: &str) -> Self {
        Self::of(name, ParamKind::Url)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }
}

/// Registration-time description of a plugin. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub category: String,
    pub kind: PluginKind,
    pub input_type: String,
    pub output_type: String,
    /// Input field the plugin keys on; empty means the input type's primary.
    pub key: String,
    pub params: Vec<ParameterSpec>,
    /// Label for input → output graph relationships.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PluginDescriptor {
    pub fn new(name: &str, kind: PluginKind, input_type: &str, output_type: &str) -> Self {
        Self {
            name: name.to_string(),
            category: input_type.to_string(),
            kind,
            input_type: input_type.to_string(),
            output_type: output_type.to_string(),
            key: String::new(),
            params: Vec::new(),
            relationship: None,
            description: None,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = key.to_string();
        self
    }

    pub fn with_param(mut self, spec: ParameterSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn with_relationship(mut self, label: &str) -> Self {
        self.relationship = Some(label.to_string());
        self
    }

    pub fn with_description(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    /// Whether any parameter must be supplied (or resolvable) to run.
    pub fn requires_parameters(&self) -> bool {
        self.params.iter().any(|p| p.required && p.default.is_none())
    }

    pub fn param(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

// ---------------------------------------------------------------------------
// Resolved parameters
// ---------------------------------------------------------------------------

/// Parameters after vault lookup and default fallback.
///
/// Secrets stay wrapped; `Debug` lists their names only.
#[derive(Default, Clone)]
pub struct ResolvedParams {
    plain: Map<String, Value>,
    secrets: HashMap<String, SecretString>,
}

impl ResolvedParams {
    pub(crate) fn insert_plain(&mut self, name: &str, value: Value) {
        self.plain.insert(name.to_string(), value);
    }

    pub(crate) fn insert_secret(&mut self, name: &str, value: SecretString) {
        self.secrets.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.plain.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.plain.get(name).and_then(Value::as_str)
    }

    pub fn secret(&self, name: &str) -> Option<&SecretString> {
        self.secrets.get(name)
    }

    pub fn plain(&self) -> &Map<String, Value> {
        &self.plain
    }

    pub fn secrets(&self) -> impl Iterator<Item = (&str, &SecretString)> {
        self.secrets.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Debug for ResolvedParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut secret_names: Vec<&str> = self.secrets.keys().map(String::as_str).collect();
        secret_names.sort_unstable();
        f.debug_struct("ResolvedParams")
            .field("plain", &self.plain)
            .field("secrets", &secret_names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requires_parameters_ignores_defaulted() {
        let d = PluginDescriptor::new("x", PluginKind::Enricher, "Domain", "Ip")
            .with_param(ParameterSpec::plain("limit").required().with_default(10));
        assert!(!d.requires_parameters());

        let d = d.with_param(ParameterSpec::secret("api_key").required());
        assert!(d.requires_parameters());
        assert_eq!(d.param("api_key").unwrap().kind, ParamKind::VaultSecret);
    }

    #[test]
    fn category_defaults_to_input_type() {
        let d = PluginDescriptor::new("x", PluginKind::Transform, "Email", "Domain");
        assert_eq!(d.category, "Email");
        assert_eq!(d.with_category("Mail").category, "Mail");
    }

    #[test]
    fn descriptor_serializes_kind_snake_case() {
        let d = PluginDescriptor::new("x", PluginKind::Template, "Domain", "Ip");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["kind"], json!("template"));
        assert!(v.get("relationship").is_none());
    }

    #[test]
    fn resolved_params_debug_hides_secret_values() {
        let mut params = ResolvedParams::default();
        params.insert_plain("limit", json!(5));
        params.insert_secret("api_key", SecretString::from("topsecret".to_string()));
        let shown = format!("{params:?}");
        assert!(shown.contains("api_key"));
        assert!(!shown.contains("topsecret"));
    }
}
