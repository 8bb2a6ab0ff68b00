//! Connector documents: the declarative description of a template connector.
//!
//! A document is parsed and validated once when its connector loads and is
//! immutable afterwards. Validation rejects documents whose request method is
//! not allow-listed, whose input/output types are unknown to the catalog, or
//! that lack an `input`, `request`, or `response` section.

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use enrichkit_shared::{EnrichError, Result};
use enrichkit_types::TypeCatalog;

use crate::render;

/// Upper bound on declared retries; anything larger is a typo.
const MAX_DECLARED_RETRIES: u32 = 10;
/// Upper bound on `retry.backoffFactor`, in seconds.
const MAX_BACKOFF_FACTOR: f64 = 60.0;

// ---------------------------------------------------------------------------
// Document sections
// ---------------------------------------------------------------------------

/// Allow-listed request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            other => Err(EnrichError::validation(format!(
                "request method '{other}' is not allowed (expected GET or POST)"
            ))),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// How the response body is decoded before mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expect {
    Json,
    Xml,
    Text,
}

impl Expect {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            "text" => Ok(Self::Text),
            other => Err(EnrichError::validation(format!(
                "response.expect '{other}' is not supported (expected json, xml or text)"
            ))),
        }
    }
}

/// `input` section: the declared input type and its key field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    pub key: String,
}

/// `request` section after validation.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub params: IndexMap<String, String>,
    pub body: Option<Value>,
}

/// A secret the connector needs, resolved through the vault per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretSpec {
    pub name: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// `retry` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetrySpec {
    #[serde(default, alias = "max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff", alias = "backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_factor: default_backoff(),
        }
    }
}

fn default_backoff() -> f64 {
    0.5
}

/// `response` section after validation.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSpec {
    pub expect: Expect,
    /// Output field → path into the decoded response.
    pub map: IndexMap<String, String>,
}

/// `output` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutputSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, alias = "is_array")]
    pub is_array: bool,
    #[serde(default, alias = "array_path")]
    pub array_path: Option<String>,
    /// Label of the graph relationship from input to output.
    #[serde(default)]
    pub relationship: Option<String>,
}

// ---------------------------------------------------------------------------
// Raw (unvalidated) shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRequest {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    headers: IndexMap<String, String>,
    #[serde(default)]
    params: IndexMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

fn default_method() -> String {
    "GET".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawResponse {
    #[serde(default = "default_expect")]
    expect: String,
    #[serde(default)]
    map: IndexMap<String, String>,
}

fn default_expect() -> String {
    "json".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    name: Option<String>,
    category: Option<String>,
    version: Option<Scalar>,
    description: Option<String>,
    input: Option<InputSpec>,
    request: Option<RawRequest>,
    #[serde(default)]
    secrets: Vec<SecretSpec>,
    #[serde(default)]
    retry: RetrySpec,
    response: Option<RawResponse>,
    output: Option<OutputSpec>,
}

// ---------------------------------------------------------------------------
// ConnectorDocument
// ---------------------------------------------------------------------------

/// Source syntax of a connector document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Pick the format from a file extension (`.yaml`, `.yml`, `.json`).
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// A validated connector document.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorDocument {
    pub name: String,
    pub category: String,
    pub version: String,
    pub description: Option<String>,
    pub input: InputSpec,
    pub request: RequestSpec,
    pub secrets: Vec<SecretSpec>,
    pub retry: RetrySpec,
    pub response: ResponseSpec,
    pub output: OutputSpec,
    /// SHA-256 of the source text, for log correlation.
    pub digest: String,
}

impl ConnectorDocument {
    /// Parse and validate a document against the type catalog.
    pub fn parse(source: &str, format: DocumentFormat, catalog: &TypeCatalog) -> Result<Self> {
        let raw: RawDocument = match format {
            DocumentFormat::Yaml => serde_yaml::from_str(source)
                .map_err(|e| EnrichError::validation(format!("invalid connector YAML: {e}")))?,
            DocumentFormat::Json => serde_json::from_str(source)
                .map_err(|e| EnrichError::validation(format!("invalid connector JSON: {e}")))?,
        };

        let mut doc = validate(raw, catalog)?;
        doc.digest = compute_digest(source);
        Ok(doc)
    }

    /// Read, parse and validate a document file.
    pub fn from_path(path: &Path, catalog: &TypeCatalog) -> Result<Self> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| {
            EnrichError::validation(format!(
                "{}: unsupported connector file extension",
                path.display()
            ))
        })?;
        let source = std::fs::read_to_string(path).map_err(|e| EnrichError::io(path, e))?;
        Self::parse(&source, format, catalog).map_err(|e| match e {
            EnrichError::Validation { message } => {
                EnrichError::validation(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Whether `name` is a declared secret.
    pub fn declares_secret(&self, name: &str) -> bool {
        self.secrets.iter().any(|s| s.name == name)
    }
}

fn validate(raw: RawDocument, catalog: &TypeCatalog) -> Result<ConnectorDocument> {
    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| EnrichError::validation("connector is missing 'name'"))?;

    let input = raw
        .input
        .ok_or_else(|| EnrichError::validation(format!("{name}: missing 'input' section")))?;
    let request = raw
        .request
        .ok_or_else(|| EnrichError::validation(format!("{name}: missing 'request' section")))?;
    let response = raw
        .response
        .ok_or_else(|| EnrichError::validation(format!("{name}: missing 'response' section")))?;

    let method = HttpMethod::parse(&request.method)
        .map_err(|e| EnrichError::validation(format!("{name}: {e}")))?;
    if request.url.trim().is_empty() {
        return Err(EnrichError::validation(format!("{name}: request.url is empty")));
    }
    let expect = Expect::parse(&response.expect)
        .map_err(|e| EnrichError::validation(format!("{name}: {e}")))?;

    let input_type = catalog.get(&input.type_name).ok_or_else(|| {
        EnrichError::validation(format!(
            "{name}: input type '{}' is not a known type",
            input.type_name
        ))
    })?;
    if input_type.field(&input.key).is_none() {
        return Err(EnrichError::validation(format!(
            "{name}: input key '{}' is not a field of {}",
            input.key,
            input_type.name()
        )));
    }

    let output = raw.output.unwrap_or_else(|| OutputSpec {
        type_name: input_type.name().to_string(),
        is_array: false,
        array_path: None,
        relationship: None,
    });
    let output_type = catalog.get(&output.type_name).ok_or_else(|| {
        EnrichError::validation(format!(
            "{name}: output type '{}' is not a known type",
            output.type_name
        ))
    })?;

    if raw.retry.max_retries > MAX_DECLARED_RETRIES {
        return Err(EnrichError::validation(format!(
            "{name}: retry.maxRetries {} exceeds {MAX_DECLARED_RETRIES}",
            raw.retry.max_retries
        )));
    }
    let factor = raw.retry.backoff_factor;
    if !factor.is_finite() || !(0.0..=MAX_BACKOFF_FACTOR).contains(&factor) {
        return Err(EnrichError::validation(format!(
            "{name}: retry.backoffFactor must be between 0 and {MAX_BACKOFF_FACTOR}"
        )));
    }

    for (i, secret) in raw.secrets.iter().enumerate() {
        if secret.name.trim().is_empty() {
            return Err(EnrichError::validation(format!("{name}: secret #{i} has no name")));
        }
        if raw.secrets[..i].iter().any(|s| s.name == secret.name) {
            return Err(EnrichError::validation(format!(
                "{name}: secret '{}' declared twice",
                secret.name
            )));
        }
    }

    let request = RequestSpec {
        method,
        url: request.url,
        headers: request.headers,
        params: request.params,
        body: request.body,
    };
    check_secret_references(&name, &request, &raw.secrets)?;

    Ok(ConnectorDocument {
        name,
        category: raw.category.unwrap_or_else(|| "uncategorized".into()),
        version: raw.version.map(Scalar::into_string).unwrap_or_else(|| "1".into()),
        description: raw.description,
        input: InputSpec {
            type_name: input_type.name().to_string(),
            key: input.key,
        },
        request,
        secrets: raw.secrets,
        retry: raw.retry,
        response: ResponseSpec {
            expect,
            map: response.map,
        },
        output: OutputSpec {
            type_name: output_type.name().to_string(),
            ..output
        },
        digest: String::new(),
    })
}

/// Every `{{secrets.X}}` placeholder must name a declared secret.
fn check_secret_references(name: &str, request: &RequestSpec, secrets: &[SecretSpec]) -> Result<()> {
    let mut templates: Vec<&str> = vec![request.url.as_str()];
    templates.extend(request.headers.values().map(String::as_str));
    templates.extend(request.params.values().map(String::as_str));
    let mut body_strings = Vec::new();
    if let Some(body) = &request.body {
        collect_strings(body, &mut body_strings);
    }
    templates.extend(body_strings.iter().map(String::as_str));

    for template in templates {
        for variable in render::placeholders(template) {
            if let Some(secret) = variable.strip_prefix("secrets.") {
                if !secrets.iter().any(|s| s.name == secret) {
                    return Err(EnrichError::validation(format!(
                        "{name}: template references undeclared secret '{secret}'"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn compute_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHODAN_LIKE: &str = r#"
name: ip_to_geo
category: Ip
version: 1.2
input:
  type: Ip
  key: address
request:
  method: get
  url: "https://geo.example.com/v1/{{address}}"
  headers:
    Authorization: "Bearer {{secrets.GEO_API_KEY}}"
  params:
    fields: "country,city"
secrets:
  - name: GEO_API_KEY
retry:
  maxRetries: 2
  backoffFactor: 0.1
response:
  expect: json
  map:
    address: ip
    country: location.country
    city: location.city
output:
  type: Ip
"#;

    fn catalog() -> TypeCatalog {
        TypeCatalog::with_builtin_types()
    }

    #[test]
    fn parses_valid_yaml_document() {
        let doc = ConnectorDocument::parse(SHODAN_LIKE, DocumentFormat::Yaml, &catalog()).unwrap();
        assert_eq!(doc.name, "ip_to_geo");
        assert_eq!(doc.version, "1.2");
        assert_eq!(doc.request.method, HttpMethod::Get);
        assert_eq!(doc.response.expect, Expect::Json);
        assert_eq!(doc.retry.max_retries, 2);
        assert_eq!(doc.response.map.get("country").unwrap(), "location.country");
        assert!(doc.declares_secret("GEO_API_KEY"));
        assert_eq!(doc.digest.len(), 64);
    }

    #[test]
    fn parses_json_document_with_default_output() {
        let json = r#"{
            "name": "domain_echo",
            "input": {"type": "domain", "key": "domain"},
            "request": {"url": "https://echo.example.com/{{domain}}"},
            "response": {"map": {"domain": "domain"}}
        }"#;
        let doc = ConnectorDocument::parse(json, DocumentFormat::Json, &catalog()).unwrap();
        assert_eq!(doc.input.type_name, "Domain");
        assert_eq!(doc.output.type_name, "Domain");
        assert_eq!(doc.category, "uncategorized");
        assert_eq!(doc.retry.max_retries, 0);
    }

    #[test]
    fn rejects_missing_sections() {
        for section in ["input", "request", "response"] {
            let mut value: serde_json::Value = serde_yaml::from_str(SHODAN_LIKE).unwrap();
            value.as_object_mut().unwrap().remove(section);
            let text = serde_json::to_string(&value).unwrap();
            let err = ConnectorDocument::parse(&text, DocumentFormat::Json, &catalog()).unwrap_err();
            assert!(
                err.to_string().contains(&format!("missing '{section}'")),
                "{section}: {err}"
            );
        }
    }

    #[test]
    fn rejects_disallowed_method() {
        let text = SHODAN_LIKE.replace("method: get", "method: DELETE");
        let err = ConnectorDocument::parse(&text, DocumentFormat::Yaml, &catalog()).unwrap_err();
        assert!(err.to_string().contains("DELETE"));
    }

    #[test]
    fn rejects_unknown_input_type() {
        let text = SHODAN_LIKE.replace("type: Ip\n  key", "type: Starship\n  key");
        let err = ConnectorDocument::parse(&text, DocumentFormat::Yaml, &catalog()).unwrap_err();
        assert!(err.to_string().contains("Starship"));
    }

    #[test]
    fn rejects_undeclared_secret_reference() {
        let text = SHODAN_LIKE.replace("- name: GEO_API_KEY", "- name: OTHER_KEY");
        let err = ConnectorDocument::parse(&text, DocumentFormat::Yaml, &catalog()).unwrap_err();
        assert!(err.to_string().contains("undeclared secret 'GEO_API_KEY'"));
    }

    #[test]
    fn rejects_out_of_range_backoff() {
        for factor in ["1000000.0", "-1.0", "60.5"] {
            let text = SHODAN_LIKE.replace("backoffFactor: 0.1", &format!("backoffFactor: {factor}"));
            let err = ConnectorDocument::parse(&text, DocumentFormat::Yaml, &catalog()).unwrap_err();
            assert!(err.to_string().contains("backoffFactor"), "{factor}: {err}");
        }
        let text = SHODAN_LIKE.replace("backoffFactor: 0.1", "backoffFactor: 60.0");
        assert!(ConnectorDocument::parse(&text, DocumentFormat::Yaml, &catalog()).is_ok());
    }

    #[test]
    fn rejects_unsupported_expect() {
        let text = SHODAN_LIKE.replace("expect: json", "expect: protobuf");
        assert!(ConnectorDocument::parse(&text, DocumentFormat::Yaml, &catalog()).is_err());
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b.yml")),
            Some(DocumentFormat::Yaml)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("c.JSON")),
            Some(DocumentFormat::Json)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("d.toml")), None);
    }
}
