//! The template engine: render → check → call → decode → map.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use enrichkit_shared::{HttpConfig, Result};
use enrichkit_types::Entity;

use crate::decode::decode_body;
use crate::document::ConnectorDocument;
use crate::http::{HttpCaller, RenderedRequest, RetryPolicy};
use crate::mapping::map_response;
use crate::render::{Encoding, render, render_value, render_with};

/// Build the variable map a connector template is rendered against.
///
/// Input fields sit at the top level (`{{domain}}`) and under `input.`;
/// secrets and parameters live under `secrets.` and `params.`.
pub fn template_values(
    input: &Entity,
    secrets: Map<String, Value>,
    params: Map<String, Value>,
) -> Value {
    let mut values = input.fields.clone();
    values.insert("input".into(), input.to_value());
    values.insert("secrets".into(), Value::Object(secrets));
    values.insert("params".into(), Value::Object(params));
    Value::Object(values)
}

/// Render the document's request against `values`.
///
/// The URL is percent-encoded per placeholder; headers, query values and
/// body are inserted raw. Nothing is returned if any variable is missing.
pub fn build_request(doc: &ConnectorDocument, values: &Value) -> Result<RenderedRequest> {
    let url = render(&doc.request.url, values)?;

    let headers = render_pairs(&doc.request.headers, values)?;
    let query = render_pairs(&doc.request.params, values)?;

    let body = doc
        .request
        .body
        .as_ref()
        .map(|body| render_value(body, values))
        .transpose()?;

    Ok(RenderedRequest {
        method: doc.request.method,
        url,
        headers,
        query,
        body,
    })
}

fn render_pairs(templates: &IndexMap<String, String>, values: &Value) -> Result<Vec<(String, String)>> {
    let mut out = Vec::with_capacity(templates.len());
    for (name, template) in templates {
        out.push((name.clone(), render_with(template, values, Encoding::Raw)?));
    }
    Ok(out)
}

/// Executes connector documents against live HTTP sources.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    http: HttpCaller,
}

impl TemplateEngine {
    pub fn new(http: HttpCaller) -> Self {
        Self { http }
    }

    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        Ok(Self::new(HttpCaller::new(config)?))
    }

    pub fn http(&self) -> &HttpCaller {
        &self.http
    }

    /// Call the connector for one input and return the mapped output
    /// objects (not yet validated against the output type).
    #[instrument(skip_all, fields(connector = %doc.name, input = %input.key()))]
    pub async fn invoke(
        &self,
        doc: &ConnectorDocument,
        input: &Entity,
        values: &Value,
    ) -> Result<Vec<Value>> {
        let request = build_request(doc, values)?;
        let response = self.http.call(&request, &RetryPolicy::from(&doc.retry)).await?;
        let data = decode_body(&response.body, doc.response.expect)?;
        let mapped = map_response(&data, input, &doc.response, &doc.output);

        debug!(
            status = response.status,
            outputs = mapped.len(),
            digest = &doc.digest[..doc.digest.len().min(12)],
            "connector call complete"
        );
        Ok(mapped)
    }
}
