//! Plugins interpreted from connector documents.

use std::sync::Arc;

use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use tracing::debug;

use enrichkit_connector::{ConnectorDocument, TemplateEngine, template_values};
use enrichkit_shared::Result;
use enrichkit_types::Entity;

use crate::contract::{ParameterSpec, PluginDescriptor, PluginKind, ResolvedParams};
use crate::plugin::Invocation;

/// A connector document paired with the engine that executes it.
#[derive(Debug, Clone)]
pub struct TemplateConnector {
    document: Arc<ConnectorDocument>,
    engine: TemplateEngine,
}

impl TemplateConnector {
    pub fn new(document: ConnectorDocument, engine: TemplateEngine) -> Self {
        Self {
            document: Arc::new(document),
            engine,
        }
    }

    pub fn document(&self) -> &ConnectorDocument {
        &self.document
    }

    /// Descriptor derived from the document. Declared secrets become
    /// vault-backed parameters so they resolve like any other secret.
    pub fn descriptor(&self) -> PluginDescriptor {
        let doc = &self.document;
        let mut descriptor = PluginDescriptor::new(
            &doc.name,
            PluginKind::Template,
            &doc.input.type_name,
            &doc.output.type_name,
        )
        .with_category(&doc.category)
        .with_key(&doc.input.key);

        for secret in &doc.secrets {
            let spec = ParameterSpec::secret(&secret.name);
            descriptor = descriptor.with_param(if secret.required {
                spec.required()
            } else {
                spec
            });
        }
        if let Some(label) = &doc.output.relationship {
            descriptor = descriptor.with_relationship(label);
        }
        if let Some(text) = &doc.description {
            descriptor = descriptor.with_description(text);
        }
        descriptor
    }

    /// Render, call and map for one input item.
    ///
    /// Secrets are exposed only into the call-scoped variable map, which is
    /// dropped when this returns.
    pub async fn fetch_one(&self, input: &Entity, call: &Invocation<'_>) -> Result<Vec<Entity>> {
        let values = template_values(input, secret_values(call.params), call.params.plain().clone());
        let mapped = self.engine.invoke(&self.document, input, &values).await?;

        let mut outputs = Vec::with_capacity(mapped.len());
        for value in mapped {
            match call.output(&value) {
                Ok(entity) => outputs.push(entity.derived_from(input)),
                Err(e) => debug!(
                    connector = %self.document.name,
                    error = %e,
                    "mapped value does not fit output type, dropping"
                ),
            }
        }
        Ok(outputs)
    }
}

fn secret_values(params: &ResolvedParams) -> Map<String, Value> {
    params
        .secrets()
        .map(|(name, secret)| (name.to_string(), Value::String(secret.expose_secret().to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PluginContext;
    use crate::plugin::{Plugin, PluginBody};
    use crate::vault::MemoryVault;
    use enrichkit_connector::DocumentFormat;
    use enrichkit_shared::{EnrichError, HttpConfig};
    use enrichkit_types::TypeCatalog;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(allow_private: bool) -> TemplateEngine {
        TemplateEngine::from_config(&HttpConfig {
            timeout: Duration::from_secs(5),
            max_redirects: 3,
            allow_private_targets: allow_private,
        })
        .unwrap()
    }

    fn connector(source: &str, allow_private: bool) -> TemplateConnector {
        let catalog = TypeCatalog::with_builtin_types();
        let doc = ConnectorDocument::parse(source, DocumentFormat::Yaml, &catalog).unwrap();
        TemplateConnector::new(doc, engine(allow_private))
    }

    fn plugin(connector: TemplateConnector, ctx: PluginContext) -> Plugin {
        Plugin::new(
            Arc::new(connector.descriptor()),
            PluginBody::Template(connector),
            ctx,
        )
        .unwrap()
    }

    fn ctx() -> PluginContext {
        PluginContext::new(Arc::new(TypeCatalog::with_builtin_types()))
    }

    #[test]
    fn descriptor_reflects_document() {
        let c = connector(
            r#"
name: ip_geo
category: Geo
input: {type: Ip, key: address}
request: {url: "https://geo.example.com/{{address}}?k={{secrets.GEO}}"}
secrets: [{name: GEO}, {name: EXTRA, required: false}]
response: {map: {address: ip, country: country}}
output: {type: Ip, relationship: LOCATED_IN}
"#,
            false,
        );
        let d = c.descriptor();
        assert_eq!(d.kind, PluginKind::Template);
        assert_eq!(d.category, "Geo");
        assert_eq!(d.key, "address");
        assert!(d.requires_parameters());
        assert!(!d.param("EXTRA").unwrap().required);
        assert_eq!(d.relationship.as_deref(), Some("LOCATED_IN"));
    }

    #[tokio::test]
    async fn template_plugin_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geo/8.8.8.8"))
            .and(header("Authorization", "Token geo-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip": "8.8.8.8",
                "location": {"country": "US", "city": "Mountain View"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let c = connector(
            &format!(
                r#"
name: ip_geo
input: {{type: Ip, key: address}}
request:
  url: "{}/geo/{{{{address}}}}"
  headers: {{Authorization: "Token {{{{secrets.GEO}}}}"}}
secrets: [{{name: GEO}}]
response:
  map: {{address: ip, country: location.country, city: location.city}}
"#,
                server.uri()
            ),
            true,
        );
        let vault = Arc::new(MemoryVault::new().with_secret("GEO", "geo-key"));
        let p = plugin(c, ctx().with_vault(vault));

        let out = p.try_execute(vec![json!("8.8.8.8")]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("country"), Some(&json!("US")));
        assert_eq!(out[0].get("city"), Some(&json!("Mountain View")));
        assert_eq!(out[0].origin.as_ref().unwrap().key, "8.8.8.8");
    }

    #[tokio::test]
    async fn metadata_address_is_refused_before_any_request() {
        let c = connector(
            r#"
name: echo_ip
input: {type: Ip, key: address}
request: {url: "http://{{address}}/"}
response: {expect: text}
"#,
            false,
        );
        let context = ctx();
        let p = plugin(c.clone(), context.clone());
        let params = p.resolve_parameters().await.unwrap();
        let ip_type = context.catalog.get("Ip").unwrap();
        let call = Invocation {
            descriptor: p.descriptor(),
            context: &context,
            params: &params,
            output_type: &ip_type,
        };
        let input = ip_type.coerce(&json!("169.254.169.254")).unwrap();

        let err = c.fetch_one(&input, &call).await.unwrap_err();
        assert!(matches!(err, EnrichError::Ssrf { .. }));

        // Through the full lifecycle the item is dropped, not raised.
        assert!(p.execute(vec![json!("169.254.169.254")]).await.is_empty());
    }

    #[tokio::test]
    async fn missing_declared_secret_yields_empty_result() {
        let c = connector(
            r#"
name: needs_secret
input: {type: Domain, key: domain}
request: {url: "https://api.example.com/{{domain}}?key={{secrets.API}}"}
secrets: [{name: API}]
response: {expect: json}
"#,
            false,
        );
        let p = plugin(c, ctx());
        assert!(matches!(
            p.try_execute(vec![json!("example.com")]).await,
            Err(EnrichError::Configuration { .. })
        ));
        assert!(p.execute(vec![json!("example.com")]).await.is_empty());
    }
}
