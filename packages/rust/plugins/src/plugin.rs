//! The plugin lifecycle: resolve parameters → preprocess → fetch →
//! postprocess, wrapped in a failure boundary.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};

use enrichkit_shared::{EnrichError, Result};
use enrichkit_types::{Entity, TypeDescriptor};

use crate::context::PluginContext;
use crate::contract::{ParamKind, ParameterSpec, PluginDescriptor, PluginKind, ResolvedParams};
use crate::template::TemplateConnector;

/// Items fetched concurrently within one plugin invocation.
const FETCH_CONCURRENCY: usize = 4;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Everything a hook sees during one `execute` call.
pub struct Invocation<'a> {
    pub descriptor: &'a PluginDescriptor,
    pub context: &'a PluginContext,
    pub params: &'a ResolvedParams,
    pub output_type: &'a TypeDescriptor,
}

impl Invocation<'_> {
    /// Validate a produced value against the declared output type.
    pub fn output(&self, value: &Value) -> Result<Entity> {
        self.output_type.coerce(value)
    }
}

/// Stages supplied by hand-written plugins.
///
/// `fetch_one` handles a single validated input; the lifecycle takes care of
/// iterating, isolating per-item failures, and graph writes.
#[async_trait]
pub trait CodeHooks: Send + Sync {
    async fn preprocess(&self, items: Vec<Entity>, _call: &Invocation<'_>) -> Result<Vec<Entity>> {
        Ok(items)
    }

    async fn fetch_one(&self, item: &Entity, call: &Invocation<'_>) -> Result<Vec<Entity>>;

    async fn postprocess(
        &self,
        outputs: Vec<Entity>,
        _call: &Invocation<'_>,
    ) -> Result<Vec<Entity>> {
        Ok(outputs)
    }
}

/// The implementation behind a plugin: compiled hooks or an interpreted
/// connector document.
#[derive(Clone)]
pub enum PluginBody {
    Code(Arc<dyn CodeHooks>),
    Template(TemplateConnector),
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// A live plugin instance bound to one run.
pub struct Plugin {
    descriptor: Arc<PluginDescriptor>,
    body: PluginBody,
    context: PluginContext,
    input_type: Arc<TypeDescriptor>,
    output_type: Arc<TypeDescriptor>,
    raw_params: Map<String, Value>,
}

impl Plugin {
    /// Bind a descriptor and body to a run context.
    ///
    /// Fails when the declared input or output type is not in the catalog.
    pub fn new(
        descriptor: Arc<PluginDescriptor>,
        body: PluginBody,
        context: PluginContext,
    ) -> Result<Self> {
        let lookup = |type_name: &str| {
            context.catalog.get(type_name).ok_or_else(|| {
                EnrichError::configuration(format!(
                    "plugin '{}' declares unknown type '{type_name}'",
                    descriptor.name
                ))
            })
        };
        let input_type = lookup(&descriptor.input_type)?;
        let output_type = lookup(&descriptor.output_type)?;

        Ok(Self {
            descriptor,
            body,
            context,
            input_type,
            output_type,
            raw_params: Map::new(),
        })
    }

    /// Attach caller-supplied raw parameters. Stored as given; resolution
    /// never rewrites them.
    pub fn with_params(mut self, raw: Map<String, Value>) -> Self {
        self.raw_params = raw;
        self
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn category(&self) -> &str {
        &self.descriptor.category
    }

    pub fn kind(&self) -> PluginKind {
        self.descriptor.kind
    }

    /// The input field this plugin keys on.
    pub fn key(&self) -> &str {
        if self.descriptor.key.is_empty() {
            self.input_type.primary()
        } else {
            &self.descriptor.key
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn parameter_schema(&self) -> &[ParameterSpec] {
        &self.descriptor.params
    }

    pub fn raw_params(&self) -> &Map<String, Value> {
        &self.raw_params
    }

    pub fn input_schema(&self) -> Value {
        self.input_type.schema()
    }

    pub fn output_schema(&self) -> Value {
        self.output_type.schema()
    }

    // -- Stage 1 ------------------------------------------------------------

    /// Resolve every declared parameter.
    ///
    /// Vault-backed parameters treat the supplied value (or, absent one, the
    /// parameter name) as the vault reference, then fall back to the default.
    /// A required parameter left unresolved is a configuration error.
    pub async fn resolve_parameters(&self) -> Result<ResolvedParams> {
        let mut resolved = ResolvedParams::default();

        for spec in &self.descriptor.params {
            let raw = self.raw_params.get(&spec.name).filter(|v| !v.is_null());
            match spec.kind {
                ParamKind::VaultSecret => {
                    let reference = raw.and_then(Value::as_str).unwrap_or(&spec.name);
                    if let Some(secret) = self.context.vault.get_secret(reference).await? {
                        resolved.insert_secret(&spec.name, secret);
                        continue;
                    }
                    match &spec.default {
                        Some(Value::String(default)) => {
                            resolved.insert_secret(&spec.name, default.clone().into());
                        }
                        Some(other) => resolved.insert_secret(&spec.name, other.to_string().into()),
                        None if spec.required => return Err(missing_parameter(spec)),
                        None => debug!(param = %spec.name, "optional secret not found"),
                    }
                }
                ParamKind::Plain | ParamKind::Url => {
                    match raw.cloned().or_else(|| spec.default.clone()) {
                        Some(value) => {
                            if spec.kind == ParamKind::Url {
                                check_url_param(spec, &value)?;
                            }
                            resolved.insert_plain(&spec.name, value);
                        }
                        None if spec.required => return Err(missing_parameter(spec)),
                        None => {}
                    }
                }
            }
        }

        for (name, value) in &self.raw_params {
            if self.descriptor.param(name).is_none() {
                debug!(param = %name, "passing through undeclared parameter");
                resolved.insert_plain(name, value.clone());
            }
        }
        Ok(resolved)
    }

    // -- Stage 2 ------------------------------------------------------------

    /// Coerce raw values into input-type entities. Values that do not fit
    /// are dropped.
    pub fn coerce_inputs(&self, raw: Vec<Value>) -> Vec<Entity> {
        let key = self.key().to_string();
        let primary = self.input_type.primary();

        raw.into_iter()
            .filter_map(|value| {
                let value = match value {
                    scalar @ (Value::String(_) | Value::Number(_) | Value::Bool(_))
                        if key != primary =>
                    {
                        let mut map = Map::new();
                        map.insert(key.clone(), scalar);
                        Value::Object(map)
                    }
                    other => other,
                };
                match self.input_type.coerce(&value) {
                    Ok(entity) => Some(entity),
                    Err(e) => {
                        debug!(plugin = %self.descriptor.name, error = %e, "dropping invalid input");
                        None
                    }
                }
            })
            .collect()
    }

    pub async fn preprocess(&self, raw: Vec<Value>, call: &Invocation<'_>) -> Result<Vec<Entity>> {
        let items = self.coerce_inputs(raw);
        match &self.body {
            PluginBody::Code(hooks) => hooks.preprocess(items, call).await,
            PluginBody::Template(_) => Ok(items),
        }
    }

    // -- Stage 3 ------------------------------------------------------------

    /// Enrich every item. A failing item is logged and omitted; the batch
    /// continues.
    pub async fn fetch(&self, items: &[Entity], call: &Invocation<'_>) -> Vec<Entity> {
        let mut results = Vec::with_capacity(items.len());
        for chunk in items.chunks(FETCH_CONCURRENCY) {
            let pending: Vec<_> = chunk.iter().map(|item| self.fetch_item(item, call)).collect();
            results.extend(chunk.iter().zip(join_all(pending).await));
        }

        let mut outputs = Vec::new();
        for (item, result) in results {
            match result {
                Ok(produced) => outputs.extend(produced.into_iter().map(|out| {
                    if out.origin.is_none() {
                        out.derived_from(item)
                    } else {
                        out
                    }
                })),
                Err(e) => warn!(
                    plugin = %self.descriptor.name,
                    run_id = %self.context.run_id,
                    item = %item.key(),
                    error = %e,
                    "item failed, skipping"
                ),
            }
        }
        outputs
    }

    async fn fetch_item(&self, item: &Entity, call: &Invocation<'_>) -> Result<Vec<Entity>> {
        match &self.body {
            PluginBody::Code(hooks) => hooks.fetch_one(item, call).await,
            PluginBody::Template(connector) => connector.fetch_one(item, call).await,
        }
    }

    // -- Stage 4 ------------------------------------------------------------

    /// Run the body's shaping hook, then upsert outputs (and their link to
    /// the input they came from) into the graph.
    pub async fn postprocess(
        &self,
        outputs: Vec<Entity>,
        call: &Invocation<'_>,
    ) -> Result<Vec<Entity>> {
        let outputs = match &self.body {
            PluginBody::Code(hooks) => hooks.postprocess(outputs, call).await?,
            PluginBody::Template(_) => outputs,
        };

        let sketch = &self.context.sketch_id;
        let graph = &self.context.graph;
        for entity in &outputs {
            if let Err(e) = graph.create_node(sketch, entity).await {
                warn!(plugin = %self.descriptor.name, error = %e, "graph node write failed");
                continue;
            }
            if let (Some(label), Some(origin)) = (&self.descriptor.relationship, &entity.origin) {
                if let Err(e) = graph
                    .create_relationship(sketch, origin, &entity.node_ref(), label)
                    .await
                {
                    warn!(plugin = %self.descriptor.name, error = %e, "graph relationship write failed");
                }
            }
        }
        Ok(outputs)
    }

    // -- Entry points -------------------------------------------------------

    /// Run all four stages, surfacing the first stage-level error.
    pub async fn try_execute(&self, raw: Vec<Value>) -> Result<Vec<Entity>> {
        let params = self.resolve_parameters().await?;
        let call = Invocation {
            descriptor: &self.descriptor,
            context: &self.context,
            params: &params,
            output_type: &self.output_type,
        };

        let items = self.preprocess(raw, &call).await?;
        if items.is_empty() {
            debug!(plugin = %self.descriptor.name, "no valid inputs");
            return Ok(Vec::new());
        }
        let outputs = self.fetch(&items, &call).await;
        self.postprocess(outputs, &call).await
    }

    /// Orchestrator-facing entry point: never fails. Any stage error is
    /// logged with the run identifiers and becomes an empty result.
    #[instrument(skip_all, fields(
        plugin = %self.descriptor.name,
        run_id = %self.context.run_id,
        sketch_id = %self.context.sketch_id,
    ))]
    pub async fn execute(&self, raw: Vec<Value>) -> Vec<Entity> {
        let inputs = raw.len();
        match self.try_execute(raw).await {
            Ok(outputs) => {
                info!(inputs, outputs = outputs.len(), "plugin finished");
                outputs
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, "plugin failed, returning no results");
                Vec::new()
            }
        }
    }
}

fn missing_parameter(spec: &ParameterSpec) -> EnrichError {
    EnrichError::configuration(format!("missing required parameter '{}'", spec.name))
}

fn check_url_param(spec: &ParameterSpec, value: &Value) -> Result<()> {
    let ok = value
        .as_str()
        .and_then(|s| url::Url::parse(s).ok())
        .is_some_and(|u| matches!(u.scheme(), "http" | "https"));
    if ok {
        Ok(())
    } else {
        Err(EnrichError::configuration(format!(
            "parameter '{}' must be an http(s) URL, got {value}",
            spec.name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;
    use crate::vault::MemoryVault;
    use enrichkit_types::TypeCatalog;
    use secrecy::ExposeSecret;
    use serde_json::json;

    /// Upper-cases usernames; fails on "boom".
    struct Shout;

    #[async_trait]
    impl CodeHooks for Shout {
        async fn fetch_one(&self, item: &Entity, call: &Invocation<'_>) -> Result<Vec<Entity>> {
            let key = item.key();
            if key == "boom" {
                return Err(EnrichError::upstream_fatal("boom"));
            }
            Ok(vec![call.output(&json!({"value": key.to_uppercase()}))?])
        }
    }

    fn catalog() -> Arc<TypeCatalog> {
        Arc::new(TypeCatalog::with_builtin_types())
    }

    fn shout(descriptor: PluginDescriptor, ctx: PluginContext) -> Plugin {
        Plugin::new(Arc::new(descriptor), PluginBody::Code(Arc::new(Shout)), ctx).unwrap()
    }

    fn shout_descriptor() -> PluginDescriptor {
        PluginDescriptor::new("shout", PluginKind::Transform, "Username", "Username")
            .with_relationship("SHOUTED_AS")
    }

    #[test]
    fn schemas_follow_declared_types() {
        let plugin = shout(shout_descriptor(), PluginContext::new(catalog()));
        let expected = catalog().get("Username").unwrap().schema();
        for _ in 0..3 {
            assert_eq!(plugin.output_schema(), expected);
        }
        assert!(!plugin.output_schema()["properties"].as_array().unwrap().is_empty());
        assert_eq!(plugin.key(), "value");
    }

    #[test]
    fn unknown_declared_type_is_rejected() {
        let d = PluginDescriptor::new("bad", PluginKind::Transform, "Username", "Starship");
        let result = Plugin::new(
            Arc::new(d),
            PluginBody::Code(Arc::new(Shout)),
            PluginContext::new(catalog()),
        );
        assert!(matches!(result, Err(EnrichError::Configuration { .. })));
    }

    #[tokio::test]
    async fn failing_item_is_skipped_not_fatal() {
        let plugin = shout(shout_descriptor(), PluginContext::new(catalog()));
        let out = plugin
            .execute(vec![json!("alice"), json!("boom"), json!("bob")])
            .await;
        let keys: Vec<String> = out.iter().map(Entity::key).collect();
        assert_eq!(keys, vec!["ALICE", "BOB"]);
    }

    #[tokio::test]
    async fn invalid_inputs_are_dropped() {
        let plugin = shout(shout_descriptor(), PluginContext::new(catalog()));
        let out = plugin
            .execute(vec![json!(null), json!([1, 2]), json!({"value": "carol"})])
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key(), "CAROL");
    }

    #[tokio::test]
    async fn postprocess_writes_nodes_and_relationships() {
        let graph = Arc::new(MemoryGraph::new());
        let ctx = PluginContext::new(catalog()).with_graph(graph.clone());
        let plugin = shout(shout_descriptor(), ctx);
        plugin.execute(vec![json!("dave")]).await;

        assert_eq!(graph.nodes().len(), 1);
        let edges = graph.relationships();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from.key, "dave");
        assert_eq!(edges[0].to.key, "DAVE");
        assert_eq!(edges[0].label, "SHOUTED_AS");
    }

    #[tokio::test]
    async fn missing_required_secret_is_configuration_error() {
        let d = shout_descriptor().with_param(ParameterSpec::secret("api_key").required());
        let plugin = shout(d, PluginContext::new(catalog()));

        let err = plugin.resolve_parameters().await.unwrap_err();
        match &err {
            EnrichError::Configuration { message } => assert!(message.contains("api_key")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(plugin.execute(vec![json!("erin")]).await.is_empty());
    }

    #[tokio::test]
    async fn secret_reference_is_looked_up_in_vault() {
        let vault = Arc::new(MemoryVault::new().with_secret("prod/shodan", "k-123"));
        let d = shout_descriptor()
            .with_param(ParameterSpec::secret("api_key").required())
            .with_param(ParameterSpec::plain("limit").with_default(50))
            .with_param(ParameterSpec::secret("optional_token"));
        let mut raw = Map::new();
        raw.insert("api_key".into(), json!("prod/shodan"));
        raw.insert("extra".into(), json!(true));
        let plugin = shout(d, PluginContext::new(catalog()).with_vault(vault)).with_params(raw);

        let resolved = plugin.resolve_parameters().await.unwrap();
        assert_eq!(resolved.secret("api_key").unwrap().expose_secret(), "k-123");
        assert_eq!(resolved.get("limit"), Some(&json!(50)));
        assert_eq!(resolved.get("extra"), Some(&json!(true)));
        assert!(resolved.secret("optional_token").is_none());
        // Raw parameters are left untouched.
        assert_eq!(plugin.raw_params()["api_key"], json!("prod/shodan"));
    }

    #[tokio::test]
    async fn secret_default_used_on_vault_miss() {
        let d = shout_descriptor()
            .with_param(ParameterSpec::secret("api_key").required().with_default("fallback"));
        let plugin = shout(d, PluginContext::new(catalog()));
        let resolved = plugin.resolve_parameters().await.unwrap();
        assert_eq!(resolved.secret("api_key").unwrap().expose_secret(), "fallback");
    }

    #[tokio::test]
    async fn url_parameters_are_checked() {
        let d = shout_descriptor().with_param(ParameterSpec::url("endpoint").required());
        let mut raw = Map::new();
        raw.insert("endpoint".into(), json!("ftp://files.example.com"));
        let plugin = shout(d, PluginContext::new(catalog())).with_params(raw);
        assert!(plugin.resolve_parameters().await.is_err());
    }
}
