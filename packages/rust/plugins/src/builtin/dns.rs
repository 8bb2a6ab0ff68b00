//! `domain_to_ip`: forward DNS resolution.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexSet;
use serde_json::json;

use enrichkit_shared::{EnrichError, Result};
use enrichkit_types::Entity;

use crate::contract::{PluginDescriptor, PluginKind};
use crate::plugin::{CodeHooks, Invocation};

pub const NAME: &str = "domain_to_ip";

/// Resolves hostnames to addresses.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Uses the operating system resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| EnrichError::upstream_transient(format!("{host}: lookup failed: {e}")))?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

/// Fixed host → addresses table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    table: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, addrs: &[IpAddr]) -> Self {
        self.table.insert(host.to_ascii_lowercase(), addrs.to_vec());
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.table
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| EnrichError::upstream_fatal(format!("{host}: no such host")))
    }
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new(NAME, PluginKind::Enricher, "Domain", "Ip")
        .with_key("domain")
        .with_relationship("RESOLVES_TO")
        .with_description("Resolve a domain to its IP addresses")
}

pub struct DomainToIp {
    resolver: Arc<dyn HostResolver>,
}

impl DomainToIp {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl CodeHooks for DomainToIp {
    async fn fetch_one(&self, item: &Entity, call: &Invocation<'_>) -> Result<Vec<Entity>> {
        let domain = item.key();
        let addrs: IndexSet<IpAddr> = self.resolver.resolve(&domain).await?.into_iter().collect();

        addrs
            .into_iter()
            .map(|ip| {
                let version = if ip.is_ipv4() { 4 } else { 6 };
                call.output(&json!({"address": ip.to_string(), "version": version}))
            })
            .collect()
    }
}
