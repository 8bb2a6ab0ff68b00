//! Network-free transforms between entity types.

use async_trait::async_trait;
use serde_json::json;
use url::Url;

use enrichkit_shared::{EnrichError, Result};
use enrichkit_types::Entity;

use crate::contract::{PluginDescriptor, PluginKind};
use crate::plugin::{CodeHooks, Invocation};

pub const EMAIL_TO_DOMAIN: &str = "email_to_domain";
pub const WEBSITE_TO_DOMAIN: &str = "website_to_domain";

pub fn email_to_domain_descriptor() -> PluginDescriptor {
    PluginDescriptor::new(EMAIL_TO_DOMAIN, PluginKind::Transform, "Email", "Domain")
        .with_key("email")
        .with_relationship("HAS_DOMAIN")
        .with_description("Extract the domain part of an email address")
}

pub fn website_to_domain_descriptor() -> PluginDescriptor {
    PluginDescriptor::new(WEBSITE_TO_DOMAIN, PluginKind::Transform, "Website", "Domain")
        .with_key("url")
        .with_relationship("HAS_DOMAIN")
        .with_description("Extract the host of a website URL")
}

/// `alice@Example.COM` → `example.com`.
pub struct EmailToDomain;

#[async_trait]
impl CodeHooks for EmailToDomain {
    async fn fetch_one(&self, item: &Entity, call: &Invocation<'_>) -> Result<Vec<Entity>> {
        let email = item.key();
        let domain = email
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .ok_or_else(|| EnrichError::validation(format!("'{email}' has no domain part")))?;
        Ok(vec![call.output(&json!({ "domain": domain }))?])
    }
}

/// `https://www.example.com/about` → `www.example.com`.
pub struct WebsiteToDomain;

#[async_trait]
impl CodeHooks for WebsiteToDomain {
    async fn fetch_one(&self, item: &Entity, call: &Invocation<'_>) -> Result<Vec<Entity>> {
        let raw = item.key();
        let url = Url::parse(&raw)
            .map_err(|e| EnrichError::validation(format!("'{raw}' is not a URL: {e}")))?;
        let host = url
            .domain()
            .ok_or_else(|| EnrichError::validation(format!("'{raw}' has no domain host")))?;
        Ok(vec![call.output(&json!({ "domain": host.trim_end_matches('.') }))?])
    }
}
