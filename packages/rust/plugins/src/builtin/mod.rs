//! Hand-written plugins shipped with enrichkit.

mod dns;
mod transform;

use std::sync::Arc;

pub use dns::{DomainToIp, HostResolver, StaticResolver, SystemResolver};
pub use transform::{EmailToDomain, WebsiteToDomain};

use crate::registry::PluginRegistry;

/// Register every built-in plugin. DNS lookups go through `resolver`.
pub fn register_builtin_plugins(registry: &mut PluginRegistry, resolver: Arc<dyn HostResolver>) {
    registry.register_code(dns::descriptor(), Arc::new(DomainToIp::new(resolver)));
    registry.register_code(
        transform::email_to_domain_descriptor(),
        Arc::new(EmailToDomain),
    );
    registry.register_code(
        transform::website_to_domain_descriptor(),
        Arc::new(WebsiteToDomain),
    );
}
