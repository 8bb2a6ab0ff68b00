//! Built-in entity types.
//!
//! Registration order doubles as detection priority, so the most specific
//! patterns come first (an email also contains a domain, a CIDR an IP).

use crate::descriptor::{DetectionRule, FieldKind, TypeDescriptor};

const EMAIL: &str = r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$";
const WEBSITE: &str = r"(?i)^https?://[^\s/$.?#][^\s]*$";
const CIDR: &str = r"^((25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)/(3[0-2]|[12]?\d)$";
const IP: &str = r"(?i)^(((25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)|([0-9a-f]{0,4}:){2,7}[0-9a-f]{0,4})$";
const CRYPTO_WALLET: &str =
    r"^(0x[a-fA-F0-9]{40}|bc1[a-z0-9]{25,39}|[13][a-km-zA-HJ-NP-Z1-9]{25,34})$";
const PHONE: &str = r"^\+[1-9]\d{6,14}$";
const ASN: &str = r"(?i)^AS\d{1,10}$";
const DOMAIN: &str = r"(?i)^([a-z0-9]([a-z0-9\-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$";

fn rule(pattern: &str) -> DetectionRule {
    DetectionRule::new(pattern).expect("built-in detection pattern must compile")
}

/// Descriptors registered by [`crate::TypeCatalog::with_builtin_types`].
pub fn builtin_types() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::new("Email", "email", FieldKind::String)
            .with_field("domain", FieldKind::String)
            .with_field("breach_count", FieldKind::Integer)
            .with_detection(rule(EMAIL)),
        TypeDescriptor::new("Website", "url", FieldKind::String)
            .with_field("title", FieldKind::String)
            .with_field("status_code", FieldKind::Integer)
            .with_field("technologies", FieldKind::Array)
            .with_detection(rule(WEBSITE)),
        TypeDescriptor::new("Cidr", "network", FieldKind::String)
            .with_field("description", FieldKind::String)
            .with_detection(rule(CIDR)),
        TypeDescriptor::new("Ip", "address", FieldKind::String)
            .with_field("version", FieldKind::Integer)
            .with_field("country", FieldKind::String)
            .with_field("city", FieldKind::String)
            .with_field("isp", FieldKind::String)
            .with_field("latitude", FieldKind::Float)
            .with_field("longitude", FieldKind::Float)
            .with_detection(rule(IP)),
        TypeDescriptor::new("CryptoWallet", "address", FieldKind::String)
            .with_field("chain", FieldKind::String)
            .with_field("balance", FieldKind::Float)
            .with_detection(rule(CRYPTO_WALLET)),
        TypeDescriptor::new("Phone", "number", FieldKind::String)
            .with_field("country", FieldKind::String)
            .with_field("carrier", FieldKind::String)
            .with_detection(rule(PHONE)),
        TypeDescriptor::new("Asn", "asn", FieldKind::String)
            .with_field("name", FieldKind::String)
            .with_field("country", FieldKind::String)
            .with_detection(rule(ASN)),
        TypeDescriptor::new("Domain", "domain", FieldKind::String)
            .with_field("root", FieldKind::Boolean)
            .with_field("registrar", FieldKind::String)
            .with_detection(rule(DOMAIN)),
        TypeDescriptor::new("Username", "value", FieldKind::String)
            .with_field("platform", FieldKind::String),
        TypeDescriptor::new("Organization", "name", FieldKind::String)
            .with_field("country", FieldKind::String)
            .with_field("registration_number", FieldKind::String),
        TypeDescriptor::new("Individual", "full_name", FieldKind::String)
            .with_field("first_name", FieldKind::String)
            .with_field("last_name", FieldKind::String),
        TypeDescriptor::new("Port", "number", FieldKind::Integer)
            .with_field("protocol", FieldKind::String)
            .with_field("service", FieldKind::String),
    ]
}
