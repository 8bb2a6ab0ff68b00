//! Validated instances of a catalog type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reference to a graph node: type name plus the primary-field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(rename = "type")]
    pub type_name: String,
    pub key: String,
}

/// A typed entity whose fields have been checked against its descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Catalog type name (canonical casing).
    #[serde(rename = "type")]
    pub type_name: String,
    /// Name of the identifying field.
    pub primary: String,
    /// Field values, in descriptor order.
    pub fields: Map<String, Value>,
    /// The input entity this one was derived from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<NodeRef>,
}

impl Entity {
    /// Value of the identifying field rendered as a string.
    pub fn key(&self) -> String {
        match self.fields.get(&self.primary) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            type_name: self.type_name.clone(),
            key: self.key(),
        }
    }

    /// Record that this entity was produced from `input`.
    pub fn derived_from(mut self, input: &Entity) -> Self {
        self.origin = Some(input.node_ref());
        self
    }

    /// Plain field object, as stored in the pipeline reference map.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn domain(name: &str) -> Entity {
        let mut fields = Map::new();
        fields.insert("domain".into(), json!(name));
        Entity {
            type_name: "Domain".into(),
            primary: "domain".into(),
            fields,
            origin: None,
        }
    }

    #[test]
    fn key_reads_primary_field() {
        assert_eq!(domain("example.com").key(), "example.com");
    }

    #[test]
    fn derived_from_records_origin() {
        let input = domain("example.com");
        let mut fields = Map::new();
        fields.insert("address".into(), json!("93.184.216.34"));
        let ip = Entity {
            type_name: "Ip".into(),
            primary: "address".into(),
            fields,
            origin: None,
        }
        .derived_from(&input);

        let origin = ip.origin.expect("origin set");
        assert_eq!(origin.type_name, "Domain");
        assert_eq!(origin.key, "example.com");
    }

    #[test]
    fn to_value_is_field_object() {
        assert_eq!(domain("a.io").to_value(), json!({"domain": "a.io"}));
    }
}
