//! Type descriptors: field lists, identifying field, and detection rule.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use enrichkit_shared::{EnrichError, Result};

use crate::entity::Entity;

/// Value kind accepted by a descriptor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
    Any,
}

impl FieldKind {
    /// Normalize `value` into this kind, or `None` if it does not fit.
    ///
    /// Strings holding numbers or booleans are accepted for the matching
    /// scalar kinds; scalars are stringified for `String`.
    fn normalize(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::Any, v) => Some(v.clone()),
            (Self::String, Value::String(s)) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
            }
            (Self::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (Self::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (Self::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Some(Value::Number(n.clone()))
            }
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (Self::Float, Value::Number(n)) => n.as_f64().map(Value::from),
            (Self::Float, Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
            (Self::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
            (Self::Boolean, Value::String(s)) => match s.trim() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (Self::Object, Value::Object(_)) | (Self::Array, Value::Array(_)) => {
                Some(value.clone())
            }
            _ => None,
        }
    }
}

/// One declared field of a type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub optional: bool,
    pub is_primary: bool,
}

/// Rule used to auto-classify a raw, unlabelled string.
#[derive(Debug, Clone)]
pub struct DetectionRule {
    pattern: Regex,
}

impl DetectionRule {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| EnrichError::validation(format!("invalid detection pattern: {e}")))?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, raw: &str) -> bool {
        self.pattern.is_match(raw.trim())
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Schema of a catalog type. Immutable once registered.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    fields: Vec<FieldSpec>,
    detection: Option<DetectionRule>,
}

impl TypeDescriptor {
    /// Start a descriptor with its identifying field.
    pub fn new(name: impl Into<String>, primary: &str, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            fields: vec![FieldSpec {
                name: primary.to_string(),
                kind,
                optional: false,
                is_primary: true,
            }],
            detection: None,
        }
    }

    /// Add an optional field.
    pub fn with_field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            optional: true,
            is_primary: false,
        });
        self
    }

    /// Add a required, non-identifying field.
    pub fn with_required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            optional: false,
            is_primary: false,
        });
        self
    }

    pub fn with_detection(mut self, rule: DetectionRule) -> Self {
        self.detection = Some(rule);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Name of the identifying field.
    pub fn primary(&self) -> &str {
        self.fields
            .iter()
            .find(|f| f.is_primary)
            .map(|f| f.name.as_str())
            .unwrap_or_default()
    }

    pub fn detection(&self) -> Option<&DetectionRule> {
        self.detection.as_ref()
    }

    /// Whether `raw` matches this type's detection rule.
    pub fn detects(&self, raw: &str) -> bool {
        self.detection.as_ref().is_some_and(|rule| rule.matches(raw))
    }

    /// Coerce a heterogeneous input into a validated entity.
    ///
    /// Accepts a bare scalar (bound to the primary field), a loose object, or
    /// a serialized [`Entity`]. Unknown fields are dropped.
    pub fn coerce(&self, value: &Value) -> Result<Entity> {
        let source: Map<String, Value> = match value {
            Value::Object(map) => match (map.get("type"), map.get("fields")) {
                (Some(Value::String(_)), Some(Value::Object(fields))) => fields.clone(),
                _ => map.clone(),
            },
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                let mut map = Map::new();
                map.insert(self.primary().to_string(), value.clone());
                map
            }
            Value::Null | Value::Array(_) => {
                return Err(EnrichError::validation(format!(
                    "{}: cannot build from {value}",
                    self.name
                )));
            }
        };

        let mut fields = Map::new();
        for spec in &self.fields {
            match source.get(&spec.name).filter(|v| !v.is_null()) {
                Some(raw) => {
                    let normalized = spec.kind.normalize(raw).ok_or_else(|| {
                        EnrichError::validation(format!(
                            "{}.{}: expected {:?}, got {raw}",
                            self.name, spec.name, spec.kind
                        ))
                    })?;
                    fields.insert(spec.name.clone(), normalized);
                }
                None if spec.optional => {}
                None => {
                    return Err(EnrichError::validation(format!(
                        "{}: missing required field '{}'",
                        self.name, spec.name
                    )));
                }
            }
        }

        if let Some(rule) = &self.detection {
            if let Some(Value::String(key)) = fields.get(self.primary()) {
                if !rule.matches(key) {
                    return Err(EnrichError::validation(format!(
                        "{}: '{key}' is not a valid {}",
                        self.name, self.primary()
                    )));
                }
            }
        }

        Ok(Entity {
            type_name: self.name.clone(),
            primary: self.primary().to_string(),
            fields,
            origin: None,
        })
    }

    /// JSON schema-like description derived from the field list.
    pub fn schema(&self) -> Value {
        let properties: Vec<Value> = self
            .fields
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "kind": f.kind,
                    "required": !f.optional,
                    "primary": f.is_primary,
                })
            })
            .collect();

        json!({
            "type": self.name,
            "primary": self.primary(),
            "properties": properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip_type() -> TypeDescriptor {
        TypeDescriptor::new("Ip", "address", FieldKind::String)
            .with_field("country", FieldKind::String)
            .with_field("asn", FieldKind::Integer)
            .with_detection(DetectionRule::new(r"^\d{1,3}(\.\d{1,3}){3}$").unwrap())
    }

    #[test]
    fn coerce_bare_string() {
        let entity = ip_type().coerce(&json!("8.8.8.8")).unwrap();
        assert_eq!(entity.key(), "8.8.8.8");
        assert_eq!(entity.type_name, "Ip");
    }

    #[test]
    fn coerce_loose_object_normalizes_kinds_and_drops_unknown() {
        let entity = ip_type()
            .coerce(&json!({"address": " 1.1.1.1 ", "asn": "13335", "junk": true}))
            .unwrap();
        assert_eq!(entity.get("address"), Some(&json!("1.1.1.1")));
        assert_eq!(entity.get("asn"), Some(&json!(13335)));
        assert!(entity.get("junk").is_none());
    }

    #[test]
    fn coerce_serialized_entity() {
        let original = ip_type().coerce(&json!("9.9.9.9")).unwrap();
        let value = serde_json::to_value(&original).unwrap();
        let back = ip_type().coerce(&value).unwrap();
        assert_eq!(back.key(), "9.9.9.9");
    }

    #[test]
    fn coerce_rejects_failing_detection_rule() {
        let err = ip_type().coerce(&json!("not-an-ip")).unwrap_err();
        assert!(matches!(err, EnrichError::Validation { .. }));
    }

    #[test]
    fn coerce_rejects_missing_primary_and_bad_kind() {
        assert!(ip_type().coerce(&json!({"country": "US"})).is_err());
        assert!(ip_type().coerce(&json!({"address": "8.8.8.8", "asn": "x"})).is_err());
        assert!(ip_type().coerce(&json!("")).is_err());
        assert!(ip_type().coerce(&Value::Null).is_err());
    }

    #[test]
    fn required_secondary_field_enforced() {
        let t = TypeDescriptor::new("Port", "number", FieldKind::Integer)
            .with_required("protocol", FieldKind::String);
        assert!(t.coerce(&json!({"number": 443})).is_err());
        assert!(t.coerce(&json!({"number": 443, "protocol": "tcp"})).is_ok());
    }

    #[test]
    fn schema_lists_every_field() {
        let schema = ip_type().schema();
        assert_eq!(schema["type"], "Ip");
        assert_eq!(schema["primary"], "address");
        let props = schema["properties"].as_array().unwrap();
        let names: Vec<&str> = props.iter().map(|p| p["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["address", "country", "asn"]);
        assert_eq!(props[0]["required"], true);
        assert_eq!(props[1]["required"], false);
    }
}
