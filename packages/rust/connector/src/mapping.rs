//! Projection of decoded responses into output field objects.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use enrichkit_types::Entity;

use crate::document::{OutputSpec, ResponseSpec};
use crate::extract::extract_nested_value;

/// Prefix for map paths that read from the input entity instead of the
/// response.
const INPUT_PREFIX: &str = "$input.";

/// Apply `response.map` to decoded `data`.
///
/// When `output.arrayPath` is set the mapping targets that sub-tree. An
/// array target maps each element; anything else yields a single object.
/// A document declaring `isArray` whose target is not an array yields
/// nothing. Paths that resolve to nothing leave the field unset; the output
/// type's own validation decides whether that is acceptable.
pub fn map_response(
    data: &Value,
    input: &Entity,
    response: &ResponseSpec,
    output: &OutputSpec,
) -> Vec<Value> {
    let target = match output.array_path.as_deref() {
        Some(path) => match extract_nested_value(data, path) {
            Some(target) => target,
            None => {
                debug!(path, "arrayPath not present in response");
                return Vec::new();
            }
        },
        None => data,
    };

    let input_fields = input.to_value();
    match target {
        Value::Array(_) if !output.is_array => {
            warn!(
                output_type = %output.type_name,
                "response is an array but isArray is not set; mapping each element"
            );
        }
        Value::Array(_) | Value::Null => {}
        _ if output.is_array => {
            warn!(
                output_type = %output.type_name,
                path = output.array_path.as_deref().unwrap_or("$"),
                "isArray is set but the response target is not an array"
            );
            return Vec::new();
        }
        _ => {}
    }

    match target {
        Value::Array(items) => items
            .iter()
            .map(|item| map_one(item, &input_fields, response))
            .collect(),
        Value::Null => Vec::new(),
        single => vec![map_one(single, &input_fields, response)],
    }
}

fn map_one(item: &Value, input_fields: &Value, response: &ResponseSpec) -> Value {
    if response.map.is_empty() {
        return item.clone();
    }

    let mut out = Map::new();
    for (field, path) in &response.map {
        let found = match path.strip_prefix(INPUT_PREFIX) {
            Some(input_path) => extract_nested_value(input_fields, input_path),
            None => extract_nested_value(item, path),
        };
        match found {
            Some(value) if !value.is_null() => {
                out.insert(field.clone(), value.clone());
            }
            _ => debug!(field, path, "mapped path missing from response"),
        }
    }
    Value::Object(out)
}
