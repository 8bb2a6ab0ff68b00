//! `{{ variable }}` substitution for request templates.
//!
//! Variables are looked up in a JSON object, so dotted names such as
//! `secrets.API_KEY` or `params.limit` reach into nested maps. Rendering is
//! all-or-nothing: the first missing variable fails the call and no partial
//! output is returned.

use std::sync::LazyLock;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use enrichkit_shared::{EnrichError, Result};

use crate::extract::extract_nested_value;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*(\|\s*raw\s*)?\}\}")
        .expect("placeholder pattern must compile")
});

/// Everything except RFC 3986 unreserved characters is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// How substituted values are written into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Percent-encode each value as a URL component. `{{ x | raw }}` opts out.
    Percent,
    /// Insert values verbatim (headers, query values, bodies).
    Raw,
}

/// Render `template` with percent-encoded substitution.
pub fn render(template: &str, values: &Value) -> Result<String> {
    render_with(template, values, Encoding::Percent)
}

/// Render `template`, writing each value according to `encoding`.
pub fn render_with(template: &str, values: &Value, encoding: Encoding) -> Result<String> {
    let mut missing: Option<String> = None;

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        if missing.is_some() {
            return String::new();
        }
        let name = &caps[1];
        match lookup(values, name) {
            Some(text) if encoding == Encoding::Percent && caps.get(2).is_none() => {
                utf8_percent_encode(&text, COMPONENT).to_string()
            }
            Some(text) => text,
            None => {
                missing = Some(name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(variable) => Err(EnrichError::render(variable)),
        None => Ok(rendered.into_owned()),
    }
}

/// Render every string leaf of a JSON body.
///
/// A string that is exactly one placeholder is replaced by the variable's
/// JSON value, so numbers and objects keep their type.
pub fn render_value(template: &Value, values: &Value) -> Result<Value> {
    match template {
        Value::String(s) => {
            if let Some(name) = whole_placeholder(s) {
                return match extract_nested_value(values, name) {
                    Some(v) if !v.is_null() => Ok(v.clone()),
                    _ => Err(EnrichError::render(name)),
                };
            }
            render_with(s, values, Encoding::Raw).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| render_value(item, values))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), render_value(item, values)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Variable names referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let caps = PLACEHOLDER.captures(s.trim())?;
    let whole = caps.get(0)?;
    (whole.as_str().len() == s.trim().len()).then(|| caps.get(1).map(|m| m.as_str()))?
}

/// Stringify a variable. Null counts as missing.
fn lookup(values: &Value, name: &str) -> Option<String> {
    match extract_nested_value(values, name)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}
