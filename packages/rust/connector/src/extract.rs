//! Path lookup into decoded response bodies.

use serde_json::Value;

/// Follow a dotted path such as `a.b[0].c` (or `a.b.0.c`) into `data`.
///
/// An empty path or `$` selects the root. Any missing step yields `None`,
/// never an error.
pub fn extract_nested_value<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let path = path.strip_prefix('$').unwrap_or(path);
    let path = path.strip_prefix('.').unwrap_or(path);

    let mut current = data;
    if path.is_empty() {
        return Some(current);
    }

    for segment in path.split('.') {
        let (name, indices) = split_indices(segment)?;
        if !name.is_empty() {
            current = step(current, name)?;
        }
        for index in indices {
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

/// Descend one named step. Numeric names index arrays.
fn step<'a>(current: &'a Value, name: &str) -> Option<&'a Value> {
    match current {
        Value::Object(map) => map.get(name),
        Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Split `items[0][2]` into `("items", [0, 2])`. Malformed brackets fail the
/// whole lookup.
fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };

    let name = &segment[..open];
    let mut indices = Vec::new();
    let mut rest = &segment[open..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indices.push(inner[..close].trim().parse().ok()?);
        rest = &inner[close + 1..];
    }
    Some((name, indices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "data": {
                "records": [
                    {"ip": "1.1.1.1", "tags": ["dns", "cdn"]},
                    {"ip": "8.8.8.8"}
                ],
                "count": 2
            }
        })
    }

    #[test]
    fn dotted_and_bracketed_paths() {
        let data = sample();
        assert_eq!(
            extract_nested_value(&data, "data.records[0].ip"),
            Some(&json!("1.1.1.1"))
        );
        assert_eq!(
            extract_nested_value(&data, "data.records.1.ip"),
            Some(&json!("8.8.8.8"))
        );
        assert_eq!(
            extract_nested_value(&data, "data.records[0].tags[1]"),
            Some(&json!("cdn"))
        );
        assert_eq!(extract_nested_value(&data, "data.count"), Some(&json!(2)));
    }

    #[test]
    fn root_selectors() {
        let data = sample();
        assert_eq!(extract_nested_value(&data, ""), Some(&data));
        assert_eq!(extract_nested_value(&data, "$"), Some(&data));
        assert_eq!(extract_nested_value(&data, "$.data.count"), Some(&json!(2)));
    }

    #[test]
    fn missing_steps_yield_none() {
        let data = sample();
        assert_eq!(extract_nested_value(&data, "data.nope"), None);
        assert_eq!(extract_nested_value(&data, "data.records[5].ip"), None);
        assert_eq!(extract_nested_value(&data, "data.count.deeper"), None);
        assert_eq!(extract_nested_value(&data, "data.records[x]"), None);
        assert_eq!(extract_nested_value(&data, "data.records[0"), None);
    }

    #[test]
    fn top_level_array_index() {
        let data = json!([{"name": "a"}, {"name": "b"}]);
        assert_eq!(extract_nested_value(&data, "[1].name"), Some(&json!("b")));
        assert_eq!(extract_nested_value(&data, "0.name"), Some(&json!("a")));
    }
}
