//! Path queries over JSON values.
//!
//! A path is a dot-separated list of segments (`data.count`, `labels.kind`).
//! Segments may be object keys, array indices or `*`. A leading `$` is
//! accepted and ignored. Non-index segments applied to an array are mapped
//! over its elements, and arrays found at the end of the path are flattened,
//! so `data.count` against `{"data": {"count": ["3"]}}` yields `"3"`.

use serde_json::Value;

/// Collect every value reachable at `path`.
pub fn query<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![value];

    for segment in segments(path) {
        let mut next = Vec::new();
        for item in current {
            step(item, segment, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }

    current
        .into_iter()
        .flat_map(|v| match v {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect()
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('$').unwrap_or(path);
    trimmed.split('.').filter(|s| !s.is_empty())
}

fn step<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if segment == "*" {
                out.extend(map.values());
            } else if let Some(child) = map.get(segment) {
                out.push(child);
            }
        }
        Value::Array(items) => {
            if segment == "*" {
                out.extend(items.iter());
            } else if let Ok(index) = segment.parse::<usize>() {
                if let Some(child) = items.get(index) {
                    out.push(child);
                }
            } else {
                for item in items {
                    if let Value::Object(map) = item
                        && let Some(child) = map.get(segment)
                    {
                        out.push(child);
                    }
                }
            }
        }
        _ => {}
    }
}
