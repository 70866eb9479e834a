//! Helpers over the dynamic attribute trees adapters work with.
//! Remote responses are arbitrary JSON; everything here treats them as the
//! tagged scalar/sequence/mapping sum that `serde_json::Value` already is.

use serde_json::{Map, Value};

/// Walk a dotted path through nested objects (and numeric indexes through
/// sequences). Returns None on the first missing step.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(seq) => seq.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Same walk, rooted at an attribute map.
pub fn get_path_in<'a>(attributes: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = attributes.get(head)?;
    match rest {
        Some(rest) => get_path(value, rest),
        None => Some(value),
    }
}

/// Coerce a scalar leaf to its string form. Mappings, sequences and null
/// have no scalar form.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Extract ordered path parameters from a remote resource name.
///
/// Given `projects/p/locations/us-central1/keyRings/ring-a` and keys
/// `["locations", "keyRings"]`, returns `["us-central1", "ring-a"]`: for each
/// key, the segment following its first occurrence after the previous match.
/// When the name carries fewer declared segments than expected, the whole
/// name is the unique value and is returned as the single parameter.
pub fn extract_path_params(name: &str, keys: &[String]) -> Vec<String> {
    if keys.is_empty() {
        return vec![name.to_string()];
    }
    let segments: Vec<&str> = name.split('/').collect();
    let mut params = Vec::with_capacity(keys.len());
    let mut cursor = 0usize;

    for key in keys {
        let found = segments[cursor..]
            .windows(2)
            .position(|pair| pair[0] == key.as_str());
        match found {
            Some(offset) => {
                let index = cursor + offset + 1;
                params.push(segments[index].to_string());
                cursor = index;
            }
            None => return vec![name.to_string()],
        }
    }

    params
}

/// Like [`extract_path_params`], but every declared key must be present:
/// returns None instead of falling back to the whole name. Reverse lookups
/// use this to reject malformed resource paths outright.
pub fn extract_path_params_strict(name: &str, keys: &[String]) -> Option<Vec<String>> {
    let segments: Vec<&str> = name.split('/').collect();
    let mut params = Vec::with_capacity(keys.len());
    let mut cursor = 0usize;

    for key in keys {
        let offset = segments[cursor..]
            .windows(2)
            .position(|pair| pair[0] == key.as_str())?;
        let index = cursor + offset + 1;
        params.push(segments[index].to_string());
        cursor = index;
    }

    Some(params)
}
