//! Reconstruct a nested view over flat path-keyed entries.
//!
//! Backends keep a flat `rendered key → value` map so no key is ever
//! ambiguously both "an object" and "a prefix of other keys". Callers that
//! need tree-shaped traversal get it rebuilt here on demand.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::key::PathKey;

/// Insert `value` at `key` inside `tree`, creating objects along the way.
///
/// Intermediate non-object values are overwritten; the flat map is the source
/// of truth, the tree is a disposable projection.
pub fn insert_nested(tree: &mut Value, key: &PathKey, value: Value) {
    let components = key.components();
    if components.is_empty() {
        *tree = value;
        return;
    }

    let mut cursor = tree;
    for component in &components[..components.len() - 1] {
        if !cursor.is_object() {
            *cursor = Value::Object(serde_json::Map::new());
        }
        cursor = cursor
            .as_object_mut()
            .expect("cursor was just made an object")
            .entry(component.clone())
            .or_insert(Value::Object(serde_json::Map::new()));
    }

    if !cursor.is_object() {
        *cursor = Value::Object(serde_json::Map::new());
    }
    cursor
        .as_object_mut()
        .expect("cursor was just made an object")
        .insert(components[components.len() - 1].clone(), value);
}

/// Assemble the value visible at `prefix` from a flat map.
///
/// An exact leaf hit wins; otherwise every strict descendant of `prefix` is
/// folded into one nested object. `None` when neither exists.
pub fn assemble(map: &BTreeMap<String, Value>, prefix: &PathKey) -> Option<Value> {
    let rendered = prefix.to_string();
    if let Some(value) = map.get(&rendered) {
        return Some(value.clone());
    }

    let mut tree = Value::Object(serde_json::Map::new());
    let mut found = false;
    for (key, value) in map {
        let Ok(parsed) = PathKey::parse(key) else {
            continue;
        };
        if let Some(suffix) = parsed.strip_prefix(prefix) {
            if suffix.is_empty() {
                continue;
            }
            insert_nested(&mut tree, &suffix, value.clone());
            found = true;
        }
    }

    found.then_some(tree)
}
