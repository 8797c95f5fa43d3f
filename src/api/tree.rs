//! Reads and writes nested `serde_json::Value` objects addressed by a `StorePath`. Both store
//! backends keep a copy of (part of) the remote tree this way: the local store holds the whole
//! database, and each streaming subscription holds the subtree it watches.

use crate::api::StorePath;
use serde_json::{Map, Value};

/// Returns a clone of the node at `path`, or `Value::Null` if there is none.
pub(crate) fn value_at(root: &Value, path: &StorePath) -> Value {
    let mut current = root;
    for segment in path.segments() {
        match current.get(segment.as_str()) {
            Some(child) => current = child,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Replaces the node at `path` with `value`. Writing `null` deletes the node, and any parent left
/// empty by the deletion is removed as well, so that an empty collection reads back as `null`.
pub(crate) fn set_at(root: &mut Value, path: &StorePath, value: Value) {
    if value.is_null() {
        remove(root, path.segments());
        return;
    }

    let mut current = root;
    for segment in path.segments() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        current = map.entry(segment.clone()).or_insert(Value::Null);
    }
    *current = value;
}

/// Merges each child of `children` into the node at `path`, the way a multi-path update does.
pub(crate) fn merge_at(root: &mut Value, path: &StorePath, children: Map<String, Value>) {
    for (key, value) in children {
        if let Ok(relative) = StorePath::parse(&key) {
            set_at(root, &path.join(&relative), value);
        }
    }
}

/// Removes the node at `segments`. Returns true if the parent became empty.
fn remove(node: &mut Value, segments: &[String]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        *node = Value::Null;
        return true;
    };
    let Some(map) = node.as_object_mut() else {
        return false;
    };
    if rest.is_empty() {
        map.remove(first);
    } else if let Some(child) = map.get_mut(first) {
        if remove(child, rest) {
            map.remove(first);
        }
    }
    if map.is_empty() {
        *node = Value::Null;
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> StorePath {
        StorePath::parse(s).unwrap()
    }

    #[test]
    fn test_set_and_read() {
        let mut root = Value::Null;
        set_at(&mut root, &p("transactions/u1/a"), json!({"amount": "1"}));
        set_at(&mut root, &p("transactions/u1/b"), json!({"amount": "2"}));
        assert_eq!(
            value_at(&root, &p("transactions/u1")),
            json!({"a": {"amount": "1"}, "b": {"amount": "2"}})
        );
        assert_eq!(value_at(&root, &p("transactions/u2")), Value::Null);
    }

    #[test]
    fn test_delete_prunes_empty_parents() {
        let mut root = json!({"transactions": {"u1": {"a": {"amount": "1"}}, "u2": {"x": 1}}});
        set_at(&mut root, &p("transactions/u1/a"), Value::Null);
        assert_eq!(root, json!({"transactions": {"u2": {"x": 1}}}));
        set_at(&mut root, &p("transactions/u2/x"), Value::Null);
        assert_eq!(root, Value::Null);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut root = json!({"transactions": {"u1": {"a": 1}}});
        set_at(&mut root, &p("transactions/u1/zzz"), Value::Null);
        assert_eq!(root, json!({"transactions": {"u1": {"a": 1}}}));
    }

    #[test]
    fn test_merge() {
        let mut root = json!({"a": {"amount": "1", "memo": "x"}});
        let children = json!({"a/memo": null, "b": {"amount": "3"}});
        let Value::Object(children) = children else {
            panic!()
        };
        merge_at(&mut root, &StorePath::root(), children);
        assert_eq!(root, json!({"a": {"amount": "1"}, "b": {"amount": "3"}}));
    }

    #[test]
    fn test_set_root() {
        let mut root = json!({"a": 1});
        set_at(&mut root, &StorePath::root(), json!({"b": 2}));
        assert_eq!(root, json!({"b": 2}));
        set_at(&mut root, &StorePath::root(), Value::Null);
        assert_eq!(root, Value::Null);
    }
}
