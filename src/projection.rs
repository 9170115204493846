//! Content projection: structured JSON → searchable plain text.
//!
//! Flattens an arbitrary JSON value into a whitespace-joined stream of its
//! primitive leaves so the storage engine can index structured records
//! lexically. The traversal is fully deterministic: object keys are
//! visited in lexicographically sorted order (not insertion order), so two
//! structurally-equal objects always project identically, and arrays are
//! visited in index order.
//!
//! Emission rules:
//! - strings verbatim (the empty string contributes no token)
//! - numbers via their canonical decimal text
//! - booleans as `true`/`false`, JSON null as the token `null`
//!
//! `serde_json::Value` is an acyclic tree, so re-encountering an ancestor
//! is impossible by construction; a recursion-depth cap degrades
//! pathologically deep nesting to partial output instead of overflowing
//! the stack.

use serde_json::Value;

/// Subtrees nested deeper than this are skipped.
const MAX_DEPTH: usize = 64;

/// Project a JSON value into its space-joined primitive leaves.
pub fn project(value: &Value) -> String {
    let mut tokens: Vec<String> = Vec::new();
    collect(value, 0, &mut tokens);
    tokens.join(" ")
}

fn collect(value: &Value, depth: usize, tokens: &mut Vec<String>) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Null => tokens.push("null".to_string()),
        Value::Bool(b) => tokens.push(b.to_string()),
        Value::Number(n) => tokens.push(n.to_string()),
        Value::String(s) => {
            if !s.is_empty() {
                tokens.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, depth + 1, tokens);
            }
        }
        Value::Object(map) => {
            // Sorted keys, not insertion order.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for key in keys {
                collect(&map[key], depth + 1, tokens);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitives() {
        assert_eq!(project(&json!("hello")), "hello");
        assert_eq!(project(&json!(42)), "42");
        assert_eq!(project(&json!(2.5)), "2.5");
        assert_eq!(project(&json!(true)), "true");
        assert_eq!(project(&json!(null)), "null");
    }

    #[test]
    fn test_key_order_independence() {
        // Keys are visited sorted, so insertion order is irrelevant.
        let a = json!({"b": 2, "a": {"z": "last", "y": true}});
        let b = json!({"a": {"y": true, "z": "last"}, "b": 2});
        assert_eq!(project(&a), "true last 2");
        assert_eq!(project(&a), project(&b));
    }

    #[test]
    fn test_array_index_order() {
        let v = json!(["first", {"k": "second"}, 3]);
        assert_eq!(project(&v), "first second 3");
    }

    #[test]
    fn test_empty_strings_skipped() {
        let v = json!({"a": "", "b": "kept", "c": ["", "also"]});
        assert_eq!(project(&v), "kept also");
    }

    #[test]
    fn test_empty_containers() {
        assert_eq!(project(&json!({})), "");
        assert_eq!(project(&json!([])), "");
        assert_eq!(project(&json!({"a": [], "b": {}})), "");
    }

    #[test]
    fn test_deterministic_twice() {
        let v = json!({"tags": ["x", "y"], "nested": {"b": 1, "a": 2}});
        assert_eq!(project(&v), project(&v));
    }

    #[test]
    fn test_depth_cap_partial_output() {
        let mut v = json!("leaf");
        for _ in 0..(MAX_DEPTH + 10) {
            v = json!([v]);
        }
        // Too deep to reach the leaf, but must not overflow.
        assert_eq!(project(&v), "");
    }
}
