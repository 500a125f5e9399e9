use crate::Entry;
use serde_json::Value;
use std::collections::BTreeMap;

pub const MAP_MARKER: &str = "MAP:";

/// Replace every top-level `MAP:<key>` string with `data_map[key]`.
///
/// Tagged values whose key is empty or not in the map are dropped. Only an
/// exact `MAP:` prefix counts as a tag.
pub fn apply_data_map(entry: &Entry, data_map: &BTreeMap<String, Value>) -> Entry {
    let mut mapped = Entry::new();
    for (key, value) in entry {
        match value.as_str().and_then(|s| s.strip_prefix(MAP_MARKER)) {
            Some(map_key) => {
                if let Some(replacement) = data_map.get(map_key).filter(|_| !map_key.is_empty()) {
                    mapped.insert(key.clone(), replacement.clone());
                } else {
                    tracing::debug!(field = %key, map_key, "data map key not found, dropping field");
                }
            }
            None => {
                mapped.insert(key.clone(), value.clone());
            }
        }
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data_map() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("alfa".to_string(), json!("A")),
            ("beta".to_string(), json!("B")),
        ])
    }

    #[test]
    fn remaps_tagged_values() {
        let entry = json!({
            "key1": "value1",
            "key2": "MAP:alfa",
            "key3": "MAP:beta",
            "key4": "aMAP:alfa",
            "key5": "MAP:",
            "key6": "MAP:zeta",
        });
        let result = apply_data_map(entry.as_object().unwrap(), &data_map());

        assert_eq!(result["key1"], "value1");
        assert_eq!(result["key2"], "A");
        assert_eq!(result["key3"], "B");
        assert_eq!(result["key4"], "aMAP:alfa");
        assert!(!result.contains_key("key5"));
        assert!(!result.contains_key("key6"));
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn keys_may_contain_colons() {
        let map = BTreeMap::from([("a:b".to_string(), json!({"nested": true}))]);
        let entry = json!({"k": "MAP:a:b", "n": 3});
        let result = apply_data_map(entry.as_object().unwrap(), &map);
        assert_eq!(result["k"], json!({"nested": true}));
        assert_eq!(result["n"], 3);
    }

    #[test]
    fn empty_map_only_drops_tags() {
        let entry = json!({"payload": {"id": 1}, "x": "MAP:alfa"});
        let result = apply_data_map(entry.as_object().unwrap(), &BTreeMap::new());
        assert_eq!(Value::Object(result), json!({"payload": {"id": 1}}));
    }
}
