//! Override-wins settings merge.

use serde_json::{Map, Value};

/// Merge tenant overrides over module defaults, per top-level key.
///
/// Override keys always win. The merge replaces a key's whole value; it does
/// not reconcile field-by-field inside nested structures. Non-object inputs
/// are treated as empty.
pub fn merge_settings(defaults: &Value, overrides: &Value) -> Value {
    let mut merged: Map<String, Value> = match defaults {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    if let Value::Object(map) = overrides {
        for (key, value) in map {
            merged.insert(key.clone(), value.clone());
        }
    }

    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn overrides_win_per_top_level_key() {
        let defaults = json!({"title": "Points", "limit": 5, "style": {"color": "red", "size": 12}});
        let overrides = json!({"limit": 10, "style": {"color": "blue"}});

        let merged = merge_settings(&defaults, &overrides);

        assert_eq!(
            merged,
            // The whole "style" value is replaced, not deep-merged.
            json!({"title": "Points", "limit": 10, "style": {"color": "blue"}})
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let defaults = json!({"a": 1, "b": {"x": true}});
        let overrides = json!({"b": {"y": false}, "c": 3});

        let once = merge_settings(&defaults, &overrides);
        let twice = merge_settings(&once, &overrides);

        assert_eq!(once, twice);
    }

    #[test]
    fn non_object_inputs_are_tolerated() {
        assert_eq!(merge_settings(&Value::Null, &Value::Null), json!({}));
        assert_eq!(
            merge_settings(&Value::Null, &json!({"k": 1})),
            json!({"k": 1})
        );
        assert_eq!(
            merge_settings(&json!({"k": 1}), &Value::Null),
            json!({"k": 1})
        );
    }
}
