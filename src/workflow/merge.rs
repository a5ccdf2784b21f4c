// src/workflow/merge.rs

//! Feeding a predecessor's output into a successor's input.
//!
//! Only fields both sides know about are copied: a source field lands in
//! the destination when the destination already has that key and its value
//! is `null` or of the same JSON kind. Nested objects are merged the same
//! way. Several predecessors writing the same field resolve
//! last-writer-wins, in the order they are applied.

use serde_json::Value;

use super::model::Payload;

/// Copy compatible fields of `src` into `dst`. Returns the number of leaf
/// values written.
pub fn copy_common_fields(dst: &mut Value, src: &Value) -> usize {
    let (Value::Object(dst), Value::Object(src)) = (dst, src) else {
        return 0;
    };

    let mut copied = 0;
    for (key, src_value) in src {
        if src_value.is_null() {
            continue;
        }
        let Some(dst_value) = dst.get_mut(key) else {
            continue;
        };
        if dst_value.is_object() && src_value.is_object() {
            copied += copy_common_fields(dst_value, src_value);
        } else if dst_value.is_null() || same_kind(dst_value, src_value) {
            *dst_value = src_value.clone();
            copied += 1;
        }
    }
    copied
}

/// Apply each predecessor output to `input`, in order.
pub fn merge_outputs_into_input<'a>(
    input: &mut Payload,
    outputs: impl IntoIterator<Item = &'a Payload>,
) -> usize {
    outputs
        .into_iter()
        .filter(|o| !o.is_empty())
        .map(|o| copy_common_fields(&mut input.value, &o.value))
        .sum()
}

fn same_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Bool(_), Value::Bool(_))
            | (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn copies_only_known_compatible_fields() {
        let mut dst = json!({
            "database": null,
            "run_id": "r-1",
            "port": 5432,
            "tags": ["a"],
        });
        let src = json!({
            "database": {"ip": "10.0.0.5"},
            "run_id": 7,
            "port": 6432,
            "tags": ["b", "c"],
            "extra": true,
        });

        let copied = copy_common_fields(&mut dst, &src);
        assert_eq!(copied, 3);
        assert_eq!(
            dst,
            json!({
                "database": {"ip": "10.0.0.5"},
                "run_id": "r-1",
                "port": 6432,
                "tags": ["b", "c"],
            })
        );
    }

    #[test]
    fn nested_objects_merge_field_by_field() {
        let mut dst = json!({"db": {"ip": null, "port": 1}});
        let src = json!({"db": {"ip": "10.0.0.1", "user": "x"}});
        copy_common_fields(&mut dst, &src);
        assert_eq!(dst, json!({"db": {"ip": "10.0.0.1", "port": 1}}));
    }

    #[test]
    fn null_source_does_not_erase() {
        let mut dst = json!({"ip": "10.0.0.1"});
        assert_eq!(copy_common_fields(&mut dst, &json!({"ip": null})), 0);
        assert_eq!(dst, json!({"ip": "10.0.0.1"}));
    }

    #[test]
    fn later_predecessor_wins() {
        let mut input = Payload {
            type_tag: "in".into(),
            value: json!({"ip": null}),
        };
        let first = Payload {
            type_tag: "a".into(),
            value: json!({"ip": "10.0.0.1"}),
        };
        let second = Payload {
            type_tag: "b".into(),
            value: json!({"ip": "10.0.0.2"}),
        };
        merge_outputs_into_input(&mut input, [&first, &Payload::empty(), &second]);
        assert_eq!(input.value, json!({"ip": "10.0.0.2"}));
    }
}
