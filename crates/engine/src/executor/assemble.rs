//! Writing resolved instances into the result document.

use serde_json::{Map as JsonMap, Value};
use tracing::debug;

use crate::resolver::Instance;

/// JSON pointer of field `field` below `parent_pointer`.
pub fn child_pointer(parent_pointer: &str, field: &str) -> String {
    format!("{}/{}", parent_pointer, field.replace('~', "~0").replace('/', "~1"))
}

fn unescape_segment(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn pointer_depth(pointer: &str) -> usize {
    pointer.matches('/').count()
}

/// Objects become empty, arrays keep their length; nested fields are filled
/// by child stages.
fn skeleton(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::Object(JsonMap::new()),
        Value::Array(items) => Value::Array(items.iter().map(skeleton).collect()),
        other => other.clone(),
    }
}

/// One pending write: an instance and whether child stages fill it in.
pub struct Write<'a> {
    pub instance: &'a Instance,
    pub has_children: bool,
}

/// Assemble the result document, shallowest pointers first.
pub fn assemble(mut writes: Vec<Write<'_>>) -> Value {
    writes.sort_by_key(|write| pointer_depth(&write.instance.pointer));

    let mut data = Value::Object(JsonMap::new());
    for write in writes {
        let pointer = &write.instance.pointer;
        let Some(split) = pointer.rfind('/') else {
            continue;
        };
        let (parent, key) = (&pointer[..split], unescape_segment(&pointer[split + 1..]));
        let value = if write.has_children {
            skeleton(&write.instance.value)
        } else {
            write.instance.value.clone()
        };
        match data.pointer_mut(parent) {
            Some(Value::Object(fields)) => {
                fields.insert(key, value);
            }
            _ => debug!(pointer = %pointer, "result parent missing, value dropped"),
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(pointer: &str, value: Value) -> Instance {
        Instance {
            pointer: pointer.to_string(),
            value,
        }
    }

    #[test]
    fn escapes_pointer_segments() {
        assert_eq!(child_pointer("", "a/b~c"), "/a~1b~0c");
        assert_eq!(unescape_segment("a~1b~0c"), "a/b~c");
    }

    #[test]
    fn writes_children_into_parent_skeletons() {
        let users = instance("/users", json!([{"name": "ada", "secret": 1}, {"name": "bob", "secret": 2}]));
        let first = instance("/users/0/name", json!("ada"));
        let second = instance("/users/1/name", json!("bob"));
        let count = instance("/count", json!(2));

        let data = assemble(vec![
            Write { instance: &second, has_children: false },
            Write { instance: &users, has_children: true },
            Write { instance: &first, has_children: false },
            Write { instance: &count, has_children: false },
        ]);

        assert_eq!(data, json!({"users": [{"name": "ada"}, {"name": "bob"}], "count": 2}));
    }

    #[test]
    fn drops_values_without_a_parent_object() {
        let orphan = instance("/missing/field", json!(1));
        let data = assemble(vec![Write { instance: &orphan, has_children: false }]);
        assert_eq!(data, json!({}));
    }
}
