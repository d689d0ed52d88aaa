//! Pointer recovery from parser error messages.
//!
//! Strict-parse failures surface as library error strings. When the message
//! carries a location clause (`… (at Bundle.entry[0].resource[0].gender[0])`)
//! the expression inside it converts to a structural pointer. Without a
//! clause, the caller falls back to a first-occurrence search of the field
//! name in the document tree.

use crate::path::expression_to_pointer;
use crate::pointer::{Segment, StructuralPointer};
use serde_json::Value;
use tracing::debug;

/// Extract a structural pointer from a parse error message.
///
/// `singular(path)` has the same meaning as in
/// [`expression_to_pointer`](crate::expression_to_pointer): it drops array
/// indices that parsers synthesize on single-valued elements.
pub fn pointer_from_exception(
    message: &str,
    singular: &dyn Fn(&str) -> bool,
) -> Option<StructuralPointer> {
    let start = message.rfind("(at ")?;
    let clause = &message[start + 4..];
    let end = clause.find(')')?;
    let expression = clause[..end].trim();

    if expression.is_empty() {
        debug!(message, "empty location clause in parse error");
        return None;
    }

    Some(expression_to_pointer(expression, singular))
}

/// Depth-first search for the first occurrence of `field` in the tree.
///
/// Best-effort heuristic used when the error message carries no location
/// clause; document order matches the raw JSON member order.
pub fn find_field_pointer(root: &Value, field: &str) -> Option<StructuralPointer> {
    fn walk(value: &Value, field: &str, pointer: &mut StructuralPointer) -> bool {
        match value {
            Value::Object(obj) => {
                if obj.contains_key(field) {
                    pointer.push(Segment::Key(field.to_string()));
                    return true;
                }
                for (key, child) in obj {
                    pointer.push(Segment::Key(key.clone()));
                    if walk(child, field, pointer) {
                        return true;
                    }
                    pointer.pop();
                }
                false
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    pointer.push(Segment::Index(i));
                    if walk(item, field, pointer) {
                        return true;
                    }
                    pointer.pop();
                }
                false
            }
            _ => false,
        }
    }

    let mut pointer = StructuralPointer::root();
    walk(root, field, &mut pointer).then_some(pointer)
}

/// Depth-first search for the first leaf whose string value equals
/// `literal`. Companion heuristic to [`find_field_pointer`] for messages
/// that name the offending value but not its field.
pub fn find_value_pointer(root: &Value, literal: &str) -> Option<StructuralPointer> {
    fn walk(value: &Value, literal: &str, pointer: &mut StructuralPointer) -> bool {
        match value {
            Value::String(s) => s == literal,
            Value::Object(obj) => {
                for (key, child) in obj {
                    pointer.push(Segment::Key(key.clone()));
                    if walk(child, literal, pointer) {
                        return true;
                    }
                    pointer.pop();
                }
                false
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    pointer.push(Segment::Index(i));
                    if walk(item, literal, pointer) {
                        return true;
                    }
                    pointer.pop();
                }
                false
            }
            _ => false,
        }
    }

    let mut pointer = StructuralPointer::root();
    walk(root, literal, &mut pointer).then_some(pointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_value_pointer() {
        let doc = json!({"entry": [{"resource": {"gender": "malex"}}]});
        let ptr = find_value_pointer(&doc, "malex").unwrap();
        assert_eq!(ptr.to_string(), "/entry/0/resource/gender");
        assert!(find_value_pointer(&doc, "absent").is_none());
    }

    #[test]
    fn test_location_clause_extraction() {
        let msg = "Literal 'malex' is not a valid value for enumeration 'AdministrativeGender' \
                   (at Bundle.entry[0].resource[0].gender[0])";
        let singular = |path: &str| path == "entry.resource.gender";
        let ptr = pointer_from_exception(msg, &singular).unwrap();
        assert_eq!(ptr.to_string(), "/entry/0/resource/gender");
    }

    #[test]
    fn test_no_clause_returns_none() {
        assert!(pointer_from_exception("something went wrong", &|_| false).is_none());
    }

    #[test]
    fn test_find_field_pointer() {
        let doc = json!({
            "entry": [
                {"resource": {"resourceType": "Patient", "name": [{"family": "x"}]}},
                {"resource": {"resourceType": "Observation", "valueString": "y"}}
            ]
        });
        let ptr = find_field_pointer(&doc, "valueString").unwrap();
        assert_eq!(ptr.to_string(), "/entry/1/resource/valueString");
        assert!(find_field_pointer(&doc, "absent").is_none());
    }
}
