//! Bundle-level helpers over the raw document tree.

use serde_json::Value;

/// Iterate the bundle entries as `(entry_index, resource)` pairs.
///
/// Entries without a `resource` member are skipped; their index is still
/// consumed so pointers stay aligned with the raw document.
pub fn entries(root: &Value) -> impl Iterator<Item = (usize, &Value)> {
    root.get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .enumerate()
        .filter_map(|(i, entry)| entry.get("resource").map(|r| (i, r)))
}

/// Resource of the entry at `index`, if present.
pub fn entry_resource(root: &Value, index: usize) -> Option<&Value> {
    root.get("entry")?.as_array()?.get(index)?.get("resource")
}

/// `resourceType` of a resource node.
pub fn resource_type_of(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

/// Resolve a reference string to the index of the entry it points at.
///
/// Two addressing schemes are supported, matching FHIR bundle semantics:
/// - `ResourceType/id` against each entry resource's type and `id`
/// - `urn:uuid:…` (or any full URL) against each entry's `fullUrl`
pub fn find_entry_by_reference(root: &Value, reference: &str) -> Option<usize> {
    let entry_array = root.get("entry")?.as_array()?;

    if reference.starts_with("urn:uuid:") || reference.contains("://") {
        return entry_array.iter().position(|entry| {
            entry.get("fullUrl").and_then(Value::as_str) == Some(reference)
        });
    }

    let (target_type, target_id) = reference.split_once('/')?;
    entry_array.iter().position(|entry| {
        let Some(resource) = entry.get("resource") else {
            return false;
        };
        resource_type_of(resource) == Some(target_type)
            && resource.get("id").and_then(Value::as_str) == Some(target_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {
                    "fullUrl": "urn:uuid:7f9f9f64-0000-4000-8000-000000000001",
                    "resource": {"resourceType": "Patient", "id": "p1"}
                },
                {
                    "resource": {"resourceType": "Observation", "id": "o1"}
                }
            ]
        })
    }

    #[test]
    fn test_entries_iteration() {
        let root = bundle();
        let collected: Vec<(usize, &str)> = entries(&root)
            .map(|(i, r)| (i, resource_type_of(r).unwrap()))
            .collect();
        assert_eq!(collected, vec![(0, "Patient"), (1, "Observation")]);
    }

    #[test]
    fn test_find_by_type_and_id() {
        let root = bundle();
        assert_eq!(find_entry_by_reference(&root, "Patient/p1"), Some(0));
        assert_eq!(find_entry_by_reference(&root, "Observation/o1"), Some(1));
        assert_eq!(find_entry_by_reference(&root, "Patient/missing"), None);
    }

    #[test]
    fn test_find_by_full_url() {
        let root = bundle();
        assert_eq!(
            find_entry_by_reference(&root, "urn:uuid:7f9f9f64-0000-4000-8000-000000000001"),
            Some(0)
        );
        assert_eq!(find_entry_by_reference(&root, "urn:uuid:unknown"), None);
    }
}
