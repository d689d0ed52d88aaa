//! Strict parse pass: fail-closed on unknown members and unrecognized codes.
//!
//! The bundle envelope and every entry resource are parsed independently so
//! a failure carries the entry index it belongs to; the typed-capture phase
//! turns each failure into a finding without losing the others.

use crate::datatypes::Identifier;
use crate::resources::{Bundle, BundleType, Entry, Resource};
use serde::Deserialize;
use serde_json::Value;

/// One strict-pass failure, tied to the entry it occurred in.
#[derive(Debug, Clone)]
pub struct ParseFailure {
    /// `None` for failures in the bundle envelope itself.
    pub entry_index: Option<usize>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct BundleEnvelope {
    #[serde(rename = "resourceType")]
    #[allow(dead_code)]
    resource_type: String,
    id: Option<String>,
    #[allow(dead_code)]
    meta: Option<Value>,
    #[allow(dead_code)]
    identifier: Option<Identifier>,
    #[serde(rename = "type")]
    type_: BundleType,
    #[allow(dead_code)]
    timestamp: Option<String>,
    #[allow(dead_code)]
    total: Option<u64>,
    #[serde(default)]
    #[allow(dead_code)]
    link: Vec<Value>,
    #[serde(default)]
    entry: Vec<EntryEnvelope>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct EntryEnvelope {
    full_url: Option<String>,
    resource: Option<Value>,
    #[allow(dead_code)]
    search: Option<Value>,
    #[allow(dead_code)]
    request: Option<Value>,
    #[allow(dead_code)]
    response: Option<Value>,
}

/// Parse the whole document strictly. Either every entry types cleanly, or
/// all failures are returned together.
pub fn parse_bundle_strict(root: &Value) -> Result<Bundle, Vec<ParseFailure>> {
    let envelope: BundleEnvelope = match serde_json::from_value(root.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            return Err(vec![ParseFailure {
                entry_index: None,
                message: e.to_string(),
            }])
        }
    };

    let mut failures = Vec::new();
    let mut entries = Vec::new();

    for (index, entry) in envelope.entry.into_iter().enumerate() {
        match entry.resource {
            None => entries.push(Entry {
                full_url: entry.full_url,
                resource: None,
            }),
            Some(resource_value) => match parse_resource_strict(&resource_value) {
                Ok(resource) => entries.push(Entry {
                    full_url: entry.full_url,
                    resource: Some(resource),
                }),
                Err(e) => failures.push(ParseFailure {
                    entry_index: Some(index),
                    message: e.to_string(),
                }),
            },
        }
    }

    if failures.is_empty() {
        Ok(Bundle {
            id: envelope.id,
            bundle_type: Some(envelope.type_),
            entries,
        })
    } else {
        Err(failures)
    }
}

/// Strictly parse a single entry resource, dispatching on `resourceType`.
/// Resource types outside the typed model stay opaque rather than failing:
/// the structural validator owns them.
pub fn parse_resource_strict(value: &Value) -> Result<Resource, serde_json::Error> {
    let resource_type = value
        .get("resourceType")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(match resource_type {
        "Patient" => Resource::Patient(serde_json::from_value(value.clone())?),
        "Observation" => Resource::Observation(serde_json::from_value(value.clone())?),
        "Encounter" => Resource::Encounter(serde_json::from_value(value.clone())?),
        "Organization" => Resource::Organization(serde_json::from_value(value.clone())?),
        "QuestionnaireResponse" => {
            Resource::QuestionnaireResponse(serde_json::from_value(value.clone())?)
        }
        other => Resource::Unsupported {
            resource_type: other.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::AdministrativeGender;
    use serde_json::json;

    #[test]
    fn test_clean_bundle_parses() {
        let root = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "p1", "gender": "male"}}
            ]
        });
        let bundle = parse_bundle_strict(&root).unwrap();
        assert_eq!(bundle.bundle_type, Some(BundleType::Collection));
        let Some(Resource::Patient(patient)) = &bundle.entries[0].resource else {
            panic!("expected a typed patient");
        };
        assert_eq!(patient.gender, Some(AdministrativeGender::Male));
    }

    #[test]
    fn test_failures_carry_entry_index() {
        let root = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "ok"}},
                {"resource": {"resourceType": "Patient", "gender": "malex"}},
                {"resource": {"resourceType": "Observation", "status": "bogus"}}
            ]
        });
        let failures = parse_bundle_strict(&root).unwrap_err();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].entry_index, Some(1));
        assert!(failures[0].message.contains("unknown variant `malex`"));
        assert_eq!(failures[1].entry_index, Some(2));
    }

    #[test]
    fn test_unknown_resource_type_stays_opaque() {
        let resource = json!({"resourceType": "Medication", "code": {}});
        let parsed = parse_resource_strict(&resource).unwrap();
        assert!(matches!(
            parsed,
            Resource::Unsupported { ref resource_type } if resource_type == "Medication"
        ));
    }

    #[test]
    fn test_envelope_failure_has_no_entry_index() {
        let root = json!({"resourceType": "Bundle", "type": "not-a-bundle-type"});
        let failures = parse_bundle_strict(&root).unwrap_err();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].entry_index, None);
    }
}
