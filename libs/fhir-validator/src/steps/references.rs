//! Cross-resource reference integrity within the document.
//!
//! Walks every `reference` string in the tree and resolves it against the
//! bundle's entries, by `ResourceType/id` or by `urn:uuid:` ↔ `fullUrl`.
//! External absolute URLs follow the request's resolution policy.

use crate::error::PhaseError;
use crate::ReferencePolicy;
use lektor_findings::{ErrorCode, Finding, FindingSource, Severity};
use lektor_tree::{find_entry_by_reference, Segment, StructuralPointer};
use serde_json::Value;
use tracing::debug;

pub fn validate(
    tree: &Value,
    policy: ReferencePolicy,
) -> Result<Vec<Finding>, PhaseError> {
    let mut findings = Vec::new();
    let mut pointer = StructuralPointer::root();
    walk(tree, tree, &mut pointer, policy, &mut findings)?;
    Ok(findings)
}

fn walk(
    root: &Value,
    value: &Value,
    pointer: &mut StructuralPointer,
    policy: ReferencePolicy,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    match value {
        Value::Object(obj) => {
            if let Some(reference) = obj.get("reference").and_then(Value::as_str) {
                pointer.push(Segment::Key("reference".to_string()));
                check_reference(root, reference, pointer, policy, findings)?;
                pointer.pop();
            }
            for (key, child) in obj {
                if key == "reference" {
                    continue;
                }
                pointer.push(Segment::Key(key.clone()));
                walk(root, child, pointer, policy, findings)?;
                pointer.pop();
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                pointer.push(Segment::Index(i));
                walk(root, item, pointer, policy, findings)?;
                pointer.pop();
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_reference(
    root: &Value,
    reference: &str,
    pointer: &StructuralPointer,
    policy: ReferencePolicy,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    // Contained-resource references are out of scope for entry resolution.
    if reference.starts_with('#') {
        return Ok(());
    }

    let external = reference.contains("://");
    if external && !reference.starts_with("urn:uuid:") {
        match policy {
            ReferencePolicy::Skip => return Ok(()),
            ReferencePolicy::Warn | ReferencePolicy::Error => {
                if find_entry_by_reference(root, reference).is_some() {
                    return Ok(());
                }
                let severity = if policy == ReferencePolicy::Error {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                findings.push(not_found(reference, pointer, severity, None)?);
                return Ok(());
            }
        }
    }

    if reference.starts_with("urn:uuid:") {
        if find_entry_by_reference(root, reference).is_none() {
            findings.push(not_found(reference, pointer, Severity::Error, None)?);
        }
        return Ok(());
    }

    let Some((target_type, _)) = reference.split_once('/') else {
        debug!(reference, "reference without a type segment; skipping");
        return Ok(());
    };

    if find_entry_by_reference(root, reference).is_none() {
        findings.push(not_found(
            reference,
            pointer,
            Severity::Error,
            Some(target_type),
        )?);
    }
    Ok(())
}

fn not_found(
    reference: &str,
    pointer: &StructuralPointer,
    severity: Severity,
    target_type: Option<&str>,
) -> Result<Finding, PhaseError> {
    let mut builder = Finding::build(
        FindingSource::Reference,
        severity,
        ErrorCode::ReferenceNotFound,
    )
    .pointer(pointer.clone())
    .detail("reference", reference);
    if let Some(target_type) = target_type {
        builder = builder.detail("targetTypes", Value::from(vec![Value::from(target_type)]));
    }
    Ok(builder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {
                    "fullUrl": "urn:uuid:0000-01",
                    "resource": {"resourceType": "Patient", "id": "p1"}
                },
                {
                    "resource": {
                        "resourceType": "Observation",
                        "id": "o1",
                        "status": "final",
                        "code": {"text": "x"},
                        "subject": {"reference": "Patient/missing"}
                    }
                }
            ]
        })
    }

    #[test]
    fn test_missing_local_reference() {
        let findings = validate(&tree(), ReferencePolicy::Skip).unwrap();
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.error_code, ErrorCode::ReferenceNotFound);
        assert_eq!(finding.source, FindingSource::Reference);
        assert_eq!(
            finding.pointer.as_ref().unwrap().to_string(),
            "/entry/1/resource/subject/reference"
        );
        assert_eq!(finding.details["reference"], "Patient/missing");
        assert_eq!(finding.details["targetTypes"], json!(["Patient"]));
    }

    #[test]
    fn test_resolvable_references_pass() {
        let mut root = tree();
        root["entry"][1]["resource"]["subject"]["reference"] = json!("Patient/p1");
        let findings = validate(&root, ReferencePolicy::Skip).unwrap();
        assert!(findings.is_empty());

        root["entry"][1]["resource"]["subject"]["reference"] = json!("urn:uuid:0000-01");
        let findings = validate(&root, ReferencePolicy::Skip).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_external_reference_policy() {
        let mut root = tree();
        root["entry"][1]["resource"]["subject"]["reference"] =
            json!("https://other.example.org/fhir/Patient/42");

        assert!(validate(&root, ReferencePolicy::Skip).unwrap().is_empty());

        let warned = validate(&root, ReferencePolicy::Warn).unwrap();
        assert_eq!(warned.len(), 1);
        assert_eq!(warned[0].severity, Severity::Warning);

        let errored = validate(&root, ReferencePolicy::Error).unwrap();
        assert_eq!(errored[0].severity, Severity::Error);
    }
}
