//! Advisory generators: lint heuristics, spec hints, rule suggestions.
//!
//! Only runs in full mode. Advisories never block — the builder caps their
//! severity below `error` — and they are never deduplicated against the
//! blocking sources, so a spec hint can sit next to the structural finding
//! for the same field.

use crate::error::PhaseError;
use crate::RuleSuggestion;
use lektor_findings::{ErrorCode, Finding, FindingSource, Severity};
use lektor_schema::{BindingStrength, SchemaIndex};
use lektor_tree::{collect_nodes, entries, resource_type_of, Segment, StructuralPointer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub fn generate(tree: &Value, schema: &SchemaIndex) -> Result<Vec<Finding>, PhaseError> {
    let mut findings = Vec::new();
    spec_hints(tree, schema, &mut findings)?;
    lint(tree, &mut findings)?;
    Ok(findings)
}

/// Schema-suggested fields and weak-binding advisories.
fn spec_hints(
    tree: &Value,
    schema: &SchemaIndex,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    for (index, resource) in entries(tree) {
        let Some(resource_type) = resource_type_of(resource) else {
            continue;
        };
        let base = StructuralPointer::root()
            .key("entry")
            .index(index)
            .key("resource");

        // Required fields that are absent. The structural validator already
        // reported the error; the hint carries the authoring suggestion.
        for field in schema.required_fields(resource_type) {
            if resource.get(field).is_some() {
                continue;
            }
            findings.push(
                Finding::build(
                    FindingSource::SpecHint,
                    Severity::Info,
                    ErrorCode::SpecHintMissingField,
                )
                .resource_type(resource_type)
                .path(format!("{resource_type}.{field}"))
                .pointer(base.clone())
                .resource_index(index)
                .detail("missingElement", field.as_str())
                .finish()?,
            );
        }

        // Extensible / preferred bindings with out-of-set values.
        let mut bound: Vec<(&String, &lektor_schema::ElementInfo)> = schema
            .elements(resource_type)
            .filter(|(_, info)| {
                info.binding.as_ref().is_some_and(|b| {
                    !b.values.is_empty()
                        && matches!(
                            b.strength,
                            BindingStrength::Extensible | BindingStrength::Preferred
                        )
                })
            })
            .collect();
        bound.sort_by(|a, b| a.0.cmp(b.0));

        for (path, info) in bound {
            let Some(binding) = info.binding.as_ref() else {
                continue;
            };
            for node in collect_nodes(resource, path, &base, resource_type) {
                let Some(actual) = node.value.as_str() else {
                    continue;
                };
                if binding.values.iter().any(|v| v == actual) {
                    continue;
                }
                let severity = match binding.strength {
                    BindingStrength::Extensible => Severity::Warning,
                    _ => Severity::Info,
                };
                findings.push(
                    Finding::build(
                        FindingSource::SpecHint,
                        severity,
                        ErrorCode::SpecHintBindingMismatch,
                    )
                    .resource_type(resource_type)
                    .path(node.path.clone())
                    .pointer(node.pointer.clone())
                    .resource_index(index)
                    .detail("actual", actual)
                    .detail("allowed", Value::from(binding.values.clone()))
                    .finish()?,
                );
            }
        }
    }
    Ok(())
}

/// Portability and shape heuristics over the raw tree.
fn lint(tree: &Value, findings: &mut Vec<Finding>) -> Result<(), PhaseError> {
    let mut pointer = StructuralPointer::root();
    lint_walk(tree, &mut pointer, findings)
}

fn lint_walk(
    value: &Value,
    pointer: &mut StructuralPointer,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    match value {
        Value::Object(obj) => {
            // display-only codings travel poorly between systems
            if obj.contains_key("display")
                && !obj.contains_key("code")
                && !obj.contains_key("reference")
                && obj.len() <= 2
            {
                findings.push(
                    Finding::build(
                        FindingSource::Lint,
                        Severity::Warning,
                        ErrorCode::LintDisplayOnlyCoding,
                    )
                    .pointer(pointer.clone())
                    .finish()?,
                );
            }

            for (key, child) in obj {
                pointer.push(Segment::Key(key.clone()));

                let empty_shape = matches!(child, Value::Array(a) if a.is_empty())
                    || matches!(child, Value::Object(o) if o.is_empty());
                if empty_shape {
                    findings.push(
                        Finding::build(
                            FindingSource::Lint,
                            Severity::Warning,
                            ErrorCode::LintEmptyElement,
                        )
                        .pointer(pointer.clone())
                        .detail("element", key.as_str())
                        .finish()?,
                    );
                }

                if key == "id" {
                    if let Some(id) = child.as_str() {
                        if id.chars().any(|c| c.is_ascii_uppercase()) {
                            findings.push(
                                Finding::build(
                                    FindingSource::Lint,
                                    Severity::Info,
                                    ErrorCode::LintNonPortableId,
                                )
                                .pointer(pointer.clone())
                                .detail("id", id)
                                .finish()?,
                            );
                        }
                    }
                }

                if let Some(s) = child.as_str() {
                    if s != s.trim() && !s.trim().is_empty() {
                        findings.push(
                            Finding::build(
                                FindingSource::Lint,
                                Severity::Info,
                                ErrorCode::LintTrailingWhitespace,
                            )
                            .pointer(pointer.clone())
                            .detail("element", key.as_str())
                            .finish()?,
                        );
                    }
                }

                lint_walk(child, pointer, findings)?;
                pointer.pop();
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                pointer.push(Segment::Index(i));
                lint_walk(item, pointer, findings)?;
                pointer.pop();
            }
        }
        _ => {}
    }
    Ok(())
}

/// Propose rules from observed data patterns: fixed values that repeat
/// across all instances and small enumerable value sets.
pub fn suggest_rules(tree: &Value) -> Vec<RuleSuggestion> {
    // (resourceType, path) → distinct scalar values observed
    let mut observed: BTreeMap<(String, String), Vec<Value>> = BTreeMap::new();

    for (_, resource) in entries(tree) {
        let Some(resource_type) = resource_type_of(resource) else {
            continue;
        };
        let Some(obj) = resource.as_object() else {
            continue;
        };
        for (key, value) in obj {
            if key == "resourceType" || key == "id" {
                continue;
            }
            if let Some(scalar) = value.as_str() {
                observed
                    .entry((resource_type.to_string(), key.clone()))
                    .or_default()
                    .push(Value::from(scalar));
            }
        }
    }

    let mut suggestions = Vec::new();
    for ((resource_type, field), values) in observed {
        if values.len() < 2 {
            continue;
        }
        let mut unique = values.clone();
        unique.sort_by_key(|v| v.to_string());
        unique.dedup();

        if unique.len() == 1 {
            let mut params = Map::new();
            params.insert("value".to_string(), unique[0].clone());
            suggestions.push(RuleSuggestion {
                kind: "FixedValue".to_string(),
                resource_type: resource_type.clone(),
                path: format!("{resource_type}.{field}"),
                params,
                rationale: format!(
                    "all {} observed instances carry the same value",
                    values.len()
                ),
            });
        } else if unique.len() <= 5 && values.len() >= 3 {
            let mut params = Map::new();
            params.insert("values".to_string(), Value::Array(unique));
            suggestions.push(RuleSuggestion {
                kind: "AllowedValues".to_string(),
                resource_type: resource_type.clone(),
                path: format!("{resource_type}.{field}"),
                params,
                rationale: format!(
                    "{} observed instances use a small closed value set",
                    values.len()
                ),
            });
        }
    }
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use lektor_schema::SchemaVersion;
    use serde_json::json;
    use std::sync::Arc;

    fn schema() -> Arc<SchemaIndex> {
        SchemaIndex::for_version(SchemaVersion::R4).unwrap()
    }

    #[test]
    fn test_missing_status_produces_spec_hint() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {"resourceType": "Encounter", "class": {"code": "AMB"}}}]
        });
        let findings = generate(&tree, &schema()).unwrap();
        let hints: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.error_code == ErrorCode::SpecHintMissingField)
            .collect();
        assert!(hints
            .iter()
            .any(|f| f.details["missingElement"] == "status"));
        // advisories never carry error severity
        assert!(findings.iter().all(|f| f.severity != Severity::Error));
    }

    #[test]
    fn test_lint_flags_empty_and_nonportable() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {
                "resourceType": "Patient",
                "id": "UpperCase",
                "identifier": [],
                "name": [{"family": "Trailing  "}]
            }}]
        });
        let findings = generate(&tree, &schema()).unwrap();
        let codes: Vec<ErrorCode> = findings.iter().map(|f| f.error_code).collect();
        assert!(codes.contains(&ErrorCode::LintEmptyElement));
        assert!(codes.contains(&ErrorCode::LintNonPortableId));
        assert!(codes.contains(&ErrorCode::LintTrailingWhitespace));
    }

    #[test]
    fn test_fixed_value_suggestion() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {"resourceType": "Observation", "status": "final",
                               "code": {"text": "a"}}},
                {"resource": {"resourceType": "Observation", "status": "final",
                               "code": {"text": "b"}}}
            ]
        });
        let suggestions = suggest_rules(&tree);
        assert!(suggestions
            .iter()
            .any(|s| s.kind == "FixedValue" && s.path == "Observation.status"));
    }
}
