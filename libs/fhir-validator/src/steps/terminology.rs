//! Terminology validation against the project code master.
//!
//! Project constraints bind resource paths to code systems; every coded
//! value at a bound path is checked for `(system, code)` membership. Paths
//! already covered by a CodeSystem rule are left to the rule evaluator so a
//! violation is reported once.

use crate::error::PhaseError;
use crate::steps::rules::kinds::coded_pairs;
use lektor_findings::{ErrorCode, Finding, FindingSource, Severity};
use lektor_rules::{RuleKind, RuleSet, TerminologyStore};
use lektor_tree::{collect_nodes, entries, resource_type_of, StructuralPointer};
use serde_json::Value;

pub fn validate(
    tree: &Value,
    terminology: &TerminologyStore,
    rule_set: &RuleSet,
) -> Result<Vec<Finding>, PhaseError> {
    if terminology.is_empty() {
        return Ok(Vec::new());
    }

    // Paths a CodeSystem rule already covers, as `Type.path` strings.
    let covered: Vec<String> = rule_set
        .rules
        .iter()
        .filter(|r| r.kind() == Some(RuleKind::CodeSystem))
        .filter_map(|r| r.path.clone())
        .collect();

    let mut findings = Vec::new();

    for (index, resource) in entries(tree) {
        let Some(resource_type) = resource_type_of(resource) else {
            continue;
        };

        for constraint in terminology.constraints_for(resource_type) {
            let full_path = format!("{}.{}", resource_type, constraint.path);
            if covered.iter().any(|p| p == &full_path) {
                continue;
            }

            let base = StructuralPointer::root()
                .key("entry")
                .index(index)
                .key("resource");
            for node in collect_nodes(resource, &constraint.path, &base, resource_type) {
                for (system, code) in coded_pairs(node.value, &constraint.system) {
                    let in_system = system == constraint.system
                        && terminology.contains(&constraint.system, &code);
                    let in_subset = constraint
                        .codes
                        .as_ref()
                        .map(|codes| codes.iter().any(|c| c == &code))
                        .unwrap_or(true);
                    if in_system && in_subset {
                        continue;
                    }

                    let allowed: Vec<Value> = constraint
                        .codes
                        .clone()
                        .map(|codes| codes.into_iter().map(Value::from).collect())
                        .or_else(|| {
                            terminology
                                .codes(&constraint.system)
                                .map(|codes| codes.into_iter().map(Value::from).collect())
                        })
                        .unwrap_or_default();

                    findings.push(
                        Finding::build(
                            FindingSource::Terminology,
                            Severity::Error,
                            ErrorCode::CodesystemViolation,
                        )
                        .resource_type(resource_type)
                        .path(node.path.clone())
                        .pointer(node.pointer.clone())
                        .resource_index(index)
                        .detail("system", constraint.system.clone())
                        .detail("code", code)
                        .detail("allowedCodes", Value::Array(allowed))
                        .finish()?,
                    );
                }
            }
        }
    }

    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn terminology() -> TerminologyStore {
        TerminologyStore::from_json(
            r#"{
                "codeSystems": [{
                    "url": "http://example.org/cs/department",
                    "concepts": [{"code": "card"}, {"code": "neuro"}]
                }],
                "constraints": [{
                    "resourceType": "Encounter",
                    "path": "serviceType",
                    "system": "http://example.org/cs/department"
                }]
            }"#,
        )
        .unwrap()
    }

    fn tree(code: &str) -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{
                "resource": {
                    "resourceType": "Encounter",
                    "status": "finished",
                    "class": {"code": "AMB"},
                    "serviceType": {"coding": [
                        {"system": "http://example.org/cs/department", "code": code}
                    ]}
                }
            }]
        })
    }

    #[test]
    fn test_unknown_code_is_flagged() {
        let findings = validate(&tree("derm"), &terminology(), &RuleSet::empty()).unwrap();
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.source, FindingSource::Terminology);
        assert_eq!(finding.error_code, ErrorCode::CodesystemViolation);
        assert_eq!(finding.details["code"], "derm");
        assert_eq!(finding.details["allowedCodes"], json!(["card", "neuro"]));
    }

    #[test]
    fn test_known_code_passes() {
        let findings = validate(&tree("card"), &terminology(), &RuleSet::empty()).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_rule_covered_path_is_skipped() {
        let rule_set: RuleSet = serde_json::from_value(json!({
            "rules": [{
                "id": "cs-1",
                "kind": "CodeSystem",
                "path": "Encounter.serviceType",
                "params": {"system": "http://example.org/cs/department"}
            }]
        }))
        .unwrap();
        let findings = validate(&tree("derm"), &terminology(), &rule_set).unwrap();
        assert!(findings.is_empty());
    }
}
