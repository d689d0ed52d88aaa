//! Project-rule evaluation.
//!
//! Two execution paths over the same rule set:
//!
//! - **Typed fast path** ([`evaluate_typed`]): runs every kind, using the
//!   typed model for code-system and question/answer semantics.
//! - **Structural fallback** ([`evaluate_structural`]): runs when the typed
//!   parse failed; covers the kinds that only need the raw tree and logs the
//!   rest as skipped.
//!
//! Per rule, a [`RuleExecutionContext`] is built once: kind resolution,
//! parameter checks, target-node resolution and (for question/answer rules)
//! traversal seeds. The per-node predicates live in `kinds.rs` and
//! `question.rs`.

pub(crate) mod kinds;
mod question;

use crate::cancel::CancellationToken;
use crate::error::PhaseError;
use crate::regex_cache::RegexCache;
use lektor_findings::{ErrorCode, Finding, FindingSource, Severity};
use lektor_rules::{InstanceScope, Rule, RuleKind, RuleSet, TerminologyStore};
use lektor_schema::SchemaIndex;
use lektor_tree::{collect_nodes, entries, resource_type_of, ResolvedNode, StructuralPointer};
use lektor_models::Bundle;
use serde_json::Value;
use tracing::debug;

/// Shared read-only state for one evaluation run.
pub struct RuleEnv<'a> {
    pub schema: &'a SchemaIndex,
    pub regexes: &'a RegexCache,
    pub terminology: &'a TerminologyStore,
    pub cancel: &'a CancellationToken,
}

/// Everything a rule needs, resolved once per rule rather than per node.
struct RuleExecutionContext<'a> {
    rule: &'a Rule,
    /// Target nodes with their entry index, after instance-scope filtering.
    targets: Vec<(usize, ResolvedNode<'a>)>,
    /// Entry indices of resources of the target type (for presence kinds).
    matching_entries: Vec<usize>,
    /// Target type and resource-relative path.
    resource_type: String,
    relative_path: String,
}

pub fn evaluate_typed(
    typed: &Bundle,
    tree: &Value,
    rule_set: &RuleSet,
    env: &RuleEnv<'_>,
) -> Result<Vec<Finding>, PhaseError> {
    evaluate(tree, Some(typed), rule_set, env)
}

pub fn evaluate_structural(
    tree: &Value,
    rule_set: &RuleSet,
    env: &RuleEnv<'_>,
) -> Result<Vec<Finding>, PhaseError> {
    evaluate(tree, None, rule_set, env)
}

fn evaluate(
    tree: &Value,
    typed: Option<&Bundle>,
    rule_set: &RuleSet,
    env: &RuleEnv<'_>,
) -> Result<Vec<Finding>, PhaseError> {
    let mut findings = Vec::new();

    for rule in &rule_set.rules {
        if env.cancel.is_cancelled() {
            return Err(PhaseError::Cancelled);
        }
        evaluate_rule(rule, tree, typed, env, &mut findings)?;
    }

    Ok(findings)
}

fn evaluate_rule(
    rule: &Rule,
    tree: &Value,
    typed: Option<&Bundle>,
    env: &RuleEnv<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    // Kind resolution and parameter enforcement come before anything else;
    // a misconfigured rule must never be silently skipped.
    let Some(kind) = rule.kind() else {
        findings.push(config_error(
            rule,
            Vec::new(),
            format!("unknown rule kind '{}'", rule.kind),
        )?);
        return Ok(());
    };

    let missing = rule.missing_params();
    if !missing.is_empty() {
        findings.push(config_error(
            rule,
            missing,
            "required rule parameters are missing".to_string(),
        )?);
        return Ok(());
    }

    if kind == RuleKind::Reference {
        findings.push(config_error(
            rule,
            Vec::new(),
            "Reference rules are not evaluated here; reference integrity is checked by the \
             reference-resolution phase"
                .to_string(),
        )?);
        return Ok(());
    }

    // Bundle-level kind: no target path involved.
    if kind == RuleKind::RequiredResources {
        kinds::required_resources(rule, tree, findings)?;
        return Ok(());
    }

    // Typed-only kinds degrade on the structural fallback.
    let needs_typed = matches!(
        kind,
        RuleKind::CodeSystem | RuleKind::QuestionAnswer | RuleKind::CustomExpression
    );
    if needs_typed && typed.is_none() {
        debug!(
            rule = %rule.id,
            kind = %kind,
            "typed parse unavailable; rule skipped by structural fallback"
        );
        return Ok(());
    }

    let Some(context) = RuleExecutionContext::build(rule, tree, env, findings)? else {
        return Ok(());
    };

    match kind {
        RuleKind::Required => kinds::required(&context, tree, env, findings)?,
        RuleKind::FixedValue => kinds::fixed_value(&context, findings)?,
        RuleKind::AllowedValues => kinds::allowed_values(&context, findings)?,
        RuleKind::Regex => kinds::regex(&context, env, findings)?,
        RuleKind::ArrayLength => kinds::array_length(&context, tree, env, findings)?,
        RuleKind::CodeSystem => kinds::code_system(&context, env, findings)?,
        RuleKind::CustomExpression => kinds::custom_expression(&context, env, findings)?,
        RuleKind::QuestionAnswer => {
            // Seeds are the typed QuestionnaireResponse resources; the
            // fallback path returned above.
            if let Some(typed) = typed {
                question::evaluate(&context, typed, tree, findings)?;
            }
        }
        RuleKind::Reference | RuleKind::RequiredResources => unreachable!("handled above"),
    }

    Ok(())
}

impl<'a> RuleExecutionContext<'a> {
    /// Resolve the target node set once. Returns `None` (after reporting)
    /// when the rule's addressing is unusable.
    fn build(
        rule: &'a Rule,
        tree: &'a Value,
        env: &RuleEnv<'_>,
        findings: &mut Vec<Finding>,
    ) -> Result<Option<RuleExecutionContext<'a>>, PhaseError> {
        let Some((resource_type, relative_path)) = target_of(rule) else {
            findings.push(config_error(
                rule,
                vec!["path".to_string()],
                "rule has neither a target path nor a resource type".to_string(),
            )?);
            return Ok(None);
        };

        let mut matching_entries = Vec::new();
        let mut targets = Vec::new();
        for (index, resource) in entries(tree) {
            if resource_type_of(resource) != Some(resource_type.as_str()) {
                continue;
            }
            matching_entries.push(index);

            let base = StructuralPointer::root()
                .key("entry")
                .index(index)
                .key("resource");
            if relative_path.is_empty() {
                targets.push((
                    index,
                    ResolvedNode {
                        value: resource,
                        pointer: base,
                        path: resource_type.clone(),
                    },
                ));
            } else {
                for node in collect_nodes(resource, &relative_path, &base, &resource_type) {
                    targets.push((index, node));
                }
            }
        }

        let targets = match apply_scope(&rule.scope, targets, env) {
            Ok(targets) => targets,
            Err(reason) => {
                findings.push(config_error(rule, Vec::new(), reason)?);
                return Ok(None);
            }
        };

        Ok(Some(RuleExecutionContext {
            rule,
            targets,
            matching_entries,
            resource_type,
            relative_path,
        }))
    }

    fn severity(&self) -> Severity {
        self.rule.severity
    }

    fn emit(
        &self,
        code: ErrorCode,
        node: &ResolvedNode<'_>,
        entry: usize,
    ) -> lektor_findings::FindingBuilder {
        Finding::build(FindingSource::Rule, self.severity(), code)
            .resource_type(self.resource_type.clone())
            .path(node.path.clone())
            .pointer(node.pointer.clone())
            .resource_index(entry)
            .detail("ruleId", self.rule.id.clone())
    }
}

/// Target resource type and resource-relative path of a rule.
///
/// `Patient.birthDate` → (`Patient`, `birthDate`); a bare `birthDate` path
/// falls back to the rule's `resourceType` field.
fn target_of(rule: &Rule) -> Option<(String, String)> {
    if let Some(path) = rule.path.as_deref() {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, rest),
            None => (path, ""),
        };
        let head_is_type = head.chars().next().is_some_and(|c| c.is_ascii_uppercase());
        if head_is_type {
            return Some((head.to_string(), rest.to_string()));
        }
        let resource_type = rule.resource_type.clone()?;
        return Some((resource_type, path.to_string()));
    }
    rule.resource_type.clone().map(|rt| (rt, String::new()))
}

/// Apply the rule's instance scope to the resolved target set.
fn apply_scope<'a>(
    scope: &InstanceScope,
    targets: Vec<(usize, ResolvedNode<'a>)>,
    env: &RuleEnv<'_>,
) -> Result<Vec<(usize, ResolvedNode<'a>)>, String> {
    match scope {
        InstanceScope::All => Ok(targets),
        InstanceScope::First => Ok(targets.into_iter().take(1).collect()),
        InstanceScope::Filter(predicate) => {
            let parsed = kinds::parse_predicate(predicate, env)
                .map_err(|e| format!("invalid instance-scope predicate: {e}"))?;
            Ok(targets
                .into_iter()
                .filter(|(_, node)| parsed.matches(node.value))
                .collect())
        }
    }
}

fn config_error(rule: &Rule, missing: Vec<String>, reason: String) -> Result<Finding, PhaseError> {
    Ok(Finding::build(
        FindingSource::Rule,
        Severity::Error,
        ErrorCode::RuleConfigurationError,
    )
    .detail("ruleId", rule.id.clone())
    .detail(
        "missingParams",
        Value::from(missing.into_iter().map(Value::from).collect::<Vec<_>>()),
    )
    .detail("reason", reason)
    .finish()?)
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

    fn tree() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {
                    "resourceType": "Patient",
                    "id": "p1",
                    "active": true,
                    "gender": "male",
                    "birthDate": "1960-05-15",
                    "contact": []
                }},
                {"resource": {
                    "resourceType": "Patient",
                    "id": "p2",
                    "active": false,
                    "gender": "female"
                }}
            ]
        })
    }

    fn run_rules(rules: Value, tree: &Value) -> Vec<Finding> {
        let rule_set: RuleSet = serde_json::from_value(json!({"rules": rules})).unwrap();
        let schema = schema();
        let regexes = RegexCache::default();
        let terminology = TerminologyStore::empty();
        let cancel = CancellationToken::new();
        let env = RuleEnv {
            schema: schema.as_ref(),
            regexes: &regexes,
            terminology: &terminology,
            cancel: &cancel,
        };
        evaluate_structural(tree, &rule_set, &env).unwrap()
    }

    #[test]
    fn test_unknown_kind_is_config_error() {
        let findings = run_rules(
            json!([{"id": "r1", "kind": "Sorcery", "path": "Patient.gender"}]),
            &tree(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].error_code, ErrorCode::RuleConfigurationError);
        assert_eq!(findings[0].details["ruleId"], "r1");
    }

    #[test]
    fn test_missing_params_reported_and_other_rules_still_run() {
        let findings = run_rules(
            json!([
                {"id": "r1", "kind": "Regex", "path": "Patient.id"},
                {"id": "r2", "kind": "AllowedValues", "path": "Patient.gender",
                 "params": {"values": ["male"]}}
            ]),
            &tree(),
        );
        let config: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.error_code == ErrorCode::RuleConfigurationError)
            .collect();
        assert_eq!(config.len(), 1);
        assert_eq!(
            config[0].details["missingParams"],
            json!(["pattern"])
        );
        // the second rule fired on the female patient
        assert!(findings
            .iter()
            .any(|f| f.error_code == ErrorCode::ValueNotAllowed));
    }

    #[test]
    fn test_reference_kind_is_blocked() {
        let findings = run_rules(
            json!([{"id": "r1", "kind": "Reference", "path": "Observation.subject"}]),
            &tree(),
        );
        assert_eq!(findings[0].error_code, ErrorCode::RuleConfigurationError);
    }

    #[test]
    fn test_scope_first_limits_to_document_order() {
        let findings = run_rules(
            json!([{"id": "r1", "kind": "AllowedValues", "path": "Patient.gender",
                    "scope": "first", "params": {"values": ["female"]}}]),
            &tree(),
        );
        // only the first patient is in scope; it violates
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].resource_index, Some(0));
    }

    #[test]
    fn test_scope_filter_keeps_matching_instances() {
        let findings = run_rules(
            json!([{"id": "r1", "kind": "Required", "path": "Patient.birthDate",
                    "scope": {"filter": "active = true"}}]),
            &tree(),
        );
        // the active patient has a birthDate; the inactive one is filtered out
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn test_alias_kinds_fire_identically() {
        let findings = run_rules(
            json!([
                {"id": "card", "kind": "Cardinality", "path": "Patient.contact",
                 "params": {"min": 1}},
                {"id": "arr", "kind": "ARRAY_LENGTH", "path": "Patient.contact",
                 "params": {"min": 1}}
            ]),
            &tree(),
        );
        let lengths: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.error_code == ErrorCode::ArrayLength)
            .collect();
        assert_eq!(lengths.len(), 4, "{findings:?}");
        // same code, pointer and details apart from the rule id
        assert_eq!(lengths[0].pointer, lengths[2].pointer);
        assert_eq!(lengths[0].details["actual"], lengths[2].details["actual"]);
        assert_ne!(lengths[0].details["ruleId"], lengths[2].details["ruleId"]);
    }
}
