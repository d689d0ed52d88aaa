//! Per-kind rule predicates.

use super::{config_error, RuleEnv, RuleExecutionContext};
use crate::error::PhaseError;
use lektor_findings::{ErrorCode, Finding, FindingSource};
use lektor_rules::InstanceScope;
use lektor_tree::{collect_containers, collect_nodes, entries, resolve_path, resource_type_of};
use serde_json::Value;
use tracing::debug;

/// Scalars pass through; composite values are serialized so details stay a
/// flat map.
fn flat(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::String(value.to_string()),
        Value::Array(items) if items.iter().any(|v| v.is_object() || v.is_array()) => {
            Value::String(value.to_string())
        }
        other => other.clone(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

/// `Required`: the target must exist and be non-empty in every in-scope
/// resource instance. Evaluated per instance, so scope applies to resources
/// rather than leaf nodes.
pub fn required(
    ctx: &RuleExecutionContext<'_>,
    tree: &Value,
    env: &RuleEnv<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let predicate = match &ctx.rule.scope {
        InstanceScope::Filter(expr) => match parse_predicate(expr, env) {
            Ok(p) => Some(p),
            Err(reason) => {
                findings.push(config_error(
                    ctx.rule,
                    Vec::new(),
                    format!("invalid instance-scope predicate: {reason}"),
                )?);
                return Ok(());
            }
        },
        _ => None,
    };

    let mut first_seen = false;
    for (index, resource) in entries(tree) {
        if resource_type_of(resource) != Some(ctx.resource_type.as_str()) {
            continue;
        }
        if ctx.rule.scope == InstanceScope::First && first_seen {
            break;
        }
        first_seen = true;
        if let Some(predicate) = &predicate {
            if !predicate.matches(resource) {
                continue;
            }
        }

        let base = lektor_tree::StructuralPointer::root()
            .key("entry")
            .index(index)
            .key("resource");
        let present = collect_nodes(resource, &ctx.relative_path, &base, &ctx.resource_type)
            .iter()
            .any(|node| !is_empty(node.value));
        if present {
            continue;
        }

        let full_path = format!("{}.{}", ctx.resource_type, ctx.relative_path);
        let info = resolve_path(
            tree,
            &full_path,
            Some(ctx.resource_type.as_str()),
            Some(index),
            &|p| env.schema.is_singular(&ctx.resource_type, p),
        );
        let missing = ctx
            .relative_path
            .rsplit('.')
            .next()
            .unwrap_or(&ctx.relative_path);

        findings.push(
            Finding::build(FindingSource::Rule, ctx.severity(), ErrorCode::MandatoryMissing)
                .resource_type(ctx.resource_type.clone())
                .path(full_path)
                .pointer(info.pointer)
                .breadcrumb(info.breadcrumb)
                .resource_index(index)
                .detail("ruleId", ctx.rule.id.clone())
                .detail("missingElement", missing)
                .finish()?,
        );
    }
    Ok(())
}

pub fn fixed_value(
    ctx: &RuleExecutionContext<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    // Presence of `value` is guaranteed by the parameter check.
    let expected = ctx.rule.param("value").cloned().unwrap_or(Value::Null);

    for (entry, node) in &ctx.targets {
        if *node.value == expected {
            continue;
        }
        findings.push(
            ctx.emit(ErrorCode::FixedValueMismatch, node, *entry)
                .detail("actual", flat(node.value))
                .detail("expected", flat(&expected))
                .finish()?,
        );
    }
    Ok(())
}

pub fn allowed_values(
    ctx: &RuleExecutionContext<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let Some(allowed) = ctx.rule.param("values").and_then(Value::as_array).cloned() else {
        findings.push(config_error(
            ctx.rule,
            Vec::new(),
            "'values' must be an array".to_string(),
        )?);
        return Ok(());
    };

    for (entry, node) in &ctx.targets {
        if allowed.iter().any(|v| v == node.value) {
            continue;
        }
        findings.push(
            ctx.emit(ErrorCode::ValueNotAllowed, node, *entry)
                .detail("actual", flat(node.value))
                .detail(
                    "allowed",
                    Value::Array(allowed.iter().map(flat).collect()),
                )
                .detail("valueType", json_type_name(node.value))
                .finish()?,
        );
    }
    Ok(())
}

pub fn regex(
    ctx: &RuleExecutionContext<'_>,
    env: &RuleEnv<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let Some(pattern) = ctx.rule.param_str("pattern") else {
        findings.push(config_error(
            ctx.rule,
            Vec::new(),
            "'pattern' must be a string".to_string(),
        )?);
        return Ok(());
    };

    let compiled = env.regexes.get(pattern);
    let regex = match compiled.as_ref() {
        Ok(regex) => regex,
        Err(e) => {
            findings.push(config_error(
                ctx.rule,
                Vec::new(),
                format!("invalid regular expression: {e}"),
            )?);
            return Ok(());
        }
    };

    for (entry, node) in &ctx.targets {
        let Some(actual) = node.value.as_str() else {
            debug!(rule = %ctx.rule.id, path = %node.path, "regex target is not a string");
            continue;
        };
        if regex.is_match(actual) {
            continue;
        }
        let mut builder = ctx
            .emit(ErrorCode::PatternMismatch, node, *entry)
            .detail("actual", actual)
            .detail("pattern", pattern);
        if let Some(description) = ctx.rule.param_str("description") {
            builder = builder.detail("description", description);
        }
        findings.push(builder.finish()?);
    }
    Ok(())
}

pub fn array_length(
    ctx: &RuleExecutionContext<'_>,
    tree: &Value,
    env: &RuleEnv<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let min = ctx.rule.param_u64("min");
    let max = ctx.rule.param_u64("max");

    let predicate = match &ctx.rule.scope {
        InstanceScope::Filter(expr) => match parse_predicate(expr, env) {
            Ok(p) => Some(p),
            Err(reason) => {
                findings.push(config_error(
                    ctx.rule,
                    Vec::new(),
                    format!("invalid instance-scope predicate: {reason}"),
                )?);
                return Ok(());
            }
        },
        _ => None,
    };

    for (index, resource) in entries(tree) {
        if resource_type_of(resource) != Some(ctx.resource_type.as_str()) {
            continue;
        }
        if ctx.rule.scope == InstanceScope::First
            && ctx.matching_entries.first() != Some(&index)
        {
            continue;
        }
        if let Some(predicate) = &predicate {
            if !predicate.matches(resource) {
                continue;
            }
        }

        let base = lektor_tree::StructuralPointer::root()
            .key("entry")
            .index(index)
            .key("resource");
        for container in
            collect_containers(resource, &ctx.relative_path, &base, &ctx.resource_type)
        {
            let actual = match container.value {
                Some(Value::Array(items)) => items.len() as u64,
                Some(Value::Null) | None => 0,
                Some(_) => 1,
            };
            let below = min.is_some_and(|min| actual < min);
            let above = max.is_some_and(|max| actual > max);
            if !below && !above {
                continue;
            }

            // When the element is absent the container pointer would not
            // resolve; report at the resource instead.
            let pointer = if container.value.is_some() {
                container.pointer
            } else {
                base.clone()
            };

            let mut builder = Finding::build(
                FindingSource::Rule,
                ctx.severity(),
                ErrorCode::ArrayLength,
            )
            .resource_type(ctx.resource_type.clone())
            .path(container.path)
            .pointer(pointer)
            .resource_index(index)
            .detail("ruleId", ctx.rule.id.clone())
            .detail("actual", actual);
            if let Some(min) = min {
                builder = builder.detail("min", min);
            }
            if let Some(max) = max {
                builder = builder.detail("max", max);
            }
            findings.push(builder.finish()?);
        }
    }
    Ok(())
}

pub fn code_system(
    ctx: &RuleExecutionContext<'_>,
    env: &RuleEnv<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    // Presence guaranteed by the parameter check.
    let system = ctx.rule.param_str("system").unwrap_or_default().to_string();
    let restricted: Option<Vec<String>> = ctx.rule.param("codes").and_then(Value::as_array).map(
        |codes| {
            codes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        },
    );

    for (entry, node) in &ctx.targets {
        for (found_system, code) in coded_pairs(node.value, &system) {
            let system_ok = found_system == system && env.terminology.has_system(&system);
            let code_ok = match &restricted {
                Some(codes) => codes.iter().any(|c| c == &code),
                None => env.terminology.contains(&system, &code),
            };
            if system_ok && code_ok {
                continue;
            }

            let allowed: Vec<Value> = restricted
                .as_ref()
                .map(|codes| codes.iter().cloned().map(Value::from).collect())
                .or_else(|| {
                    env.terminology
                        .codes(&system)
                        .map(|codes| codes.into_iter().map(Value::from).collect())
                })
                .unwrap_or_default();

            findings.push(
                ctx.emit(ErrorCode::CodesystemViolation, node, *entry)
                    .detail("system", system.clone())
                    .detail("code", code)
                    .detail("allowedCodes", Value::Array(allowed))
                    .finish()?,
            );
        }
    }
    Ok(())
}

/// `(system, code)` pairs carried by a coded node: a CodeableConcept's
/// codings, a bare Coding/Quantity, or a plain code string (which borrows
/// the caller's default system).
pub(crate) fn coded_pairs(value: &Value, default_system: &str) -> Vec<(String, String)> {
    if let Some(codings) = value.get("coding").and_then(Value::as_array) {
        return codings
            .iter()
            .filter_map(|coding| {
                let code = coding.get("code")?.as_str()?;
                let system = coding
                    .get("system")
                    .and_then(Value::as_str)
                    .unwrap_or(default_system);
                Some((system.to_string(), code.to_string()))
            })
            .collect();
    }
    if let Some(code) = value.get("code").and_then(Value::as_str) {
        let system = value
            .get("system")
            .and_then(Value::as_str)
            .unwrap_or(default_system);
        return vec![(system.to_string(), code.to_string())];
    }
    if let Some(code) = value.as_str() {
        return vec![(default_system.to_string(), code.to_string())];
    }
    Vec::new()
}

pub fn custom_expression(
    ctx: &RuleExecutionContext<'_>,
    env: &RuleEnv<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let expression = ctx.rule.param_str("expression").unwrap_or_default().to_string();
    let predicate = match parse_predicate(&expression, env) {
        Ok(predicate) => predicate,
        Err(reason) => {
            findings.push(config_error(
                ctx.rule,
                Vec::new(),
                format!("invalid expression: {reason}"),
            )?);
            return Ok(());
        }
    };

    for (entry, node) in &ctx.targets {
        if predicate.matches(node.value) {
            continue;
        }
        findings.push(
            ctx.emit(ErrorCode::CustomFhirpathConditionFailed, node, *entry)
                .detail("expression", expression.clone())
                .finish()?,
        );
    }
    Ok(())
}

pub fn required_resources(
    rule: &lektor_rules::Rule,
    tree: &Value,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let resource_type = rule.param_str("resourceType").unwrap_or_default().to_string();
    let min = rule.param_u64("min").unwrap_or(1);
    let max = rule.param_u64("max");

    let actual = entries(tree)
        .filter(|(_, r)| resource_type_of(r) == Some(resource_type.as_str()))
        .count() as u64;

    let below = actual < min;
    let above = max.is_some_and(|max| actual > max);
    if !below && !above {
        return Ok(());
    }

    let mut builder = Finding::build(
        FindingSource::Rule,
        rule.severity,
        ErrorCode::RequiredResourceMissing,
    )
    .detail("ruleId", rule.id.clone())
    .detail("resourceType", resource_type)
    .detail("actual", actual)
    .detail("min", min);
    if let Some(max) = max {
        builder = builder.detail("max", max);
    }
    findings.push(builder.pointer(lektor_tree::StructuralPointer::root()).finish()?);
    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Instance-scope / custom-expression predicates
// ---------------------------------------------------------------------------

/// The predicate subset the engine evaluates itself: `path`, `path = literal`
/// and `path != literal`, with string / boolean / numeric literals.
#[derive(Debug)]
pub struct Predicate {
    path: String,
    comparison: Option<(bool, Value)>,
}

impl Predicate {
    /// True when any node at the path satisfies the comparison (or exists
    /// and is non-empty for bare paths).
    pub fn matches(&self, scope: &Value) -> bool {
        let base = lektor_tree::StructuralPointer::root();
        let nodes = collect_nodes(scope, &self.path, &base, "");
        match &self.comparison {
            None => nodes.iter().any(|n| !is_empty(n.value)),
            Some((negated, literal)) => {
                let hit = nodes.iter().any(|n| n.value == literal);
                if *negated {
                    !hit
                } else {
                    hit
                }
            }
        }
    }
}

pub fn parse_predicate(raw: &str, _env: &RuleEnv<'_>) -> Result<Predicate, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty predicate".to_string());
    }

    let (path_part, comparison) = if let Some((path, literal)) = raw.split_once("!=") {
        (path, Some((true, parse_literal(literal)?)))
    } else if let Some((path, literal)) = raw.split_once('=') {
        (path, Some((false, parse_literal(literal)?)))
    } else {
        (raw, None)
    };

    let path = path_part.trim();
    if path.is_empty() || path.contains(char::is_whitespace) {
        return Err(format!("'{path}' is not a valid path"));
    }

    Ok(Predicate {
        path: path.to_string(),
        comparison,
    })
}

fn parse_literal(raw: &str) -> Result<Value, String> {
    let raw = raw.trim();
    if let Some(stripped) = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
    {
        return Ok(Value::from(stripped));
    }
    match raw {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    raw.parse::<f64>()
        .map(|n| serde_json::json!(n))
        .map_err(|_| format!("'{raw}' is not a recognizable literal"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_serializes_composites() {
        assert_eq!(flat(&json!("x")), json!("x"));
        assert_eq!(flat(&json!([1, 2])), json!([1, 2]));
        assert!(flat(&json!({"a": 1})).is_string());
    }

    #[test]
    fn test_is_empty() {
        assert!(is_empty(&json!(null)));
        assert!(is_empty(&json!("  ")));
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!({})));
        assert!(!is_empty(&json!(0)));
        assert!(!is_empty(&json!("x")));
    }

    #[test]
    fn test_coded_pairs() {
        let concept = json!({"coding": [
            {"system": "http://a", "code": "1"},
            {"code": "2"}
        ]});
        assert_eq!(
            coded_pairs(&concept, "http://default"),
            vec![
                ("http://a".to_string(), "1".to_string()),
                ("http://default".to_string(), "2".to_string())
            ]
        );
        assert_eq!(
            coded_pairs(&json!("raw"), "http://default"),
            vec![("http://default".to_string(), "raw".to_string())]
        );
    }

    #[test]
    fn test_predicate_literals() {
        assert_eq!(parse_literal("'x'").unwrap(), json!("x"));
        assert_eq!(parse_literal("true").unwrap(), json!(true));
        assert_eq!(parse_literal("4").unwrap(), json!(4.0));
        assert!(parse_literal("nope").is_err());
    }

    #[test]
    fn test_predicate_matching() {
        let resource = json!({"active": true, "name": [{"family": "A"}]});
        let env_less = Predicate {
            path: "active".to_string(),
            comparison: Some((false, json!(true))),
        };
        assert!(env_less.matches(&resource));

        let exists = Predicate {
            path: "name.family".to_string(),
            comparison: None,
        };
        assert!(exists.matches(&resource));

        let negated = Predicate {
            path: "active".to_string(),
            comparison: Some((true, json!(false))),
        };
        assert!(negated.matches(&resource));
    }
}
