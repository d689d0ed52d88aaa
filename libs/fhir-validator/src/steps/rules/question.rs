//! Question/answer rule evaluation over QuestionnaireResponse resources.
//!
//! A rule identifies a question by `codeSystem` + `code` (the code doubles
//! as the response item's `linkId`) and validates the captured answers:
//! presence, expected answer type, numeric range, and an allowed-value set.
//! Seeds — the typed QuestionnaireResponse resources and their item
//! pointers — are resolved once per rule, not per answer.

use super::RuleExecutionContext;
use crate::error::PhaseError;
use lektor_findings::{ErrorCode, Finding, FindingSource};
use lektor_models::{Bundle, QuestionnaireResponseAnswer, QuestionnaireResponseItem, Resource};
use lektor_tree::{Segment, StructuralPointer};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Traversal seed: one response item matched by the rule, with its raw-tree
/// location.
struct Seed<'a> {
    entry_index: usize,
    item: &'a QuestionnaireResponseItem,
    pointer: StructuralPointer,
    path: String,
}

pub fn evaluate(
    ctx: &RuleExecutionContext<'_>,
    typed: &Bundle,
    tree: &Value,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let code = ctx.rule.param_str("code").unwrap_or_default().to_string();
    let code_system = ctx
        .rule
        .param_str("codeSystem")
        .unwrap_or_default()
        .to_string();
    let required = ctx
        .rule
        .param("required")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let seeds = resolve_seeds(typed, tree, &code);

    if seeds.is_empty() {
        if required {
            findings.push(
                Finding::build(FindingSource::Rule, ctx.rule.severity, ErrorCode::AnswerMissing)
                    .resource_type("QuestionnaireResponse")
                    .detail("ruleId", ctx.rule.id.clone())
                    .detail("question", code.clone())
                    .detail("codeSystem", code_system.clone())
                    .finish()?,
            );
        }
        return Ok(());
    }

    for seed in seeds {
        if seed.item.answer.is_empty() {
            findings.push(
                seed_finding(ctx, &seed, ErrorCode::AnswerMissing, &code, &code_system)
                    .finish()?,
            );
            continue;
        }

        for answer in &seed.item.answer {
            check_answer(ctx, &seed, answer, &code, &code_system, findings)?;
        }
    }

    Ok(())
}

fn check_answer(
    ctx: &RuleExecutionContext<'_>,
    seed: &Seed<'_>,
    answer: &QuestionnaireResponseAnswer,
    code: &str,
    code_system: &str,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    // Expected answer type.
    if let Some(expected) = ctx.rule.param_str("expectedType") {
        if !answer_matches_type(answer, expected) {
            findings.push(
                seed_finding(ctx, seed, ErrorCode::AnswerTypeMismatch, code, code_system)
                    .detail("expectedType", expected)
                    .finish()?,
            );
            return Ok(());
        }
    }

    // Numeric range.
    let numeric = numeric_value(answer);
    if let Some(actual) = numeric {
        let min = ctx.rule.param("min").and_then(decimal_param);
        let max = ctx.rule.param("max").and_then(decimal_param);
        let below = min.is_some_and(|min| actual < min);
        let above = max.is_some_and(|max| actual > max);
        if below || above {
            findings.push(
                seed_finding(ctx, seed, ErrorCode::AnswerOutOfRange, code, code_system)
                    .detail("actual", actual.to_string())
                    .finish()?,
            );
            return Ok(());
        }
    }

    // Allowed-value set.
    if let Some(values) = ctx.rule.param("values").and_then(Value::as_array) {
        let actual = answer_scalar(answer);
        let allowed = actual
            .as_ref()
            .is_some_and(|a| values.iter().any(|v| v == a));
        if !allowed {
            findings.push(
                seed_finding(ctx, seed, ErrorCode::AnswerNotAllowed, code, code_system)
                    .detail(
                        "actual",
                        actual.unwrap_or(Value::Null),
                    )
                    .detail("allowed", Value::Array(values.clone()))
                    .finish()?,
            );
        }
    }

    Ok(())
}

fn seed_finding(
    ctx: &RuleExecutionContext<'_>,
    seed: &Seed<'_>,
    code: ErrorCode,
    question: &str,
    code_system: &str,
) -> lektor_findings::FindingBuilder {
    Finding::build(FindingSource::Rule, ctx.rule.severity, code)
        .resource_type("QuestionnaireResponse")
        .path(seed.path.clone())
        .pointer(seed.pointer.clone())
        .resource_index(seed.entry_index)
        .detail("ruleId", ctx.rule.id.clone())
        .detail("question", question)
        .detail("codeSystem", code_system)
}

/// Locate every response item whose `linkId` matches the rule's code, with
/// its location in the raw tree.
fn resolve_seeds<'a>(typed: &'a Bundle, tree: &Value, code: &str) -> Vec<Seed<'a>> {
    let mut seeds = Vec::new();

    for (entry_index, resource) in typed.resources() {
        let Resource::QuestionnaireResponse(response) = resource else {
            continue;
        };
        for item in response.items_flat() {
            if item.link_id != code {
                continue;
            }
            let base = StructuralPointer::root()
                .key("entry")
                .index(entry_index)
                .key("resource");
            let (pointer, path) = raw_item_location(tree, entry_index, code)
                .unwrap_or((base, format!("QuestionnaireResponse.item[?linkId={code}]")));
            seeds.push(Seed {
                entry_index,
                item,
                pointer,
                path,
            });
        }
    }

    seeds
}

/// Pointer and expression path of the first raw item with the given linkId
/// under the entry's resource.
fn raw_item_location(
    tree: &Value,
    entry_index: usize,
    link_id: &str,
) -> Option<(StructuralPointer, String)> {
    let resource = lektor_tree::entry_resource(tree, entry_index)?;
    let base = StructuralPointer::root()
        .key("entry")
        .index(entry_index)
        .key("resource");

    fn search(
        value: &Value,
        link_id: &str,
        pointer: &mut StructuralPointer,
        path: &mut String,
    ) -> bool {
        let Some(items) = value.get("item").and_then(Value::as_array) else {
            return false;
        };
        for (i, item) in items.iter().enumerate() {
            pointer.push(Segment::Key("item".to_string()));
            pointer.push(Segment::Index(i));
            let saved_len = path.len();
            path.push_str(&format!(".item[{i}]"));

            if item.get("linkId").and_then(Value::as_str) == Some(link_id) {
                return true;
            }
            if search(item, link_id, pointer, path) {
                return true;
            }

            path.truncate(saved_len);
            pointer.pop();
            pointer.pop();
        }
        false
    }

    let mut pointer = base;
    let mut path = String::from("QuestionnaireResponse");
    search(resource, link_id, &mut pointer, &mut path).then_some((pointer, path))
}

fn answer_matches_type(answer: &QuestionnaireResponseAnswer, expected: &str) -> bool {
    match expected {
        "boolean" => answer.value_boolean.is_some(),
        "decimal" => answer.value_decimal.is_some(),
        "integer" => answer.value_integer.is_some(),
        "date" => answer.value_date.is_some(),
        "dateTime" => answer.value_date_time.is_some(),
        "string" | "text" => answer.value_string.is_some(),
        "coding" | "choice" => answer.value_coding.is_some(),
        "quantity" => answer.value_quantity.is_some(),
        _ => true,
    }
}

fn numeric_value(answer: &QuestionnaireResponseAnswer) -> Option<Decimal> {
    if let Some(decimal) = answer.value_decimal {
        return Some(decimal);
    }
    if let Some(integer) = answer.value_integer {
        return Some(Decimal::from(integer));
    }
    answer.value_quantity.as_ref().and_then(|q| q.value)
}

fn decimal_param(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

/// Scalar representation of the answer for allowed-value comparison: the
/// primitive value, or the coding's code.
fn answer_scalar(answer: &QuestionnaireResponseAnswer) -> Option<Value> {
    if let Some(b) = answer.value_boolean {
        return Some(Value::Bool(b));
    }
    if let Some(i) = answer.value_integer {
        return Some(Value::from(i));
    }
    if let Some(d) = answer.value_decimal {
        return serde_json::to_value(d).ok();
    }
    if let Some(s) = &answer.value_string {
        return Some(Value::from(s.clone()));
    }
    if let Some(date) = &answer.value_date {
        return Some(Value::from(date.as_str()));
    }
    if let Some(dt) = &answer.value_date_time {
        return Some(Value::from(dt.as_str()));
    }
    if let Some(coding) = &answer.value_coding {
        return coding.code.clone().map(Value::from);
    }
    None
}
