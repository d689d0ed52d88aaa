//! Structural validation against the schema index.
//!
//! Primary authority for schema-level errors: enum bindings, primitive
//! formats, array/object shape, cardinality, required fields, and (in
//! strict-schema mode) unknown elements. Works on the raw tree only, so it
//! runs even when the typed parse fails.

use crate::error::PhaseError;
use lektor_findings::{ErrorCode, Finding, FindingSource, Severity};
use lektor_schema::{BindingStrength, SchemaIndex};
use lektor_tree::{resource_type_of, StructuralPointer};
use serde_json::Value;
use tracing::debug;

/// Walk the whole document starting at the envelope. Entry resources are
/// reached through the `Bundle.entry.resource` descent, which restarts the
/// walk under each resource's own definition.
pub fn validate(
    tree: &Value,
    schema: &SchemaIndex,
    strict: bool,
) -> Result<Vec<Finding>, PhaseError> {
    let mut findings = Vec::new();

    if let Some(root_type) = resource_type_of(tree) {
        validate_resource(
            tree,
            root_type,
            StructuralPointer::root(),
            schema,
            strict,
            &mut findings,
        )?;
    }

    Ok(findings)
}

/// Validate a single resource subtree rooted at `base`.
pub fn validate_resource(
    resource: &Value,
    resource_type: &str,
    base: StructuralPointer,
    schema: &SchemaIndex,
    strict: bool,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    if !schema.is_resource_type(resource_type) {
        debug!(resource_type, "no schema definition; skipping structural walk");
        return Ok(());
    }

    let ctx = WalkContext {
        resource_type,
        schema,
        strict,
    };
    walk_object(resource, "", &base, &ctx, findings)
}

struct WalkContext<'a> {
    resource_type: &'a str,
    schema: &'a SchemaIndex,
    strict: bool,
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
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

fn walk_object(
    value: &Value,
    prefix: &str,
    pointer: &StructuralPointer,
    ctx: &WalkContext<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let Some(obj) = value.as_object() else {
        return Ok(());
    };

    // Required children of this node.
    for name in ctx
        .schema
        .required_children(ctx.resource_type, prefix)
        .cloned()
        .collect::<Vec<_>>()
    {
        if !obj.contains_key(&name) {
            findings.push(
                Finding::build(
                    FindingSource::Structure,
                    Severity::Error,
                    ErrorCode::MandatoryMissing,
                )
                .resource_type(ctx.resource_type)
                .path(join_expression(ctx.resource_type, prefix, &name))
                .pointer(pointer.clone())
                .detail("missingElement", name.as_str())
                .finish()?,
            );
        }
    }

    for (key, child) in obj {
        if key == "resourceType"
            || key.starts_with('_')
            || key == "extension"
            || key == "modifierExtension"
        {
            continue;
        }

        let rel = join(prefix, key);
        let child_pointer = pointer.clone().key(key);

        let Some(element) = ctx.schema.element(ctx.resource_type, &rel) else {
            if ctx.strict {
                findings.push(
                    Finding::build(
                        FindingSource::Structure,
                        Severity::Error,
                        ErrorCode::UnknownElement,
                    )
                    .resource_type(ctx.resource_type)
                    .path(join_expression(ctx.resource_type, prefix, key))
                    .pointer(child_pointer)
                    .detail("unknownElement", key.as_str())
                    .detail("location", rel.as_str())
                    .finish()?,
                );
            }
            continue;
        };

        // Shape: schema says array.
        if element.array && !child.is_array() {
            findings.push(
                Finding::build(
                    FindingSource::Structure,
                    Severity::Error,
                    ErrorCode::ArrayExpected,
                )
                .resource_type(ctx.resource_type)
                .path(join_expression(ctx.resource_type, prefix, key))
                .pointer(child_pointer.clone())
                .detail("expectedType", "array")
                .detail("actualType", json_type_name(child))
                .finish()?,
            );
            continue;
        }

        // Shape: schema says single-valued but an array arrived; report it as
        // a cardinality breach against max.
        if !element.array && child.is_array() {
            let len = child.as_array().map(Vec::len).unwrap_or(0);
            let max = element.cardinality.max.unwrap_or(1);
            if len as u32 > max {
                let mut builder = Finding::build(
                    FindingSource::Structure,
                    Severity::Error,
                    ErrorCode::ArrayLength,
                )
                .resource_type(ctx.resource_type)
                .path(join_expression(ctx.resource_type, prefix, key))
                .pointer(child_pointer.clone())
                .detail("actual", len as u64)
                .detail("max", max as u64);
                builder = builder.detail("min", element.cardinality.min as u64);
                findings.push(builder.finish()?);
            }
            continue;
        }

        // Cardinality over arrays.
        if let Some(items) = child.as_array() {
            let len = items.len() as u32;
            let card = element.cardinality;
            let below = len < card.min;
            let above = card.max.is_some_and(|max| len > max);
            if below || above {
                let mut builder = Finding::build(
                    FindingSource::Structure,
                    Severity::Error,
                    ErrorCode::ArrayLength,
                )
                .resource_type(ctx.resource_type)
                .path(join_expression(ctx.resource_type, prefix, key))
                .pointer(child_pointer.clone())
                .detail("actual", len as u64)
                .detail("min", card.min as u64);
                if let Some(max) = card.max {
                    builder = builder.detail("max", max as u64);
                }
                findings.push(builder.finish()?);
            }
        }

        // Value-level checks, fanning out over array items.
        let scalar_items: Vec<(&Value, StructuralPointer)> = match child {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (item, child_pointer.clone().index(i)))
                .collect(),
            other => vec![(other, child_pointer.clone())],
        };

        for (item, item_pointer) in &scalar_items {
            check_enum_binding(item, &rel, item_pointer, ctx, findings)?;
            check_primitive(item, &rel, item_pointer, element.primitive, ctx, findings)?;

            if element.primitive.is_none() && !item.is_object() && !item.is_null() {
                findings.push(
                    Finding::build(
                        FindingSource::Structure,
                        Severity::Error,
                        ErrorCode::ObjectExpected,
                    )
                    .resource_type(ctx.resource_type)
                    .path(join_expression(ctx.resource_type, prefix, key))
                    .pointer(item_pointer.clone())
                    .detail("expectedType", element.type_name.as_str())
                    .detail("actualType", json_type_name(item))
                    .finish()?,
                );
            }
        }

        // Descend.
        if element.opaque {
            // Nested resources restart the walk under their own definition.
            if element.type_name == "Resource" {
                for (item, item_pointer) in scalar_items {
                    if let Some(nested_type) = resource_type_of(item) {
                        validate_resource(
                            item,
                            nested_type,
                            item_pointer,
                            ctx.schema,
                            ctx.strict,
                            findings,
                        )?;
                    }
                }
            }
            continue;
        }

        if element.primitive.is_none() {
            for (item, item_pointer) in scalar_items {
                if item.is_object() {
                    walk_object(item, &rel, &item_pointer, ctx, findings)?;
                }
            }
        }
    }

    Ok(())
}

fn check_enum_binding(
    value: &Value,
    rel: &str,
    pointer: &StructuralPointer,
    ctx: &WalkContext<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let Some((allowed, strength)) = ctx.schema.allowed_values(ctx.resource_type, rel) else {
        return Ok(());
    };
    // Only required bindings block; weaker strengths are advisory material.
    if strength != BindingStrength::Required {
        return Ok(());
    }
    let Some(actual) = value.as_str() else {
        return Ok(());
    };
    if allowed.iter().any(|v| v == actual) {
        return Ok(());
    }

    findings.push(
        Finding::build(
            FindingSource::Structure,
            Severity::Error,
            ErrorCode::InvalidEnumValue,
        )
        .resource_type(ctx.resource_type)
        .path(format!("{}.{}", ctx.resource_type, rel))
        .pointer(pointer.clone())
        .detail("actual", actual)
        .detail("allowed", Value::from(allowed.to_vec()))
        .detail("valueType", "enum")
        .finish()?,
    );
    Ok(())
}

fn check_primitive(
    value: &Value,
    rel: &str,
    pointer: &StructuralPointer,
    primitive: Option<lektor_schema::PrimitiveType>,
    ctx: &WalkContext<'_>,
    findings: &mut Vec<Finding>,
) -> Result<(), PhaseError> {
    let Some(primitive) = primitive else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Err(reason) = primitive.validate(value) else {
        return Ok(());
    };

    let actual = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    findings.push(
        Finding::build(
            FindingSource::Structure,
            Severity::Error,
            ErrorCode::InvalidPrimitive,
        )
        .resource_type(ctx.resource_type)
        .path(format!("{}.{}", ctx.resource_type, rel))
        .pointer(pointer.clone())
        .detail("actual", actual)
        .detail("expectedType", primitive.as_str())
        .detail("reason", reason)
        .finish()?,
    );
    Ok(())
}

fn join_expression(resource_type: &str, prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        format!("{resource_type}.{name}")
    } else {
        format!("{resource_type}.{prefix}.{name}")
    }
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

    fn codes(findings: &[Finding]) -> Vec<(ErrorCode, String)> {
        findings
            .iter()
            .map(|f| {
                (
                    f.error_code,
                    f.pointer.as_ref().map(|p| p.to_string()).unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn test_enum_and_date_violations() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{
                "resource": {
                    "resourceType": "Patient",
                    "gender": "malex",
                    "birthDate": "1960-05-15x"
                }
            }]
        });
        let findings = validate(&tree, &schema(), false).unwrap();
        let found = codes(&findings);
        assert!(found.contains(&(
            ErrorCode::InvalidEnumValue,
            "/entry/0/resource/gender".to_string()
        )));
        assert!(found.contains(&(
            ErrorCode::InvalidPrimitive,
            "/entry/0/resource/birthDate".to_string()
        )));
        assert_eq!(findings.len(), 2);

        let enum_finding = findings
            .iter()
            .find(|f| f.error_code == ErrorCode::InvalidEnumValue)
            .unwrap();
        let allowed = enum_finding.details["allowed"].as_array().unwrap();
        for value in ["male", "female", "other", "unknown"] {
            assert!(allowed.contains(&json!(value)));
        }
    }

    #[test]
    fn test_missing_required_field() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{
                "resource": {"resourceType": "Encounter", "class": {"code": "AMB"}}
            }]
        });
        let findings = validate(&tree, &schema(), false).unwrap();
        let missing: Vec<&Finding> = findings
            .iter()
            .filter(|f| f.error_code == ErrorCode::MandatoryMissing)
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].details["missingElement"], "status");
        assert_eq!(
            missing[0].pointer.as_ref().unwrap().to_string(),
            "/entry/0/resource"
        );
    }

    #[test]
    fn test_array_shape_mismatch() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{
                "resource": {
                    "resourceType": "Patient",
                    "name": {"family": "solo"}
                }
            }]
        });
        let findings = validate(&tree, &schema(), false).unwrap();
        assert!(findings
            .iter()
            .any(|f| f.error_code == ErrorCode::ArrayExpected
                && f.details["actualType"] == "object"));
    }

    #[test]
    fn test_unknown_element_only_in_strict_mode() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{
                "resource": {"resourceType": "Patient", "favouriteColour": "green"}
            }]
        });
        let lax = validate(&tree, &schema(), false).unwrap();
        assert!(lax.iter().all(|f| f.error_code != ErrorCode::UnknownElement));

        let strict = validate(&tree, &schema(), true).unwrap();
        let unknown: Vec<&Finding> = strict
            .iter()
            .filter(|f| f.error_code == ErrorCode::UnknownElement)
            .collect();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].details["unknownElement"], "favouriteColour");
    }

    #[test]
    fn test_missing_bundle_type_reported_at_root() {
        let tree = json!({"resourceType": "Bundle"});
        let findings = validate(&tree, &schema(), false).unwrap();
        assert!(findings.iter().any(|f| {
            f.error_code == ErrorCode::MandatoryMissing
                && f.details["missingElement"] == "type"
                && f.pointer.as_ref().is_some_and(|p| p.is_root())
        }));
    }

    #[test]
    fn test_clean_document_yields_nothing() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{
                "resource": {
                    "resourceType": "Patient",
                    "id": "p1",
                    "gender": "female",
                    "birthDate": "1974-12-25",
                    "name": [{"family": "Chalmers", "given": ["Julia"]}]
                }
            }]
        });
        let findings = validate(&tree, &schema(), false).unwrap();
        assert!(findings.is_empty(), "{findings:?}");
    }
}
