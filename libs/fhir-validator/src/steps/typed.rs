//! Typed parse with capture.
//!
//! Strict pass first; each failure becomes a finding via the exception
//! pattern table, then the lenient pass produces a best-effort typed value
//! for downstream phases. Captured findings carry source STRUCTURE — the
//! orchestrator folds them into the structural-authority dedup set.

use crate::error::PhaseError;
use crate::steps::exception_map::{self, MappedException};
use lektor_findings::{Finding, FindingSource, Severity};
use lektor_models::{parse_bundle_lenient, parse_bundle_strict, Bundle, ParseFailure};
use lektor_schema::SchemaIndex;
use lektor_tree::{
    entry_resource, find_field_pointer, find_value_pointer, pointer_from_exception,
    resource_type_of, Segment, StructuralPointer,
};
use serde_json::Value;
use tracing::{debug, warn};

/// Result of the typed-capture phase.
pub struct TypedCapture {
    /// Typed value for the fast rule path; `None` when both passes failed.
    pub bundle: Option<Bundle>,
    /// Whether the strict pass succeeded (the lenient pass never ran).
    pub strict_ok: bool,
    pub findings: Vec<Finding>,
}

pub fn run(tree: &Value, schema: &SchemaIndex) -> Result<TypedCapture, PhaseError> {
    match parse_bundle_strict(tree) {
        Ok(bundle) => Ok(TypedCapture {
            bundle: Some(bundle),
            strict_ok: true,
            findings: Vec::new(),
        }),
        Err(failures) => {
            let mut findings = Vec::with_capacity(failures.len());
            for failure in &failures {
                findings.push(capture_failure(tree, schema, failure)?);
            }

            let bundle = parse_bundle_lenient(tree);
            if bundle.is_none() {
                warn!("lenient parse failed as well; typed phases are skipped");
            } else {
                debug!(
                    failures = failures.len(),
                    "strict parse failed; continuing with lenient typed value"
                );
            }

            Ok(TypedCapture {
                bundle,
                strict_ok: false,
                findings,
            })
        }
    }
}

fn capture_failure(
    tree: &Value,
    schema: &SchemaIndex,
    failure: &ParseFailure,
) -> Result<Finding, PhaseError> {
    let MappedException {
        code,
        details,
        field_hint,
    } = exception_map::map_message(&failure.message);

    let base = match failure.entry_index {
        Some(index) => StructuralPointer::root().key("entry").index(index).key("resource"),
        None => StructuralPointer::root(),
    };
    let scope = match failure.entry_index {
        Some(index) => entry_resource(tree, index),
        None => Some(tree),
    };
    let resource_type = scope
        .and_then(resource_type_of)
        .map(str::to_string);

    let value_hint = details.get("actual").and_then(Value::as_str).map(str::to_string);
    let pointer = locate(
        tree,
        schema,
        &base,
        scope,
        field_hint.as_deref(),
        value_hint.as_deref(),
        &failure.message,
    )
    .unwrap_or_else(|| base.clone());

    let mut builder = Finding::build(FindingSource::Structure, Severity::Error, code)
        .pointer(pointer)
        .details(details);
    if let Some(rt) = resource_type {
        builder = builder.resource_type(rt);
    }
    if let Some(index) = failure.entry_index {
        builder = builder.resource_index(index);
    }
    Ok(builder.finish()?)
}

/// Best pointer for a failure: a location clause in the message wins, then a
/// field-name search, then a search for the offending literal value inside
/// the failing subtree.
fn locate(
    tree: &Value,
    schema: &SchemaIndex,
    base: &StructuralPointer,
    scope: Option<&Value>,
    field_hint: Option<&str>,
    value_hint: Option<&str>,
    message: &str,
) -> Option<StructuralPointer> {
    let resource_type = scope.and_then(resource_type_of).map(str::to_string);
    let singular = move |path: &str| {
        // Location clauses are bundle-absolute; strip the entry prefix
        // before asking the schema.
        let relative = path
            .strip_prefix("entry.resource.")
            .unwrap_or(path)
            .to_string();
        resource_type
            .as_deref()
            .map(|rt| schema.is_singular(rt, &relative))
            .unwrap_or(false)
    };

    if let Some(pointer) = pointer_from_exception(message, &singular) {
        // Clause pointers are document-absolute already.
        if pointer.resolve(tree).is_some() || pointer.entry_index().is_some() {
            return Some(pointer);
        }
    }

    let relative = field_hint
        .and_then(|hint| find_field_pointer(scope?, hint))
        .or_else(|| value_hint.and_then(|literal| find_value_pointer(scope?, literal)))?;
    let mut absolute = base.clone();
    for segment in relative.segments() {
        absolute.push(match segment {
            Segment::Key(k) => Segment::Key(k.clone()),
            Segment::Index(i) => Segment::Index(*i),
        });
    }
    Some(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lektor_findings::ErrorCode;
    use lektor_schema::SchemaVersion;
    use serde_json::json;

    fn schema() -> std::sync::Arc<SchemaIndex> {
        SchemaIndex::for_version(SchemaVersion::R4).unwrap()
    }

    #[test]
    fn test_strict_success_produces_no_findings() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {"resourceType": "Patient", "id": "p1"}}]
        });
        let capture = run(&tree, &schema()).unwrap();
        assert!(capture.strict_ok);
        assert!(capture.findings.is_empty());
        assert!(capture.bundle.is_some());
    }

    #[test]
    fn test_bad_enum_is_captured_with_pointer() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {"resourceType": "Patient", "gender": "malex"}}]
        });
        let capture = run(&tree, &schema()).unwrap();
        assert!(!capture.strict_ok);
        assert_eq!(capture.findings.len(), 1);
        let finding = &capture.findings[0];
        assert_eq!(finding.error_code, ErrorCode::InvalidEnumValue);
        assert_eq!(finding.resource_index, Some(0));
        // the offending literal locates the precise pointer
        assert_eq!(
            finding.pointer.as_ref().unwrap().to_string(),
            "/entry/0/resource/gender"
        );
        // lenient value still available for the typed rule path
        assert!(capture.bundle.is_some());
    }

    #[test]
    fn test_unknown_field_pointer_via_hint_search() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {"resourceType": "Patient", "favouriteColour": "green"}}]
        });
        let capture = run(&tree, &schema()).unwrap();
        let finding = &capture.findings[0];
        assert_eq!(finding.error_code, ErrorCode::UnknownElement);
        assert_eq!(
            finding.pointer.as_ref().unwrap().to_string(),
            "/entry/0/resource/favouriteColour"
        );
    }

    #[test]
    fn test_multiple_entries_each_captured() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {"resourceType": "Patient", "gender": "malex"}},
                {"resource": {"resourceType": "Observation", "status": "bogus",
                               "code": {"text": "x"}}}
            ]
        });
        let capture = run(&tree, &schema()).unwrap();
        assert_eq!(capture.findings.len(), 2);
        assert_eq!(capture.findings[0].resource_index, Some(0));
        assert_eq!(capture.findings[1].resource_index, Some(1));
    }
}
