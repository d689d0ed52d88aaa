//! Engine wrapper.
//!
//! The underlying profile validator is a black box behind [`ProfileEngine`]:
//! it receives the document and returns an issue stream. The wrapper owns
//! the translation into findings — severity mapping, code mapping into the
//! catalog, pointer extraction from the issue expression — and converts
//! library failures into a single `PIPELINE_ERROR` finding instead of
//! aborting the pipeline.

use crate::error::PhaseError;
use crate::steps::structure;
use lektor_findings::{ErrorCode, Finding, FindingSource, Severity};
use lektor_schema::{SchemaIndex, SchemaVersion};
use lektor_tree::{expression_to_pointer, Segment};
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

/// One issue as reported by the underlying library.
#[derive(Debug, Clone)]
pub struct EngineIssue {
    pub severity: EngineSeverity,
    /// Library-native code. Engines that already speak the finding catalog
    /// pass codes through unchanged.
    pub code: String,
    /// Bundle-absolute location expression, when the library reports one.
    pub expression: Option<String>,
    pub message: String,
    /// Structured details, when the library provides them.
    pub details: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
#[error("profile engine failed: {0}")]
pub struct EngineError(pub String);

/// Contract of the underlying validation library.
pub trait ProfileEngine: Send + Sync {
    fn validate(
        &self,
        resource: &Value,
        version: SchemaVersion,
    ) -> Result<Vec<EngineIssue>, EngineError>;

    fn name(&self) -> &'static str {
        "profile-engine"
    }
}

/// Run the engine and translate its issues. Library errors and panics both
/// produce one `PIPELINE_ERROR` finding.
pub fn run(
    engine: &dyn ProfileEngine,
    tree: &Value,
    schema: &SchemaIndex,
) -> Result<Vec<Finding>, PhaseError> {
    let outcome = catch_unwind(AssertUnwindSafe(|| engine.validate(tree, schema.version())));

    let issues = match outcome {
        Ok(Ok(issues)) => issues,
        Ok(Err(e)) => {
            warn!(engine = engine.name(), error = %e, "engine returned an error");
            return Ok(vec![pipeline_failure(engine.name(), &e.to_string())?]);
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "engine panicked".to_string());
            error!(engine = engine.name(), message, "engine panicked");
            return Ok(vec![pipeline_failure(engine.name(), &message)?]);
        }
    };

    let mut findings = Vec::with_capacity(issues.len());
    for issue in issues {
        findings.push(map_issue(issue, schema)?);
    }
    Ok(findings)
}

fn pipeline_failure(engine: &str, message: &str) -> Result<Finding, PhaseError> {
    Ok(
        Finding::build(FindingSource::Engine, Severity::Error, ErrorCode::PipelineError)
            .detail("phase", "engine")
            .detail("engine", engine)
            .detail("message", message)
            .finish()?,
    )
}

fn map_issue(issue: EngineIssue, schema: &SchemaIndex) -> Result<Finding, PhaseError> {
    let severity = match issue.severity {
        EngineSeverity::Fatal | EngineSeverity::Error => Severity::Error,
        EngineSeverity::Warning => Severity::Warning,
        EngineSeverity::Information => Severity::Info,
    };

    let code = ErrorCode::parse(&issue.code).unwrap_or(match issue.code.as_str() {
        "required" => ErrorCode::MandatoryMissing,
        "code-invalid" => ErrorCode::InvalidEnumValue,
        _ => ErrorCode::TypeMismatch,
    });

    let mut details = issue.details;
    backfill_required_keys(code, &mut details);
    if !issue.message.is_empty() {
        details
            .entry("message".to_string())
            .or_insert_with(|| Value::from(issue.message.clone()));
    }

    let mut builder = Finding::build(FindingSource::Engine, severity, code).details(details);

    if let Some(expression) = issue.expression {
        let pointer = expression_to_pointer(&expression, &|path: &str| {
            // Expressions are bundle-absolute; the schema speaks
            // resource-relative paths.
            path.strip_prefix("entry.resource.")
                .map(|relative| {
                    schema
                        .resource_types()
                        .any(|rt| schema.is_singular(rt, relative))
                })
                .unwrap_or(false)
        });
        builder = builder.path(expression).pointer(pointer);
    }

    Ok(builder.finish()?)
}

/// Ensure the catalog's required detail keys exist; the engine may not know
/// our schema. Nulls are acceptable placeholders (`actual: null` is part of
/// the enum-violation schema).
fn backfill_required_keys(code: ErrorCode, details: &mut Map<String, Value>) {
    for key in code.required_detail_keys() {
        details.entry((*key).to_string()).or_insert(Value::Null);
    }
    if code == ErrorCode::InvalidEnumValue {
        let allowed = details.entry("allowed".to_string()).or_insert(Value::Null);
        if allowed.is_null() {
            *allowed = Value::Array(Vec::new());
        }
    }
}

/// Default engine: re-validates the document against the schema index and
/// reports issues in catalog vocabulary with bundle-absolute expressions.
/// Deliberately overlaps the structural validator — the orchestrator's
/// dedup keeps STRUCTURE as the authority.
pub struct SnapshotEngine {
    schema: Arc<SchemaIndex>,
}

impl SnapshotEngine {
    pub fn new(schema: Arc<SchemaIndex>) -> Self {
        Self { schema }
    }
}

impl ProfileEngine for SnapshotEngine {
    fn validate(
        &self,
        resource: &Value,
        _version: SchemaVersion,
    ) -> Result<Vec<EngineIssue>, EngineError> {
        let findings = structure::validate(resource, &self.schema, false)
            .map_err(|e| EngineError(e.to_string()))?;

        Ok(findings
            .into_iter()
            .map(|finding| EngineIssue {
                severity: match finding.severity {
                    Severity::Error => EngineSeverity::Error,
                    Severity::Warning => EngineSeverity::Warning,
                    Severity::Info => EngineSeverity::Information,
                },
                code: finding.error_code.as_str().to_string(),
                expression: finding.pointer.as_ref().map(pointer_to_expression),
                message: String::new(),
                details: finding.details,
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "snapshot-engine"
    }
}

fn pointer_to_expression(pointer: &lektor_tree::StructuralPointer) -> String {
    let mut expression = String::from("Bundle");
    for segment in pointer.segments() {
        match segment {
            Segment::Key(k) => {
                expression.push('.');
                expression.push_str(k);
            }
            Segment::Index(i) => {
                expression.push('[');
                expression.push_str(&i.to_string());
                expression.push(']');
            }
        }
    }
    expression
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PanickyEngine;

    impl ProfileEngine for PanickyEngine {
        fn validate(
            &self,
            _resource: &Value,
            _version: SchemaVersion,
        ) -> Result<Vec<EngineIssue>, EngineError> {
            panic!("library blew up");
        }

        fn name(&self) -> &'static str {
            "panicky"
        }
    }

    fn schema() -> Arc<SchemaIndex> {
        SchemaIndex::for_version(SchemaVersion::R4).unwrap()
    }

    #[test]
    fn test_panic_becomes_pipeline_error_finding() {
        let tree = json!({"resourceType": "Bundle", "type": "collection"});
        let findings = run(&PanickyEngine, &tree, &schema()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].error_code, ErrorCode::PipelineError);
        assert_eq!(findings[0].details["engine"], "panicky");
    }

    #[test]
    fn test_snapshot_engine_reports_catalog_codes() {
        let tree = json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {"resourceType": "Patient", "gender": "malex"}}]
        });
        let schema = schema();
        let findings = run(&SnapshotEngine::new(schema.clone()), &tree, &schema).unwrap();
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.source, FindingSource::Engine);
        assert_eq!(finding.error_code, ErrorCode::InvalidEnumValue);
        assert_eq!(
            finding.pointer.as_ref().unwrap().to_string(),
            "/entry/0/resource/gender"
        );
        assert_eq!(
            finding.path.as_deref(),
            Some("Bundle.entry[0].resource.gender")
        );
    }

    #[test]
    fn test_unknown_engine_code_falls_back() {
        let issue = EngineIssue {
            severity: EngineSeverity::Warning,
            code: "business-rule".to_string(),
            expression: None,
            message: "something advisory".to_string(),
            details: Map::new(),
        };
        let finding = map_issue(issue, &schema()).unwrap();
        assert_eq!(finding.error_code, ErrorCode::TypeMismatch);
        assert_eq!(finding.severity, Severity::Warning);
    }
}
