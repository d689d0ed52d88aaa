//! The normalized finding type and its builder.

use crate::catalog::{validate_details, DetailsError, ErrorCode};
use lektor_tree::StructuralPointer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which phase family produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FindingSource {
    #[serde(rename = "STRUCTURE")]
    Structure,
    #[serde(rename = "ENGINE")]
    Engine,
    #[serde(rename = "RULE")]
    Rule,
    #[serde(rename = "TERMINOLOGY")]
    Terminology,
    #[serde(rename = "REFERENCE")]
    Reference,
    #[serde(rename = "LINT")]
    Lint,
    #[serde(rename = "SPEC_HINT")]
    SpecHint,
}

impl FindingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structure => "STRUCTURE",
            Self::Engine => "ENGINE",
            Self::Rule => "RULE",
            Self::Terminology => "TERMINOLOGY",
            Self::Reference => "REFERENCE",
            Self::Lint => "LINT",
            Self::SpecHint => "SPEC_HINT",
        }
    }

    /// Advisory sources never block; their findings are capped below `error`.
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::Lint | Self::SpecHint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One normalized validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub source: FindingSource,
    pub severity: Severity,
    pub error_code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Expression-language form of the location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Canonical structural pointer form of the location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<StructuralPointer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breadcrumb: Option<Vec<String>>,
    pub details: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Finding {
    /// Start building a finding. All emitters go through this constructor;
    /// [`FindingBuilder::finish`] enforces the details schema for the code.
    pub fn build(source: FindingSource, severity: Severity, code: ErrorCode) -> FindingBuilder {
        FindingBuilder {
            finding: Finding {
                source,
                severity,
                error_code: code,
                resource_type: None,
                path: None,
                pointer: None,
                resource_index: None,
                breadcrumb: None,
                details: Map::new(),
                explanation: None,
            },
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            code: self.error_code,
            pointer: self.pointer.as_ref().map(|p| p.to_string()),
        }
    }
}

/// `(errorCode, pointer)` identity used to suppress ENGINE findings that
/// re-detect a STRUCTURE finding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    code: ErrorCode,
    pointer: Option<String>,
}

#[derive(Debug)]
pub struct FindingBuilder {
    finding: Finding,
}

impl FindingBuilder {
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.finding.resource_type = Some(resource_type.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.finding.path = Some(path.into());
        self
    }

    pub fn pointer(mut self, pointer: StructuralPointer) -> Self {
        if self.finding.resource_index.is_none() {
            self.finding.resource_index = pointer.entry_index();
        }
        self.finding.pointer = Some(pointer);
        self
    }

    pub fn resource_index(mut self, index: usize) -> Self {
        self.finding.resource_index = Some(index);
        self
    }

    pub fn breadcrumb(mut self, breadcrumb: Vec<String>) -> Self {
        self.finding.breadcrumb = Some(breadcrumb);
        self
    }

    pub fn explanation(mut self, explanation: impl Into<String>) -> Self {
        self.finding.explanation = Some(explanation.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.finding.details.insert(key.into(), value.into());
        self
    }

    pub fn details(mut self, details: Map<String, Value>) -> Self {
        self.finding.details.extend(details);
        self
    }

    /// Validate against the catalog's details schema and the advisory
    /// severity invariant, then produce the finding.
    pub fn finish(self) -> Result<Finding, DetailsError> {
        if self.finding.source.is_advisory() && self.finding.severity == Severity::Error {
            return Err(DetailsError::AdvisorySeverity);
        }
        validate_details(self.finding.error_code, &self.finding.details)?;
        Ok(self.finding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_enforces_details_schema() {
        let result = Finding::build(
            FindingSource::Structure,
            Severity::Error,
            ErrorCode::InvalidEnumValue,
        )
        .detail("actual", "malex")
        .finish();
        assert!(result.is_err());

        let finding = Finding::build(
            FindingSource::Structure,
            Severity::Error,
            ErrorCode::InvalidEnumValue,
        )
        .detail("actual", "malex")
        .detail("allowed", json!(["male", "female", "other", "unknown"]))
        .detail("valueType", "enum")
        .pointer(StructuralPointer::parse("/entry/0/resource/gender").unwrap())
        .finish()
        .unwrap();
        assert_eq!(finding.resource_index, Some(0));
    }

    #[test]
    fn test_advisory_error_severity_rejected() {
        let result = Finding::build(
            FindingSource::Lint,
            Severity::Error,
            ErrorCode::LintEmptyElement,
        )
        .finish();
        assert_eq!(result.unwrap_err(), DetailsError::AdvisorySeverity);
    }

    #[test]
    fn test_dedup_key_identity() {
        let a = Finding::build(
            FindingSource::Structure,
            Severity::Error,
            ErrorCode::MandatoryMissing,
        )
        .detail("missingElement", "status")
        .pointer(StructuralPointer::parse("/entry/0/resource").unwrap())
        .finish()
        .unwrap();

        let b = Finding::build(
            FindingSource::Engine,
            Severity::Error,
            ErrorCode::MandatoryMissing,
        )
        .detail("missingElement", "status")
        .pointer(StructuralPointer::parse("/entry/0/resource").unwrap())
        .finish()
        .unwrap();

        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_serialized_shape() {
        let finding = Finding::build(
            FindingSource::Rule,
            Severity::Warning,
            ErrorCode::PatternMismatch,
        )
        .path("Patient.birthDate")
        .pointer(StructuralPointer::parse("/entry/0/resource/birthDate").unwrap())
        .detail("actual", "1960-05-15x")
        .detail("pattern", "^[0-9]{4}-[0-9]{2}-[0-9]{2}$")
        .finish()
        .unwrap();

        let value = serde_json::to_value(&finding).unwrap();
        assert_eq!(value["source"], "RULE");
        assert_eq!(value["severity"], "warning");
        assert_eq!(value["errorCode"], "PATTERN_MISMATCH");
        assert_eq!(value["pointer"], "/entry/0/resource/birthDate");
        assert_eq!(value["resourceIndex"], 0);
    }
}
