//! The closed error-code catalog.
//!
//! Every finding carries one of these codes; the presentation layer derives
//! human text from the code plus the structured details. Adding a code is a
//! coordinated change with that layer, so the enum is exhaustive on purpose.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Gate
    EmptyBundle,
    InvalidJson,
    // Structure / typed parse
    InvalidEnumValue,
    InvalidPrimitive,
    ArrayExpected,
    ObjectExpected,
    MandatoryMissing,
    UnknownElement,
    TypeMismatch,
    DeserializationError,
    ArrayLength,
    // Rules
    FixedValueMismatch,
    ValueNotAllowed,
    PatternMismatch,
    CodesystemViolation,
    ReferenceNotFound,
    RuleConfigurationError,
    CustomFhirpathConditionFailed,
    RequiredResourceMissing,
    AnswerMissing,
    AnswerTypeMismatch,
    AnswerNotAllowed,
    AnswerOutOfRange,
    // Advisory
    LintEmptyElement,
    LintDisplayOnlyCoding,
    LintTrailingWhitespace,
    LintNonPortableId,
    SpecHintMissingField,
    SpecHintBindingMismatch,
    // Pipeline
    PipelineError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyBundle => "EMPTY_BUNDLE",
            Self::InvalidJson => "INVALID_JSON",
            Self::InvalidEnumValue => "INVALID_ENUM_VALUE",
            Self::InvalidPrimitive => "INVALID_PRIMITIVE",
            Self::ArrayExpected => "ARRAY_EXPECTED",
            Self::ObjectExpected => "OBJECT_EXPECTED",
            Self::MandatoryMissing => "MANDATORY_MISSING",
            Self::UnknownElement => "UNKNOWN_ELEMENT",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::DeserializationError => "DESERIALIZATION_ERROR",
            Self::ArrayLength => "ARRAY_LENGTH",
            Self::FixedValueMismatch => "FIXED_VALUE_MISMATCH",
            Self::ValueNotAllowed => "VALUE_NOT_ALLOWED",
            Self::PatternMismatch => "PATTERN_MISMATCH",
            Self::CodesystemViolation => "CODESYSTEM_VIOLATION",
            Self::ReferenceNotFound => "REFERENCE_NOT_FOUND",
            Self::RuleConfigurationError => "RULE_CONFIGURATION_ERROR",
            Self::CustomFhirpathConditionFailed => "CUSTOMFHIRPATH_CONDITION_FAILED",
            Self::RequiredResourceMissing => "REQUIRED_RESOURCE_MISSING",
            Self::AnswerMissing => "ANSWER_MISSING",
            Self::AnswerTypeMismatch => "ANSWER_TYPE_MISMATCH",
            Self::AnswerNotAllowed => "ANSWER_NOT_ALLOWED",
            Self::AnswerOutOfRange => "ANSWER_OUT_OF_RANGE",
            Self::LintEmptyElement => "LINT_EMPTY_ELEMENT",
            Self::LintDisplayOnlyCoding => "LINT_DISPLAY_ONLY_CODING",
            Self::LintTrailingWhitespace => "LINT_TRAILING_WHITESPACE",
            Self::LintNonPortableId => "LINT_NON_PORTABLE_ID",
            Self::SpecHintMissingField => "SPEC_HINT_MISSING_FIELD",
            Self::SpecHintBindingMismatch => "SPEC_HINT_BINDING_MISMATCH",
            Self::PipelineError => "PIPELINE_ERROR",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        ALL_CODES.iter().copied().find(|c| c.as_str() == raw)
    }

    /// Detail keys that must be present for this code. Values beyond these
    /// are allowed as long as the map stays flat.
    pub fn required_detail_keys(&self) -> &'static [&'static str] {
        match self {
            Self::InvalidEnumValue => &["actual", "allowed", "valueType"],
            Self::InvalidPrimitive => &["actual", "expectedType", "reason"],
            Self::ArrayExpected => &["expectedType", "actualType"],
            Self::ObjectExpected => &["expectedType", "actualType"],
            Self::MandatoryMissing => &["missingElement"],
            Self::UnknownElement => &["unknownElement"],
            Self::FixedValueMismatch => &["actual", "expected"],
            Self::ValueNotAllowed => &["actual", "allowed", "valueType"],
            Self::PatternMismatch => &["actual", "pattern"],
            Self::ArrayLength => &["actual"],
            Self::CodesystemViolation => &["system"],
            Self::ReferenceNotFound => &["reference"],
            Self::RuleConfigurationError => &["ruleId", "missingParams"],
            Self::RequiredResourceMissing => &["resourceType"],
            Self::CustomFhirpathConditionFailed => &["expression"],
            Self::InvalidJson => &["lineNumber", "bytePosition", "exceptionType"],
            Self::AnswerMissing => &["question"],
            Self::AnswerTypeMismatch => &["question", "expectedType"],
            Self::AnswerNotAllowed => &["question", "actual"],
            Self::AnswerOutOfRange => &["question", "actual"],
            Self::SpecHintMissingField => &["missingElement"],
            Self::PipelineError => &["phase"],
            _ => &[],
        }
    }
}

/// Every catalog member, used by `parse` and the catalog-closure tests.
pub const ALL_CODES: &[ErrorCode] = &[
    ErrorCode::EmptyBundle,
    ErrorCode::InvalidJson,
    ErrorCode::InvalidEnumValue,
    ErrorCode::InvalidPrimitive,
    ErrorCode::ArrayExpected,
    ErrorCode::ObjectExpected,
    ErrorCode::MandatoryMissing,
    ErrorCode::UnknownElement,
    ErrorCode::TypeMismatch,
    ErrorCode::DeserializationError,
    ErrorCode::ArrayLength,
    ErrorCode::FixedValueMismatch,
    ErrorCode::ValueNotAllowed,
    ErrorCode::PatternMismatch,
    ErrorCode::CodesystemViolation,
    ErrorCode::ReferenceNotFound,
    ErrorCode::RuleConfigurationError,
    ErrorCode::CustomFhirpathConditionFailed,
    ErrorCode::RequiredResourceMissing,
    ErrorCode::AnswerMissing,
    ErrorCode::AnswerTypeMismatch,
    ErrorCode::AnswerNotAllowed,
    ErrorCode::AnswerOutOfRange,
    ErrorCode::LintEmptyElement,
    ErrorCode::LintDisplayOnlyCoding,
    ErrorCode::LintTrailingWhitespace,
    ErrorCode::LintNonPortableId,
    ErrorCode::SpecHintMissingField,
    ErrorCode::SpecHintBindingMismatch,
    ErrorCode::PipelineError,
];

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ErrorCode::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error code '{raw}'")))
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DetailsError {
    #[error("details for {code} are missing required key '{key}'")]
    MissingKey { code: ErrorCodeName, key: String },
    #[error("details value '{key}' is not flat (nested objects are not allowed)")]
    NotFlat { key: String },
    #[error("advisory finding must not carry severity 'error'")]
    AdvisorySeverity,
}

/// Newtype so the error can display the code without borrowing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCodeName(pub ErrorCode);

impl fmt::Display for ErrorCodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Enforce the per-code details schema: required keys present, every value a
/// scalar or an array of scalars.
pub fn validate_details(code: ErrorCode, details: &Map<String, Value>) -> Result<(), DetailsError> {
    for key in code.required_detail_keys() {
        if !details.contains_key(*key) {
            return Err(DetailsError::MissingKey {
                code: ErrorCodeName(code),
                key: (*key).to_string(),
            });
        }
    }
    for (key, value) in details {
        let flat = match value {
            Value::Object(_) => false,
            Value::Array(items) => items.iter().all(|v| !v.is_object() && !v.is_array()),
            _ => true,
        };
        if !flat {
            return Err(DetailsError::NotFlat { key: key.clone() });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_catalog_is_closed_and_parsable() {
        for code in ALL_CODES {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(*code));
        }
        assert_eq!(ErrorCode::parse("NOT_A_CODE"), None);
    }

    #[test]
    fn test_required_keys_enforced() {
        let mut details = Map::new();
        details.insert("actual".into(), json!("malex"));
        let err = validate_details(ErrorCode::InvalidEnumValue, &details).unwrap_err();
        assert!(matches!(err, DetailsError::MissingKey { .. }));

        details.insert("allowed".into(), json!(["male", "female"]));
        details.insert("valueType".into(), json!("enum"));
        assert!(validate_details(ErrorCode::InvalidEnumValue, &details).is_ok());
    }

    #[test]
    fn test_nested_details_rejected() {
        let mut details = Map::new();
        details.insert("missingElement".into(), json!({"nested": true}));
        let err = validate_details(ErrorCode::MandatoryMissing, &details).unwrap_err();
        assert!(matches!(err, DetailsError::NotFlat { .. }));
    }
}
