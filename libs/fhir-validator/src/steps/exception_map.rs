//! Versioned mapping from parse error messages to structured findings.
//!
//! Two message families are recognized: the serde shapes produced by the
//! strict pass (`unknown variant`, `unknown field`, `missing field`,
//! `invalid type`) and the classic library shapes
//! (`Literal 'X' is not a valid value for enumeration 'T'`, …) kept for
//! compatibility with captured upstream messages. Anything unmatched maps to
//! the generic deserialization code and is logged at info so new library
//! versions surface quickly.

use lektor_findings::ErrorCode;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::info;

/// Outcome of mapping one message.
#[derive(Debug)]
pub struct MappedException {
    pub code: ErrorCode,
    pub details: Map<String, Value>,
    /// Field name usable for a best-effort pointer search when the message
    /// carries no location clause.
    pub field_hint: Option<String>,
}

macro_rules! re {
    ($name:ident, $pattern:literal) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).unwrap())
        }
    };
}

// serde family
re!(serde_unknown_variant, r"unknown variant `([^`]*)`, expected (.+)");
re!(serde_unknown_field, r"unknown field `([^`]*)`");
re!(serde_missing_field, r"missing field `([^`]*)`");
re!(serde_invalid_type, r"invalid type: ([^,]+), expected (.+)");

// legacy library family
re!(legacy_enum, r"Literal '([^']*)' is not a valid value for enumeration '([^']*)'");
re!(legacy_unknown_element, r"Encountered unknown element '([^']*)'");
re!(legacy_convert, r"Cannot convert .* to type '([^']*)'");
re!(legacy_mandatory, r"Mandatory element '([^']*)' is missing");
re!(legacy_literal, r"Literal '([^']*)' cannot be parsed as ([A-Za-z]+)");
re!(legacy_array, r"Expected array but received ([A-Za-z]+)");

fn backticked_list(raw: &str) -> Vec<Value> {
    let re = {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"`([^`]*)`").unwrap())
    };
    re.captures_iter(raw)
        .map(|c| Value::from(c[1].to_string()))
        .collect()
}

/// Map one captured message. Always succeeds; unmatched messages fall back
/// to `DESERIALIZATION_ERROR`.
pub fn map_message(message: &str) -> MappedException {
    let mut details = Map::new();

    if let Some(caps) = serde_unknown_variant().captures(message) {
        details.insert("actual".into(), Value::from(caps[1].to_string()));
        details.insert("allowed".into(), Value::from(backticked_list(&caps[2])));
        details.insert("valueType".into(), Value::from("enum"));
        return MappedException {
            code: ErrorCode::InvalidEnumValue,
            details,
            field_hint: None,
        };
    }

    if let Some(caps) = legacy_enum().captures(message) {
        details.insert("actual".into(), Value::from(caps[1].to_string()));
        details.insert("allowed".into(), Value::from(Vec::<Value>::new()));
        details.insert("valueType".into(), Value::from("enum"));
        details.insert("enumeration".into(), Value::from(caps[2].to_string()));
        return MappedException {
            code: ErrorCode::InvalidEnumValue,
            details,
            field_hint: None,
        };
    }

    if let Some(caps) = serde_unknown_field()
        .captures(message)
        .or_else(|| legacy_unknown_element().captures(message))
    {
        let field = caps[1].to_string();
        details.insert("unknownElement".into(), Value::from(field.clone()));
        return MappedException {
            code: ErrorCode::UnknownElement,
            details,
            field_hint: Some(field),
        };
    }

    if let Some(caps) = serde_missing_field()
        .captures(message)
        .or_else(|| legacy_mandatory().captures(message))
    {
        details.insert("missingElement".into(), Value::from(caps[1].to_string()));
        return MappedException {
            code: ErrorCode::MandatoryMissing,
            details,
            field_hint: None,
        };
    }

    if let Some(caps) = legacy_literal().captures(message) {
        details.insert("actual".into(), Value::from(caps[1].to_string()));
        details.insert("expectedType".into(), Value::from(caps[2].to_string()));
        details.insert("reason".into(), Value::from("literal does not match the type format"));
        return MappedException {
            code: ErrorCode::InvalidPrimitive,
            details,
            field_hint: None,
        };
    }

    if let Some(caps) = legacy_array().captures(message) {
        details.insert("expectedType".into(), Value::from("array"));
        details.insert("actualType".into(), Value::from(caps[1].to_string()));
        return MappedException {
            code: ErrorCode::ArrayExpected,
            details,
            field_hint: None,
        };
    }

    if let Some(caps) = serde_invalid_type().captures(message) {
        let expected = caps[2].trim();
        if expected.contains("sequence") {
            details.insert("expectedType".into(), Value::from("array"));
            details.insert("actualType".into(), Value::from(caps[1].trim().to_string()));
            return MappedException {
                code: ErrorCode::ArrayExpected,
                details,
                field_hint: None,
            };
        }
        details.insert("actual".into(), Value::from(caps[1].trim().to_string()));
        details.insert("expected".into(), Value::from(expected.to_string()));
        return MappedException {
            code: ErrorCode::TypeMismatch,
            details,
            field_hint: None,
        };
    }

    if let Some(caps) = legacy_convert().captures(message) {
        details.insert("expected".into(), Value::from(caps[1].to_string()));
        return MappedException {
            code: ErrorCode::TypeMismatch,
            details,
            field_hint: None,
        };
    }

    info!(message, "unmatched parse exception pattern");
    details.insert("message".into(), Value::from(message.to_string()));
    MappedException {
        code: ErrorCode::DeserializationError,
        details,
        field_hint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_unknown_variant() {
        let mapped = map_message(
            "unknown variant `malex`, expected one of `male`, `female`, `other`, `unknown`",
        );
        assert_eq!(mapped.code, ErrorCode::InvalidEnumValue);
        assert_eq!(mapped.details["actual"], "malex");
        assert_eq!(
            mapped.details["allowed"],
            serde_json::json!(["male", "female", "other", "unknown"])
        );
    }

    #[test]
    fn test_serde_unknown_field_gives_hint() {
        let mapped =
            map_message("unknown field `favouriteColour`, expected one of `id`, `gender`");
        assert_eq!(mapped.code, ErrorCode::UnknownElement);
        assert_eq!(mapped.field_hint.as_deref(), Some("favouriteColour"));
    }

    #[test]
    fn test_missing_field() {
        let mapped = map_message("missing field `linkId`");
        assert_eq!(mapped.code, ErrorCode::MandatoryMissing);
        assert_eq!(mapped.details["missingElement"], "linkId");
    }

    #[test]
    fn test_literal_primitive() {
        let mapped = map_message("Literal '1960-05-15x' cannot be parsed as date");
        assert_eq!(mapped.code, ErrorCode::InvalidPrimitive);
        assert_eq!(mapped.details["expectedType"], "date");
    }

    #[test]
    fn test_legacy_enumeration() {
        let mapped = map_message(
            "Literal 'maybe' is not a valid value for enumeration 'AdministrativeGender' \
             (at Bundle.entry[0].resource[0].gender[0])",
        );
        assert_eq!(mapped.code, ErrorCode::InvalidEnumValue);
        assert_eq!(mapped.details["enumeration"], "AdministrativeGender");
    }

    #[test]
    fn test_invalid_type_sequence() {
        let mapped = map_message("invalid type: string \"a\", expected a sequence");
        assert_eq!(mapped.code, ErrorCode::ArrayExpected);
        assert_eq!(mapped.details["actualType"], "string \"a\"");
    }

    #[test]
    fn test_fallback_is_generic() {
        let mapped = map_message("the platform exploded");
        assert_eq!(mapped.code, ErrorCode::DeserializationError);
        assert_eq!(mapped.details["message"], "the platform exploded");
    }
}
