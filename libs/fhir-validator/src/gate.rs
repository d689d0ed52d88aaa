//! Parse & sanity gate.
//!
//! The only phase allowed to terminate the pipeline: nothing downstream can
//! work without a well-formed JSON tree and a recognizable document
//! envelope.

use lektor_findings::{ErrorCode, Finding, FindingSource, Severity};
use serde_json::Value;

/// Validate the raw payload. On success the parsed tree is returned; on
/// failure the single terminal finding.
pub fn validate_basic(raw: &str) -> Result<Value, Finding> {
    if raw.trim().is_empty() {
        return Err(empty_bundle());
    }

    let tree: Value = match serde_json::from_str(raw) {
        Ok(tree) => tree,
        Err(e) => return Err(invalid_json(raw, &e)),
    };

    let envelope_ok = tree
        .get("resourceType")
        .and_then(Value::as_str)
        .is_some_and(|rt| !rt.is_empty());
    if !envelope_ok {
        return Err(not_a_document(&tree));
    }

    Ok(tree)
}

fn empty_bundle() -> Finding {
    // Builder cannot fail here: EMPTY_BUNDLE has no required detail keys.
    Finding::build(FindingSource::Structure, Severity::Error, ErrorCode::EmptyBundle)
        .finish()
        .expect("EMPTY_BUNDLE details schema")
}

fn invalid_json(raw: &str, error: &serde_json::Error) -> Finding {
    let byte_position = byte_offset(raw, error.line(), error.column());
    Finding::build(FindingSource::Structure, Severity::Error, ErrorCode::InvalidJson)
        .detail("lineNumber", error.line() as u64)
        .detail("columnNumber", error.column() as u64)
        .detail("bytePosition", byte_position as u64)
        .detail("exceptionType", classify(error))
        .finish()
        .expect("INVALID_JSON details schema")
}

fn not_a_document(tree: &Value) -> Finding {
    let actual = match tree {
        Value::Object(_) => "object without resourceType",
        Value::Array(_) => "array",
        _ => "scalar",
    };
    Finding::build(FindingSource::Structure, Severity::Error, ErrorCode::InvalidJson)
        .detail("lineNumber", 1u64)
        .detail("bytePosition", 0u64)
        .detail("exceptionType", "NotADocument")
        .detail("actualType", actual)
        .finish()
        .expect("INVALID_JSON details schema")
}

fn classify(error: &serde_json::Error) -> &'static str {
    if error.is_eof() {
        "UnexpectedEndOfInput"
    } else if error.is_syntax() {
        "SyntaxError"
    } else if error.is_data() {
        "DataError"
    } else {
        "IoError"
    }
}

/// Byte offset of a 1-based line/column position in the raw payload.
fn byte_offset(raw: &str, line: usize, column: usize) -> usize {
    let mut remaining_lines = line.saturating_sub(1);
    let mut offset = 0;
    for (i, b) in raw.bytes().enumerate() {
        if remaining_lines == 0 {
            return (i + column.saturating_sub(1)).min(raw.len());
        }
        if b == b'\n' {
            remaining_lines -= 1;
            offset = i + 1;
        }
    }
    (offset + column.saturating_sub(1)).min(raw.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_terminal() {
        let finding = validate_basic("   \n ").unwrap_err();
        assert_eq!(finding.error_code, ErrorCode::EmptyBundle);
        assert_eq!(finding.severity, Severity::Error);
    }

    #[test]
    fn test_syntax_error_carries_position() {
        let finding = validate_basic("{\n  \"resourceType\": \"Bundle\",\n  oops\n}").unwrap_err();
        assert_eq!(finding.error_code, ErrorCode::InvalidJson);
        assert_eq!(finding.details["lineNumber"], 3);
        assert_eq!(finding.details["exceptionType"], "SyntaxError");
    }

    #[test]
    fn test_non_document_envelope_rejected() {
        let finding = validate_basic("[1, 2, 3]").unwrap_err();
        assert_eq!(finding.error_code, ErrorCode::InvalidJson);
        assert_eq!(finding.details["exceptionType"], "NotADocument");
    }

    #[test]
    fn test_valid_document_passes() {
        let tree = validate_basic(r#"{"resourceType": "Bundle", "type": "collection"}"#).unwrap();
        assert_eq!(tree["resourceType"], "Bundle");
    }
}
