//! FHIR primitive datatypes and their JSON-level format rules.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// The FHIR primitive datatypes the structural validator checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Integer,
    UnsignedInt,
    PositiveInt,
    Decimal,
    String,
    Code,
    Id,
    Uri,
    Url,
    Canonical,
    Oid,
    Uuid,
    Markdown,
    Base64Binary,
    Xhtml,
    Date,
    DateTime,
    Instant,
    Time,
}

// Format patterns from the FHIR R4 datatypes page, anchored.
fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2]\d|3[0-1]))?)?$").unwrap()
    })
}

fn date_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\d{4}(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2]\d|3[0-1])(T([01]\d|2[0-3]):[0-5]\d:([0-5]\d|60)(\.\d+)?(Z|[+-]((0\d|1[0-3]):[0-5]\d|14:00))?)?)?)?$",
        )
        .unwrap()
    })
}

fn instant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[1-2]\d|3[0-1])T([01]\d|2[0-3]):[0-5]\d:([0-5]\d|60)(\.\d+)?(Z|[+-]((0\d|1[0-3]):[0-5]\d|14:00))$",
        )
        .unwrap()
    })
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):[0-5]\d:([0-5]\d|60)(\.\d+)?$").unwrap())
}

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").unwrap())
}

impl PrimitiveType {
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "boolean" => Self::Boolean,
            "integer" => Self::Integer,
            "unsignedInt" => Self::UnsignedInt,
            "positiveInt" => Self::PositiveInt,
            "decimal" => Self::Decimal,
            "string" => Self::String,
            "code" => Self::Code,
            "id" => Self::Id,
            "uri" => Self::Uri,
            "url" => Self::Url,
            "canonical" => Self::Canonical,
            "oid" => Self::Oid,
            "uuid" => Self::Uuid,
            "markdown" => Self::Markdown,
            "base64Binary" => Self::Base64Binary,
            "xhtml" => Self::Xhtml,
            "date" => Self::Date,
            "dateTime" => Self::DateTime,
            "instant" => Self::Instant,
            "time" => Self::Time,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::UnsignedInt => "unsignedInt",
            Self::PositiveInt => "positiveInt",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Code => "code",
            Self::Id => "id",
            Self::Uri => "uri",
            Self::Url => "url",
            Self::Canonical => "canonical",
            Self::Oid => "oid",
            Self::Uuid => "uuid",
            Self::Markdown => "markdown",
            Self::Base64Binary => "base64Binary",
            Self::Xhtml => "xhtml",
            Self::Date => "date",
            Self::DateTime => "dateTime",
            Self::Instant => "instant",
            Self::Time => "time",
        }
    }

    /// Validate a leaf JSON value against this primitive's format.
    ///
    /// Returns the violation reason on failure.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            Self::Boolean => value
                .is_boolean()
                .then_some(())
                .ok_or_else(|| "not a JSON boolean".to_string()),
            Self::Integer => match value.as_i64() {
                Some(_) => Ok(()),
                None => Err("not a JSON integer".to_string()),
            },
            Self::UnsignedInt => match value.as_u64() {
                Some(_) => Ok(()),
                None => Err("not a non-negative JSON integer".to_string()),
            },
            Self::PositiveInt => match value.as_u64() {
                Some(n) if n >= 1 => Ok(()),
                Some(_) => Err("must be >= 1".to_string()),
                None => Err("not a positive JSON integer".to_string()),
            },
            Self::Decimal => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err("not a JSON number".to_string())
                }
            }
            Self::Date => Self::check_string(value, date_re(), "does not match the date format"),
            Self::DateTime => {
                Self::check_string(value, date_time_re(), "does not match the dateTime format")
            }
            Self::Instant => {
                Self::check_string(value, instant_re(), "does not match the instant format")
            }
            Self::Time => Self::check_string(value, time_re(), "does not match the time format"),
            Self::Id => Self::check_string(value, id_re(), "does not match the id format"),
            // The remaining string kinds only require a JSON string here;
            // deeper lexical rules stay with the terminology/reference steps.
            Self::String
            | Self::Code
            | Self::Uri
            | Self::Url
            | Self::Canonical
            | Self::Oid
            | Self::Uuid
            | Self::Markdown
            | Self::Base64Binary
            | Self::Xhtml => value
                .is_string()
                .then_some(())
                .ok_or_else(|| "not a JSON string".to_string()),
        }
    }

    fn check_string(value: &Value, re: &Regex, reason: &str) -> Result<(), String> {
        let Some(s) = value.as_str() else {
            return Err("not a JSON string".to_string());
        };
        if re.is_match(s) {
            Ok(())
        } else {
            Err(reason.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_date_formats() {
        let date = PrimitiveType::Date;
        assert!(date.validate(&json!("1960-05-15")).is_ok());
        assert!(date.validate(&json!("1960-05")).is_ok());
        assert!(date.validate(&json!("1960")).is_ok());
        assert!(date.validate(&json!("1960-05-15x")).is_err());
        assert!(date.validate(&json!("1960-13-01")).is_err());
        assert!(date.validate(&json!(1960)).is_err());
    }

    #[test]
    fn test_date_time_and_instant() {
        let dt = PrimitiveType::DateTime;
        assert!(dt.validate(&json!("2015-02-07T13:28:17+02:00")).is_ok());
        assert!(dt.validate(&json!("2015-02-07")).is_ok());
        assert!(dt.validate(&json!("2015-02-07T25:00:00Z")).is_err());

        let instant = PrimitiveType::Instant;
        assert!(instant.validate(&json!("2015-02-07T13:28:17.239Z")).is_ok());
        // instant requires full precision and timezone
        assert!(instant.validate(&json!("2015-02-07")).is_err());
    }

    #[test]
    fn test_numeric_kinds() {
        assert!(PrimitiveType::Integer.validate(&json!(3)).is_ok());
        assert!(PrimitiveType::Integer.validate(&json!("3")).is_err());
        assert!(PrimitiveType::PositiveInt.validate(&json!(0)).is_err());
        assert!(PrimitiveType::UnsignedInt.validate(&json!(-1)).is_err());
        assert!(PrimitiveType::Decimal.validate(&json!(1.5)).is_ok());
    }

    #[test]
    fn test_from_code_roundtrip() {
        for code in ["boolean", "date", "dateTime", "instant", "positiveInt"] {
            assert_eq!(PrimitiveType::from_code(code).unwrap().as_str(), code);
        }
        assert!(PrimitiveType::from_code("HumanName").is_none());
    }
}
