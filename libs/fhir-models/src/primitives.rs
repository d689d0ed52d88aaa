//! Validating newtypes for temporal primitives.
//!
//! Strict deserialization rejects malformed literals with a stable message
//! shape (`Literal '…' cannot be parsed as date`) that the typed-capture
//! phase pattern-matches into structured findings.

use lektor_schema::PrimitiveType;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

macro_rules! temporal_newtype {
    ($name:ident, $primitive:expr, $label:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn parse(raw: &str) -> Result<Self, String> {
                $primitive
                    .validate(&Value::String(raw.to_string()))
                    .map(|()| Self(raw.to_string()))
                    .map_err(|_| format!("Literal '{raw}' cannot be parsed as {}", $label))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

temporal_newtype!(Date, PrimitiveType::Date, "date");
temporal_newtype!(DateTime, PrimitiveType::DateTime, "dateTime");
temporal_newtype!(Instant, PrimitiveType::Instant, "instant");
temporal_newtype!(Time, PrimitiveType::Time, "time");
