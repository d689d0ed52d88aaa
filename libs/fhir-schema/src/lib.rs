//! Versioned schema metadata for the validation pipeline.
//!
//! The index answers the questions the structural validator and the rule
//! evaluator ask of the FHIR element definitions: which values a bound coded
//! element admits (and how strongly), what the cardinality of an element is,
//! whether it repeats, which top-level fields a resource requires, and which
//! primitive format a leaf must satisfy.
//!
//! Definitions are embedded at compile time (`schema/r4.json`) and expanded
//! into a flat per-resource element table on first use; see [`SchemaIndex`].

mod index;
mod primitives;

pub use index::{
    Binding, BindingStrength, Cardinality, ElementInfo, SchemaIndex, DEFAULT_EXPANSION_DEPTH,
};
pub use primitives::PrimitiveType;

use serde::{Deserialize, Serialize};

/// FHIR release the index was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaVersion {
    R4,
    R4B,
    R5,
}

impl SchemaVersion {
    /// Accepts release names (`R4`) and version literals (`4.0.1`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "R4" | "r4" | "4.0" | "4.0.0" | "4.0.1" => Some(Self::R4),
            "R4B" | "r4b" | "4.3" | "4.3.0" => Some(Self::R4B),
            "R5" | "r5" | "5.0" | "5.0.0" => Some(Self::R5),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::R4 => "4.0.1",
            Self::R4B => "4.3.0",
            Self::R5 => "5.0.0",
        }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("schema definition table is not valid JSON: {0}")]
    InvalidDefinitions(String),
    #[error("unknown binding strength '{strength}' on element '{path}'")]
    UnknownBindingStrength { path: String, strength: String },
    #[error("unsupported FHIR version '{0}'")]
    UnsupportedVersion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!(SchemaVersion::parse("4.0.1"), Some(SchemaVersion::R4));
        assert_eq!(SchemaVersion::parse("R4B"), Some(SchemaVersion::R4B));
        assert_eq!(SchemaVersion::parse("5.0"), Some(SchemaVersion::R5));
        assert_eq!(SchemaVersion::parse("3.0.2"), None);
    }
}
