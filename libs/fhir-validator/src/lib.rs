//! Seven-phase validation pipeline for FHIR documents.
//!
//! # Architecture
//!
//! One request flows through a fixed phase sequence:
//!
//! ```text
//! raw bytes → gate → structure → typed capture → engine → rules
//!           → terminology + references → advisory → dedupe → response
//! ```
//!
//! - The **gate** is the only terminal phase; everything after it degrades
//!   to findings instead of failing the request.
//! - The **structural validator** is the primary authority for schema-level
//!   errors; engine findings that re-detect the same `(code, pointer)` key
//!   are suppressed.
//! - The **rule evaluator** runs project rules on a typed fast path, or on
//!   a structural fallback over the raw tree when typing failed.
//!
//! The pipeline is stateless across requests and safe to share behind an
//! `Arc`; schema indexes, terminology stores and the compiled-regex cache
//! are read-only in the hot path.

mod cancel;
mod error;
mod gate;
mod pipeline;
mod regex_cache;
mod steps;

pub use cancel::CancellationToken;
pub use error::{PhaseError, RequestError};
pub use gate::validate_basic;
pub use pipeline::Pipeline;
pub use regex_cache::RegexCache;
pub use steps::engine::{
    EngineError, EngineIssue, EngineSeverity, ProfileEngine, SnapshotEngine,
};
pub use steps::typed::TypedCapture;

use lektor_findings::{Finding, Summary};
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// How much of the advisory machinery a request wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    #[default]
    Standard,
    Full,
}

impl ValidationMode {
    /// Parse the request field, accepting the legacy aliases `fast` and
    /// `debug`.
    pub fn parse(raw: Option<&str>) -> Result<Self, RequestError> {
        match raw {
            None => Ok(Self::Standard),
            Some("standard") | Some("fast") => Ok(Self::Standard),
            Some("full") | Some("debug") => Ok(Self::Full),
            Some(other) => Err(RequestError::UnknownValidationMode(other.to_string())),
        }
    }
}

/// Handling of references pointing outside the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
    #[default]
    Skip,
    Warn,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSettings {
    #[serde(default)]
    pub reference_resolution: ReferencePolicy,
    /// Report unknown elements as errors during the structural walk.
    #[serde(default)]
    pub strict_schema: bool,
}

/// One validation request, as submitted over the API or assembled by the
/// CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub bundle_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_master_json: Option<String>,
    /// Defaults to the service-configured version when omitted.
    #[serde(default)]
    pub fhir_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_settings: Option<ValidationSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub fhir_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_version: Option<String>,
    pub processing_time_ms: u64,
}

/// A system-proposed rule derived from observed data patterns (full mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSuggestion {
    pub kind: String,
    pub resource_type: String,
    pub path: String,
    pub params: Map<String, serde_json::Value>,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub errors: Vec<Finding>,
    pub summary: Summary,
    pub metadata: ResponseMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<RuleSuggestion>>,
}

/// Terminal state of one request.
#[derive(Debug)]
pub enum ValidationOutcome {
    Completed(Box<ValidationResponse>),
    /// The cancellation token fired; no partial results are returned.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_aliases() {
        assert_eq!(ValidationMode::parse(None).unwrap(), ValidationMode::Standard);
        assert_eq!(
            ValidationMode::parse(Some("fast")).unwrap(),
            ValidationMode::Standard
        );
        assert_eq!(
            ValidationMode::parse(Some("debug")).unwrap(),
            ValidationMode::Full
        );
        assert!(ValidationMode::parse(Some("turbo")).is_err());
    }
}
