//! Error types of the pipeline crate.

use lektor_findings::DetailsError;

/// Failure inside one phase. The orchestrator converts these into a single
/// `PIPELINE_ERROR` finding and keeps going; only `Cancelled` stops the run.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("finding construction failed: {0}")]
    Details(#[from] DetailsError),
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Internal(String),
}

/// Violations of the request schema itself. These are the only failures
/// surfaced to the caller as errors rather than findings.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("unsupported FHIR version '{0}'")]
    UnsupportedFhirVersion(String),
    #[error("unknown validation mode '{0}'")]
    UnknownValidationMode(String),
    #[error(transparent)]
    RuleSet(#[from] lektor_rules::RuleSetError),
    #[error(transparent)]
    Terminology(#[from] lektor_rules::TerminologyError),
    #[error("schema index unavailable: {0}")]
    Schema(#[from] lektor_schema::SchemaError),
}
