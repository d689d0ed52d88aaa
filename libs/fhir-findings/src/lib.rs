//! Unified finding model for the validation pipeline.
//!
//! Every phase emits its native errors through [`Finding::build`], which
//! enforces the closed [`ErrorCode`] catalog and the per-code details schema
//! at the builder boundary. The orchestrator merges findings using
//! [`DedupKey`] and reports totals via [`Summary`].

mod catalog;
mod finding;
mod summary;

pub use catalog::{validate_details, DetailsError, ErrorCode, ALL_CODES};
pub use finding::{DedupKey, Finding, FindingBuilder, FindingSource, Severity};
pub use summary::{SeverityCounts, Summary};
