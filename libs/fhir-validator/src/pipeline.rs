//! Phase orchestration.
//!
//! Sequences the seven phases, accumulates findings, enforces the
//! resilience contract (gate failures terminate; everything else degrades
//! to a `PIPELINE_ERROR` finding), deduplicates against the structural
//! authority, and computes the summary.

use crate::cancel::CancellationToken;
use crate::error::{PhaseError, RequestError};
use crate::gate;
use crate::regex_cache::RegexCache;
use crate::steps::engine::{ProfileEngine, SnapshotEngine};
use crate::steps::rules::{evaluate_structural, evaluate_typed, RuleEnv};
use crate::steps::{advisory, engine, references, structure, terminology, typed};
use crate::{
    ResponseMetadata, ValidationMode, ValidationOutcome, ValidationRequest, ValidationResponse,
};
use lektor_findings::{
    DedupKey, ErrorCode, Finding, FindingSource, Severity, Summary,
};
use lektor_rules::{RuleSet, TerminologyStore};
use lektor_schema::{SchemaIndex, SchemaVersion};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Reusable pipeline. Stateless across requests; the compiled-regex cache is
/// the only shared (write-once) state.
pub struct Pipeline {
    engine: Option<Arc<dyn ProfileEngine>>,
    regexes: RegexCache,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Pipeline with the built-in schema-backed engine.
    pub fn new() -> Self {
        Self {
            engine: None,
            regexes: RegexCache::default(),
        }
    }

    /// Pipeline wrapping a caller-provided validation engine.
    pub fn with_engine(engine: Arc<dyn ProfileEngine>) -> Self {
        Self {
            engine: Some(engine),
            regexes: RegexCache::default(),
        }
    }

    pub fn validate(&self, request: &ValidationRequest) -> Result<ValidationOutcome, RequestError> {
        self.validate_with_cancel(request, &CancellationToken::new())
    }

    pub fn validate_with_cancel(
        &self,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationOutcome, RequestError> {
        let started = Instant::now();

        // Request-schema validation: failures here are the caller's problem,
        // not findings.
        let version = SchemaVersion::parse(&request.fhir_version)
            .ok_or_else(|| RequestError::UnsupportedFhirVersion(request.fhir_version.clone()))?;
        let mode = ValidationMode::parse(request.validation_mode.as_deref())?;
        let settings = request.validation_settings.clone().unwrap_or_default();
        let rule_set = match request.rules_json.as_deref() {
            Some(raw) => RuleSet::from_json(raw)?,
            None => RuleSet::empty(),
        };
        let terminology_store = match request.code_master_json.as_deref() {
            Some(raw) => TerminologyStore::from_json(raw)?,
            None => TerminologyStore::empty(),
        };
        let schema = SchemaIndex::for_version(version)?;

        // Gate: the only terminal phase.
        let tree = match gate::validate_basic(&request.bundle_json) {
            Ok(tree) => tree,
            Err(finding) => {
                return Ok(ValidationOutcome::Completed(Box::new(self.respond(
                    vec![finding],
                    None,
                    version,
                    &rule_set,
                    started,
                ))));
            }
        };

        let mut merger = Merger::default();

        // Phase: structural validation (primary authority).
        if cancel.is_cancelled() {
            return Ok(ValidationOutcome::Cancelled);
        }
        match run_phase("structure", FindingSource::Structure, || {
            structure::validate(&tree, &schema, settings.strict_schema)
        }) {
            PhaseOutcome::Findings(findings) => merger.add_structural(findings),
            PhaseOutcome::Cancelled => return Ok(ValidationOutcome::Cancelled),
        }

        // Phase: typed parse with capture.
        if cancel.is_cancelled() {
            return Ok(ValidationOutcome::Cancelled);
        }
        let capture = match catch_unwind(AssertUnwindSafe(|| typed::run(&tree, &schema))) {
            Ok(Ok(capture)) => capture,
            Ok(Err(e)) => {
                error!(phase = "typed", error = %e, "phase failed");
                merger.add(vec![pipeline_error(FindingSource::Structure, "typed", &e.to_string())]);
                typed::TypedCapture {
                    bundle: None,
                    strict_ok: false,
                    findings: Vec::new(),
                }
            }
            Err(_) => {
                error!(phase = "typed", "phase panicked");
                merger.add(vec![pipeline_error(FindingSource::Structure, "typed", "panic")]);
                typed::TypedCapture {
                    bundle: None,
                    strict_ok: false,
                    findings: Vec::new(),
                }
            }
        };
        merger.add_structural(capture.findings);

        // Phase: engine. Skipped when the typed parse failed entirely.
        if cancel.is_cancelled() {
            return Ok(ValidationOutcome::Cancelled);
        }
        if capture.bundle.is_some() {
            let engine: Arc<dyn ProfileEngine> = self
                .engine
                .clone()
                .unwrap_or_else(|| Arc::new(SnapshotEngine::new(schema.clone())));
            match run_phase("engine", FindingSource::Engine, || {
                engine::run(engine.as_ref(), &tree, &schema)
            }) {
                PhaseOutcome::Findings(findings) => merger.add_engine(findings),
                PhaseOutcome::Cancelled => return Ok(ValidationOutcome::Cancelled),
            }
        } else {
            info!("typed parse failed; engine phase skipped");
        }

        // Phase: project rules — typed fast path or structural fallback.
        if cancel.is_cancelled() {
            return Ok(ValidationOutcome::Cancelled);
        }
        if !rule_set.is_empty() {
            let env = RuleEnv {
                schema: schema.as_ref(),
                regexes: &self.regexes,
                terminology: &terminology_store,
                cancel,
            };
            let outcome = run_phase("rules", FindingSource::Rule, || match &capture.bundle {
                Some(bundle) => evaluate_typed(bundle, &tree, &rule_set, &env),
                None => evaluate_structural(&tree, &rule_set, &env),
            });
            match outcome {
                PhaseOutcome::Findings(findings) => merger.add(findings),
                PhaseOutcome::Cancelled => return Ok(ValidationOutcome::Cancelled),
            }
        }

        // Phase: terminology + references.
        if cancel.is_cancelled() {
            return Ok(ValidationOutcome::Cancelled);
        }
        match run_phase("terminology", FindingSource::Terminology, || {
            terminology::validate(&tree, &terminology_store, &rule_set)
        }) {
            PhaseOutcome::Findings(findings) => merger.add(findings),
            PhaseOutcome::Cancelled => return Ok(ValidationOutcome::Cancelled),
        }
        match run_phase("references", FindingSource::Reference, || {
            references::validate(&tree, settings.reference_resolution)
        }) {
            PhaseOutcome::Findings(findings) => merger.add(findings),
            PhaseOutcome::Cancelled => return Ok(ValidationOutcome::Cancelled),
        }

        // Phase: advisory generators, full mode only.
        let mut suggestions = None;
        if mode == ValidationMode::Full {
            if cancel.is_cancelled() {
                return Ok(ValidationOutcome::Cancelled);
            }
            match run_phase("advisory", FindingSource::Lint, || {
                advisory::generate(&tree, &schema)
            }) {
                PhaseOutcome::Findings(findings) => merger.add(findings),
                PhaseOutcome::Cancelled => return Ok(ValidationOutcome::Cancelled),
            }
            suggestions = Some(advisory::suggest_rules(&tree));
        }

        Ok(ValidationOutcome::Completed(Box::new(self.respond(
            merger.into_findings(),
            suggestions,
            version,
            &rule_set,
            started,
        ))))
    }

    fn respond(
        &self,
        findings: Vec<Finding>,
        suggestions: Option<Vec<crate::RuleSuggestion>>,
        version: SchemaVersion,
        rule_set: &RuleSet,
        started: Instant,
    ) -> ValidationResponse {
        let summary = Summary::tally(&findings);
        ValidationResponse {
            errors: findings,
            summary,
            metadata: ResponseMetadata {
                fhir_version: version.to_string(),
                rules_version: rule_set.version.clone(),
                processing_time_ms: started.elapsed().as_millis() as u64,
            },
            suggestions,
        }
    }
}

enum PhaseOutcome {
    Findings(Vec<Finding>),
    Cancelled,
}

/// Run one phase under the resilience contract: panics and internal errors
/// become a single `PIPELINE_ERROR` finding; only cancellation propagates.
fn run_phase<F>(name: &'static str, source: FindingSource, f: F) -> PhaseOutcome
where
    F: FnOnce() -> Result<Vec<Finding>, PhaseError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(findings)) => PhaseOutcome::Findings(findings),
        Ok(Err(PhaseError::Cancelled)) => PhaseOutcome::Cancelled,
        Ok(Err(e)) => {
            error!(phase = name, error = %e, "phase failed");
            PhaseOutcome::Findings(vec![pipeline_error(source, name, &e.to_string())])
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "phase panicked".to_string());
            error!(phase = name, message, "phase panicked");
            PhaseOutcome::Findings(vec![pipeline_error(source, name, &message)])
        }
    }
}

fn pipeline_error(source: FindingSource, phase: &str, message: &str) -> Finding {
    // Advisory sources cannot carry severity error.
    let severity = if source.is_advisory() {
        Severity::Warning
    } else {
        Severity::Error
    };
    Finding::build(source, severity, ErrorCode::PipelineError)
        .detail("phase", phase)
        .detail("message", message)
        .finish()
        .expect("PIPELINE_ERROR details schema")
}

/// Finding accumulator with structural-authority deduplication: the first
/// STRUCTURE finding per `(errorCode, pointer)` key wins; ENGINE findings
/// with a key already claimed by STRUCTURE are suppressed. No other
/// cross-source deduplication happens, and first-emission order is kept.
#[derive(Default)]
struct Merger {
    findings: Vec<Finding>,
    structural_keys: HashSet<DedupKey>,
}

impl Merger {
    fn add_structural(&mut self, batch: Vec<Finding>) {
        for finding in batch {
            let key = finding.dedup_key();
            if self.structural_keys.contains(&key) {
                continue;
            }
            self.structural_keys.insert(key);
            self.findings.push(finding);
        }
    }

    fn add_engine(&mut self, batch: Vec<Finding>) {
        for finding in batch {
            if self.structural_keys.contains(&finding.dedup_key()) {
                continue;
            }
            self.findings.push(finding);
        }
    }

    fn add(&mut self, batch: Vec<Finding>) {
        self.findings.extend(batch);
    }

    fn into_findings(self) -> Vec<Finding> {
        self.findings
    }
}
