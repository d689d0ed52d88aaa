//! Validate a FHIR document from the shell.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use lektor_findings::Severity;
use lektor_validator::{
    Pipeline, ReferencePolicy, ValidationOutcome, ValidationRequest, ValidationSettings,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "lektor",
    about = "Validate a FHIR bundle against the schema and project rules",
    version
)]
struct Cli {
    /// Path to the bundle JSON document.
    bundle: PathBuf,

    /// Path to a project rule-set JSON document.
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Path to a project code-master JSON document.
    #[arg(long)]
    codes: Option<PathBuf>,

    /// FHIR version to validate against.
    #[arg(long, default_value = "4.0.1")]
    fhir_version: String,

    /// Validation mode.
    #[arg(long, value_enum, default_value_t = Mode::Standard)]
    mode: Mode,

    /// Report unknown elements as errors.
    #[arg(long)]
    strict_schema: bool,

    /// Handling of references pointing outside the document.
    #[arg(long, value_enum, default_value_t = RefPolicy::Skip)]
    external_references: RefPolicy,

    /// Emit the raw JSON response instead of the finding table.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Standard,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RefPolicy {
    Skip,
    Warn,
    Error,
}

impl From<RefPolicy> for ReferencePolicy {
    fn from(policy: RefPolicy) -> Self {
        match policy {
            RefPolicy::Skip => ReferencePolicy::Skip,
            RefPolicy::Warn => ReferencePolicy::Warn,
            RefPolicy::Error => ReferencePolicy::Error,
        }
    }
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let bundle_json = std::fs::read_to_string(&cli.bundle)
        .with_context(|| format!("cannot read bundle {}", cli.bundle.display()))?;
    let rules_json = cli
        .rules
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("cannot read rules {}", path.display()))
        })
        .transpose()?;
    let code_master_json = cli
        .codes
        .as_ref()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("cannot read code master {}", path.display()))
        })
        .transpose()?;

    let request = ValidationRequest {
        bundle_json,
        rules_json,
        code_master_json,
        fhir_version: cli.fhir_version.clone(),
        validation_settings: Some(ValidationSettings {
            reference_resolution: cli.external_references.into(),
            strict_schema: cli.strict_schema,
        }),
        validation_mode: Some(
            match cli.mode {
                Mode::Standard => "standard",
                Mode::Full => "full",
            }
            .to_string(),
        ),
        project_id: None,
    };

    let outcome = Pipeline::new()
        .validate(&request)
        .context("request rejected")?;

    let response = match outcome {
        ValidationOutcome::Completed(response) => *response,
        ValidationOutcome::Cancelled => anyhow::bail!("validation was cancelled"),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        for finding in &response.errors {
            let location = finding
                .pointer
                .as_ref()
                .map(|p| p.to_string())
                .or_else(|| finding.path.clone())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{severity:<7} {source:<11} {code:<28} {location}",
                severity = severity_label(finding.severity),
                source = finding.source.as_str(),
                code = finding.error_code.as_str(),
            );
        }
        println!(
            "{} findings ({} errors, {} warnings, {} info) in {} ms",
            response.summary.total_errors,
            response.summary.error_count,
            response.summary.warning_count,
            response.summary.info_count,
            response.metadata.processing_time_ms
        );
        if let Some(suggestions) = &response.suggestions {
            for suggestion in suggestions {
                println!(
                    "suggestion: {} rule on {} ({})",
                    suggestion.kind, suggestion.path, suggestion.rationale
                );
            }
        }
    }

    Ok(if response.summary.error_count > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_minimal_invocation() {
        let cli = Cli::try_parse_from(["lektor", "bundle.json"]).unwrap();
        assert_eq!(cli.bundle, PathBuf::from("bundle.json"));
        assert_eq!(cli.mode, Mode::Standard);
        assert!(!cli.strict_schema);
    }

    #[test]
    fn test_cli_parses_full_invocation() {
        let cli = Cli::try_parse_from([
            "lektor",
            "bundle.json",
            "--rules",
            "rules.json",
            "--mode",
            "full",
            "--external-references",
            "error",
            "--strict-schema",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.mode, Mode::Full);
        assert_eq!(cli.external_references, RefPolicy::Error);
        assert!(cli.json);
    }
}
