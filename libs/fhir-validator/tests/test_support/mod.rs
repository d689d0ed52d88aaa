//! Shared fixtures and helpers for the pipeline scenario tests.

use lektor_findings::{ErrorCode, Finding, FindingSource};
use lektor_validator::{
    Pipeline, ValidationOutcome, ValidationRequest, ValidationResponse, ValidationSettings,
};
use serde_json::Value;

pub fn request(bundle: &Value) -> ValidationRequest {
    ValidationRequest {
        bundle_json: bundle.to_string(),
        rules_json: None,
        code_master_json: None,
        fhir_version: "4.0.1".to_string(),
        validation_settings: None,
        validation_mode: None,
        project_id: None,
    }
}

pub fn with_rules(mut request: ValidationRequest, rules: &Value) -> ValidationRequest {
    request.rules_json = Some(serde_json::json!({ "rules": rules }).to_string());
    request
}

pub fn with_mode(mut request: ValidationRequest, mode: &str) -> ValidationRequest {
    request.validation_mode = Some(mode.to_string());
    request
}

pub fn with_settings(
    mut request: ValidationRequest,
    settings: ValidationSettings,
) -> ValidationRequest {
    request.validation_settings = Some(settings);
    request
}

pub fn run(request: &ValidationRequest) -> ValidationResponse {
    match Pipeline::new().validate(request).expect("request is well-formed") {
        ValidationOutcome::Completed(response) => *response,
        ValidationOutcome::Cancelled => panic!("unexpected cancellation"),
    }
}

pub fn of_code<'a>(response: &'a ValidationResponse, code: ErrorCode) -> Vec<&'a Finding> {
    response
        .errors
        .iter()
        .filter(|f| f.error_code == code)
        .collect()
}

pub fn of_source<'a>(response: &'a ValidationResponse, source: FindingSource) -> Vec<&'a Finding> {
    response.errors.iter().filter(|f| f.source == source).collect()
}

pub fn pointer_of(finding: &Finding) -> String {
    finding
        .pointer
        .as_ref()
        .map(|p| p.to_string())
        .unwrap_or_default()
}

/// A Patient with a bad gender code and a malformed birth date.
pub fn bad_patient_bundle() -> Value {
    serde_json::json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{
            "resource": {
                "resourceType": "Patient",
                "id": "p1",
                "gender": "malex",
                "birthDate": "1960-05-15x"
            }
        }]
    })
}
