//! Request handlers.

use crate::error::{ApiError, Result};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lektor_validator::{ValidationOutcome, ValidationRequest};
use serde_json::{Map, Value};

pub async fn health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// Validate a document. Stored project rules and terminology fill in for
/// fields the request leaves empty.
pub async fn validate(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(mut request): Json<ValidationRequest>,
) -> Result<Response> {
    if !state.projects.project_exists(&project_id) && stored_state_needed(&request) {
        return Err(ApiError::UnknownProject(project_id));
    }

    if request.rules_json.is_none() {
        request.rules_json = state.projects.rule_set(&project_id)?;
    }
    if request.code_master_json.is_none() {
        request.code_master_json = state.projects.code_master(&project_id)?;
    }
    if request.fhir_version.is_empty() {
        request.fhir_version = state.config.fhir.default_version.clone();
    }
    request.project_id.get_or_insert(project_id);

    let request_id = uuid::Uuid::new_v4();
    tracing::info!(
        %request_id,
        project = request.project_id.as_deref().unwrap_or("-"),
        mode = request.validation_mode.as_deref().unwrap_or("standard"),
        "validation request"
    );

    // The pipeline is CPU-bound; keep the async executor responsive.
    let pipeline = state.pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || pipeline.validate(&request))
        .await
        .map_err(|e| ApiError::Internal(format!("validation task failed: {e}")))??;

    match outcome {
        ValidationOutcome::Completed(response) => {
            Ok((StatusCode::OK, Json(*response)).into_response())
        }
        ValidationOutcome::Cancelled => Err(ApiError::Cancelled),
    }
}

/// The request needs the project store only when it did not inline its own
/// rules and terminology.
fn stored_state_needed(request: &ValidationRequest) -> bool {
    request.rules_json.is_none() || request.code_master_json.is_none()
}

pub async fn get_rule_set(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Response> {
    let Some(raw) = state.projects.rule_set(&project_id)? else {
        return Err(ApiError::UnknownProject(project_id));
    };
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| ApiError::BadRequest(format!("stored rule set is corrupt: {e}")))?;
    Ok((StatusCode::OK, Json(value)).into_response())
}

pub async fn put_rule_set(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response> {
    // Reject documents the evaluator could not load later.
    lektor_rules::RuleSet::from_json(&body.to_string())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.projects.save_rule_set(&project_id, &body.to_string())?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn put_code_system(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response> {
    let Some(url) = body.get("url").and_then(Value::as_str) else {
        return Err(ApiError::BadRequest(
            "code system document requires a 'url'".to_string(),
        ));
    };
    state
        .projects
        .save_code_system(&project_id, url, &body)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn put_constraints(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response> {
    if !body.is_array() {
        return Err(ApiError::BadRequest(
            "constraints document must be an array".to_string(),
        ));
    }
    state.projects.save_constraints(&project_id, &body)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_feature_flags(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Response> {
    let flags = state.projects.feature_flags(&project_id)?;
    Ok((StatusCode::OK, Json(flags)).into_response())
}

/// PATCH-merge feature flags: present keys update, absent keys persist.
pub async fn patch_feature_flags(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Response> {
    if body.values().any(|v| !v.is_boolean()) {
        return Err(ApiError::BadRequest(
            "feature flags are boolean".to_string(),
        ));
    }
    let flags = state.projects.update_feature_flags(&project_id, &body)?;
    Ok((StatusCode::OK, Json(flags)).into_response())
}
