//! Configuration endpoints under `/api/migration/config`.

use super::OptionsRequest;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use axum::{extract::State, Json};
use labmig_core::config::{available_overrides, validate_overrides};
use labmig_core::{
    check_environment_compatibility, ConfigValidationResult, ConfigurationValidator,
    EnvironmentCompatibilityResult, MigrationError, MigrationOptions, PrerequisiteCheckResult,
    PrerequisiteChecker,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    #[serde(default)]
    pub base: Option<MigrationOptions>,
    pub overrides: Map<String, Value>,
}

pub async fn default_options(State(state): State<Arc<AppState>>) -> Json<MigrationOptions> {
    Json(state.config.default_options().await)
}

pub async fn validate(Json(options): Json<MigrationOptions>) -> Json<ConfigValidationResult> {
    Json(ConfigurationValidator::new().validate_configuration(&options))
}

pub async fn available() -> Json<BTreeMap<String, String>> {
    Json(available_overrides())
}

/// Apply overrides to `base` (or the startup options) and return the result.
pub async fn apply(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OverrideRequest>,
) -> ApiResult<Json<MigrationOptions>> {
    let check = validate_overrides(&request.overrides);
    if !check.is_valid {
        let problems: Vec<String> = check
            .invalid_values
            .iter()
            .map(|(path, message)| format!("{}: {}", path, message))
            .collect();
        return Err(ApiError(MigrationError::Validation {
            field: "overrides".into(),
            message: problems.join("; "),
        }));
    }
    let base = request.base.unwrap_or_else(|| state.base_options.clone());
    Ok(Json(labmig_core::apply_overrides(&base, &request.overrides)?))
}

pub async fn prerequisites(
    State(state): State<Arc<AppState>>,
    request: Option<Json<OptionsRequest>>,
) -> ApiResult<Json<PrerequisiteCheckResult>> {
    let options = request
        .map(|Json(r)| r)
        .unwrap_or_default()
        .resolve(&state.base_options)?;
    let checker = PrerequisiteChecker::new(state.service.database().clone());
    Ok(Json(checker.check_prerequisites(&options).await))
}

pub async fn compatibility(
    State(state): State<Arc<AppState>>,
    request: Option<Json<OptionsRequest>>,
) -> ApiResult<Json<EnvironmentCompatibilityResult>> {
    let options = request
        .map(|Json(r)| r)
        .unwrap_or_default()
        .resolve(&state.base_options)?;
    Ok(Json(check_environment_compatibility(&options).await))
}
