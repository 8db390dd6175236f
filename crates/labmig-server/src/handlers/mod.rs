//! HTTP request handlers, split by domain.

pub mod config;
pub mod migration;

use axum::{response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Body accepted by endpoints that run against a set of options: explicit
/// options, overrides applied to the startup options, or both.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsRequest {
    #[serde(default)]
    pub options: Option<labmig_core::MigrationOptions>,
    #[serde(default)]
    pub overrides: Option<serde_json::Map<String, serde_json::Value>>,
}

impl OptionsRequest {
    /// Resolve to a concrete option set, starting from `base` when no
    /// options were sent.
    pub fn resolve(
        self,
        base: &labmig_core::MigrationOptions,
    ) -> labmig_core::Result<labmig_core::MigrationOptions> {
        let options = self.options.unwrap_or_else(|| base.clone());
        match &self.overrides {
            Some(overrides) if !overrides.is_empty() => {
                labmig_core::apply_overrides(&options, overrides)
            }
            _ => Ok(options),
        }
    }
}
