//! Checks run before a migration starts: filesystem and database
//! prerequisites, and an advisory comparison of the configuration against
//! host resources.

mod environment;
mod prerequisites;

pub use environment::{assess_compatibility, check_environment_compatibility, collect_environment};
pub use prerequisites::{validate_legacy_connection, PrerequisiteChecker};

use crate::config::{timespan, IssueSeverity};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// One named prerequisite check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteCheck {
    pub check_name: String,
    pub description: String,
    pub check_result: bool,
    /// Only critical failures block a migration.
    pub is_critical: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl PrerequisiteCheck {
    pub(crate) fn passed(name: &str, description: impl Into<String>, is_critical: bool) -> Self {
        Self {
            check_name: name.to_string(),
            description: description.into(),
            check_result: true,
            is_critical,
            error_message: None,
            recommendation: None,
        }
    }

    pub(crate) fn failed(
        name: &str,
        description: impl Into<String>,
        is_critical: bool,
        recommendation: impl Into<String>,
    ) -> Self {
        let description = description.into();
        Self {
            check_name: name.to_string(),
            error_message: Some(description.clone()),
            description,
            check_result: false,
            is_critical,
            recommendation: Some(recommendation.into()),
        }
    }

    pub(crate) fn skipped(name: &str, reason: impl Into<String>) -> Self {
        Self::passed(name, reason, false)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteCheckResult {
    /// True iff `failed_checks` is empty.
    pub all_prerequisites_met: bool,
    pub check_start_time: DateTime<Utc>,
    pub check_end_time: DateTime<Utc>,
    #[serde(with = "timespan")]
    pub check_duration: TimeDelta,
    pub passed_checks: Vec<PrerequisiteCheck>,
    pub failed_checks: Vec<PrerequisiteCheck>,
    pub skipped_checks: Vec<PrerequisiteCheck>,
}

impl PrerequisiteCheckResult {
    pub fn critical_failures(&self) -> impl Iterator<Item = &PrerequisiteCheck> {
        self.failed_checks.iter().filter(|c| c.is_critical)
    }

    pub fn has_critical_failures(&self) -> bool {
        self.critical_failures().next().is_some()
    }
}

/// Host facts gathered for compatibility checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub operating_system: String,
    pub os_version: String,
    pub processor_count: usize,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub available_disk_space_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityCheck {
    pub check_name: String,
    pub description: String,
    pub is_compatible: bool,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityIssue {
    pub component: String,
    pub issue: String,
    pub impact: String,
    pub resolution: String,
    pub severity: IssueSeverity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentCompatibilityResult {
    /// True iff `compatibility_issues` is empty.
    pub is_compatible: bool,
    pub check_start_time: DateTime<Utc>,
    pub check_end_time: DateTime<Utc>,
    pub environment_info: EnvironmentInfo,
    pub compatibility_checks: Vec<CompatibilityCheck>,
    pub compatibility_issues: Vec<CompatibilityIssue>,
}

/// Result of probing the legacy database.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyConnectionStatus {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_version: Option<String>,
    #[serde(with = "timespan")]
    pub response_time: TimeDelta,
}
