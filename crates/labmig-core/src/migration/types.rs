//! Migration lifecycle types and the summaries handed to callers.

use super::auth::AuthRemovalSummary;
use super::legacy::LegacyValidationResult;
use crate::config::{timespan, ServiceConfig};
use crate::error::MigrationError;
use crate::schema::TableCreationResult;
use crate::seeding::SeedingResult;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    CompletedWithErrors,
    Cancelled,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::NotStarted => "NotStarted",
            MigrationStatus::InProgress => "InProgress",
            MigrationStatus::Paused => "Paused",
            MigrationStatus::Completed => "Completed",
            MigrationStatus::CompletedWithErrors => "CompletedWithErrors",
            MigrationStatus::Cancelled => "Cancelled",
            MigrationStatus::Failed => "Failed",
        }
    }

    /// No further changes happen once a run reaches one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed
                | MigrationStatus::CompletedWithErrors
                | MigrationStatus::Cancelled
                | MigrationStatus::Failed
        )
    }

    /// Holds the single-flight slot.
    pub fn is_active(&self) -> bool {
        matches!(self, MigrationStatus::InProgress | MigrationStatus::Paused)
    }

    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::CompletedWithErrors
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a recorded migration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IssueLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for IssueLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueLevel::Info => "Info",
            IssueLevel::Warning => "Warning",
            IssueLevel::Error => "Error",
            IssueLevel::Critical => "Critical",
        };
        f.write_str(name)
    }
}

/// Something worth reporting that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationIssue {
    pub timestamp: DateTime<Utc>,
    pub level: IssueLevel,
    /// Pipeline stage that raised the issue, e.g. "Seeding".
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_number: Option<u64>,
}

impl MigrationIssue {
    pub fn new(level: IssueLevel, component: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.to_string(),
            message: message.into(),
            details: None,
            table_name: None,
            record_number: None,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = Some(table.into());
        self
    }

    pub fn with_record(mut self, record_number: Option<u64>) -> Self {
        self.record_number = record_number;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level >= IssueLevel::Error
    }
}

/// Live counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatistics {
    pub total_tables: u64,
    pub tables_processed: u64,
    pub total_records: u64,
    pub records_processed: u64,
    pub records_inserted: u64,
    pub records_skipped: u64,
    pub error_count: u64,
    /// Never decreases while the run is live.
    pub progress_percentage: f64,
}

/// Wall-clock timing of one pipeline phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTiming {
    pub name: String,
    pub started: DateTime<Utc>,
    /// `None` while the phase is still running.
    #[serde(with = "timespan::option")]
    pub duration: Option<TimeDelta>,
    /// Set when the phase closes: it finished without adding errors.
    pub success: bool,
    #[serde(skip)]
    pub(crate) errors_at_start: u64,
}

impl PhaseTiming {
    pub(crate) fn start(name: &str, errors_at_start: u64) -> Self {
        Self {
            name: name.to_string(),
            started: Utc::now(),
            duration: None,
            success: false,
            errors_at_start,
        }
    }

    pub fn is_open(&self) -> bool {
        self.duration.is_none()
    }
}

/// Everything known about one migration run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub migration_id: Uuid,
    pub status: MigrationStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(with = "timespan::option")]
    pub duration: Option<TimeDelta>,
    pub current_operation: Option<String>,
    #[serde(with = "timespan")]
    pub estimated_time_remaining: TimeDelta,
    pub statistics: MigrationStatistics,
    pub errors: Vec<MigrationIssue>,
    /// Pipeline phases in the order they ran.
    pub phases: Vec<PhaseTiming>,
    pub table_creation_result: Option<TableCreationResult>,
    pub seeding_result: Option<SeedingResult>,
    pub validation_result: Option<LegacyValidationResult>,
    pub auth_removal_result: Option<AuthRemovalSummary>,
}

impl MigrationResult {
    pub(crate) fn new(migration_id: Uuid) -> Self {
        Self {
            migration_id,
            status: MigrationStatus::InProgress,
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            current_operation: Some("Starting migration".into()),
            estimated_time_remaining: TimeDelta::zero(),
            statistics: MigrationStatistics::default(),
            errors: Vec::new(),
            phases: Vec::new(),
            table_creation_result: None,
            seeding_result: None,
            validation_result: None,
            auth_removal_result: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether any Error or Critical issue was recorded.
    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(MigrationIssue::is_error)
    }

    /// Wall-clock time so far, or the final duration once finished.
    pub fn elapsed(&self) -> TimeDelta {
        self.duration
            .unwrap_or_else(|| Utc::now().signed_duration_since(self.start_time))
    }
}

/// Compact view returned by start, status and history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatusSummary {
    pub migration_id: Uuid,
    pub status: MigrationStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub progress_percentage: f64,
    #[serde(with = "timespan::option")]
    pub duration: Option<TimeDelta>,
    pub statistics: MigrationStatistics,
    pub recent_errors: Vec<MigrationIssue>,
    pub current_operation: Option<String>,
    #[serde(with = "timespan")]
    pub estimated_time_remaining: TimeDelta,
}

impl MigrationStatusSummary {
    /// Placeholder reported when no migration has run yet.
    pub fn not_started() -> Self {
        Self {
            migration_id: Uuid::nil(),
            status: MigrationStatus::NotStarted,
            start_time: None,
            end_time: None,
            progress_percentage: 0.0,
            duration: None,
            statistics: MigrationStatistics::default(),
            recent_errors: Vec::new(),
            current_operation: None,
            estimated_time_remaining: TimeDelta::zero(),
        }
    }
}

impl From<&MigrationResult> for MigrationStatusSummary {
    fn from(result: &MigrationResult) -> Self {
        let skip = result.errors.len().saturating_sub(ServiceConfig::RECENT_ERRORS);
        Self {
            migration_id: result.migration_id,
            status: result.status,
            start_time: Some(result.start_time),
            end_time: result.end_time,
            progress_percentage: result.statistics.progress_percentage,
            duration: result.duration,
            statistics: result.statistics.clone(),
            recent_errors: result.errors[skip..].to_vec(),
            current_operation: result.current_operation.clone(),
            estimated_time_remaining: result.estimated_time_remaining,
        }
    }
}

/// Live progress of the active run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    pub migration_id: Uuid,
    pub status: MigrationStatus,
    pub progress_percentage: f64,
    pub current_operation: String,
    pub statistics: MigrationStatistics,
    #[serde(with = "timespan")]
    pub estimated_time_remaining: TimeDelta,
    pub start_time: DateTime<Utc>,
    #[serde(with = "timespan")]
    pub elapsed_time: TimeDelta,
}

impl From<&MigrationResult> for MigrationProgress {
    fn from(result: &MigrationResult) -> Self {
        Self {
            migration_id: result.migration_id,
            status: result.status,
            progress_percentage: result.statistics.progress_percentage,
            current_operation: result
                .current_operation
                .clone()
                .unwrap_or_else(|| "Unknown".into()),
            statistics: result.statistics.clone(),
            estimated_time_remaining: result.estimated_time_remaining,
            start_time: result.start_time,
            elapsed_time: result.elapsed(),
        }
    }
}

/// Aggregate over runs started within a window of days.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatisticsSummary {
    pub period_days: i64,
    pub total_migrations: u64,
    /// Completed and CompletedWithErrors.
    pub successful_migrations: u64,
    pub failed_migrations: u64,
    pub cancelled_migrations: u64,
    /// Percentage of `total_migrations` that succeeded.
    pub success_rate: f64,
    #[serde(with = "timespan")]
    pub average_duration: TimeDelta,
    pub total_records_processed: u64,
    pub total_tables_processed: u64,
}

/// Output formats for `generate_report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
}

impl ReportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Json => "application/json",
            ReportFormat::Csv => "text/csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(MigrationError::Validation {
                field: "format".into(),
                message: format!("Unsupported report format '{}'. Supported formats: json, csv", other),
            }),
        }
    }
}

/// Minimum issue level included in a log download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFilter {
    Error,
    Warning,
    Info,
    #[default]
    All,
}

impl LogFilter {
    pub fn includes(&self, level: IssueLevel) -> bool {
        match self {
            LogFilter::Error => level >= IssueLevel::Error,
            LogFilter::Warning => level >= IssueLevel::Warning,
            LogFilter::Info | LogFilter::All => true,
        }
    }
}

impl FromStr for LogFilter {
    type Err = std::convert::Infallible;

    /// Unrecognized levels mean everything.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "error" => LogFilter::Error,
            "warning" => LogFilter::Warning,
            "info" => LogFilter::Info,
            _ => LogFilter::All,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(MigrationStatus::Paused.is_active());
        assert!(!MigrationStatus::Paused.is_terminal());
        assert!(MigrationStatus::CompletedWithErrors.is_successful());
        assert!(MigrationStatus::Cancelled.is_terminal());
        assert!(!MigrationStatus::Cancelled.is_successful());
        assert_eq!(
            serde_json::to_value(MigrationStatus::CompletedWithErrors).unwrap(),
            "CompletedWithErrors"
        );
    }

    #[test]
    fn test_report_format_parse() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        let err = "xml".parse::<ReportFormat>().unwrap_err();
        assert!(err.to_string().contains("Supported formats"));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_log_filter_levels() {
        let warning: LogFilter = "warning".parse().unwrap();
        assert!(warning.includes(IssueLevel::Critical));
        assert!(!warning.includes(IssueLevel::Info));
        let unknown: LogFilter = "verbose".parse().unwrap();
        assert_eq!(unknown, LogFilter::All);
    }

    #[test]
    fn test_summary_keeps_recent_errors() {
        let mut result = MigrationResult::new(Uuid::new_v4());
        for i in 0..8 {
            result
                .errors
                .push(MigrationIssue::new(IssueLevel::Error, "Seeding", format!("e{}", i)));
        }
        let summary = MigrationStatusSummary::from(&result);
        assert_eq!(summary.recent_errors.len(), ServiceConfig::RECENT_ERRORS);
        assert_eq!(summary.recent_errors.last().unwrap().message, "e7");
    }
}
