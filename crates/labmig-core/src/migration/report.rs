//! Downloadable reports and plain-text logs for a migration run.

use super::auth::AuthRemovalSummary;
use super::legacy::LegacyValidationResult;
use super::types::{LogFilter, MigrationIssue, MigrationResult, MigrationStatus, PhaseTiming, ReportFormat};
use crate::config::timespan;
use crate::error::{MigrationError, Result};
use crate::schema::TableCreationResult;
use crate::seeding::SeedingResult;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub total_tables: u64,
    pub tables_processed: u64,
    pub total_records: u64,
    pub records_processed: u64,
    pub records_inserted: u64,
    pub records_skipped: u64,
    pub error_count: u64,
    pub success: bool,
    pub overall_progress_percentage: f64,
}

/// Full report for one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub migration_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub status: MigrationStatus,
    #[serde(with = "timespan")]
    pub duration: TimeDelta,
    pub summary: MigrationSummary,
    pub phases: Vec<PhaseTiming>,
    pub table_creation_report: Option<TableCreationResult>,
    pub seeding_report: Option<SeedingResult>,
    pub validation_report: Option<LegacyValidationResult>,
    pub auth_removal_report: Option<AuthRemovalSummary>,
    pub errors: Vec<MigrationIssue>,
    pub recommendations: Vec<String>,
}

impl MigrationReport {
    pub fn from_result(result: &MigrationResult) -> Self {
        let stats = &result.statistics;
        Self {
            migration_id: result.migration_id,
            generated_at: Utc::now(),
            status: result.status,
            duration: result.elapsed(),
            summary: MigrationSummary {
                total_tables: stats.total_tables,
                tables_processed: stats.tables_processed,
                total_records: stats.total_records,
                records_processed: stats.records_processed,
                records_inserted: stats.records_inserted,
                records_skipped: stats.records_skipped,
                error_count: stats.error_count,
                success: result.status.is_successful(),
                overall_progress_percentage: stats.progress_percentage,
            },
            phases: result.phases.clone(),
            table_creation_report: result.table_creation_result.clone(),
            seeding_report: result.seeding_result.clone(),
            validation_report: result.validation_result.clone(),
            auth_removal_report: result.auth_removal_result.clone(),
            errors: result.errors.clone(),
            recommendations: recommendations(result),
        }
    }
}

fn recommendations(result: &MigrationResult) -> Vec<String> {
    let mut out = Vec::new();
    if result.statistics.records_skipped > 0 {
        out.push(format!(
            "Review the {} skipped record(s) and correct the source CSV files",
            result.statistics.records_skipped
        ));
    }
    if let Some(seeding) = &result.seeding_result {
        let failed: Vec<&str> = seeding
            .table_results
            .iter()
            .filter(|t| !t.success)
            .map(|t| t.table_name.as_str())
            .collect();
        if !failed.is_empty() {
            out.push(format!("Re-run seeding for failed tables: {}", failed.join(", ")));
        }
    }
    if let Some(validation) = &result.validation_result {
        if validation.queries_failed > 0 {
            out.push("Investigate tables that differ from the legacy database".to_string());
        }
        if validation.results.iter().any(|r| r.performance_regression) {
            out.push("Add indexes for tables that query slower than in the legacy database".to_string());
        }
    }
    match result.status {
        MigrationStatus::Failed => out.push("Fix the reported errors and start a new migration".to_string()),
        MigrationStatus::Cancelled => {
            out.push("Partially seeded tables were left in place; clear them or re-run with ClearExistingData".to_string())
        }
        _ => {}
    }
    out
}

/// Render a report as pretty JSON or sectioned CSV.
pub fn render_report(result: &MigrationResult, format: ReportFormat) -> Result<String> {
    let report = MigrationReport::from_result(result);
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&report).map_err(MigrationError::from),
        ReportFormat::Csv => render_csv(&report),
    }
}

fn render_csv(report: &MigrationReport) -> Result<String> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    let s = &report.summary;

    writer.write_record(["Migration Report"])?;
    writer.write_record(["Migration ID", &report.migration_id.to_string()])?;
    writer.write_record(["Status", report.status.as_str()])?;
    writer.write_record(["Duration", &timespan::format_timespan(&report.duration)])?;
    writer.write_record(["Generated At", &report.generated_at.to_rfc3339()])?;

    writer.write_record(["Summary"])?;
    writer.write_record(["Metric", "Value"])?;
    for (metric, value) in [
        ("Total Tables", s.total_tables.to_string()),
        ("Tables Processed", s.tables_processed.to_string()),
        ("Total Records", s.total_records.to_string()),
        ("Records Processed", s.records_processed.to_string()),
        ("Records Inserted", s.records_inserted.to_string()),
        ("Records Skipped", s.records_skipped.to_string()),
        ("Error Count", s.error_count.to_string()),
        ("Success", s.success.to_string()),
    ] {
        writer.write_record([metric, value.as_str()])?;
    }

    if !report.phases.is_empty() {
        writer.write_record(["Phases"])?;
        writer.write_record(["Phase", "Started", "Duration", "Success"])?;
        for phase in &report.phases {
            writer.write_record([
                phase.name.clone(),
                phase.started.format("%Y-%m-%d %H:%M:%S").to_string(),
                phase.duration.as_ref().map(timespan::format_timespan).unwrap_or_default(),
                phase.success.to_string(),
            ])?;
        }
    }

    if let Some(seeding) = &report.seeding_report {
        writer.write_record(["Tables"])?;
        writer.write_record(["Table", "Success", "Processed", "Inserted", "Skipped", "Errors"])?;
        for table in &seeding.table_results {
            writer.write_record([
                table.table_name.clone(),
                table.success.to_string(),
                table.records_processed.to_string(),
                table.records_inserted.to_string(),
                table.records_skipped.to_string(),
                (table.errors.len() as u64 + table.suppressed_errors).to_string(),
            ])?;
        }
    }

    if !report.errors.is_empty() {
        writer.write_record(["Errors"])?;
        writer.write_record(["Timestamp", "Level", "Component", "Message", "Table", "Record"])?;
        for issue in &report.errors {
            writer.write_record([
                issue.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                issue.level.to_string(),
                issue.component.clone(),
                issue.message.clone(),
                issue.table_name.clone().unwrap_or_default(),
                issue.record_number.map(|r| r.to_string()).unwrap_or_default(),
            ])?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| MigrationError::Other(format!("Failed to finish CSV report: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| MigrationError::Other(format!("CSV report is not UTF-8: {}", e)))
}

/// Plain-text log of the run's issues at or above `filter`, oldest first.
pub fn render_logs(result: &MigrationResult, filter: LogFilter) -> String {
    let mut issues: Vec<&MigrationIssue> = result.errors.iter().filter(|i| filter.includes(i.level)).collect();
    issues.sort_by_key(|i| i.timestamp);

    let mut log = String::from("Migration Log\n=============\n\n");
    for issue in issues {
        let _ = writeln!(
            log,
            "[{}] [{}] {}",
            issue.timestamp.format("%Y-%m-%d %H:%M:%S"),
            issue.level,
            issue.component
        );
        let _ = writeln!(log, "Message: {}", issue.message);
        if let Some(table) = &issue.table_name {
            let _ = writeln!(log, "Table: {}", table);
        }
        if let Some(record) = issue.record_number {
            let _ = writeln!(log, "Record: {}", record);
        }
        if let Some(details) = &issue.details {
            let _ = writeln!(log, "Details: {}", details);
        }
        log.push('\n');
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::types::IssueLevel;

    fn finished() -> MigrationResult {
        let mut result = MigrationResult::new(Uuid::new_v4());
        result.status = MigrationStatus::CompletedWithErrors;
        result.statistics.records_skipped = 2;
        result.errors.push(
            MigrationIssue::new(IssueLevel::Error, "Seeding", "Cannot convert 'abc', to Integer")
                .with_table("Test")
                .with_record(Some(3)),
        );
        result
            .errors
            .push(MigrationIssue::new(IssueLevel::Warning, "Preflight", "Backup directory missing"));
        let mut phase = PhaseTiming::start("Seeding data", 0);
        phase.duration = Some(TimeDelta::milliseconds(1500));
        result.phases.push(phase);
        result
    }

    #[test]
    fn test_json_report_has_summary() {
        let json = render_report(&finished(), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "CompletedWithErrors");
        assert_eq!(value["summary"]["recordsSkipped"], 2);
        assert_eq!(value["summary"]["success"], true);
        assert!(value["recommendations"][0].as_str().unwrap().contains("skipped"));
        assert_eq!(value["phases"][0]["name"], "Seeding data");
        assert_eq!(value["phases"][0]["success"], false);
        assert!(value["phases"][0]["duration"].is_string());
    }

    #[test]
    fn test_csv_report_quotes_messages() {
        let csv = render_report(&finished(), ReportFormat::Csv).unwrap();
        assert!(csv.starts_with("Migration Report\n"));
        assert!(csv.contains("Status,CompletedWithErrors"));
        assert!(csv.contains("\"Cannot convert 'abc', to Integer\""));
        assert!(csv.contains("Phases\nPhase,Started,Duration,Success\nSeeding data,"));
        assert!(csv.contains(",false\n"));
    }

    #[test]
    fn test_logs_filtered_by_level() {
        let result = finished();
        let all = render_logs(&result, LogFilter::All);
        assert!(all.starts_with("Migration Log\n=============\n"));
        assert!(all.contains("] [Warning] Preflight"));
        assert!(all.contains("Table: Test"));
        assert!(all.contains("Record: 3"));

        let errors = render_logs(&result, LogFilter::Error);
        assert!(errors.contains("] [Error] Seeding"));
        assert!(!errors.contains("Preflight"));
    }
}
