//! Structural and range validation of `MigrationOptions`.
//!
//! Every group is checked on every call so a response enumerates all violated
//! rules. Warnings and recommendations are advisory and never affect
//! `is_valid`.

use super::options::MigrationOptions;
use super::timespan;
use super::ResourceThresholds;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Severity attached to a configuration finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
    Critical,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationIssue {
    /// Option group, e.g. "Seeding".
    pub category: String,
    /// Offending property path, e.g. "SeedingOptions.BatchSize".
    pub property: String,
    pub message: String,
    pub severity: IssueSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

/// Outcome of validating an options tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ConfigurationIssue>,
    pub warnings: Vec<ConfigurationIssue>,
    pub recommendations: Vec<ConfigurationIssue>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(with = "timespan")]
    pub validation_duration: TimeDelta,
}

impl ConfigValidationResult {
    /// Error messages, in rule order.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

#[derive(Default)]
struct Findings {
    errors: Vec<ConfigurationIssue>,
    warnings: Vec<ConfigurationIssue>,
    recommendations: Vec<ConfigurationIssue>,
}

impl Findings {
    fn error(&mut self, category: &str, property: &str, message: impl Into<String>, fix: impl Into<String>) {
        self.errors.push(issue(category, property, message, IssueSeverity::Error, Some(fix.into())));
    }

    fn warning(&mut self, category: &str, property: &str, message: impl Into<String>, fix: impl Into<String>) {
        self.warnings.push(issue(category, property, message, IssueSeverity::Warning, Some(fix.into())));
    }

    fn recommend(&mut self, category: &str, property: &str, message: impl Into<String>) {
        self.recommendations
            .push(issue(category, property, message, IssueSeverity::Information, None));
    }
}

fn issue(
    category: &str,
    property: &str,
    message: impl Into<String>,
    severity: IssueSeverity,
    suggested_fix: Option<String>,
) -> ConfigurationIssue {
    ConfigurationIssue {
        category: category.to_string(),
        property: property.to_string(),
        message: message.into(),
        severity,
        suggested_fix,
    }
}

/// Validates option trees against range and consistency rules.
#[derive(Debug, Clone)]
pub struct ConfigurationValidator {
    processor_count: usize,
}

impl Default for ConfigurationValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationValidator {
    /// Validator sized for the current host.
    pub fn new() -> Self {
        let processor_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { processor_count }
    }

    /// Validator with a fixed processor count, for deterministic results.
    pub fn with_processor_count(processor_count: usize) -> Self {
        Self {
            processor_count: processor_count.max(1),
        }
    }

    pub fn validate_configuration(&self, options: &MigrationOptions) -> ConfigValidationResult {
        let start_time = Utc::now();
        let started = Instant::now();
        let mut findings = Findings::default();

        self.validate_general(options, &mut findings);
        validate_seeding(options, &mut findings);
        validate_legacy_comparison(options, &mut findings);
        validate_auth_removal(options, &mut findings);
        validate_logging(options, &mut findings);

        let validation_duration = timespan::from_std(started.elapsed());
        let is_valid = findings.errors.is_empty();
        debug!(
            is_valid,
            errors = findings.errors.len(),
            warnings = findings.warnings.len(),
            "Configuration validated"
        );

        ConfigValidationResult {
            is_valid,
            errors: findings.errors,
            warnings: findings.warnings,
            recommendations: findings.recommendations,
            start_time,
            end_time: Utc::now(),
            validation_duration,
        }
    }

    fn validate_general(&self, options: &MigrationOptions, f: &mut Findings) {
        let max_reasonable = self.processor_count as i64 * ResourceThresholds::CONCURRENCY_PER_CPU;

        if options.max_concurrent_operations <= 0 {
            f.error(
                "General",
                "MaxConcurrentOperations",
                "MaxConcurrentOperations must be greater than 0",
                format!("Set MaxConcurrentOperations to a value between 1 and {}", max_reasonable),
            );
        } else if i64::from(options.max_concurrent_operations) > max_reasonable {
            f.warning(
                "General",
                "MaxConcurrentOperations",
                format!(
                    "MaxConcurrentOperations ({}) exceeds twice the processor count ({})",
                    options.max_concurrent_operations, self.processor_count
                ),
                format!("Consider a value of {} or less", max_reasonable),
            );
        }

        if options.operation_timeout <= TimeDelta::zero() {
            f.error(
                "General",
                "OperationTimeout",
                "OperationTimeout must be greater than zero",
                "Set OperationTimeout to at least 00:10:00",
            );
        }

        let overlap: Vec<&String> = options
            .include_tables
            .iter()
            .filter(|t| options.exclude_tables.iter().any(|x| x.eq_ignore_ascii_case(t)))
            .collect();
        if !overlap.is_empty() {
            f.warning(
                "General",
                "IncludeTables",
                format!(
                    "Tables listed in both IncludeTables and ExcludeTables will be skipped: {}",
                    overlap.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                ),
                "Remove the tables from one of the lists",
            );
        }
    }
}

fn validate_seeding(options: &MigrationOptions, f: &mut Findings) {
    let seeding = &options.seeding_options;

    if seeding.batch_size <= 0 {
        f.error(
            "Seeding",
            "SeedingOptions.BatchSize",
            "BatchSize must be greater than 0",
            "Set BatchSize to a value between 100 and 5000",
        );
    } else if seeding.batch_size > ResourceThresholds::LARGE_BATCH_SIZE {
        f.warning(
            "Seeding",
            "SeedingOptions.BatchSize",
            format!("BatchSize of {} may cause memory issues", seeding.batch_size),
            "Consider a BatchSize of 5000 or less",
        );
    }

    if seeding.csv_directory.trim().is_empty() {
        f.error(
            "Seeding",
            "SeedingOptions.CsvDirectory",
            "CsvDirectory is required",
            "Set CsvDirectory to the folder holding the seed CSV files",
        );
    }

    if seeding.sql_directory.trim().is_empty() {
        f.error(
            "Seeding",
            "SeedingOptions.SqlDirectory",
            "SqlDirectory is required",
            "Set SqlDirectory to the folder holding the table scripts",
        );
    }

    if seeding.command_timeout <= TimeDelta::zero() {
        f.error(
            "Seeding",
            "SeedingOptions.CommandTimeout",
            "CommandTimeout must be greater than zero",
            "Set CommandTimeout to at least 00:01:00",
        );
    } else if options.operation_timeout > TimeDelta::zero()
        && seeding.command_timeout > options.operation_timeout
    {
        f.warning(
            "Seeding",
            "SeedingOptions.CommandTimeout",
            "CommandTimeout is longer than OperationTimeout, so a slow batch ends the whole migration",
            "Keep CommandTimeout below OperationTimeout",
        );
    }

    if seeding.max_retry_attempts < 0 {
        f.error(
            "Seeding",
            "SeedingOptions.MaxRetryAttempts",
            "MaxRetryAttempts cannot be negative",
            "Set MaxRetryAttempts to 0 to disable retries",
        );
    }
    if seeding.retry_delay < TimeDelta::zero() {
        f.error(
            "Seeding",
            "SeedingOptions.RetryDelay",
            "RetryDelay cannot be negative",
            "Set RetryDelay to 00:00:00 or more",
        );
    }

    if !seeding.continue_on_error {
        f.recommend(
            "Seeding",
            "SeedingOptions.ContinueOnError",
            "Enable ContinueOnError so a single bad row does not abort a long migration",
        );
    }
    if !seeding.use_transactions {
        f.recommend(
            "Seeding",
            "SeedingOptions.UseTransactions",
            "Enable UseTransactions so a failed batch is rolled back instead of half-inserted",
        );
    }
    if !seeding.validate_before_insert {
        f.recommend(
            "Seeding",
            "SeedingOptions.ValidateBeforeInsert",
            "Enable ValidateBeforeInsert to catch schema mismatches before they reach the database",
        );
    }
}

fn validate_legacy_comparison(options: &MigrationOptions, f: &mut Findings) {
    let validation = &options.validation_options;

    if validation.max_discrepancies_to_report < 0 {
        f.error(
            "Validation",
            "ValidationOptions.MaxDiscrepanciesToReport",
            "MaxDiscrepanciesToReport cannot be negative",
            "Set MaxDiscrepanciesToReport to 0 or more",
        );
    }

    let percent = validation.performance_threshold_percent;
    if !(0.0..=100.0).contains(&percent) {
        f.error(
            "Validation",
            "ValidationOptions.PerformanceThresholdPercent",
            format!("PerformanceThresholdPercent must be between 0 and 100 (was {})", percent),
            "Set PerformanceThresholdPercent to a value such as 20",
        );
    }

    if validation.query_timeout <= TimeDelta::zero() {
        f.error(
            "Validation",
            "ValidationOptions.QueryTimeout",
            "QueryTimeout must be greater than zero",
            "Set QueryTimeout to at least 00:00:30",
        );
    }

    if options.validate_against_legacy && validation.legacy_connection_string.trim().is_empty() {
        f.warning(
            "Validation",
            "ValidationOptions.LegacyConnectionString",
            "ValidateAgainstLegacy is enabled but no LegacyConnectionString is set",
            "Provide LegacyConnectionString or disable ValidateAgainstLegacy",
        );
    }
}

fn validate_auth_removal(options: &MigrationOptions, f: &mut Findings) {
    let auth = &options.auth_removal_options;

    if auth.backup_directory.trim().is_empty() {
        f.error(
            "AuthRemoval",
            "AuthRemovalOptions.BackupDirectory",
            "BackupDirectory is required",
            "Set BackupDirectory to a writable folder",
        );
    }

    if options.remove_authentication && !auth.create_backup {
        f.recommend(
            "AuthRemoval",
            "AuthRemovalOptions.CreateBackup",
            "Enable CreateBackup before removing authentication so the change can be rolled back",
        );
    }
}

fn validate_logging(options: &MigrationOptions, f: &mut Findings) {
    let logging = &options.logging_options;

    if logging.log_directory.trim().is_empty() {
        f.error(
            "Logging",
            "LoggingOptions.LogDirectory",
            "LogDirectory is required",
            "Set LogDirectory to a writable folder",
        );
    }

    if logging.max_log_file_size_mb <= 0 {
        f.error(
            "Logging",
            "LoggingOptions.MaxLogFileSizeMB",
            "MaxLogFileSizeMB must be greater than 0",
            "Set MaxLogFileSizeMB to a value such as 100",
        );
    }

    if logging.max_log_files <= 0 {
        f.error(
            "Logging",
            "LoggingOptions.MaxLogFiles",
            "MaxLogFiles must be greater than 0",
            "Set MaxLogFiles to a value such as 10",
        );
    }

    if logging.include_stack_trace {
        f.recommend(
            "Logging",
            "LoggingOptions.IncludeStackTrace",
            "IncludeStackTrace produces verbose error records; disable it outside troubleshooting",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ConfigurationValidator {
        ConfigurationValidator::with_processor_count(4)
    }

    #[test]
    fn test_default_options_are_valid() {
        let result = validator().validate_configuration(&MigrationOptions::default());
        assert!(result.is_valid, "unexpected errors: {:?}", result.error_messages());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_known_violations_are_all_reported() {
        let mut options = MigrationOptions::default();
        options.max_concurrent_operations = -1;
        options.seeding_options.batch_size = -100;
        options.validation_options.max_discrepancies_to_report = -50;

        let result = validator().validate_configuration(&options);
        assert!(!result.is_valid);
        assert!(result.errors.len() >= 3);
        let properties: Vec<_> = result.errors.iter().map(|e| e.property.as_str()).collect();
        assert!(properties.contains(&"MaxConcurrentOperations"));
        assert!(properties.contains(&"SeedingOptions.BatchSize"));
        assert!(properties.contains(&"ValidationOptions.MaxDiscrepanciesToReport"));
    }

    #[test]
    fn test_many_simultaneous_violations() {
        let mut options = MigrationOptions::default();
        options.seeding_options.batch_size = -1;
        options.operation_timeout = TimeDelta::zero();
        options.seeding_options.command_timeout = TimeDelta::zero();
        options.validation_options.query_timeout = TimeDelta::zero();
        options.seeding_options.csv_directory = String::new();
        options.seeding_options.sql_directory = String::new();
        options.auth_removal_options.backup_directory = String::new();
        options.logging_options.log_directory = String::new();
        options.validation_options.performance_threshold_percent = 150.0;

        let result = validator().validate_configuration(&options);
        assert!(!result.is_valid);
        assert!(result.errors.len() >= 7, "only {} errors", result.errors.len());
    }

    #[test]
    fn test_empty_nested_group_still_validated() {
        let mut options = MigrationOptions::default();
        options.logging_options.log_directory = String::new();
        options.logging_options.max_log_file_size_mb = 0;
        options.logging_options.max_log_files = 0;

        let result = validator().validate_configuration(&options);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors.iter().all(|e| e.category == "Logging"));
    }

    #[test]
    fn test_zero_discrepancies_is_allowed() {
        let mut options = MigrationOptions::default();
        options.validation_options.max_discrepancies_to_report = 0;
        assert!(validator().validate_configuration(&options).is_valid);
    }

    #[test]
    fn test_warnings_do_not_affect_validity() {
        let mut options = MigrationOptions::default();
        options.max_concurrent_operations = 64;
        options.seeding_options.batch_size = 50_000;

        let result = validator().validate_configuration(&options);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_recommendations_do_not_affect_validity() {
        let mut options = MigrationOptions::default();
        options.seeding_options.continue_on_error = false;
        options.seeding_options.use_transactions = false;

        let result = validator().validate_configuration(&options);
        assert!(result.is_valid);
        assert!(result.recommendations.len() >= 2);
    }

    #[test]
    fn test_duration_is_measured_and_small() {
        let result = validator().validate_configuration(&MigrationOptions::default());
        assert!(result.validation_duration >= TimeDelta::zero());
        assert!(result.validation_duration < TimeDelta::seconds(5));
        assert!(result.end_time >= result.start_time);
    }
}
