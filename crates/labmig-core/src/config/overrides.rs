//! Dotted-path overrides for the option tree.
//!
//! Every leaf of `MigrationOptions` has one entry in the override table: a
//! path such as `SeedingOptions.BatchSize`, a description for the catalogue,
//! and a setter that converts a JSON value to the field's type. Paths are
//! matched case-insensitively. Unknown paths are skipped.

use super::options::{LogLevel, MigrationOptions};
use super::timespan::parse_timespan;
use crate::error::{MigrationError, Result};
use chrono::TimeDelta;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

type Setter = fn(&mut MigrationOptions, &Value) -> std::result::Result<(), String>;

struct OverrideEntry {
    path: &'static str,
    description: &'static str,
    apply: Setter,
}

macro_rules! entry {
    ($path:literal, $desc:literal, $convert:ident, |$o:ident| $field:expr) => {
        OverrideEntry {
            path: $path,
            description: $desc,
            apply: |$o, value| {
                $field = $convert(value)?;
                Ok(())
            },
        }
    };
}

fn override_table() -> Vec<OverrideEntry> {
    vec![
        entry!("ClearExistingData", "Delete existing rows before seeding", to_bool, |o| o.clear_existing_data),
        entry!("CreateMissingTables", "Create tables that do not exist yet", to_bool, |o| o.create_missing_tables),
        entry!("ValidateAgainstLegacy", "Compare seeded data with the legacy database", to_bool, |o| o.validate_against_legacy),
        entry!("RemoveAuthentication", "Run the authentication removal step", to_bool, |o| o.remove_authentication),
        entry!("IncludeTables", "Only migrate these tables (comma separated)", to_list, |o| o.include_tables),
        entry!("ExcludeTables", "Skip these tables (comma separated)", to_list, |o| o.exclude_tables),
        entry!("MaxConcurrentOperations", "Tables seeded in parallel", to_i32, |o| o.max_concurrent_operations),
        entry!("OperationTimeout", "Time limit for the whole migration (hh:mm:ss)", to_duration, |o| o.operation_timeout),
        entry!("SeedingOptions.BatchSize", "Rows inserted per batch", to_i32, |o| o.seeding_options.batch_size),
        entry!("SeedingOptions.ContinueOnError", "Record row failures and keep going", to_bool, |o| o.seeding_options.continue_on_error),
        entry!("SeedingOptions.ValidateBeforeInsert", "Validate rows against the table schema before inserting", to_bool, |o| o.seeding_options.validate_before_insert),
        entry!("SeedingOptions.CsvDirectory", "Directory containing <table>.csv files", to_text, |o| o.seeding_options.csv_directory),
        entry!("SeedingOptions.SqlDirectory", "Directory containing <table>.sql scripts", to_text, |o| o.seeding_options.sql_directory),
        entry!("SeedingOptions.UseTransactions", "Wrap each batch in a transaction", to_bool, |o| o.seeding_options.use_transactions),
        entry!("SeedingOptions.CommandTimeout", "Time limit for one batch (hh:mm:ss)", to_duration, |o| o.seeding_options.command_timeout),
        entry!("SeedingOptions.MaxRetryAttempts", "Retries for a batch that failed transiently", to_i32, |o| o.seeding_options.max_retry_attempts),
        entry!("SeedingOptions.RetryDelay", "Delay before the first batch retry (hh:mm:ss.fff)", to_duration, |o| o.seeding_options.retry_delay),
        entry!("ValidationOptions.CompareQueryResults", "Compare row data with the legacy database", to_bool, |o| o.validation_options.compare_query_results),
        entry!("ValidationOptions.ComparePerformance", "Compare query timings with the legacy database", to_bool, |o| o.validation_options.compare_performance),
        entry!("ValidationOptions.GenerateDetailedReports", "Keep per-table comparison details", to_bool, |o| o.validation_options.generate_detailed_reports),
        entry!("ValidationOptions.MaxDiscrepanciesToReport", "Discrepancies recorded per table", to_i32, |o| o.validation_options.max_discrepancies_to_report),
        entry!("ValidationOptions.PerformanceThresholdPercent", "Allowed slowdown versus legacy (0-100)", to_f64, |o| o.validation_options.performance_threshold_percent),
        entry!("ValidationOptions.QueryTimeout", "Time limit for one comparison query (hh:mm:ss)", to_duration, |o| o.validation_options.query_timeout),
        entry!("ValidationOptions.LegacyConnectionString", "Legacy database location", to_text, |o| o.validation_options.legacy_connection_string),
        entry!("ValidationOptions.LegacyValidationRequired", "Block the migration when the legacy database is unreachable", to_bool, |o| o.validation_options.legacy_validation_required),
        entry!("ValidationOptions.IncludeQueries", "Only compare these tables (comma separated)", to_list, |o| o.validation_options.include_queries),
        entry!("ValidationOptions.ExcludeQueries", "Skip comparing these tables (comma separated)", to_list, |o| o.validation_options.exclude_queries),
        entry!("AuthRemovalOptions.CreateBackup", "Back up authentication files first", to_bool, |o| o.auth_removal_options.create_backup),
        entry!("AuthRemovalOptions.BackupDirectory", "Where authentication backups are written", to_text, |o| o.auth_removal_options.backup_directory),
        entry!("AuthRemovalOptions.RemoveFromApi", "Remove JWT authentication from the API", to_bool, |o| o.auth_removal_options.remove_from_api),
        entry!("AuthRemovalOptions.RemoveFromFrontend", "Remove authentication from the frontend", to_bool, |o| o.auth_removal_options.remove_from_frontend),
        entry!("AuthRemovalOptions.UpdateDocumentation", "Update documentation after removal", to_bool, |o| o.auth_removal_options.update_documentation),
        entry!("AuthRemovalOptions.FilesToExclude", "Files the removal must not touch (comma separated)", to_list, |o| o.auth_removal_options.files_to_exclude),
        entry!("LoggingOptions.MinimumLevel", "Minimum log level (name or ordinal)", to_log_level, |o| o.logging_options.minimum_level),
        entry!("LoggingOptions.LogToFile", "Write logs to LogDirectory", to_bool, |o| o.logging_options.log_to_file),
        entry!("LoggingOptions.LogToConsole", "Write logs to the console", to_bool, |o| o.logging_options.log_to_console),
        entry!("LoggingOptions.LogDirectory", "Directory for log files", to_text, |o| o.logging_options.log_directory),
        entry!("LoggingOptions.IncludeStackTrace", "Attach error chains to recorded errors", to_bool, |o| o.logging_options.include_stack_trace),
        entry!("LoggingOptions.MaxLogFileSizeMB", "Size at which a log file is rotated", to_i32, |o| o.logging_options.max_log_file_size_mb),
        entry!("LoggingOptions.MaxLogFiles", "Rotated log files to keep", to_i32, |o| o.logging_options.max_log_files),
    ]
}

fn find_entry<'a>(table: &'a [OverrideEntry], path: &str) -> Option<&'a OverrideEntry> {
    let path = path.trim();
    table.iter().find(|e| e.path.eq_ignore_ascii_case(path))
}

/// Apply dotted-path overrides to a copy of `base`.
///
/// Unknown paths are logged and skipped. A value that cannot be converted to
/// the field's type fails the whole call with `MigrationError::Validation`.
pub fn apply_overrides<'a, I>(base: &MigrationOptions, overrides: I) -> Result<MigrationOptions>
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let table = override_table();
    let mut options = base.clone();

    for (path, value) in overrides {
        match find_entry(&table, path) {
            Some(entry) => {
                (entry.apply)(&mut options, value).map_err(|message| MigrationError::Validation {
                    field: entry.path.to_string(),
                    message,
                })?;
                debug!(path = entry.path, "Applied configuration override");
            }
            None => warn!(path = %path, "Unknown configuration override ignored"),
        }
    }

    Ok(options)
}

/// Catalogue of recognized override paths and what they control.
pub fn available_overrides() -> BTreeMap<String, String> {
    override_table()
        .into_iter()
        .map(|e| (e.path.to_string(), e.description.to_string()))
        .collect()
}

/// Outcome of checking an override map without applying it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideValidation {
    pub is_valid: bool,
    pub unknown_paths: Vec<String>,
    /// Path → conversion failure message.
    pub invalid_values: BTreeMap<String, String>,
}

/// Report unknown paths and inconvertible values.
///
/// Unknown paths do not make the map invalid since `apply_overrides` skips them.
pub fn validate_overrides<'a, I>(overrides: I) -> OverrideValidation
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let table = override_table();
    let mut scratch = MigrationOptions::default();
    let mut result = OverrideValidation::default();

    for (path, value) in overrides {
        match find_entry(&table, path) {
            Some(entry) => {
                if let Err(message) = (entry.apply)(&mut scratch, value) {
                    result.invalid_values.insert(entry.path.to_string(), message);
                }
            }
            None => result.unknown_paths.push(path.clone()),
        }
    }

    result.is_valid = result.invalid_values.is_empty();
    result
}

// Value conversions

fn to_bool(value: &Value) -> std::result::Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(format!("expected a boolean, got {:?}", s)),
        },
        other => Err(format!("expected a boolean, got {}", other)),
    }
}

fn to_i64(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| format!("expected an integer, got {}", n)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("expected an integer, got {:?}", s)),
        other => Err(format!("expected an integer, got {}", other)),
    }
}

fn to_i32(value: &Value) -> std::result::Result<i32, String> {
    let n = to_i64(value)?;
    i32::try_from(n).map_err(|_| format!("integer out of range: {}", n))
}

fn to_f64(value: &Value) -> std::result::Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("expected a number, got {}", n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("expected a number, got {:?}", s)),
        other => Err(format!("expected a number, got {}", other)),
    }
}

fn to_text(value: &Value) -> std::result::Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Ok(String::new()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("expected a string, got {}", other)),
    }
}

fn to_duration(value: &Value) -> std::result::Result<TimeDelta, String> {
    match value {
        Value::String(s) => parse_timespan(s).ok_or_else(|| format!("invalid timespan: {:?}", s)),
        Value::Number(n) => n
            .as_f64()
            .and_then(|secs| parse_timespan(&secs.to_string()))
            .ok_or_else(|| format!("invalid timespan: {}", n)),
        other => Err(format!("expected a timespan, got {}", other)),
    }
}

fn to_log_level(value: &Value) -> std::result::Result<LogLevel, String> {
    match value {
        Value::String(s) => s.parse(),
        Value::Number(_) => {
            let ordinal = to_i64(value)?;
            LogLevel::from_ordinal(ordinal)
                .ok_or_else(|| format!("log level ordinal out of range: {}", ordinal))
        }
        other => Err(format!("expected a log level, got {}", other)),
    }
}

fn to_list(value: &Value) -> std::result::Result<Vec<String>, String> {
    match value {
        Value::Array(items) => items.iter().map(to_text).collect(),
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(format!("expected a list, got {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn map(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_apply_nested_and_top_level() {
        let base = MigrationOptions::default();
        let overrides = map(&[
            ("SeedingOptions.BatchSize", json!(500)),
            ("MaxConcurrentOperations", json!("8")),
            ("OperationTimeout", json!("01:00:00")),
            ("ValidationOptions.PerformanceThresholdPercent", json!(35.5)),
        ]);

        let result = apply_overrides(&base, &overrides).unwrap();
        assert_eq!(result.seeding_options.batch_size, 500);
        assert_eq!(result.max_concurrent_operations, 8);
        assert_eq!(result.operation_timeout, TimeDelta::hours(1));
        assert_eq!(result.validation_options.performance_threshold_percent, 35.5);
    }

    #[test]
    fn test_base_is_not_mutated() {
        let base = MigrationOptions::default();
        let overrides = map(&[("ClearExistingData", json!(false))]);
        let result = apply_overrides(&base, &overrides).unwrap();
        assert!(!result.clear_existing_data);
        assert!(base.clear_existing_data);
    }

    #[test]
    fn test_unknown_paths_are_ignored() {
        let base = MigrationOptions::default();
        let overrides = map(&[
            ("SeedingOptions.NoSuchField", json!(1)),
            ("Nope", json!("x")),
        ]);
        let result = apply_overrides(&base, &overrides).unwrap();
        assert_eq!(result, base);
    }

    #[test]
    fn test_last_write_wins_across_layers() {
        let base = MigrationOptions::default();
        let first = map(&[
            ("SeedingOptions.BatchSize", json!(100)),
            ("MaxConcurrentOperations", json!(2)),
        ]);
        let second = map(&[("SeedingOptions.BatchSize", json!(200))]);

        let layered = apply_overrides(&base, &first).unwrap();
        let layered = apply_overrides(&layered, &second).unwrap();

        assert_eq!(layered.seeding_options.batch_size, 200);
        assert_eq!(layered.max_concurrent_operations, 2);
    }

    #[test]
    fn test_log_level_by_name_or_ordinal() {
        let base = MigrationOptions::default();

        let by_name = apply_overrides(&base, &map(&[("LoggingOptions.MinimumLevel", json!("Warning"))])).unwrap();
        assert_eq!(by_name.logging_options.minimum_level, LogLevel::Warning);

        let by_ordinal = apply_overrides(&base, &map(&[("LoggingOptions.MinimumLevel", json!(1))])).unwrap();
        assert_eq!(by_ordinal.logging_options.minimum_level, LogLevel::Debug);
    }

    #[test]
    fn test_paths_are_case_insensitive() {
        let base = MigrationOptions::default();
        let result =
            apply_overrides(&base, &map(&[("seedingoptions.batchsize", json!(42))])).unwrap();
        assert_eq!(result.seeding_options.batch_size, 42);
    }

    #[test]
    fn test_lists_from_array_or_csv_string() {
        let base = MigrationOptions::default();
        let result = apply_overrides(
            &base,
            &map(&[
                ("IncludeTables", json!(["Test", "Lube"])),
                ("ExcludeTables", json!("Sample, Other")),
            ]),
        )
        .unwrap();
        assert_eq!(result.include_tables, vec!["Test", "Lube"]);
        assert_eq!(result.exclude_tables, vec!["Sample", "Other"]);
    }

    #[test]
    fn test_inconvertible_value_is_validation_error() {
        let base = MigrationOptions::default();
        let err = apply_overrides(&base, &map(&[("SeedingOptions.BatchSize", json!("lots"))]))
            .unwrap_err();
        match err {
            MigrationError::Validation { field, .. } => assert_eq!(field, "SeedingOptions.BatchSize"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_catalogue_covers_every_group() {
        let catalogue = available_overrides();
        for path in [
            "ClearExistingData",
            "SeedingOptions.BatchSize",
            "ValidationOptions.QueryTimeout",
            "AuthRemovalOptions.BackupDirectory",
            "LoggingOptions.MaxLogFiles",
        ] {
            assert!(catalogue.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn test_validate_overrides_reports_problems() {
        let overrides = map(&[
            ("Bogus.Path", json!(1)),
            ("SeedingOptions.CommandTimeout", json!("soon")),
            ("SeedingOptions.BatchSize", json!(10)),
        ]);
        let report = validate_overrides(&overrides);
        assert!(!report.is_valid);
        assert_eq!(report.unknown_paths, vec!["Bogus.Path"]);
        assert!(report.invalid_values.contains_key("SeedingOptions.CommandTimeout"));
    }
}
