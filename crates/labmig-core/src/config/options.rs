//! The migration option tree.
//!
//! Serialized as PascalCase JSON so configuration documents stay compatible
//! with the files operators already edit by hand. Every group is
//! `#[serde(default)]`, so a partial document loads with the missing fields
//! filled from defaults.

use super::timespan;
use chrono::TimeDelta;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Root configuration for a migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MigrationOptions {
    pub clear_existing_data: bool,
    pub create_missing_tables: bool,
    pub validate_against_legacy: bool,
    pub remove_authentication: bool,
    /// Only seed these tables when non-empty.
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    pub max_concurrent_operations: i32,
    #[serde(with = "timespan")]
    pub operation_timeout: TimeDelta,
    pub seeding_options: SeedingOptions,
    pub validation_options: ValidationOptions,
    pub auth_removal_options: AuthRemovalOptions,
    pub logging_options: LoggingOptions,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            clear_existing_data: true,
            create_missing_tables: true,
            validate_against_legacy: false,
            remove_authentication: false,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            max_concurrent_operations: 4,
            operation_timeout: TimeDelta::minutes(30),
            seeding_options: SeedingOptions::default(),
            validation_options: ValidationOptions::default(),
            auth_removal_options: AuthRemovalOptions::default(),
            logging_options: LoggingOptions::default(),
        }
    }
}

impl MigrationOptions {
    /// Whether a table passes the include/exclude filters.
    ///
    /// Comparison is case-insensitive; exclusion wins over inclusion.
    pub fn includes_table(&self, table: &str) -> bool {
        let matches = |list: &[String]| list.iter().any(|t| t.eq_ignore_ascii_case(table));
        if matches(&self.exclude_tables) {
            return false;
        }
        self.include_tables.is_empty() || matches(&self.include_tables)
    }
}

/// Options for loading CSV data into tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SeedingOptions {
    pub batch_size: i32,
    pub continue_on_error: bool,
    pub validate_before_insert: bool,
    pub csv_directory: String,
    pub sql_directory: String,
    pub use_transactions: bool,
    #[serde(with = "timespan")]
    pub command_timeout: TimeDelta,
    /// Extra attempts for a transactional batch that failed transiently.
    pub max_retry_attempts: i32,
    /// Delay before the first retry; doubles on each further attempt.
    #[serde(with = "timespan")]
    pub retry_delay: TimeDelta,
}

impl Default for SeedingOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            continue_on_error: true,
            validate_before_insert: true,
            csv_directory: "db-seeding".to_string(),
            sql_directory: "db-tables".to_string(),
            use_transactions: true,
            command_timeout: TimeDelta::minutes(5),
            max_retry_attempts: 2,
            retry_delay: TimeDelta::milliseconds(500),
        }
    }
}

/// Options for comparing the seeded data against the legacy database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ValidationOptions {
    pub compare_query_results: bool,
    pub compare_performance: bool,
    pub generate_detailed_reports: bool,
    pub max_discrepancies_to_report: i32,
    pub performance_threshold_percent: f64,
    #[serde(with = "timespan")]
    pub query_timeout: TimeDelta,
    pub legacy_connection_string: String,
    /// Treat an unreachable legacy database as a blocking prerequisite.
    pub legacy_validation_required: bool,
    pub include_queries: Vec<String>,
    pub exclude_queries: Vec<String>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            compare_query_results: true,
            compare_performance: true,
            generate_detailed_reports: true,
            max_discrepancies_to_report: 100,
            performance_threshold_percent: 20.0,
            query_timeout: TimeDelta::minutes(2),
            legacy_connection_string: String::new(),
            legacy_validation_required: false,
            include_queries: Vec::new(),
            exclude_queries: Vec::new(),
        }
    }
}

/// Options passed to the authentication-removal collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AuthRemovalOptions {
    pub create_backup: bool,
    pub backup_directory: String,
    pub remove_from_api: bool,
    pub remove_from_frontend: bool,
    pub update_documentation: bool,
    pub files_to_exclude: Vec<String>,
}

impl Default for AuthRemovalOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            backup_directory: "auth-backup".to_string(),
            remove_from_api: true,
            remove_from_frontend: true,
            update_documentation: true,
            files_to_exclude: Vec::new(),
        }
    }
}

/// Logging output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LoggingOptions {
    pub minimum_level: LogLevel,
    pub log_to_file: bool,
    pub log_to_console: bool,
    pub log_directory: String,
    pub include_stack_trace: bool,
    #[serde(rename = "MaxLogFileSizeMB")]
    pub max_log_file_size_mb: i32,
    pub max_log_files: i32,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            minimum_level: LogLevel::Information,
            log_to_file: true,
            log_to_console: true,
            log_directory: "logs/migration".to_string(),
            include_stack_trace: false,
            max_log_file_size_mb: 100,
            max_log_files: 10,
        }
    }
}

/// Minimum severity written to the migration logs.
///
/// Accepted on input either by name (case-insensitive) or by ordinal;
/// always written by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Information,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Information,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "Trace",
            LogLevel::Debug => "Debug",
            LogLevel::Information => "Information",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
            LogLevel::Critical => "Critical",
        }
    }

    pub fn ordinal(&self) -> i64 {
        *self as i64
    }

    pub fn from_ordinal(value: i64) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Information => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(ordinal) = trimmed.parse::<i64>() {
            return Self::from_ordinal(ordinal)
                .ok_or_else(|| format!("Log level ordinal out of range: {}", ordinal));
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "information" | "info" => Ok(LogLevel::Information),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LogLevelVisitor)
    }
}

struct LogLevelVisitor;

impl<'de> Visitor<'de> for LogLevelVisitor {
    type Value = LogLevel;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a log level name or ordinal")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<LogLevel, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<LogLevel, E> {
        LogLevel::from_ordinal(v).ok_or_else(|| E::custom(format!("log level ordinal out of range: {v}")))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<LogLevel, E> {
        i64::try_from(v)
            .ok()
            .and_then(LogLevel::from_ordinal)
            .ok_or_else(|| E::custom(format!("log level ordinal out of range: {v}")))
    }
}
