//! Migration configuration: the option tree, its persistence, the dotted-path
//! override engine and the validator.

mod options;
mod overrides;
mod store;
pub mod timespan;
mod validator;

pub use options::{
    AuthRemovalOptions, LogLevel, LoggingOptions, MigrationOptions, SeedingOptions,
    ValidationOptions,
};
pub use overrides::{
    apply_overrides, available_overrides, validate_overrides, OverrideValidation,
};
pub use store::{merge_options, ConfigStore};
pub use validator::{
    ConfigValidationResult, ConfigurationIssue, ConfigurationValidator, IssueSeverity,
};

use std::time::Duration;

/// Fixed service limits that are not part of the user-editable option tree.
pub struct ServiceConfig;

impl ServiceConfig {
    /// Migrations kept in memory for history queries.
    pub const HISTORY_CAPACITY: usize = 500;
    pub const DEFAULT_HISTORY_LIMIT: usize = 10;
    pub const DEFAULT_STATISTICS_DAYS: i64 = 30;
    /// Newest entries considered when computing statistics.
    pub const STATISTICS_SAMPLE: usize = 100;
    /// Errors included in a status summary.
    pub const RECENT_ERRORS: usize = 5;
    pub const ENVIRONMENT_FILE_PREFIX: &'static str = "migration-";
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
}

/// Host resource thresholds used by prerequisite and compatibility checks.
pub struct ResourceThresholds;

impl ResourceThresholds {
    pub const MIN_DISK_SPACE_GB: f64 = 1.0;
    pub const MIN_PROCESSOR_COUNT: usize = 2;
    pub const MIN_AVAILABLE_MEMORY_MB: u64 = 512;
    /// Rough in-memory size of one parsed CSV row.
    pub const ESTIMATED_ROW_BYTES: u64 = 1024;
    /// Share of available memory a configuration may plan to hold in batches.
    pub const BATCH_MEMORY_SHARE: f64 = 0.25;
    pub const CONCURRENCY_PER_CPU: i64 = 2;
    pub const LARGE_BATCH_SIZE: i32 = 10_000;
}
