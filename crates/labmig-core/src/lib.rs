//! Labmig Core - Headless library for lab results data migration.
//!
//! This crate provides configuration management, preflight checks, CSV
//! parsing, table creation, database seeding and migration job control. It
//! can be used programmatically without any HTTP layer; see the
//! `labmig-server` crate for the REST surface.
//!
//! # Example
//!
//! ```rust,ignore
//! use labmig_core::{MigrationControlService, MigrationOptions, TargetDatabase};
//!
//! #[tokio::main]
//! async fn main() -> labmig_core::Result<()> {
//!     let db = TargetDatabase::open("labresults.db")?;
//!     let service = MigrationControlService::new(db);
//!
//!     let result = service.execute_full_migration(MigrationOptions::default()).await?;
//!     println!("{}: {} records inserted", result.status, result.statistics.records_inserted);
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod csv_import;
pub mod database;
pub mod error;
pub mod migration;
pub mod preflight;
pub mod retry;
pub mod schema;
pub mod seeding;

// Re-export commonly used types
pub use cancel::{CancellationToken, CancelledError, PauseGate};
pub use config::{
    apply_overrides, ConfigStore, ConfigValidationResult, ConfigurationValidator, MigrationOptions,
};
pub use database::TargetDatabase;
pub use error::{MigrationError, Result};
pub use migration::{
    AuthRemovalService, MigrationControlService, MigrationProgress, MigrationResult,
    MigrationStatisticsSummary, MigrationStatus, MigrationStatusSummary, NoopAuthRemoval,
    ReportFormat,
};
pub use preflight::{
    check_environment_compatibility, EnvironmentCompatibilityResult, PrerequisiteCheckResult,
    PrerequisiteChecker,
};
pub use retry::RetryPolicy;
pub use schema::TableSchemaService;
pub use seeding::{map_csv_file_to_table_name, DatabaseSeeder, SeedingResult};
