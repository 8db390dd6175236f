//! Migration job control.
//!
//! `MigrationControlService` runs one migration at a time through the
//! pipeline (validate, prerequisites, create tables, seed, compare with
//! legacy, remove authentication) and keeps a bounded history of finished
//! runs for status, statistics and reports.

mod auth;
mod legacy;
mod pipeline;
mod registry;
mod report;
mod service;
mod tracker;
mod types;

pub use auth::{
    run_auth_removal, AuthBackupInfo, AuthRemovalResult, AuthRemovalService, AuthRemovalSummary,
    BackupResult, ConfigCleanupResult, FrontendUpdateResult, NoopAuthRemoval, RollbackResult,
};
pub use legacy::{compare_with_legacy, LegacyValidationResult, QueryComparison};
pub use report::{render_logs, render_report, MigrationReport, MigrationSummary};
pub use service::{GeneratedReport, MigrationControlService};
pub use types::{
    IssueLevel, LogFilter, MigrationIssue, MigrationProgress, MigrationResult, MigrationStatistics, PhaseTiming,
    MigrationStatisticsSummary, MigrationStatus, MigrationStatusSummary, ReportFormat,
};
