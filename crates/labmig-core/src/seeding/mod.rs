//! Loading CSV seed files into target tables.

mod mapper;
mod seeder;

pub use mapper::map_csv_file_to_table_name;
pub use seeder::DatabaseSeeder;

use crate::cancel::{CancellationToken, PauseGate};
use crate::config::timespan;
use chrono::TimeDelta;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// A row-level or table-level problem found while seeding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedingIssue {
    /// 1-based line in the CSV file, when the issue belongs to a row.
    pub row_number: Option<usize>,
    pub column: Option<String>,
    pub message: String,
}

impl SeedingIssue {
    pub fn table(message: impl Into<String>) -> Self {
        Self {
            row_number: None,
            column: None,
            message: message.into(),
        }
    }

    pub fn row(row_number: usize, column: Option<String>, message: impl Into<String>) -> Self {
        Self {
            row_number: Some(row_number),
            column,
            message: message.into(),
        }
    }
}

/// Per-table seeding outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSeedingResult {
    pub table_name: String,
    pub success: bool,
    pub records_processed: u64,
    pub records_inserted: u64,
    pub records_skipped: u64,
    pub errors: Vec<SeedingIssue>,
    /// Issues beyond the per-table recording cap, counted only.
    pub suppressed_errors: u64,
    #[serde(with = "timespan")]
    pub duration: TimeDelta,
    pub csv_file_path: PathBuf,
}

impl TableSeedingResult {
    pub(crate) fn new(table_name: impl Into<String>, csv_file_path: PathBuf) -> Self {
        Self {
            table_name: table_name.into(),
            success: true,
            records_processed: 0,
            records_inserted: 0,
            records_skipped: 0,
            errors: Vec::new(),
            suppressed_errors: 0,
            duration: TimeDelta::zero(),
            csv_file_path,
        }
    }
}

/// Aggregate seeding outcome.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedingResult {
    /// True when every table seeded without a table-level failure.
    pub success: bool,
    pub tables_processed: u64,
    pub tables_created: u64,
    pub records_inserted: u64,
    pub records_skipped: u64,
    /// Failures outside any one table (clearing, missing tables).
    pub errors: Vec<String>,
    #[serde(with = "timespan")]
    pub duration: TimeDelta,
    pub table_results: Vec<TableSeedingResult>,
}

/// Outcome of clearing tables before a reload.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearTableResult {
    pub success: bool,
    pub cleared_tables: Vec<String>,
    pub records_deleted: u64,
    /// Rows removed per cleared table.
    pub deleted_per_table: Vec<(String, u64)>,
    pub errors: Vec<String>,
}

/// Outcome of the post-load integrity pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataIntegrityResult {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatistics {
    pub table_name: String,
    pub row_count: u64,
    pub has_csv_file: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedingStatistics {
    pub total_tables: u64,
    pub tables_with_data: u64,
    pub total_records: u64,
    pub table_statistics: Vec<TableStatistics>,
}

/// Counts reported after each batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub batch_number: usize,
    pub rows_processed: u64,
    pub rows_inserted: u64,
    pub rows_skipped: u64,
}

/// Receives seeding progress. Every method defaults to doing nothing.
pub trait SeedingProgress: Send + Sync {
    /// Data rows found across all files about to be seeded.
    fn rows_planned(&self, _total_rows: u64) {}

    fn table_started(&self, _table: &str) {}

    fn batch_completed(&self, _table: &str, _batch: BatchProgress) {}

    fn table_completed(&self, _result: &TableSeedingResult) {}
}

/// Progress sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl SeedingProgress for NoProgress {}

/// Cancellation, pause and progress hooks for a seeding run.
#[derive(Clone)]
pub struct SeedingContext {
    pub cancel: CancellationToken,
    pub pause: PauseGate,
    pub progress: Arc<dyn SeedingProgress>,
}

impl Default for SeedingContext {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            pause: PauseGate::new(),
            progress: Arc::new(NoProgress),
        }
    }
}

impl std::fmt::Debug for SeedingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedingContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("paused", &self.pause.is_paused())
            .finish()
    }
}
