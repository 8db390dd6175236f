//! The seeding service: clears, loads and inspects target tables.

use super::mapper::map_csv_file_to_table_name;
use super::{
    BatchProgress, ClearTableResult, DataIntegrityResult, SeedingContext, SeedingIssue,
    SeedingResult, SeedingStatistics, TableSeedingResult, TableStatistics,
};
use crate::config::{timespan, MigrationOptions, SeedingOptions};
use crate::csv_import::{
    count_data_rows, process_in_batches, validate_csv_data, CsvParseOptions, CsvSchema, CsvValue,
};
use crate::database::{ColumnInfo, TargetDatabase};
use crate::error::{MigrationError, Result};
use crate::retry::{retry_async, RetryPolicy};
use crate::schema::list_files_with_extension;
use crate::schema::{dependency_levels, TableSchemaService};
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Row issues kept per table; the rest are only counted.
const MAX_RECORDED_ISSUES: usize = 100;

/// One CSV file bound to an existing target table.
#[derive(Debug, Clone)]
struct TableJob {
    table: String,
    csv_path: PathBuf,
    schema: Option<CsvSchema>,
}

/// Loads CSV seed files into the target database.
#[derive(Debug, Clone)]
pub struct DatabaseSeeder {
    db: TargetDatabase,
    schema: TableSchemaService,
    csv_directory: PathBuf,
}

impl DatabaseSeeder {
    pub fn new(
        db: TargetDatabase,
        csv_directory: impl Into<PathBuf>,
        sql_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            schema: TableSchemaService::new(sql_directory, db.clone()),
            db,
            csv_directory: csv_directory.into(),
        }
    }

    /// Seeder for the directories named in `options`.
    pub fn from_options(db: TargetDatabase, options: &SeedingOptions) -> Self {
        Self::new(db, &options.csv_directory, &options.sql_directory)
    }

    pub fn schema_service(&self) -> &TableSchemaService {
        &self.schema
    }

    pub fn csv_directory(&self) -> &Path {
        &self.csv_directory
    }

    /// `*.csv` files in the seed directory, sorted by file name.
    pub async fn available_csv_files(&self) -> Result<Vec<PathBuf>> {
        list_files_with_extension(&self.csv_directory, "csv").await
    }

    pub fn map_csv_file_to_table_name(&self, file_name: &str) -> String {
        map_csv_file_to_table_name(file_name)
    }

    /// Delete all rows from `tables`, children before parents.
    ///
    /// Every table is attempted; failures are listed per table.
    pub async fn clear_table_data(&self, tables: &[String]) -> ClearTableResult {
        let mut result = ClearTableResult::default();

        let graph = match self.schema.dependency_graph().await {
            Ok(graph) => graph,
            Err(MigrationError::FileNotFound(_)) => BTreeMap::new(),
            Err(e) => {
                warn!(error = %e, "Could not read table dependencies, clearing in given order");
                BTreeMap::new()
            }
        };

        let order: Vec<String> = match dependency_levels(&restricted_graph(tables, &graph)) {
            Ok(levels) => levels.into_iter().rev().flatten().collect(),
            Err(e) => {
                warn!(error = %e, "Clearing tables without dependency order");
                tables.iter().rev().cloned().collect()
            }
        };

        for table in order {
            match self.db.delete_all(&table).await {
                Ok(deleted) => {
                    debug!(table = %table, deleted, "Cleared table");
                    result.records_deleted += deleted;
                    result.deleted_per_table.push((table.clone(), deleted));
                    result.cleared_tables.push(table);
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "Failed to clear table");
                    result.errors.push(format!("Failed to clear {}: {}", table, e));
                }
            }
        }

        result.success = result.errors.is_empty();
        info!(
            cleared = result.cleared_tables.len(),
            deleted = result.records_deleted,
            failed = result.errors.len(),
            "Cleared table data"
        );
        result
    }

    /// Seed every mapped CSV file (restricted to `tables` when non-empty).
    ///
    /// Tables load in dependency levels; tables in one level run
    /// concurrently up to `MaxConcurrentOperations`. Returns `Err` only for
    /// cancellation, a missing seed directory or a dependency cycle; data
    /// problems are reported in the result.
    pub async fn seed_tables(
        &self,
        options: &MigrationOptions,
        tables: &[String],
        ctx: &SeedingContext,
    ) -> Result<SeedingResult> {
        let started = Instant::now();
        let seeding = &options.seeding_options;
        let mut result = SeedingResult::default();

        let files = self.available_csv_files().await?;
        let existing = self.db.list_tables().await?;

        let mut jobs: Vec<TableJob> = Vec::new();
        for csv_path in files {
            let Some(file_name) = csv_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let mapped = map_csv_file_to_table_name(file_name);
            if !options.includes_table(&mapped) {
                debug!(table = %mapped, "Table excluded by configuration");
                continue;
            }
            if !tables.is_empty() && !tables.iter().any(|t| t.eq_ignore_ascii_case(&mapped)) {
                continue;
            }
            if jobs.iter().any(|j| j.table.eq_ignore_ascii_case(&mapped)) {
                warn!(table = %mapped, file = %csv_path.display(), "Duplicate seed file ignored");
                continue;
            }

            match existing.iter().find(|t| t.eq_ignore_ascii_case(&mapped)) {
                Some(table) => jobs.push(TableJob {
                    table: table.clone(),
                    csv_path,
                    schema: None,
                }),
                None => {
                    warn!(table = %mapped, "No target table for seed file");
                    let mut missing = TableSeedingResult::new(&mapped, csv_path);
                    missing.success = false;
                    missing
                        .errors
                        .push(SeedingIssue::table(format!("Table {} does not exist", mapped)));
                    ctx.progress.table_completed(&missing);
                    result.table_results.push(missing);
                }
            }
        }

        if !seeding.continue_on_error && !result.table_results.is_empty() {
            return Ok(finish(result, started));
        }

        let job_tables: Vec<String> = jobs.iter().map(|j| j.table.clone()).collect();
        if options.clear_existing_data && !job_tables.is_empty() {
            ctx.cancel.check()?;
            let cleared = self.clear_table_data(&job_tables).await;
            if !cleared.success {
                result.errors.extend(cleared.errors);
                if !seeding.continue_on_error {
                    return Ok(finish(result, started));
                }
            }
        }

        let mut planned = 0u64;
        let count_options = CsvParseOptions::default();
        for job in &mut jobs {
            planned += count_data_rows(job.csv_path.clone(), &count_options)
                .await
                .unwrap_or(0) as u64;
            job.schema = match self.schema.table_schema(&job.table).await {
                Ok(schema) => schema,
                Err(e) => {
                    warn!(table = %job.table, error = %e, "Could not derive table schema");
                    None
                }
            };
        }
        ctx.progress.rows_planned(planned);

        let graph = match self.schema.dependency_graph().await {
            Ok(graph) => graph,
            Err(MigrationError::FileNotFound(_)) => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        let levels = dependency_levels(&restricted_graph(&job_tables, &graph))?;

        let mut pending: BTreeMap<String, TableJob> =
            jobs.into_iter().map(|j| (j.table.clone(), j)).collect();
        let seeding = Arc::new(seeding.clone());
        let workers = options.max_concurrent_operations.max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(workers));
        info!(
            tables = pending.len(),
            levels = levels.len(),
            workers,
            rows = planned,
            "Seeding tables"
        );

        'levels: for level in levels {
            let mut handles = Vec::new();
            let mut stopped: Option<MigrationError> = None;
            for table in level {
                let Some(job) = pending.remove(&table) else {
                    continue;
                };
                // Tables already spawned in this level are drained below before returning.
                if let Err(e) = ctx.pause.wait_if_paused(&ctx.cancel).await {
                    stopped = Some(e.into());
                    break;
                }
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        stopped = Some(MigrationError::Other(format!(
                            "Seeding worker pool closed: {}",
                            e
                        )));
                        break;
                    }
                };
                let seeder = self.clone();
                let seeding = seeding.clone();
                let ctx = ctx.clone();
                let handle = tokio::spawn(async move {
                    let outcome = seeder.seed_table(job, seeding, ctx).await;
                    drop(permit);
                    outcome
                });
                handles.push((table, handle));
            }

            let mut cancelled = false;
            let mut halted = false;
            for (table, handle) in handles {
                let table_result = match handle.await {
                    Ok(Ok(table_result)) => table_result,
                    Ok(Err(MigrationError::Cancelled)) => {
                        cancelled = true;
                        continue;
                    }
                    Ok(Err(e)) => failed_table(&table, e.to_string()),
                    Err(e) => failed_table(&table, format!("Seeding task failed: {}", e)),
                };
                if !table_result.success && !seeding.continue_on_error {
                    halted = true;
                }
                result.table_results.push(table_result);
            }

            if let Some(e) = stopped {
                return Err(e);
            }
            if cancelled {
                return Err(MigrationError::Cancelled);
            }
            if halted {
                warn!("Stopping seeding after table failure");
                break 'levels;
            }
        }

        Ok(finish(result, started))
    }

    /// Load one table; only cancellation escapes as `Err`.
    async fn seed_table(
        self,
        job: TableJob,
        options: Arc<SeedingOptions>,
        ctx: SeedingContext,
    ) -> Result<TableSeedingResult> {
        let started = Instant::now();
        let mut result = TableSeedingResult::new(&job.table, job.csv_path.clone());
        ctx.progress.table_started(&job.table);
        info!(table = %job.table, file = %job.csv_path.display(), "Seeding table");

        match self.load_rows(&job, &options, &ctx, &mut result).await {
            Ok(()) => {}
            Err(MigrationError::Cancelled) => return Err(MigrationError::Cancelled),
            Err(e) => {
                warn!(table = %job.table, error = %e, "Seeding table failed");
                result.success = false;
                record(&mut result, SeedingIssue::table(e.to_string()));
            }
        }

        result.duration = timespan::from_std(started.elapsed());
        info!(
            table = %job.table,
            inserted = result.records_inserted,
            skipped = result.records_skipped,
            success = result.success,
            "Seeded table"
        );
        ctx.progress.table_completed(&result);
        Ok(result)
    }

    async fn load_rows(
        &self,
        job: &TableJob,
        options: &SeedingOptions,
        ctx: &SeedingContext,
        result: &mut TableSeedingResult,
    ) -> Result<()> {
        let target_columns = self.db.table_columns(&job.table).await?;
        let parse_options = CsvParseOptions {
            column_types: job
                .schema
                .as_ref()
                .map(CsvSchema::column_types)
                .unwrap_or_default(),
            continue_on_error: true,
            ..Default::default()
        };
        let timeout = timespan::to_std_positive(&options.command_timeout);
        // A rolled-back batch can be replayed; a partially applied one cannot.
        let retry = if options.use_transactions {
            RetryPolicy::from_seeding(options)
        } else {
            RetryPolicy::none()
        };
        let batch_size = options.batch_size.max(1) as usize;

        let mut batches = process_in_batches(job.csv_path.clone(), batch_size, parse_options);
        let mut mapping: Option<Vec<(String, String)>> = None;

        while let Some(item) = batches.next().await {
            ctx.pause.wait_if_paused(&ctx.cancel).await?;
            ctx.cancel.check()?;
            let batch = item?;

            if mapping.is_none() {
                mapping = Some(map_columns(&job.table, &batch.headers, &target_columns)?);
            }
            let Some(columns) = mapping.as_ref() else {
                continue;
            };

            let mut progress = BatchProgress {
                batch_number: batch.batch_number,
                rows_processed: batch.len() as u64,
                ..Default::default()
            };
            result.records_processed += batch.len() as u64;

            for error in &batch.errors {
                record(
                    result,
                    SeedingIssue::row(error.row_number, error.column.clone(), error.message.clone()),
                );
            }
            let mut rejected: BTreeSet<usize> = batch
                .data
                .iter()
                .filter(|row| row.has_errors)
                .map(|row| row.row_number)
                .collect();

            if options.validate_before_insert {
                if let Some(schema) = &job.schema {
                    let validation = validate_csv_data(&batch.data, schema);
                    for issue in validation.errors {
                        if rejected.insert(issue.row_number) || !is_parse_failure(&batch, issue.row_number) {
                            record(
                                result,
                                SeedingIssue::row(issue.row_number, Some(issue.column), issue.message),
                            );
                        }
                    }
                    for warning in &validation.warnings {
                        debug!(table = %job.table, row = warning.row_number, "{}", warning.message);
                    }
                }
            }

            if !rejected.is_empty() && !options.continue_on_error {
                progress.rows_skipped = rejected.len() as u64;
                result.records_skipped += progress.rows_skipped;
                result.success = false;
                ctx.progress.batch_completed(&job.table, progress);
                return Ok(());
            }

            let (row_numbers, values): (Vec<usize>, Vec<Vec<CsvValue>>) = batch
                .data
                .into_iter()
                .filter(|row| !rejected.contains(&row.row_number))
                .map(|row| {
                    let values = columns
                        .iter()
                        .map(|(csv, _)| row.get(csv).cloned().unwrap_or(CsvValue::Null))
                        .collect();
                    (row.row_number, values)
                })
                .unzip();
            let column_names: Vec<String> = columns.iter().map(|(_, target)| target.clone()).collect();
            let attempted = row_numbers.len() as u64;
            let label = format!("{} batch {}", job.table, batch.batch_number);

            let mut batch_failed = false;
            let inserted = retry_async(
                &retry,
                &ctx.cancel,
                &label,
                || {
                    self.db.insert_batch(
                        &job.table,
                        column_names.clone(),
                        values.clone(),
                        options.use_transactions,
                        timeout,
                    )
                },
                MigrationError::is_retryable,
            )
            .await;
            match inserted {
                Err(MigrationError::Cancelled) => return Err(MigrationError::Cancelled),
                Ok(outcome) => {
                    progress.rows_inserted = outcome.inserted as u64;
                    for (index, message) in outcome.failed {
                        batch_failed = true;
                        let row_number = row_numbers.get(index).copied().unwrap_or_default();
                        record(result, SeedingIssue::row(row_number, None, message));
                    }
                }
                Err(e) => {
                    batch_failed = true;
                    warn!(table = %job.table, batch = batch.batch_number, error = %e, "Batch insert failed");
                    record(
                        result,
                        SeedingIssue {
                            row_number: row_numbers.first().copied(),
                            column: None,
                            message: format!("Batch {} rolled back: {}", batch.batch_number, e),
                        },
                    );
                }
            }

            progress.rows_skipped = rejected.len() as u64 + attempted - progress.rows_inserted;
            result.records_inserted += progress.rows_inserted;
            result.records_skipped += progress.rows_skipped;
            ctx.progress.batch_completed(&job.table, progress);

            if batch_failed && !options.continue_on_error {
                result.success = false;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Run SQLite's integrity and foreign key checks.
    pub async fn validate_data_integrity(&self) -> Result<DataIntegrityResult> {
        let mut issues = self.db.integrity_check().await?;
        issues.extend(self.db.foreign_key_violations().await?);
        if !issues.is_empty() {
            warn!(issues = issues.len(), "Data integrity problems found");
        }
        Ok(DataIntegrityResult {
            is_valid: issues.is_empty(),
            issues,
        })
    }

    /// Row counts for every target table.
    pub async fn seeding_statistics(&self) -> Result<SeedingStatistics> {
        let csv_tables: Vec<String> = match self.available_csv_files().await {
            Ok(files) => files
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
                .map(map_csv_file_to_table_name)
                .collect(),
            Err(MigrationError::FileNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut stats = SeedingStatistics::default();
        for table in self.db.list_tables().await? {
            let row_count = self.db.row_count(&table).await?;
            stats.total_tables += 1;
            stats.total_records += row_count;
            if row_count > 0 {
                stats.tables_with_data += 1;
            }
            stats.table_statistics.push(TableStatistics {
                has_csv_file: csv_tables.iter().any(|t| t.eq_ignore_ascii_case(&table)),
                table_name: table,
                row_count,
            });
        }
        Ok(stats)
    }
}

fn finish(mut result: SeedingResult, started: Instant) -> SeedingResult {
    result.tables_processed = result.table_results.len() as u64;
    result.records_inserted = result.table_results.iter().map(|t| t.records_inserted).sum();
    result.records_skipped = result.table_results.iter().map(|t| t.records_skipped).sum();
    result.success = result.errors.is_empty() && result.table_results.iter().all(|t| t.success);
    result.duration = timespan::from_std(started.elapsed());
    result
}

fn failed_table(table: &str, message: String) -> TableSeedingResult {
    let mut result = TableSeedingResult::new(table, PathBuf::new());
    result.success = false;
    result.errors.push(SeedingIssue::table(message));
    result
}

fn record(result: &mut TableSeedingResult, issue: SeedingIssue) {
    if result.errors.len() < MAX_RECORDED_ISSUES {
        result.errors.push(issue);
    } else {
        result.suppressed_errors += 1;
    }
}

fn is_parse_failure(batch: &crate::csv_import::CsvBatch, row_number: usize) -> bool {
    batch
        .data
        .iter()
        .any(|row| row.row_number == row_number && row.has_errors)
}

/// Pair CSV headers with target columns, case-insensitively.
fn map_columns(
    table: &str,
    headers: &[String],
    target: &[ColumnInfo],
) -> Result<Vec<(String, String)>> {
    let mut mapping = Vec::new();
    for header in headers {
        match target.iter().find(|c| c.name.eq_ignore_ascii_case(header)) {
            Some(column) => mapping.push((header.clone(), column.name.clone())),
            None => debug!(table, column = %header, "CSV column has no target column"),
        }
    }
    if mapping.is_empty() {
        return Err(MigrationError::Validation {
            field: table.to_string(),
            message: "No CSV columns match the table's columns".to_string(),
        });
    }
    Ok(mapping)
}

/// Dependency graph over `tables` only, with names spelled as in `tables`.
fn restricted_graph(
    tables: &[String],
    graph: &BTreeMap<String, BTreeSet<String>>,
) -> BTreeMap<String, BTreeSet<String>> {
    tables
        .iter()
        .map(|table| {
            let parents = graph
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(table))
                .map(|(_, parents)| {
                    parents
                        .iter()
                        .filter_map(|p| tables.iter().find(|t| t.eq_ignore_ascii_case(p)).cloned())
                        .collect()
                })
                .unwrap_or_default();
            (table.clone(), parents)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::seeding::SeedingProgress;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        seeder: DatabaseSeeder,
        db: TargetDatabase,
        options: MigrationOptions,
    }

    async fn fixture(test_csv: &str, readings_csv: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("db-seeding");
        let sql = dir.path().join("db-tables");
        std::fs::create_dir_all(&csv).unwrap();
        std::fs::create_dir_all(&sql).unwrap();

        std::fs::write(
            sql.join("Test.sql"),
            "CREATE TABLE Test (ID INTEGER PRIMARY KEY, Name NVARCHAR(40) NOT NULL, Active BIT);",
        )
        .unwrap();
        std::fs::write(
            sql.join("TestReadings.sql"),
            "CREATE TABLE TestReadings (SampleID INT NOT NULL, TestID INT NOT NULL REFERENCES Test(ID), Value1 FLOAT);",
        )
        .unwrap();
        std::fs::write(csv.join("test.csv"), test_csv).unwrap();
        std::fs::write(csv.join("testreadings.csv"), readings_csv).unwrap();

        let db = TargetDatabase::open(dir.path().join("lab.db")).unwrap();
        let seeder = DatabaseSeeder::new(db.clone(), &csv, &sql);
        seeder
            .schema_service()
            .create_missing_tables(&[], &CancellationToken::new())
            .await
            .unwrap();

        let mut options = MigrationOptions::default();
        options.seeding_options.csv_directory = csv.display().to_string();
        options.seeding_options.sql_directory = sql.display().to_string();
        Fixture {
            _dir: dir,
            seeder,
            db,
            options,
        }
    }

    const TEST_CSV: &str = "ID,Name,Active\n1,TAN,1\n2,Viscosity,0\n3,KF,yes\n";
    const READINGS_CSV: &str = "SampleID,TestID,Value1,Ignored\n10,1,0.5,x\n11,2,1.25,y\n12,3,,z\n";

    #[tokio::test]
    async fn test_available_csv_files_sorted() {
        let f = fixture(TEST_CSV, READINGS_CSV).await;
        let files = f.seeder.available_csv_files().await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["test.csv", "testreadings.csv"]);
    }

    #[tokio::test]
    async fn test_seed_loads_parents_before_children() {
        let f = fixture(TEST_CSV, READINGS_CSV).await;
        let result = f
            .seeder
            .seed_tables(&f.options, &[], &SeedingContext::default())
            .await
            .unwrap();

        assert!(result.success, "{:?}", result);
        assert_eq!(result.tables_processed, 2);
        assert_eq!(result.records_inserted, 6);
        assert_eq!(result.records_skipped, 0);
        assert_eq!(f.db.row_count("TestReadings").await.unwrap(), 3);
        assert!(f.seeder.validate_data_integrity().await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_bad_value_is_skipped_with_continue_on_error() {
        let f = fixture("ID,Name,Active\n1,TAN,1\nabc,Broken,0\n3,KF,0\n", "SampleID,TestID\n").await;
        let result = f
            .seeder
            .seed_tables(&f.options, &["Test".to_string()], &SeedingContext::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.records_inserted, 2);
        assert_eq!(result.records_skipped, 1);
        let table = &result.table_results[0];
        assert!(!table.errors.is_empty());
        assert_eq!(table.errors[0].row_number, Some(3));
    }

    #[tokio::test]
    async fn test_bad_value_fails_table_without_continue_on_error() {
        let mut f = fixture("ID,Name,Active\n1,TAN,1\nabc,Broken,0\n", "SampleID,TestID\n").await;
        f.options.seeding_options.continue_on_error = false;
        let result = f
            .seeder
            .seed_tables(&f.options, &[], &SeedingContext::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.table_results.len(), 1);
        assert!(!result.table_results[0].success);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_only_itself() {
        let mut f = fixture(
            "ID,Name\n1,a\n2,b\n2,dup\n3,c\n4,d\n",
            "SampleID,TestID\n",
        )
        .await;
        f.options.seeding_options.batch_size = 2;
        let result = f
            .seeder
            .seed_tables(&f.options, &["Test".to_string()], &SeedingContext::default())
            .await
            .unwrap();

        assert_eq!(result.records_inserted, 3);
        assert_eq!(result.records_skipped, 2);
        let ids = f
            .db
            .query_rows("SELECT ID FROM Test ORDER BY ID", None)
            .await
            .unwrap();
        let ids: Vec<_> = ids.rows.into_iter().map(|r| r[0].clone().unwrap()).collect();
        assert_eq!(ids, vec!["1", "2", "4"]);
    }

    #[tokio::test]
    async fn test_missing_required_value_rejected_before_insert() {
        let f = fixture("ID,Name\n1,\n2,ok\n", "SampleID,TestID\n").await;
        let result = f
            .seeder
            .seed_tables(&f.options, &["test".to_string()], &SeedingContext::default())
            .await
            .unwrap();
        assert_eq!(result.records_inserted, 1);
        assert_eq!(result.records_skipped, 1);
        assert!(result.table_results[0].errors[0].message.contains("required"));
    }

    #[tokio::test]
    async fn test_clear_table_data_children_first() {
        let f = fixture(TEST_CSV, READINGS_CSV).await;
        f.seeder
            .seed_tables(&f.options, &[], &SeedingContext::default())
            .await
            .unwrap();

        let cleared = f
            .seeder
            .clear_table_data(&["Test".to_string(), "TestReadings".to_string()])
            .await;
        assert!(cleared.success, "{:?}", cleared.errors);
        assert_eq!(cleared.cleared_tables, vec!["TestReadings", "Test"]);
        assert_eq!(cleared.records_deleted, 6);
    }

    #[tokio::test]
    async fn test_clear_table_data_partial_failure() {
        let f = fixture(TEST_CSV, READINGS_CSV).await;
        let cleared = f
            .seeder
            .clear_table_data(&["Test".to_string(), "Missing".to_string()])
            .await;
        assert!(!cleared.success);
        assert_eq!(cleared.cleared_tables, vec!["Test"]);
        assert_eq!(cleared.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_seeding() {
        let f = fixture(TEST_CSV, READINGS_CSV).await;
        let ctx = SeedingContext::default();
        ctx.cancel.cancel();
        let result = f.seeder.seed_tables(&f.options, &[], &ctx).await;
        assert!(matches!(result, Err(MigrationError::Cancelled)));
    }

    struct CancelAfterFirstBatch {
        cancel: CancellationToken,
    }

    impl SeedingProgress for CancelAfterFirstBatch {
        fn batch_completed(&self, _table: &str, _batch: BatchProgress) {
            self.cancel.cancel();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_drains_spawned_tables() {
        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("db-seeding");
        let sql = dir.path().join("db-tables");
        std::fs::create_dir_all(&csv).unwrap();
        std::fs::create_dir_all(&sql).unwrap();
        let mut rows = String::from("ID,Name\n");
        for i in 1..=200 {
            rows.push_str(&format!("{},Row {}\n", i, i));
        }
        for table in ["Alpha", "Beta", "Gamma"] {
            std::fs::write(
                sql.join(format!("{}.sql", table)),
                format!("CREATE TABLE {} (ID INTEGER PRIMARY KEY, Name TEXT);", table),
            )
            .unwrap();
            std::fs::write(csv.join(format!("{}.csv", table.to_lowercase())), &rows).unwrap();
        }

        let db = TargetDatabase::open(dir.path().join("lab.db")).unwrap();
        let seeder = DatabaseSeeder::new(db, &csv, &sql);
        seeder
            .schema_service()
            .create_missing_tables(&[], &CancellationToken::new())
            .await
            .unwrap();

        let mut options = MigrationOptions::default();
        options.seeding_options.csv_directory = csv.display().to_string();
        options.seeding_options.sql_directory = sql.display().to_string();
        options.seeding_options.batch_size = 10;
        // One worker: the second table is spawned only after the first sees the cancel.
        options.max_concurrent_operations = 1;

        let cancel = CancellationToken::new();
        let progress = Arc::new(CancelAfterFirstBatch { cancel: cancel.clone() });
        let ctx = SeedingContext {
            cancel,
            progress: progress.clone(),
            ..Default::default()
        };

        let result = seeder.seed_tables(&options, &[], &ctx).await;

        assert!(matches!(result, Err(MigrationError::Cancelled)));
        // Only this test and `ctx` still hold the sink: no table task outlived the call.
        assert_eq!(Arc::strong_count(&progress), 2);
    }

    #[derive(Default)]
    struct Counter {
        planned: AtomicU64,
        processed: AtomicU64,
        tables: AtomicU64,
    }

    impl SeedingProgress for Counter {
        fn rows_planned(&self, total_rows: u64) {
            self.planned.store(total_rows, Ordering::SeqCst);
        }

        fn batch_completed(&self, _table: &str, batch: BatchProgress) {
            self.processed.fetch_add(batch.rows_processed, Ordering::SeqCst);
        }

        fn table_completed(&self, _result: &TableSeedingResult) {
            self.tables.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_progress_reports_every_row() {
        let mut f = fixture(TEST_CSV, READINGS_CSV).await;
        f.options.seeding_options.batch_size = 1;
        let counter = Arc::new(Counter::default());
        let ctx = SeedingContext {
            progress: counter.clone(),
            ..Default::default()
        };
        f.seeder.seed_tables(&f.options, &[], &ctx).await.unwrap();

        assert_eq!(counter.planned.load(Ordering::SeqCst), 6);
        assert_eq!(counter.processed.load(Ordering::SeqCst), 6);
        assert_eq!(counter.tables.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_seeding_statistics() {
        let f = fixture(TEST_CSV, READINGS_CSV).await;
        f.seeder
            .seed_tables(&f.options, &["Test".to_string()], &SeedingContext::default())
            .await
            .unwrap();

        let stats = f.seeder.seeding_statistics().await.unwrap();
        assert_eq!(stats.total_tables, 2);
        assert_eq!(stats.tables_with_data, 1);
        assert_eq!(stats.total_records, 3);
        assert!(stats.table_statistics.iter().all(|t| t.has_csv_file));
    }

    #[test]
    fn test_restricted_graph_uses_requested_spelling() {
        let mut graph = BTreeMap::new();
        graph.insert(
            "TestReadings".to_string(),
            ["Test".to_string(), "Other".to_string()].into_iter().collect(),
        );
        let restricted = restricted_graph(&["testreadings".into(), "TEST".into()], &graph);
        assert_eq!(
            restricted["testreadings"].iter().collect::<Vec<_>>(),
            vec!["TEST"]
        );
        assert!(restricted["TEST"].is_empty());
    }
}
