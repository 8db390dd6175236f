//! The migration pipeline: validate, check, create, seed, compare, strip auth.
//!
//! Each step begins with a pause/cancel checkpoint. The pipeline returns
//! `Err` for the failure that ended the run; everything else lands in the
//! tracker as issues.

use super::auth::{run_auth_removal, AuthRemovalService};
use super::legacy::compare_with_legacy;
use super::registry::{ActiveMigration, MigrationRegistry};
use super::tracker::{SEEDING_END, SEEDING_START};
use super::types::{IssueLevel, MigrationIssue, MigrationResult, MigrationStatus};
use crate::config::{timespan, ConfigurationValidator, MigrationOptions};
use crate::database::TargetDatabase;
use crate::error::{MigrationError, Result};
use crate::preflight::PrerequisiteChecker;
use crate::schema::TableSchemaService;
use crate::seeding::{DatabaseSeeder, SeedingContext, SeedingIssue};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything one run needs. The options are a private snapshot.
pub(crate) struct PipelineContext {
    pub db: TargetDatabase,
    pub options: MigrationOptions,
    pub active: ActiveMigration,
    pub auth: Arc<dyn AuthRemovalService>,
}

/// Drive a run to a terminal state and record it in the history.
pub(crate) async fn run_migration(ctx: PipelineContext, registry: Arc<MigrationRegistry>) -> MigrationResult {
    let tracker = ctx.active.tracker.clone();
    info!(migration_id = %ctx.active.id, "Migration started");

    let outcome = match timespan::to_std_positive(&ctx.options.operation_timeout) {
        Some(limit) => match tokio::time::timeout(limit, run_steps(&ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Stop seeding tasks that outlive the dropped pipeline future.
                ctx.active.cancel.cancel();
                ctx.active.pause.resume();
                Err(MigrationError::Timeout {
                    operation: "Migration".into(),
                    after: limit,
                })
            }
        },
        None => run_steps(&ctx).await,
    };

    let status = match outcome {
        Ok(()) => {
            let snapshot = tracker.snapshot();
            if snapshot.has_errors() || snapshot.statistics.records_skipped > 0 {
                MigrationStatus::CompletedWithErrors
            } else {
                MigrationStatus::Completed
            }
        }
        Err(e) if e.is_cancelled() => {
            tracker.add_issue(MigrationIssue::new(IssueLevel::Info, "Migration", "Migration cancelled by request"));
            MigrationStatus::Cancelled
        }
        Err(e) => {
            error!(migration_id = %ctx.active.id, error = %e, "Migration failed");
            tracker.add_error(IssueLevel::Critical, "Migration", &e);
            MigrationStatus::Failed
        }
    };

    let result = tracker.finish(status);
    info!(
        migration_id = %result.migration_id,
        status = %result.status,
        records_inserted = result.statistics.records_inserted,
        records_skipped = result.statistics.records_skipped,
        errors = result.statistics.error_count,
        "Migration finished"
    );
    registry.record(result.clone());
    result
}

async fn checkpoint(ctx: &PipelineContext) -> Result<()> {
    ctx.active.pause.wait_if_paused(&ctx.active.cancel).await?;
    Ok(())
}

async fn run_steps(ctx: &PipelineContext) -> Result<()> {
    validate_configuration(ctx).await?;
    check_prerequisites(ctx).await?;
    if ctx.options.create_missing_tables {
        create_tables(ctx).await?;
    }
    let seeded = seed_data(ctx).await?;
    if ctx.options.validate_against_legacy {
        compare_legacy(ctx, &seeded).await?;
    }
    if ctx.options.remove_authentication {
        remove_authentication(ctx).await?;
    }
    Ok(())
}

async fn validate_configuration(ctx: &PipelineContext) -> Result<()> {
    checkpoint(ctx).await?;
    let tracker = &ctx.active.tracker;
    tracker.begin_phase("Validating configuration", 0.0);

    let validation = ConfigurationValidator::new().validate_configuration(&ctx.options);
    for issue in &validation.warnings {
        tracker.add_issue(MigrationIssue::new(
            IssueLevel::Warning,
            "Configuration",
            format!("{}: {}", issue.property, issue.message),
        ));
    }
    for issue in &validation.errors {
        tracker.add_issue(MigrationIssue::new(
            IssueLevel::Error,
            "Configuration",
            format!("{}: {}", issue.property, issue.message),
        ));
    }
    if !validation.is_valid {
        return Err(MigrationError::Config {
            message: format!("{} configuration error(s) found", validation.errors.len()),
        });
    }
    tracker.advance(5.0);
    Ok(())
}

async fn check_prerequisites(ctx: &PipelineContext) -> Result<()> {
    checkpoint(ctx).await?;
    let tracker = &ctx.active.tracker;
    tracker.begin_phase("Checking prerequisites", 5.0);

    let checks = PrerequisiteChecker::new(ctx.db.clone())
        .check_prerequisites(&ctx.options)
        .await;
    for check in &checks.failed_checks {
        let level = if check.is_critical {
            IssueLevel::Error
        } else {
            IssueLevel::Warning
        };
        let mut issue = MigrationIssue::new(
            level,
            "Prerequisites",
            check
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{} failed", check.check_name)),
        );
        if let Some(recommendation) = &check.recommendation {
            issue = issue.with_details(recommendation.clone());
        }
        tracker.add_issue(issue);
    }
    if checks.has_critical_failures() {
        let names: Vec<&str> = checks.critical_failures().map(|c| c.check_name.as_str()).collect();
        return Err(MigrationError::Config {
            message: format!("Critical prerequisites not met: {}", names.join(", ")),
        });
    }
    tracker.advance(10.0);
    Ok(())
}

async fn create_tables(ctx: &PipelineContext) -> Result<()> {
    checkpoint(ctx).await?;
    let tracker = &ctx.active.tracker;
    tracker.begin_phase("Creating missing tables", 10.0);

    let schema = TableSchemaService::new(&ctx.options.seeding_options.sql_directory, ctx.db.clone());
    let created = schema
        .create_missing_tables(&ctx.options.include_tables, &ctx.active.cancel)
        .await?;
    for message in &created.errors {
        tracker.add_issue(MigrationIssue::new(IssueLevel::Error, "TableCreation", message.clone()));
    }
    let failed = !created.success;
    let first_error = created.errors.first().cloned();
    tracker.update(|state| state.table_creation_result = Some(created));

    if failed && !ctx.options.seeding_options.continue_on_error {
        return Err(MigrationError::Sql {
            message: first_error.unwrap_or_else(|| "Table creation failed".into()),
        });
    }
    tracker.advance(20.0);
    Ok(())
}

/// Seed every mapped CSV file; returns the tables that were seeded.
async fn seed_data(ctx: &PipelineContext) -> Result<Vec<String>> {
    checkpoint(ctx).await?;
    let tracker = &ctx.active.tracker;
    let options = &ctx.options;
    tracker.begin_phase("Seeding data", SEEDING_START);

    let seeder = DatabaseSeeder::from_options(ctx.db.clone(), &options.seeding_options);
    let planned_tables = seeder
        .available_csv_files()
        .await?
        .iter()
        .filter_map(|path| path.file_name().and_then(|n| n.to_str()))
        .filter(|name| options.includes_table(&seeder.map_csv_file_to_table_name(name)))
        .count() as u64;
    tracker.update(|state| state.statistics.total_tables = planned_tables);

    let seeding_ctx = SeedingContext {
        cancel: ctx.active.cancel.clone(),
        pause: ctx.active.pause.clone(),
        progress: Arc::new(tracker.clone()),
    };
    let mut seeding = seeder.seed_tables(options, &[], &seeding_ctx).await?;

    for message in &seeding.errors {
        tracker.add_issue(MigrationIssue::new(IssueLevel::Error, "Seeding", message.clone()));
    }
    seeding.tables_created = tracker
        .snapshot()
        .table_creation_result
        .map_or(0, |r| r.tables_created.len() as u64);

    let seeded: Vec<String> = seeding
        .table_results
        .iter()
        .filter(|t| t.success)
        .map(|t| t.table_name.clone())
        .collect();
    let failure = (!seeding.success).then(|| {
        seeding
            .table_results
            .iter()
            .find(|t| !t.success)
            .map(|t| match t.errors.first() {
                Some(SeedingIssue {
                    row_number: Some(row),
                    message,
                    ..
                }) => format!("Seeding failed for table {} at row {}: {}", t.table_name, row, message),
                Some(first) => format!("Seeding failed for table {}: {}", t.table_name, first.message),
                None => format!("Seeding failed for table {}", t.table_name),
            })
            .or_else(|| seeding.errors.first().cloned())
            .unwrap_or_else(|| "Seeding failed".into())
    });
    tracker.update(|state| state.seeding_result = Some(seeding));

    if let Some(message) = failure {
        if !options.seeding_options.continue_on_error {
            return Err(MigrationError::Other(message));
        }
    }

    match seeder.validate_data_integrity().await {
        Ok(integrity) => {
            for issue in integrity.issues {
                tracker.add_issue(MigrationIssue::new(IssueLevel::Warning, "Integrity", issue));
            }
        }
        Err(e) => {
            warn!(error = %e, "Integrity check could not run");
            tracker.add_error(IssueLevel::Warning, "Integrity", &e);
        }
    }
    tracker.advance(SEEDING_END);
    Ok(seeded)
}

async fn compare_legacy(ctx: &PipelineContext, tables: &[String]) -> Result<()> {
    checkpoint(ctx).await?;
    let tracker = &ctx.active.tracker;
    let validation = &ctx.options.validation_options;
    tracker.begin_phase("Validating against legacy database", SEEDING_END);

    match compare_with_legacy(&ctx.db, validation, tables, &ctx.active.cancel).await {
        Ok(compared) => {
            for cmp in compared.results.iter().filter(|c| c.error.is_some() || !c.data_matches) {
                let message = match &cmp.error {
                    Some(e) => format!("Comparison failed: {}", e),
                    None => format!("{} discrepancies found", cmp.discrepancy_count),
                };
                tracker.add_issue(
                    MigrationIssue::new(IssueLevel::Warning, "LegacyValidation", message)
                        .with_table(&cmp.query_name),
                );
            }
            tracker.update(|state| state.validation_result = Some(compared));
        }
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            let level = if validation.legacy_validation_required {
                IssueLevel::Error
            } else {
                IssueLevel::Warning
            };
            warn!(error = %e, "Legacy comparison could not run");
            tracker.add_error(level, "LegacyValidation", &e);
        }
    }
    tracker.advance(95.0);
    Ok(())
}

async fn remove_authentication(ctx: &PipelineContext) -> Result<()> {
    checkpoint(ctx).await?;
    let tracker = &ctx.active.tracker;
    tracker.begin_phase("Removing authentication", 95.0);

    let summary = run_auth_removal(
        ctx.auth.as_ref(),
        &ctx.options.auth_removal_options,
        &ctx.active.cancel,
    )
    .await?;
    for message in &summary.errors {
        tracker.add_issue(MigrationIssue::new(IssueLevel::Error, "AuthRemoval", message.clone()));
    }
    tracker.update(|state| state.auth_removal_result = Some(summary));
    tracker.advance(99.0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{CancellationToken, PauseGate};
    use crate::migration::auth::NoopAuthRemoval;
    use crate::migration::tracker::ProgressTracker;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        _dir: TempDir,
        db: TargetDatabase,
        options: MigrationOptions,
    }

    async fn fixture(csv: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let csv_dir = dir.path().join("csv");
        let sql_dir = dir.path().join("sql");
        let log_dir = dir.path().join("logs");
        for d in [&csv_dir, &sql_dir, &log_dir] {
            std::fs::create_dir_all(d).unwrap();
        }
        std::fs::write(
            sql_dir.join("Test.sql"),
            "CREATE TABLE Test (ID INTEGER PRIMARY KEY, Name NVARCHAR(40) NOT NULL);",
        )
        .unwrap();
        std::fs::write(csv_dir.join("test.csv"), csv).unwrap();

        let db = TargetDatabase::open(dir.path().join("target.db")).unwrap();
        let mut options = MigrationOptions::default();
        options.seeding_options.csv_directory = csv_dir.display().to_string();
        options.seeding_options.sql_directory = sql_dir.display().to_string();
        options.logging_options.log_directory = log_dir.display().to_string();
        Fixture { _dir: dir, db, options }
    }

    fn context(f: &Fixture) -> (PipelineContext, Arc<MigrationRegistry>) {
        let id = Uuid::new_v4();
        let registry = Arc::new(MigrationRegistry::new(10));
        let active = registry
            .try_acquire(ActiveMigration {
                id,
                tracker: ProgressTracker::new(MigrationResult::new(id), false),
                cancel: CancellationToken::new(),
                pause: PauseGate::new(),
            })
            .unwrap();
        let ctx = PipelineContext {
            db: f.db.clone(),
            options: f.options.clone(),
            active,
            auth: Arc::new(NoopAuthRemoval),
        };
        (ctx, registry)
    }

    #[tokio::test]
    async fn test_clean_run_completes() {
        let f = fixture("ID,Name\n1,TAN\n2,KF\n").await;
        let (ctx, registry) = context(&f);
        let result = run_migration(ctx, registry.clone()).await;

        assert_eq!(result.status, MigrationStatus::Completed, "{:?}", result.errors);
        assert_eq!(result.statistics.progress_percentage, 100.0);
        assert_eq!(result.statistics.records_inserted, 2);
        assert_eq!(result.statistics.total_tables, 1);
        assert_eq!(result.table_creation_result.unwrap().tables_created, vec!["Test"]);
        assert_eq!(registry.history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_rows_complete_with_errors() {
        let f = fixture("ID,Name\n1,TAN\nabc,KF\n").await;
        let (ctx, registry) = context(&f);
        let result = run_migration(ctx, registry).await;

        assert_eq!(result.status, MigrationStatus::CompletedWithErrors);
        assert_eq!(result.statistics.records_skipped, 1);
        assert!(result.errors.iter().any(|e| e.component == "Seeding" && e.record_number.is_some()));
    }

    #[tokio::test]
    async fn test_invalid_configuration_fails_run() {
        let mut f = fixture("ID,Name\n1,TAN\n").await;
        f.options.seeding_options.batch_size = -1;
        let (ctx, registry) = context(&f);
        let result = run_migration(ctx, registry).await;

        assert_eq!(result.status, MigrationStatus::Failed);
        assert!(result.errors.iter().any(|e| e.component == "Configuration"));
        assert!(result.seeding_result.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_start_is_cancelled() {
        let f = fixture("ID,Name\n1,TAN\n").await;
        let (ctx, registry) = context(&f);
        ctx.active.cancel.cancel();
        let result = run_migration(ctx, registry).await;
        assert_eq!(result.status, MigrationStatus::Cancelled);
    }
}
