//! Migration control service.
//!
//! Starts pipeline runs on the runtime, enforces the single active run, and
//! answers status, history, statistics and report queries.

use super::auth::{AuthRemovalService, NoopAuthRemoval};
use super::pipeline::{run_migration, PipelineContext};
use super::registry::{ActiveMigration, MigrationRegistry};
use super::report::{render_logs, render_report};
use super::tracker::ProgressTracker;
use super::types::{
    IssueLevel, LogFilter, MigrationIssue, MigrationProgress, MigrationResult, MigrationStatisticsSummary,
    MigrationStatus, MigrationStatusSummary, ReportFormat,
};
use crate::cancel::{CancellationToken, PauseGate};
use crate::config::{MigrationOptions, ServiceConfig};
use crate::database::TargetDatabase;
use crate::error::{MigrationError, Result};
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How often `shutdown` re-checks whether the run has stopped.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A rendered report and the format it was rendered in.
#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub format: ReportFormat,
    pub file_name: String,
    pub content: String,
}

/// Orchestrates migration runs against one target database.
pub struct MigrationControlService {
    db: TargetDatabase,
    registry: Arc<MigrationRegistry>,
    auth: Arc<dyn AuthRemovalService>,
}

impl MigrationControlService {
    /// Create a service with the no-op auth-removal collaborator.
    pub fn new(db: TargetDatabase) -> Self {
        Self::with_auth_removal(db, Arc::new(NoopAuthRemoval))
    }

    pub fn with_auth_removal(db: TargetDatabase, auth: Arc<dyn AuthRemovalService>) -> Self {
        Self {
            db,
            registry: Arc::new(MigrationRegistry::new(ServiceConfig::HISTORY_CAPACITY)),
            auth,
        }
    }

    /// The target database runs are executed against.
    pub fn database(&self) -> &TargetDatabase {
        &self.db
    }

    /// Start a run in the background and return its initial summary.
    ///
    /// Fails with `Conflict` while another run is InProgress or Paused.
    pub fn start_migration(&self, options: MigrationOptions) -> Result<MigrationStatusSummary> {
        let (summary, _handle) = self.launch(options)?;
        Ok(summary)
    }

    /// Run a migration and wait for its terminal result.
    pub async fn execute_full_migration(&self, options: MigrationOptions) -> Result<MigrationResult> {
        let (_, handle) = self.launch(options)?;
        Ok(handle.await?)
    }

    fn launch(&self, options: MigrationOptions) -> Result<(MigrationStatusSummary, JoinHandle<MigrationResult>)> {
        let id = Uuid::new_v4();
        let tracker = ProgressTracker::new(
            MigrationResult::new(id),
            options.logging_options.include_stack_trace,
        );
        let active = self.registry.try_acquire(ActiveMigration {
            id,
            tracker: tracker.clone(),
            cancel: CancellationToken::new(),
            pause: PauseGate::new(),
        })?;
        let summary = MigrationStatusSummary::from(&tracker.snapshot());

        let ctx = PipelineContext {
            db: self.db.clone(),
            options,
            active,
            auth: Arc::clone(&self.auth),
        };
        let registry = Arc::clone(&self.registry);
        let handle = tokio::spawn(async move {
            let pipeline = tokio::spawn(run_migration(ctx, Arc::clone(&registry)));
            match pipeline.await {
                Ok(result) => result,
                Err(e) => {
                    // A panicking pipeline must still release the slot.
                    error!(migration_id = %id, error = %e, "Migration task aborted");
                    tracker.add_issue(MigrationIssue::new(
                        IssueLevel::Critical,
                        "Migration",
                        format!("Migration task aborted: {}", e),
                    ));
                    let result = tracker.finish(MigrationStatus::Failed);
                    registry.record(result.clone());
                    result
                }
            }
        });
        info!(migration_id = %id, "Migration queued");
        Ok((summary, handle))
    }

    pub fn is_migration_running(&self) -> bool {
        self.registry.running().is_some()
    }

    /// Snapshot of the latest run, live or finished.
    pub fn get_current_migration(&self) -> Option<MigrationResult> {
        self.registry.current().map(|m| m.tracker.snapshot())
    }

    /// Summary of the latest run, or a NotStarted placeholder.
    pub fn get_status(&self) -> MigrationStatusSummary {
        self.get_current_migration()
            .map(|r| MigrationStatusSummary::from(&r))
            .unwrap_or_else(MigrationStatusSummary::not_started)
    }

    pub fn get_migration(&self, id: Uuid) -> Result<MigrationResult> {
        self.registry
            .get(id)
            .ok_or_else(|| MigrationError::not_found(format!("Migration {}", id)))
    }

    /// Live progress; `NotFound` when nothing is running.
    pub fn get_progress(&self) -> Result<MigrationProgress> {
        self.registry
            .running()
            .map(|m| MigrationProgress::from(&m.tracker.snapshot()))
            .ok_or_else(|| MigrationError::not_found("Running migration"))
    }

    /// Request cancellation. Returns false when nothing is running.
    pub fn cancel_migration(&self) -> bool {
        let Some(active) = self.registry.running() else {
            return false;
        };
        active.cancel.cancel();
        active
            .tracker
            .transition(MigrationStatus::Paused, MigrationStatus::InProgress);
        active.pause.resume();
        info!(migration_id = %active.id, "Migration cancellation requested");
        true
    }

    /// Pause at the next batch boundary.
    pub fn pause_migration(&self) -> Result<()> {
        let active = self
            .registry
            .running()
            .ok_or_else(|| MigrationError::invalid_state("No migration is running"))?;
        if !active
            .tracker
            .transition(MigrationStatus::InProgress, MigrationStatus::Paused)
        {
            return Err(MigrationError::invalid_state(format!(
                "Migration cannot be paused while {}",
                active.tracker.status()
            )));
        }
        active.pause.pause();
        Ok(())
    }

    pub fn resume_migration(&self) -> Result<()> {
        let active = self
            .registry
            .running()
            .ok_or_else(|| MigrationError::invalid_state("No migration is running"))?;
        if !active
            .tracker
            .transition(MigrationStatus::Paused, MigrationStatus::InProgress)
        {
            return Err(MigrationError::invalid_state("Migration is not paused"));
        }
        active.pause.resume();
        Ok(())
    }

    /// Finished runs, newest first.
    pub fn migration_history(&self, limit: usize) -> Vec<MigrationResult> {
        self.registry.history(limit)
    }

    /// Aggregate over runs started in the last `days` days (default window
    /// when `days` is not positive).
    pub fn migration_statistics(&self, days: i64) -> MigrationStatisticsSummary {
        let days = if days > 0 {
            days
        } else {
            ServiceConfig::DEFAULT_STATISTICS_DAYS
        };
        let cutoff = TimeDelta::try_days(days).and_then(|d| Utc::now().checked_sub_signed(d));
        let runs: Vec<MigrationResult> = self
            .registry
            .all_runs(ServiceConfig::STATISTICS_SAMPLE)
            .into_iter()
            .filter(|r| cutoff.map_or(true, |c| r.start_time >= c))
            .collect();

        let mut summary = MigrationStatisticsSummary {
            period_days: days,
            total_migrations: runs.len() as u64,
            ..Default::default()
        };
        let mut timed = 0i32;
        let mut total_duration = TimeDelta::zero();
        for run in &runs {
            match run.status {
                s if s.is_successful() => summary.successful_migrations += 1,
                MigrationStatus::Cancelled => summary.cancelled_migrations += 1,
                _ => summary.failed_migrations += 1,
            }
            if let Some(duration) = run.duration {
                total_duration += duration;
                timed += 1;
            }
            summary.total_records_processed += run.statistics.records_processed;
            summary.total_tables_processed += run.statistics.tables_processed;
        }
        if summary.total_migrations > 0 {
            summary.success_rate =
                summary.successful_migrations as f64 / summary.total_migrations as f64 * 100.0;
        }
        if timed > 0 {
            summary.average_duration = total_duration / timed;
        }
        summary
    }

    /// Render a report for run `id` in `format` ("json" or "csv").
    pub fn generate_report(&self, id: Uuid, format: &str) -> Result<GeneratedReport> {
        let format: ReportFormat = format.parse()?;
        let result = self.get_migration(id)?;
        Ok(GeneratedReport {
            format,
            file_name: format!("migration-report-{}.{}", id, format.extension()),
            content: render_report(&result, format)?,
        })
    }

    /// Plain-text issue log for run `id`, filtered by `level`.
    pub fn migration_logs(&self, id: Uuid, level: &str) -> Result<String> {
        let filter: LogFilter = level.parse().unwrap_or_default();
        let result = self.get_migration(id)?;
        Ok(render_logs(&result, filter))
    }

    /// Cancel any running migration and wait up to the grace period for it
    /// to stop.
    pub async fn shutdown(&self) {
        if !self.cancel_migration() {
            return;
        }
        let started = Instant::now();
        while self.is_migration_running() {
            if started.elapsed() >= ServiceConfig::SHUTDOWN_GRACE {
                warn!("Migration still running after shutdown grace period");
                return;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
        info!("Migration service shut down");
    }
}

impl std::fmt::Debug for MigrationControlService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationControlService")
            .field("db", &self.db)
            .field("status", &self.registry.status())
            .finish()
    }
}
