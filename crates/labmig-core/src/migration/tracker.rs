//! Shared, lock-guarded view of a running migration.

use super::types::{IssueLevel, MigrationIssue, MigrationResult, MigrationStatus, PhaseTiming};
use crate::config::timespan;
use crate::seeding::{BatchProgress, SeedingProgress, TableSeedingResult};
use chrono::{TimeDelta, Utc};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info};

/// Progress window covered by the seeding phase.
pub(crate) const SEEDING_START: f64 = 20.0;
pub(crate) const SEEDING_END: f64 = 85.0;

/// Tracks one run. Clones share the same state.
#[derive(Debug, Clone)]
pub(crate) struct ProgressTracker {
    state: Arc<RwLock<MigrationResult>>,
    started: Instant,
    include_details: bool,
}

impl ProgressTracker {
    pub fn new(result: MigrationResult, include_details: bool) -> Self {
        Self {
            state: Arc::new(RwLock::new(result)),
            started: Instant::now(),
            include_details,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MigrationResult> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MigrationResult> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> MigrationResult {
        self.read().clone()
    }

    pub fn status(&self) -> MigrationStatus {
        self.read().status
    }

    pub fn include_details(&self) -> bool {
        self.include_details
    }

    /// Apply `f` unless the run already reached a terminal state.
    pub fn update(&self, f: impl FnOnce(&mut MigrationResult)) {
        let mut state = self.write();
        if !state.status.is_terminal() {
            f(&mut state);
        }
    }

    /// Change between InProgress and Paused; returns false when the run is
    /// not in `from`.
    pub fn transition(&self, from: MigrationStatus, to: MigrationStatus) -> bool {
        let mut state = self.write();
        if state.status != from {
            return false;
        }
        state.status = to;
        info!(migration_id = %state.migration_id, from = %from, to = %to, "Migration status changed");
        true
    }

    /// Enter a pipeline phase at `percent`.
    pub fn begin_phase(&self, operation: &str, percent: f64) {
        let migration_id = self.read().migration_id;
        info!(migration_id = %migration_id, operation, percent, "Migration phase started");
        self.update(|state| {
            close_phase(state, true);
            let errors = state.statistics.error_count;
            state.phases.push(PhaseTiming::start(operation, errors));
            state.current_operation = Some(operation.to_string());
        });
        self.advance(percent);
    }

    /// Raise progress to `percent`; lower values are ignored.
    pub fn advance(&self, percent: f64) {
        let elapsed = self.started.elapsed();
        self.update(|state| {
            let stats = &mut state.statistics;
            stats.progress_percentage = stats.progress_percentage.max(percent.clamp(0.0, 100.0));
            let progress = stats.progress_percentage;
            state.estimated_time_remaining = if progress > 0.0 && progress < 100.0 {
                let remaining = elapsed.as_secs_f64() * (100.0 - progress) / progress;
                timespan::from_std(std::time::Duration::from_secs_f64(remaining))
            } else {
                TimeDelta::zero()
            };
        });
    }

    pub fn add_issue(&self, issue: MigrationIssue) {
        debug!(level = %issue.level, component = %issue.component, "{}", issue.message);
        self.update(|state| {
            if issue.is_error() {
                state.statistics.error_count += 1;
            }
            state.errors.push(issue);
        });
    }

    /// Record an error, attaching its cause chain when details are enabled.
    pub fn add_error(&self, level: IssueLevel, component: &str, error: &crate::error::MigrationError) {
        let mut issue = MigrationIssue::new(level, component, error.to_string());
        if self.include_details {
            issue = issue.with_details(error.chain_details());
        }
        self.add_issue(issue);
    }

    /// Move to a terminal status and return the final state.
    pub fn finish(&self, status: MigrationStatus) -> MigrationResult {
        let mut state = self.write();
        if !state.status.is_terminal() {
            close_phase(
                &mut state,
                !matches!(status, MigrationStatus::Failed | MigrationStatus::Cancelled),
            );
            let end = Utc::now();
            state.status = status;
            state.end_time = Some(end);
            state.duration = Some(end.signed_duration_since(state.start_time));
            state.estimated_time_remaining = TimeDelta::zero();
            state.current_operation = Some(match status {
                MigrationStatus::Cancelled => "Migration cancelled".to_string(),
                MigrationStatus::Failed => "Migration failed".to_string(),
                _ => "Migration completed".to_string(),
            });
            if status.is_successful() {
                state.statistics.progress_percentage = 100.0;
            }
        }
        state.clone()
    }
}

/// Close the running phase, if any. It succeeded when it `completed` and
/// recorded no new errors.
fn close_phase(state: &mut MigrationResult, completed: bool) {
    let errors = state.statistics.error_count;
    if let Some(phase) = state.phases.last_mut().filter(|p| p.is_open()) {
        phase.duration = Some(Utc::now().signed_duration_since(phase.started));
        phase.success = completed && errors == phase.errors_at_start;
    }
}

impl SeedingProgress for ProgressTracker {
    fn rows_planned(&self, total_rows: u64) {
        self.update(|state| state.statistics.total_records = total_rows);
    }

    fn table_started(&self, table: &str) {
        self.update(|state| state.current_operation = Some(format!("Seeding {}", table)));
    }

    fn batch_completed(&self, _table: &str, batch: BatchProgress) {
        let mut percent = None;
        self.update(|state| {
            let stats = &mut state.statistics;
            stats.records_processed += batch.rows_processed;
            stats.records_inserted += batch.rows_inserted;
            stats.records_skipped += batch.rows_skipped;
            if stats.total_records > 0 {
                let share = (stats.records_processed as f64 / stats.total_records as f64).min(1.0);
                percent = Some(SEEDING_START + (SEEDING_END - SEEDING_START) * share);
            }
        });
        if let Some(percent) = percent {
            self.advance(percent);
        }
    }

    fn table_completed(&self, result: &TableSeedingResult) {
        self.update(|state| state.statistics.tables_processed += 1);
        for error in &result.errors {
            self.add_issue(
                MigrationIssue::new(IssueLevel::Error, "Seeding", error.message.clone())
                    .with_table(&result.table_name)
                    .with_record(error.row_number.map(|r| r as u64)),
            );
        }
        if result.suppressed_errors > 0 {
            self.add_issue(
                MigrationIssue::new(
                    IssueLevel::Warning,
                    "Seeding",
                    format!("{} further row errors not recorded", result.suppressed_errors),
                )
                .with_table(&result.table_name),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(MigrationResult::new(Uuid::new_v4()), false)
    }

    #[test]
    fn test_progress_is_monotonic() {
        let t = tracker();
        t.advance(40.0);
        t.advance(10.0);
        assert_eq!(t.snapshot().statistics.progress_percentage, 40.0);
        t.advance(250.0);
        assert_eq!(t.snapshot().statistics.progress_percentage, 100.0);
    }

    #[test]
    fn test_batches_map_into_seeding_window() {
        let t = tracker();
        t.rows_planned(200);
        t.batch_completed(
            "Test",
            BatchProgress {
                batch_number: 1,
                rows_processed: 100,
                rows_inserted: 98,
                rows_skipped: 2,
            },
        );
        let snap = t.snapshot();
        assert_eq!(snap.statistics.records_processed, 100);
        assert_eq!(snap.statistics.records_skipped, 2);
        let expected = SEEDING_START + (SEEDING_END - SEEDING_START) / 2.0;
        assert!((snap.statistics.progress_percentage - expected).abs() < 1e-9);
    }

    #[test]
    fn test_terminal_state_is_frozen() {
        let t = tracker();
        let done = t.finish(MigrationStatus::Completed);
        assert_eq!(done.statistics.progress_percentage, 100.0);
        assert!(done.end_time.is_some());

        t.add_issue(MigrationIssue::new(IssueLevel::Error, "Seeding", "late"));
        assert!(!t.transition(MigrationStatus::InProgress, MigrationStatus::Paused));
        let again = t.finish(MigrationStatus::Failed);
        assert_eq!(again.status, MigrationStatus::Completed);
        assert!(again.errors.is_empty());
    }

    #[test]
    fn test_phases_close_on_transition_and_finish() {
        let t = tracker();
        t.begin_phase("Validating configuration", 0.0);
        t.begin_phase("Seeding data", SEEDING_START);
        t.add_issue(MigrationIssue::new(IssueLevel::Error, "Seeding", "row 3 rejected"));

        let live = t.snapshot();
        assert_eq!(live.phases.len(), 2);
        assert!(!live.phases[0].is_open());
        assert!(live.phases[0].success);
        assert!(live.phases[1].is_open());

        let done = t.finish(MigrationStatus::CompletedWithErrors);
        let names: Vec<&str> = done.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Validating configuration", "Seeding data"]);
        assert!(done.phases.iter().all(|p| !p.is_open()));
        assert!(!done.phases[1].success);
        assert!(done.phases[1].duration.unwrap() >= TimeDelta::zero());
    }

    #[test]
    fn test_failed_run_marks_open_phase_failed() {
        let t = tracker();
        t.begin_phase("Checking prerequisites", 5.0);
        let done = t.finish(MigrationStatus::Failed);
        assert!(!done.phases[0].success);
        assert!(done.phases[0].duration.is_some());
    }

    #[test]
    fn test_error_issues_counted() {
        let t = tracker();
        t.add_issue(MigrationIssue::new(IssueLevel::Warning, "Preflight", "w"));
        t.add_issue(MigrationIssue::new(IssueLevel::Error, "Seeding", "e"));
        let snap = t.snapshot();
        assert_eq!(snap.statistics.error_count, 1);
        assert!(snap.has_errors());
    }
}
