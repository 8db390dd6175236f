//! The single active-migration slot and the run history.

use super::tracker::ProgressTracker;
use super::types::{MigrationResult, MigrationStatus};
use crate::cancel::{CancellationToken, PauseGate};
use crate::error::{MigrationError, Result};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Handles to the run occupying (or last occupying) the slot.
#[derive(Debug, Clone)]
pub(crate) struct ActiveMigration {
    pub id: Uuid,
    pub tracker: ProgressTracker,
    pub cancel: CancellationToken,
    pub pause: PauseGate,
}

impl ActiveMigration {
    pub fn is_running(&self) -> bool {
        self.tracker.status().is_active()
    }
}

/// Owns the single-flight slot. The slot keeps the latest run after it
/// finishes so status queries still see it; a new start replaces it.
#[derive(Debug)]
pub(crate) struct MigrationRegistry {
    slot: Mutex<Option<ActiveMigration>>,
    history: RwLock<VecDeque<MigrationResult>>,
    capacity: usize,
}

impl MigrationRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: Mutex::new(None),
            history: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveMigration>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `candidate`, or fail with `Conflict` naming the run
    /// that holds it.
    pub fn try_acquire(&self, candidate: ActiveMigration) -> Result<ActiveMigration> {
        let mut slot = self.slot();
        if let Some(current) = slot.as_ref().filter(|m| m.is_running()) {
            return Err(MigrationError::Conflict {
                migration_id: current.id.to_string(),
            });
        }
        debug!(migration_id = %candidate.id, "Acquired migration slot");
        *slot = Some(candidate.clone());
        Ok(candidate)
    }

    /// Latest run, finished or not.
    pub fn current(&self) -> Option<ActiveMigration> {
        self.slot().clone()
    }

    /// The run holding the slot, if it is still InProgress or Paused.
    pub fn running(&self) -> Option<ActiveMigration> {
        self.current().filter(ActiveMigration::is_running)
    }

    /// Append a finished run, newest first.
    pub fn record(&self, result: MigrationResult) {
        debug_assert!(result.status.is_terminal());
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        history.retain(|r| r.migration_id != result.migration_id);
        history.push_front(result);
        history.truncate(self.capacity);
    }

    /// Up to `limit` finished runs, newest first.
    pub fn history(&self, limit: usize) -> Vec<MigrationResult> {
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
        history.iter().take(limit).cloned().collect()
    }

    /// Look up a run by id, live or finished.
    pub fn get(&self, id: Uuid) -> Option<MigrationResult> {
        if let Some(active) = self.current().filter(|m| m.id == id) {
            return Some(active.tracker.snapshot());
        }
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
        history.iter().find(|r| r.migration_id == id).cloned()
    }

    /// Finished runs plus the live one, for statistics.
    pub fn all_runs(&self, limit: usize) -> Vec<MigrationResult> {
        let mut runs = Vec::new();
        if let Some(active) = self.running() {
            runs.push(active.tracker.snapshot());
        }
        runs.extend(self.history(limit));
        runs.truncate(limit);
        runs
    }

    pub fn status(&self) -> MigrationStatus {
        self.current()
            .map(|m| m.tracker.status())
            .unwrap_or(MigrationStatus::NotStarted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> ActiveMigration {
        let id = Uuid::new_v4();
        ActiveMigration {
            id,
            tracker: ProgressTracker::new(MigrationResult::new(id), false),
            cancel: CancellationToken::new(),
            pause: PauseGate::new(),
        }
    }

    #[test]
    fn test_second_acquire_conflicts_until_finished() {
        let registry = MigrationRegistry::new(10);
        let first = registry.try_acquire(candidate()).unwrap();

        let err = registry.try_acquire(candidate()).unwrap_err();
        assert!(matches!(err, MigrationError::Conflict { ref migration_id } if *migration_id == first.id.to_string()));

        let done = first.tracker.finish(MigrationStatus::Completed);
        registry.record(done);
        assert!(registry.running().is_none());
        assert!(registry.try_acquire(candidate()).is_ok());
    }

    #[test]
    fn test_history_newest_first_and_capped() {
        let registry = MigrationRegistry::new(3);
        let mut ids = Vec::new();
        for _ in 0..5 {
            let m = registry.try_acquire(candidate()).unwrap();
            ids.push(m.id);
            registry.record(m.tracker.finish(MigrationStatus::Failed));
        }
        let history = registry.history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].migration_id, ids[4]);
        assert_eq!(history[2].migration_id, ids[2]);
        assert!(registry.get(ids[0]).is_none());
        assert!(registry.get(ids[4]).is_some());
    }

    #[test]
    fn test_get_returns_live_snapshot() {
        let registry = MigrationRegistry::new(3);
        let m = registry.try_acquire(candidate()).unwrap();
        m.tracker.advance(42.0);
        let live = registry.get(m.id).unwrap();
        assert_eq!(live.status, MigrationStatus::InProgress);
        assert_eq!(live.statistics.progress_percentage, 42.0);
        assert_eq!(registry.all_runs(10).len(), 1);
    }
}
