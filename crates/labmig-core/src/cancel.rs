//! Cooperative cancellation and pause control for long-running jobs.
//!
//! A running migration holds a `CancellationToken` and a `PauseGate` and polls
//! both at batch and table boundaries. Nothing here interrupts work that is
//! already in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Shared stop flag for one migration run.
///
/// Every clone observes the same flag. Seeding tasks call `check()` at each
/// table and batch boundary and unwind with `CancelledError`.
///
/// ```
/// use labmig_core::cancel::CancellationToken;
///
/// let run = CancellationToken::new();
/// let worker = run.clone();
/// run.cancel();
/// assert!(worker.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the run as cancelled. Cannot be undone.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(CancelledError)` once `cancel()` has been called on any clone.
    pub fn check(&self) -> Result<(), CancelledError> {
        match self.is_cancelled() {
            true => Err(CancelledError),
            false => Ok(()),
        }
    }
}

/// Marker returned by `check()` and `PauseGate::wait_if_paused` after a cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Migration was cancelled")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::MigrationError {
    fn from(_: CancelledError) -> Self {
        crate::error::MigrationError::Cancelled
    }
}

/// How often a paused job re-checks its cancellation token.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A shared pause switch for a running job.
///
/// The controlling side calls `pause()`/`resume()`; the worker awaits
/// `wait_if_paused()` between batches. Cancellation is still observed while
/// paused.
#[derive(Debug, Clone, Default)]
pub struct PauseGate {
    paused: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl PauseGate {
    /// Create a new, unpaused gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to pause at its next boundary.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Release a paused worker.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if a pause has been requested.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Block while the gate is paused.
    ///
    /// Returns `Err(CancelledError)` if the token is cancelled before or during
    /// the wait.
    pub async fn wait_if_paused(&self, token: &CancellationToken) -> Result<(), CancelledError> {
        while self.is_paused() {
            token.check()?;
            let notified = self.notify.notified();
            if !self.is_paused() {
                break;
            }
            let _ = tokio::time::timeout(PAUSE_POLL_INTERVAL, notified).await;
        }
        token.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_seen_by_clones() {
        let run = CancellationToken::new();
        let worker = run.clone();
        assert!(!worker.is_cancelled());
        assert!(worker.check().is_ok());

        run.cancel();
        assert!(worker.is_cancelled());
        assert_eq!(worker.check(), Err(CancelledError));
        assert_eq!(CancelledError.to_string(), "Migration was cancelled");
    }

    #[test]
    fn test_cancelled_error_converts() {
        let err: crate::error::MigrationError = CancelledError.into();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_unpaused_gate_passes_through() {
        let gate = PauseGate::new();
        let token = CancellationToken::new();
        assert!(gate.wait_if_paused(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_resume_releases_waiter() {
        let gate = PauseGate::new();
        let token = CancellationToken::new();
        gate.pause();

        let worker_gate = gate.clone();
        let worker_token = token.clone();
        let waiter =
            tokio::spawn(async move { worker_gate.wait_if_paused(&worker_token).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.resume();
        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let gate = PauseGate::new();
        let token = CancellationToken::new();
        gate.pause();
        token.cancel();
        assert_eq!(gate.wait_if_paused(&token).await, Err(CancelledError));
    }
}
