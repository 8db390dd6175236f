//! The authentication-removal collaborator and the step sequence the
//! pipeline drives through it.

use crate::cancel::CancellationToken;
use crate::config::{timespan, AuthRemovalOptions};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub success: bool,
    pub backup_id: String,
    pub backup_location: String,
    pub backed_up_files: Vec<String>,
    pub backup_size_bytes: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRemovalResult {
    pub success: bool,
    pub removed_components: Vec<String>,
    pub modified_files: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendUpdateResult {
    pub success: bool,
    pub modified_components: Vec<String>,
    pub removed_guards: Vec<String>,
    pub removed_interceptors: Vec<String>,
    pub updated_routes: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigCleanupResult {
    pub success: bool,
    pub cleaned_config_files: Vec<String>,
    pub removed_settings: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub success: bool,
    pub restored_files: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthBackupInfo {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub location: String,
    pub file_count: usize,
}

/// Removes legacy authentication from the application. The pipeline only
/// consumes this interface.
#[async_trait]
pub trait AuthRemovalService: Send + Sync {
    async fn backup_current_auth_config(&self) -> Result<BackupResult>;

    async fn remove_jwt_authentication(&self) -> Result<AuthRemovalResult>;

    async fn update_frontend_auth(&self) -> Result<FrontendUpdateResult>;

    async fn cleanup_auth_configuration(&self) -> Result<ConfigCleanupResult>;

    async fn rollback_authentication(&self, backup_id: &str) -> Result<RollbackResult>;

    async fn available_backups(&self) -> Result<Vec<AuthBackupInfo>>;
}

/// Collaborator that changes nothing. Used when no real implementation is
/// wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuthRemoval;

#[async_trait]
impl AuthRemovalService for NoopAuthRemoval {
    async fn backup_current_auth_config(&self) -> Result<BackupResult> {
        warn!("No authentication removal service configured; backup skipped");
        Ok(BackupResult {
            success: true,
            ..Default::default()
        })
    }

    async fn remove_jwt_authentication(&self) -> Result<AuthRemovalResult> {
        warn!("No authentication removal service configured; API left unchanged");
        Ok(AuthRemovalResult {
            success: true,
            ..Default::default()
        })
    }

    async fn update_frontend_auth(&self) -> Result<FrontendUpdateResult> {
        Ok(FrontendUpdateResult {
            success: true,
            ..Default::default()
        })
    }

    async fn cleanup_auth_configuration(&self) -> Result<ConfigCleanupResult> {
        Ok(ConfigCleanupResult {
            success: true,
            ..Default::default()
        })
    }

    async fn rollback_authentication(&self, _backup_id: &str) -> Result<RollbackResult> {
        Ok(RollbackResult {
            success: true,
            ..Default::default()
        })
    }

    async fn available_backups(&self) -> Result<Vec<AuthBackupInfo>> {
        Ok(Vec::new())
    }
}

/// What the auth-removal phase did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRemovalSummary {
    pub success: bool,
    pub backup: Option<BackupResult>,
    pub auth_removal: Option<AuthRemovalResult>,
    pub frontend_update: Option<FrontendUpdateResult>,
    pub config_cleanup: Option<ConfigCleanupResult>,
    pub errors: Vec<String>,
    #[serde(with = "timespan")]
    pub duration: TimeDelta,
}

/// Run backup → remove JWT → update frontend → clean up configuration.
///
/// A failed backup stops the chain. Later steps are attempted even if an
/// earlier non-backup step failed. Returns `Err` only on cancellation.
pub async fn run_auth_removal(
    service: &dyn AuthRemovalService,
    options: &AuthRemovalOptions,
    cancel: &CancellationToken,
) -> Result<AuthRemovalSummary> {
    let started = Instant::now();
    let mut summary = AuthRemovalSummary::default();

    if options.create_backup {
        cancel.check()?;
        match service.backup_current_auth_config().await {
            Ok(backup) => {
                let ok = backup.success;
                summary.errors.extend(backup.errors.iter().cloned());
                summary.backup = Some(backup);
                if !ok {
                    summary.errors.push("Authentication backup failed; removal skipped".into());
                }
            }
            Err(e) => summary.errors.push(format!("Authentication backup failed: {}", e)),
        }
        if !summary.errors.is_empty() {
            summary.duration = timespan::from_std(started.elapsed());
            warn!("Stopping authentication removal after failed backup");
            return Ok(summary);
        }
    }

    if options.remove_from_api {
        cancel.check()?;
        match service.remove_jwt_authentication().await {
            Ok(r) => {
                summary.errors.extend(r.errors.iter().cloned());
                summary.auth_removal = Some(r);
            }
            Err(e) => summary.errors.push(format!("JWT removal failed: {}", e)),
        }
    }

    if options.remove_from_frontend {
        cancel.check()?;
        match service.update_frontend_auth().await {
            Ok(r) => {
                summary.errors.extend(r.errors.iter().cloned());
                summary.frontend_update = Some(r);
            }
            Err(e) => summary.errors.push(format!("Frontend update failed: {}", e)),
        }
    }

    cancel.check()?;
    match service.cleanup_auth_configuration().await {
        Ok(r) => {
            summary.errors.extend(r.errors.iter().cloned());
            summary.config_cleanup = Some(r);
        }
        Err(e) => summary.errors.push(format!("Configuration cleanup failed: {}", e)),
    }

    let steps_ok = summary.auth_removal.as_ref().map_or(true, |r| r.success)
        && summary.frontend_update.as_ref().map_or(true, |r| r.success)
        && summary.config_cleanup.as_ref().map_or(false, |r| r.success);
    summary.success = steps_ok && summary.errors.is_empty();
    summary.duration = timespan::from_std(started.elapsed());
    info!(success = summary.success, errors = summary.errors.len(), "Authentication removal finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
        fail_backup: bool,
    }

    impl Recorder {
        fn called(&self, step: &'static str) {
            self.calls.lock().unwrap().push(step);
        }
    }

    #[async_trait]
    impl AuthRemovalService for Recorder {
        async fn backup_current_auth_config(&self) -> Result<BackupResult> {
            self.called("backup");
            if self.fail_backup {
                return Err(MigrationError::Other("disk full".into()));
            }
            Ok(BackupResult {
                success: true,
                backup_id: "b1".into(),
                ..Default::default()
            })
        }

        async fn remove_jwt_authentication(&self) -> Result<AuthRemovalResult> {
            self.called("jwt");
            Ok(AuthRemovalResult {
                success: true,
                ..Default::default()
            })
        }

        async fn update_frontend_auth(&self) -> Result<FrontendUpdateResult> {
            self.called("frontend");
            Ok(FrontendUpdateResult {
                success: true,
                ..Default::default()
            })
        }

        async fn cleanup_auth_configuration(&self) -> Result<ConfigCleanupResult> {
            self.called("cleanup");
            Ok(ConfigCleanupResult {
                success: true,
                ..Default::default()
            })
        }

        async fn rollback_authentication(&self, _backup_id: &str) -> Result<RollbackResult> {
            self.called("rollback");
            Ok(RollbackResult::default())
        }

        async fn available_backups(&self) -> Result<Vec<AuthBackupInfo>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let recorder = Recorder::default();
        let summary = run_auth_removal(&recorder, &AuthRemovalOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.success);
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["backup", "jwt", "frontend", "cleanup"]);
    }

    #[tokio::test]
    async fn test_failed_backup_stops_chain() {
        let recorder = Recorder {
            fail_backup: true,
            ..Default::default()
        };
        let summary = run_auth_removal(&recorder, &AuthRemovalOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!summary.success);
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["backup"]);
        assert!(summary.errors[0].contains("disk full"));
    }

    #[tokio::test]
    async fn test_disabled_steps_are_skipped() {
        let recorder = Recorder::default();
        let options = AuthRemovalOptions {
            create_backup: false,
            remove_from_frontend: false,
            ..Default::default()
        };
        run_auth_removal(&recorder, &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["jwt", "cleanup"]);
    }

    #[tokio::test]
    async fn test_noop_collaborator_succeeds() {
        let summary = run_auth_removal(&NoopAuthRemoval, &AuthRemovalOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.success);
    }
}
