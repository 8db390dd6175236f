//! Named pass/fail checks that must hold before a migration starts.

use super::environment::available_disk_space_gb;
use super::{LegacyConnectionStatus, PrerequisiteCheck, PrerequisiteCheckResult};
use crate::config::{timespan, MigrationOptions, ResourceThresholds};
use crate::database::TargetDatabase;
use crate::error::{MigrationError, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Outcomes {
    passed: Vec<PrerequisiteCheck>,
    failed: Vec<PrerequisiteCheck>,
    skipped: Vec<PrerequisiteCheck>,
}

impl Outcomes {
    fn record(&mut self, check: PrerequisiteCheck) {
        if check.check_result {
            self.passed.push(check);
        } else {
            self.failed.push(check);
        }
    }

    fn skip(&mut self, name: &str, reason: impl Into<String>) {
        self.skipped.push(PrerequisiteCheck::skipped(name, reason));
    }
}

/// A directory the migration reads from or writes to.
struct DirectoryTarget<'a> {
    label: &'a str,
    path: &'a str,
    /// Whether a failure on this directory blocks the migration.
    critical: bool,
}

/// Runs prerequisite checks against the filesystem and databases.
#[derive(Debug, Clone)]
pub struct PrerequisiteChecker {
    target: TargetDatabase,
}

impl PrerequisiteChecker {
    pub fn new(target: TargetDatabase) -> Self {
        Self { target }
    }

    pub async fn check_prerequisites(&self, options: &MigrationOptions) -> PrerequisiteCheckResult {
        let check_start_time = Utc::now();
        let started = Instant::now();
        let mut outcomes = Outcomes::default();

        let seeding = &options.seeding_options;
        let backup_relevant =
            options.remove_authentication && options.auth_removal_options.create_backup;
        let log_relevant = options.logging_options.log_to_file;

        let sources = [
            DirectoryTarget { label: "CSV", path: &seeding.csv_directory, critical: true },
            DirectoryTarget { label: "SQL", path: &seeding.sql_directory, critical: true },
        ];
        let sinks = [
            DirectoryTarget {
                label: "Backup",
                path: &options.auth_removal_options.backup_directory,
                critical: backup_relevant,
            },
            DirectoryTarget {
                label: "Log",
                path: &options.logging_options.log_directory,
                critical: log_relevant,
            },
        ];

        for dir in sources.iter().chain(sinks.iter()) {
            outcomes.record(check_exists(dir).await);
        }
        for dir in &sources {
            let name = format!("{} Directory Read Access", dir.label);
            if dir.path.trim().is_empty() || !is_dir(Path::new(dir.path)).await {
                outcomes.skip(&name, format!("{} directory is missing", dir.label));
            } else {
                outcomes.record(check_read_access(&name, dir).await);
            }
        }
        for dir in &sinks {
            let name = format!("{} Directory Write Permission", dir.label);
            if dir.critical {
                outcomes.record(check_write_permission(&name, dir).await);
            } else {
                outcomes.skip(&name, format!("{} directory is not written by this run", dir.label));
            }
        }

        outcomes.record(self.check_target_database().await);

        if options.validate_against_legacy {
            outcomes.record(check_legacy_database(options).await);
        } else {
            outcomes.skip(
                "Legacy Database Connection",
                "Legacy validation disabled, skipping connection check",
            );
        }

        outcomes.record(check_disk_space(Path::new(&seeding.csv_directory)).await);

        let result = PrerequisiteCheckResult {
            all_prerequisites_met: outcomes.failed.is_empty(),
            check_start_time,
            check_end_time: Utc::now(),
            check_duration: timespan::from_std(started.elapsed()),
            passed_checks: outcomes.passed,
            failed_checks: outcomes.failed,
            skipped_checks: outcomes.skipped,
        };

        if result.all_prerequisites_met {
            info!(passed = result.passed_checks.len(), "All prerequisites met");
        } else {
            let failed: Vec<&str> = result.failed_checks.iter().map(|c| c.check_name.as_str()).collect();
            warn!(
                failed = %failed.join(", "),
                critical = result.has_critical_failures(),
                "Prerequisite checks failed"
            );
        }
        result
    }

    async fn check_target_database(&self) -> PrerequisiteCheck {
        const NAME: &str = "Target Database Connection";
        match self.target.list_tables().await {
            Ok(tables) => {
                let version = self.target.version().await.unwrap_or_default();
                PrerequisiteCheck::passed(
                    NAME,
                    format!("Connected to SQLite {} ({} tables)", version, tables.len()),
                    true,
                )
            }
            Err(e) => PrerequisiteCheck::failed(
                NAME,
                format!("Target database is not reachable: {}", e),
                true,
                "Check the database path and file permissions",
            ),
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn check_exists(dir: &DirectoryTarget<'_>) -> PrerequisiteCheck {
    let name = format!("{} Directory Existence", dir.label);
    if dir.path.trim().is_empty() {
        return PrerequisiteCheck::failed(
            &name,
            format!("{} directory is not configured", dir.label),
            dir.critical,
            "Set the directory in the migration options",
        );
    }
    if is_dir(Path::new(dir.path)).await {
        PrerequisiteCheck::passed(&name, format!("Directory '{}' exists", dir.path), dir.critical)
    } else {
        PrerequisiteCheck::failed(
            &name,
            format!("Directory '{}' does not exist", dir.path),
            dir.critical,
            format!("Create '{}' or point the options at an existing directory", dir.path),
        )
    }
}

async fn check_read_access(name: &str, dir: &DirectoryTarget<'_>) -> PrerequisiteCheck {
    match tokio::fs::read_dir(dir.path).await {
        Ok(_) => PrerequisiteCheck::passed(name, format!("Read access verified for '{}'", dir.path), dir.critical),
        Err(e) => PrerequisiteCheck::failed(
            name,
            format!("Cannot read '{}': {}", dir.path, e),
            dir.critical,
            "Grant the service account read access to the directory",
        ),
    }
}

/// Check by creating and deleting a file in the directory, or in its nearest
/// existing ancestor when the directory will be created later.
async fn check_write_permission(name: &str, dir: &DirectoryTarget<'_>) -> PrerequisiteCheck {
    let path = Path::new(dir.path);
    let Some(target_dir) = nearest_existing_dir(path).await else {
        return PrerequisiteCheck::failed(
            name,
            format!("No existing parent directory for '{}'", dir.path),
            dir.critical,
            "Create the directory before starting the migration",
        );
    };

    let scratch = target_dir.join(format!(".labmig-write-{}.tmp", uuid::Uuid::new_v4()));
    let outcome = async {
        tokio::fs::write(&scratch, b"x").await?;
        tokio::fs::remove_file(&scratch).await
    }
    .await;

    match outcome {
        Ok(()) => {
            debug!(directory = %target_dir.display(), "Write check succeeded");
            PrerequisiteCheck::passed(name, format!("Write permission verified for '{}'", dir.path), dir.critical)
        }
        Err(e) => PrerequisiteCheck::failed(
            name,
            format!("No write permission for '{}': {}", dir.path, e),
            dir.critical,
            "Grant the service account write access to the directory",
        ),
    }
}

async fn nearest_existing_dir(path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    for ancestor in absolute.ancestors() {
        if is_dir(ancestor).await {
            return Some(ancestor.to_path_buf());
        }
    }
    None
}

async fn check_legacy_database(options: &MigrationOptions) -> PrerequisiteCheck {
    const NAME: &str = "Legacy Database Connection";
    let critical = options.validation_options.legacy_validation_required;
    let status = validate_legacy_connection(options).await;
    if status.is_valid {
        PrerequisiteCheck::passed(
            NAME,
            format!(
                "Legacy database reachable (SQLite {})",
                status.database_version.unwrap_or_default()
            ),
            critical,
        )
    } else {
        PrerequisiteCheck::failed(
            NAME,
            format!(
                "Legacy database connection failed: {}",
                status.error.unwrap_or_else(|| "unknown error".into())
            ),
            critical,
            "Check ValidationOptions.LegacyConnectionString",
        )
    }
}

async fn check_disk_space(path: &Path) -> PrerequisiteCheck {
    const NAME: &str = "Disk Space";
    let path = path.to_path_buf();
    match tokio::task::spawn_blocking(move || available_disk_space_gb(&path)).await {
        Ok(Some(gb)) if gb < ResourceThresholds::MIN_DISK_SPACE_GB => PrerequisiteCheck::failed(
            NAME,
            format!("Low disk space: {:.1}GB available", gb),
            false,
            "Free disk space before loading data",
        ),
        Ok(Some(gb)) => {
            PrerequisiteCheck::passed(NAME, format!("Sufficient disk space: {:.1}GB available", gb), false)
        }
        Ok(None) => PrerequisiteCheck::failed(
            NAME,
            "Unable to determine free disk space",
            false,
            "Verify free space manually",
        ),
        Err(e) => PrerequisiteCheck::failed(
            NAME,
            format!("Unable to check disk space: {}", e),
            false,
            "Verify free space manually",
        ),
    }
}

/// Open the legacy database read-only and read its catalogue, bounded by
/// `QueryTimeout`.
pub async fn validate_legacy_connection(options: &MigrationOptions) -> LegacyConnectionStatus {
    let started = Instant::now();
    let connection_string = options.validation_options.legacy_connection_string.clone();
    let timeout = timespan::to_std_positive(&options.validation_options.query_timeout);

    let connect = async {
        if connection_string.trim().is_empty() {
            return Err(MigrationError::Config {
                message: "Legacy connection string is not configured".into(),
            });
        }
        let db = TargetDatabase::from_connection_string(&connection_string)?;
        db.list_tables().await?;
        db.version().await
    };

    let outcome: Result<String> = match timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .unwrap_or_else(|_| {
                Err(MigrationError::Timeout {
                    operation: "Legacy connection check".into(),
                    after: limit,
                })
            }),
        None => connect.await,
    };

    let response_time = timespan::from_std(started.elapsed());
    match outcome {
        Ok(version) => LegacyConnectionStatus {
            is_valid: true,
            error: None,
            database_version: Some(version),
            response_time,
        },
        Err(e) => {
            warn!(error = %e, "Legacy database connection failed");
            LegacyConnectionStatus {
                is_valid: false,
                error: Some(e.to_string()),
                database_version: None,
                response_time,
            }
        }
    }
}
