//! Loading and saving option files.
//!
//! Writes are atomic: the document goes to a temp file beside the target, is
//! validated by re-parsing, synced, and then renamed over the target. Nothing
//! is cached; every call touches the disk.

use super::options::MigrationOptions;
use super::ServiceConfig;
use crate::error::{MigrationError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Persists `MigrationOptions` as JSON documents.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    /// Directory searched for `migration-<environment>.json` files.
    config_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Options used when nothing else is configured.
    pub async fn default_options(&self) -> MigrationOptions {
        MigrationOptions::default()
    }

    /// Load options from a JSON file.
    ///
    /// Fails with `FileNotFound` when the path does not exist.
    pub async fn load_options(&self, path: impl AsRef<Path>) -> Result<MigrationOptions> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .map_err(|e| MigrationError::io_with_path(e, path))?;

        let options: MigrationOptions =
            serde_json::from_str(&contents).map_err(|e| MigrationError::Json {
                message: format!("Failed to parse {}: {}", path.display(), e),
                source: Some(e),
            })?;

        debug!("Loaded migration options from {}", path.display());
        Ok(options)
    }

    /// Save options to a JSON file, creating the parent directory if needed.
    pub async fn save_options(&self, options: &MigrationOptions, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| MigrationError::Io {
                message: format!("Failed to create directory {}", parent.display()),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let serialized = serde_json::to_string_pretty(options).map_err(|e| MigrationError::Json {
            message: format!("Failed to serialize options: {}", e),
            source: Some(e),
        })?;

        // Validate JSON by re-parsing before it can replace a good file
        serde_json::from_str::<MigrationOptions>(&serialized).map_err(|e| MigrationError::Json {
            message: format!("Serialized options failed validation: {}", e),
            source: Some(e),
        })?;

        let temp_path = temp_path_for(path);
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| MigrationError::Io {
                message: format!("Failed to create temp file {}", temp_path.display()),
                path: Some(temp_path.clone()),
                source: Some(e),
            })?;
            file.write_all(serialized.as_bytes())
                .await
                .map_err(|e| MigrationError::io_with_path(e, &temp_path))?;
            file.sync_all()
                .await
                .map_err(|e| MigrationError::io_with_path(e, &temp_path))?;
        }

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(MigrationError::Io {
                message: format!("Failed to rename {} to {}", temp_path.display(), path.display()),
                path: Some(path.to_path_buf()),
                source: Some(e),
            });
        }

        info!("Saved migration options to {}", path.display());
        Ok(())
    }

    /// Path of the options file for a named environment.
    pub fn environment_file(&self, environment: &str) -> PathBuf {
        self.config_dir.join(format!(
            "{}{}.json",
            ServiceConfig::ENVIRONMENT_FILE_PREFIX,
            environment.to_ascii_lowercase()
        ))
    }

    /// Defaults merged with the environment's options file, if one exists.
    pub async fn environment_options(&self, environment: &str) -> Result<MigrationOptions> {
        let defaults = self.default_options().await;
        let path = self.environment_file(environment);

        match self.load_options(&path).await {
            Ok(overlay) => {
                info!(environment, "Applying environment options from {}", path.display());
                Ok(merge_options(&defaults, &overlay))
            }
            Err(MigrationError::FileNotFound(_)) => {
                debug!(environment, "No environment options file, using defaults");
                Ok(defaults)
            }
            Err(e) => Err(e),
        }
    }
}

/// Merge `overlay` over `base`.
///
/// Scalars always come from the overlay; strings and lists only when the
/// overlay's value is non-empty, so a sparse environment file cannot blank
/// out a base directory.
pub fn merge_options(base: &MigrationOptions, overlay: &MigrationOptions) -> MigrationOptions {
    fn text(base: &str, overlay: &str) -> String {
        if overlay.trim().is_empty() { base } else { overlay }.to_string()
    }
    fn list(base: &[String], overlay: &[String]) -> Vec<String> {
        if overlay.is_empty() { base } else { overlay }.to_vec()
    }

    let mut merged = overlay.clone();
    merged.include_tables = list(&base.include_tables, &overlay.include_tables);
    merged.exclude_tables = list(&base.exclude_tables, &overlay.exclude_tables);

    let (b, o) = (&base.seeding_options, &overlay.seeding_options);
    merged.seeding_options.csv_directory = text(&b.csv_directory, &o.csv_directory);
    merged.seeding_options.sql_directory = text(&b.sql_directory, &o.sql_directory);

    let (b, o) = (&base.validation_options, &overlay.validation_options);
    merged.validation_options.legacy_connection_string =
        text(&b.legacy_connection_string, &o.legacy_connection_string);
    merged.validation_options.include_queries = list(&b.include_queries, &o.include_queries);
    merged.validation_options.exclude_queries = list(&b.exclude_queries, &o.exclude_queries);

    let (b, o) = (&base.auth_removal_options, &overlay.auth_removal_options);
    merged.auth_removal_options.backup_directory = text(&b.backup_directory, &o.backup_directory);
    merged.auth_removal_options.files_to_exclude = list(&b.files_to_exclude, &o.files_to_exclude);

    merged.logging_options.log_directory = text(
        &base.logging_options.log_directory,
        &overlay.logging_options.log_directory,
    );

    merged
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "options.json".to_string());
    path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
}
