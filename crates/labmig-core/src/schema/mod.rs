//! Table creation scripts: discovery, validation, dependency ordering and
//! execution against the target database.

pub mod script;
mod service;

pub use script::schema_from_create_table;
pub use service::{creation_order, dependency_levels, TableSchemaService};
pub(crate) use service::list_files_with_extension;

use serde::Serialize;

/// Outcome of checking one `.sql` script without executing it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlScriptValidation {
    pub is_valid: bool,
    pub detected_tables: Vec<String>,
    pub referenced_tables: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Outcome of creating missing tables.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCreationResult {
    /// True when no table failed to create.
    pub success: bool,
    pub tables_created: Vec<String>,
    /// Tables that already existed or had no creation script.
    pub tables_skipped: Vec<String>,
    pub errors: Vec<String>,
    pub details: Vec<String>,
}
