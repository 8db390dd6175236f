//! Script discovery, dependency resolution and table creation.

use super::script::{
    column_type_for, created_tables, parentheses_balanced, prepare_statements, referenced_tables,
    schema_from_create_table, statement_warnings,
};
use super::{SqlScriptValidation, TableCreationResult};
use crate::cancel::CancellationToken;
use crate::csv_import::{ColumnType, CsvColumnDefinition, CsvSchema};
use crate::database::TargetDatabase;
use crate::error::{MigrationError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Statements belonging to one table, grouped from its script.
#[derive(Debug, Clone)]
struct TableScript {
    table: String,
    path: PathBuf,
    create_statement: String,
    statements: Vec<String>,
    references: BTreeSet<String>,
}

/// Creates target tables from the `.sql` scripts in a directory.
#[derive(Debug, Clone)]
pub struct TableSchemaService {
    sql_directory: PathBuf,
    db: TargetDatabase,
}

impl TableSchemaService {
    pub fn new(sql_directory: impl Into<PathBuf>, db: TargetDatabase) -> Self {
        Self {
            sql_directory: sql_directory.into(),
            db,
        }
    }

    pub fn sql_directory(&self) -> &Path {
        &self.sql_directory
    }

    /// `*.sql` files in the script directory, sorted by file name.
    pub async fn discover_scripts(&self) -> Result<Vec<PathBuf>> {
        list_files_with_extension(&self.sql_directory, "sql").await
    }

    /// Check a script's shape without executing it.
    pub async fn validate_sql_script(&self, path: impl AsRef<Path>) -> SqlScriptValidation {
        let path = path.as_ref();
        let mut result = SqlScriptValidation::default();

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                result
                    .errors
                    .push(format!("Cannot read script {}: {}", path.display(), e));
                return result;
            }
        };

        let statements = prepare_statements(&content);
        let cleaned = statements.join(";\n");
        result.detected_tables = created_tables(&cleaned);
        result.referenced_tables = referenced_tables(&cleaned).into_iter().collect();

        if !parentheses_balanced(&cleaned) {
            result.errors.push("Unbalanced parentheses".to_string());
        }
        if result.detected_tables.is_empty() {
            result
                .errors
                .push("No CREATE TABLE statement found".to_string());
        }
        result.warnings = statement_warnings(&statements);
        result.is_valid = result.errors.is_empty();

        debug!(
            path = %path.display(),
            tables = ?result.detected_tables,
            valid = result.is_valid,
            "Validated SQL script"
        );
        result
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        self.db.table_exists(table).await
    }

    /// For each table with a foreign key, the tables it references.
    pub async fn resolve_dependencies(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let graph = self.dependency_graph().await?;
        Ok(graph.into_iter().filter(|(_, deps)| !deps.is_empty()).collect())
    }

    /// Every scripted table and the scripted tables it references.
    pub async fn dependency_graph(&self) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let catalog = self.load_catalog().await?;
        Ok(catalog
            .into_iter()
            .map(|(name, script)| (name, script.references))
            .collect())
    }

    /// Column schema for CSV coercion: from the creation script when one
    /// exists, otherwise from the live table.
    pub async fn table_schema(&self, table: &str) -> Result<Option<CsvSchema>> {
        let catalog = match self.load_catalog().await {
            Ok(catalog) => catalog,
            Err(MigrationError::FileNotFound(_)) => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        if let Some(script) = find_table(&catalog, table) {
            if let Some(schema) = schema_from_create_table(&script.create_statement) {
                return Ok(Some(schema));
            }
        }

        let columns = self.db.table_columns(table).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(CsvSchema {
            table_name: table.to_string(),
            columns: columns
                .into_iter()
                .map(|c| {
                    let (data_type, max_length) = column_type_for(&c.declared_type);
                    let implicit_rowid = c.primary_key && data_type == ColumnType::Integer;
                    CsvColumnDefinition {
                        name: c.name,
                        data_type,
                        is_required: c.not_null && !c.has_default && !implicit_rowid,
                        max_length,
                    }
                })
                .collect(),
            validation_rules: Vec::new(),
        }))
    }

    /// Create one table from its script. Returns false if it already existed.
    pub async fn create_table(&self, table: &str) -> Result<bool> {
        let catalog = self.load_catalog().await?;
        let script = find_table(&catalog, table)
            .ok_or_else(|| MigrationError::not_found(format!("Creation script for table {}", table)))?;

        if self.db.table_exists(&script.table).await? {
            debug!(table = %script.table, "Table already exists");
            return Ok(false);
        }
        self.execute(script).await?;
        Ok(true)
    }

    /// Create every missing table among `tables` (all scripted tables when
    /// empty) in dependency order.
    ///
    /// Failures are collected per table; a dependency cycle fails the call.
    pub async fn create_missing_tables(
        &self,
        tables: &[String],
        cancel: &CancellationToken,
    ) -> Result<TableCreationResult> {
        let catalog = self.load_catalog().await?;
        let graph: BTreeMap<String, BTreeSet<String>> = catalog
            .iter()
            .map(|(name, script)| (name.clone(), script.references.clone()))
            .collect();
        let order = creation_order(&graph)?;

        let wanted: Option<BTreeSet<String>> = (!tables.is_empty())
            .then(|| tables.iter().map(|t| t.to_ascii_lowercase()).collect());

        let mut result = TableCreationResult::default();
        if let Some(wanted) = &wanted {
            for table in tables {
                if find_table(&catalog, table).is_none() {
                    result.tables_skipped.push(table.clone());
                    result
                        .details
                        .push(format!("{}: no creation script found", table));
                }
            }
            debug!(requested = wanted.len(), "Creating requested tables");
        }

        for table in order {
            if wanted
                .as_ref()
                .is_some_and(|w| !w.contains(&table.to_ascii_lowercase()))
            {
                continue;
            }
            cancel.check()?;

            let Some(script) = catalog.get(&table) else {
                continue;
            };
            match self.db.table_exists(&table).await {
                Ok(true) => {
                    result.tables_skipped.push(table.clone());
                    result.details.push(format!("{}: already exists", table));
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    result.errors.push(format!("{}: {}", table, e));
                    continue;
                }
            }

            match self.execute(script).await {
                Ok(()) => {
                    result.details.push(format!(
                        "{}: created from {}",
                        table,
                        script.path.display()
                    ));
                    result.tables_created.push(table);
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "Failed to create table");
                    result.errors.push(format!("{}: {}", table, e));
                }
            }
        }

        result.success = result.errors.is_empty();
        info!(
            created = result.tables_created.len(),
            skipped = result.tables_skipped.len(),
            failed = result.errors.len(),
            "Table creation finished"
        );
        Ok(result)
    }

    async fn execute(&self, script: &TableScript) -> Result<()> {
        info!(table = %script.table, path = %script.path.display(), "Creating table");
        self.db.execute_script(script.statements.clone()).await
    }

    /// Parse every script into per-table statement groups keyed by table name.
    async fn load_catalog(&self) -> Result<BTreeMap<String, TableScript>> {
        let mut catalog: BTreeMap<String, TableScript> = BTreeMap::new();

        for path in self.discover_scripts().await? {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| MigrationError::io_with_path(e, &path))?;

            let mut current: Option<TableScript> = None;
            let mut preamble = Vec::new();
            for statement in prepare_statements(&content) {
                match created_tables(&statement).into_iter().next() {
                    Some(table) => {
                        if let Some(done) = current.take() {
                            catalog.insert(done.table.clone(), done);
                        }
                        let mut statements = std::mem::take(&mut preamble);
                        statements.push(statement.clone());
                        current = Some(TableScript {
                            table,
                            path: path.clone(),
                            references: referenced_tables(&statement),
                            create_statement: statement,
                            statements,
                        });
                    }
                    None => match current.as_mut() {
                        Some(script) => script.statements.push(statement),
                        None => preamble.push(statement),
                    },
                }
            }
            if let Some(done) = current.take() {
                catalog.insert(done.table.clone(), done);
            }
        }

        // Canonicalize reference spelling and drop self-references.
        let names: Vec<String> = catalog.keys().cloned().collect();
        for script in catalog.values_mut() {
            script.references = script
                .references
                .iter()
                .map(|r| {
                    names
                        .iter()
                        .find(|n| n.eq_ignore_ascii_case(r))
                        .cloned()
                        .unwrap_or_else(|| r.clone())
                })
                .filter(|r| !r.eq_ignore_ascii_case(&script.table))
                .collect();
        }
        Ok(catalog)
    }
}

fn find_table<'a>(catalog: &'a BTreeMap<String, TableScript>, table: &str) -> Option<&'a TableScript> {
    catalog.get(table).or_else(|| {
        catalog
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, script)| script)
    })
}

/// Files with `extension` directly inside `dir`, sorted by name.
pub(crate) async fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| MigrationError::io_with_path(e, dir))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MigrationError::io_with_path(e, dir))?
    {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by_key(|p| p.file_name().map(|n| n.to_ascii_lowercase()));
    Ok(files)
}

/// Group tables into levels: every table's dependencies sit in earlier
/// levels. Tables within a level are sorted by name. Dependencies outside the
/// graph are ignored.
pub fn dependency_levels(deps: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<Vec<String>>> {
    let mut remaining: BTreeMap<&str, BTreeSet<&str>> = deps
        .iter()
        .map(|(table, parents)| {
            let parents = parents
                .iter()
                .filter(|p| *p != table && deps.contains_key(*p))
                .map(String::as_str)
                .collect();
            (table.as_str(), parents)
        })
        .collect();

    let mut levels = Vec::new();
    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(table, _)| *table)
            .collect();

        if ready.is_empty() {
            return Err(MigrationError::DependencyCycle {
                tables: remaining.keys().map(|t| t.to_string()).collect(),
            });
        }

        for table in &ready {
            remaining.remove(table);
        }
        for parents in remaining.values_mut() {
            for table in &ready {
                parents.remove(table);
            }
        }
        levels.push(ready.into_iter().map(String::from).collect());
    }
    Ok(levels)
}

/// Topological creation order: dependencies first, ties broken by name.
pub fn creation_order(deps: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>> {
    Ok(dependency_levels(deps)?.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        edges
            .iter()
            .map(|(t, deps)| (t.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    async fn fixture() -> (TempDir, TableSchemaService) {
        let dir = TempDir::new().unwrap();
        let sql = dir.path().join("db-tables");
        std::fs::create_dir_all(&sql).unwrap();
        std::fs::write(
            sql.join("Test.sql"),
            "CREATE TABLE Test (ID INTEGER PRIMARY KEY, Name NVARCHAR(40) NOT NULL);",
        )
        .unwrap();
        std::fs::write(
            sql.join("TestReadings.sql"),
            "-- readings\nCREATE TABLE TestReadings (\n  SampleID INT NOT NULL,\n  TestID INT REFERENCES Test(ID),\n  Value1 FLOAT\n);\nCREATE INDEX IX_TestReadings ON TestReadings(SampleID);",
        )
        .unwrap();
        std::fs::write(sql.join("notes.txt"), "not a script").unwrap();
        let db = TargetDatabase::open(dir.path().join("lab.db")).unwrap();
        let service = TableSchemaService::new(sql, db);
        (dir, service)
    }

    #[test]
    fn test_creation_order_parents_first() {
        let deps = graph(&[
            ("TestReadings", &["Test", "Lubricant"]),
            ("Lubricant", &[]),
            ("Test", &[]),
            ("Comments", &["TestReadings"]),
        ]);
        assert_eq!(
            creation_order(&deps).unwrap(),
            vec!["Lubricant", "Test", "TestReadings", "Comments"]
        );
        let levels = dependency_levels(&deps).unwrap();
        assert_eq!(levels.len(), 3);
    }

    #[test]
    fn test_cycle_fails_fast() {
        let deps = graph(&[("A", &["B"]), ("B", &["A"]), ("C", &[])]);
        match creation_order(&deps) {
            Err(MigrationError::DependencyCycle { tables }) => assert_eq!(tables, vec!["A", "B"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_external_and_self_references_ignored() {
        let deps = graph(&[("Tree", &["Tree", "Outside"])]);
        assert_eq!(creation_order(&deps).unwrap(), vec!["Tree"]);
    }

    #[tokio::test]
    async fn test_discover_and_resolve() {
        let (_dir, service) = fixture().await;
        let scripts = service.discover_scripts().await.unwrap();
        assert_eq!(scripts.len(), 2);

        let deps = service.resolve_dependencies().await.unwrap();
        assert_eq!(deps.len(), 1);
        assert!(deps["TestReadings"].contains("Test"));
    }

    #[tokio::test]
    async fn test_validate_script() {
        let (dir, service) = fixture().await;
        let valid = service
            .validate_sql_script(dir.path().join("db-tables/TestReadings.sql"))
            .await;
        assert!(valid.is_valid);
        assert_eq!(valid.detected_tables, vec!["TestReadings"]);
        assert_eq!(valid.referenced_tables, vec!["Test"]);

        let bad = dir.path().join("bad.sql");
        std::fs::write(&bad, "DROP TABLE Test; CREATE TABLE X (a INT").unwrap();
        let invalid = service.validate_sql_script(&bad).await;
        assert!(!invalid.is_valid);
        assert!(invalid.errors.iter().any(|e| e.contains("parentheses")));
        assert_eq!(invalid.warnings.len(), 1);

        let missing = service.validate_sql_script(dir.path().join("none.sql")).await;
        assert!(!missing.is_valid);
    }

    #[tokio::test]
    async fn test_create_missing_tables_in_order() {
        let (_dir, service) = fixture().await;
        let token = CancellationToken::new();
        let result = service.create_missing_tables(&[], &token).await.unwrap();
        assert!(result.success);
        assert_eq!(result.tables_created, vec!["Test", "TestReadings"]);
        assert!(service.table_exists("TestReadings").await.unwrap());

        let again = service.create_missing_tables(&[], &token).await.unwrap();
        assert!(again.tables_created.is_empty());
        assert_eq!(again.tables_skipped.len(), 2);
        assert!(!service.create_table("test").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_missing_tables_honours_cancellation() {
        let (_dir, service) = fixture().await;
        let token = CancellationToken::new();
        token.cancel();
        let result = service.create_missing_tables(&[], &token).await;
        assert!(matches!(result, Err(MigrationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_table_schema_from_script_and_live_table() {
        let (_dir, service) = fixture().await;
        let schema = service.table_schema("test").await.unwrap().unwrap();
        assert_eq!(schema.column("Name").unwrap().max_length, Some(40));
        assert!(schema.column("Name").unwrap().is_required);

        service
            .db
            .execute_script(vec!["CREATE TABLE Loose (ID INTEGER PRIMARY KEY, Qty INT NOT NULL)".into()])
            .await
            .unwrap();
        let live = service.table_schema("Loose").await.unwrap().unwrap();
        assert!(!live.column("ID").unwrap().is_required);
        assert!(live.column("Qty").unwrap().is_required);

        assert!(service.table_schema("Nothing").await.unwrap().is_none());
    }
}
