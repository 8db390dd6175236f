//! SQLite access for the migration target and the legacy source.
//!
//! All calls hop onto the blocking pool; the connection lives behind a mutex
//! so a single `TargetDatabase` can be cloned across seeding tasks.

use crate::csv_import::CsvValue;
use crate::error::{MigrationError, Result};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, InterruptHandle, OpenFlags, ToSql};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

impl ToSql for CsvValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CsvValue::Null => ToSqlOutput::Owned(Value::Null),
            CsvValue::Boolean(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            CsvValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            CsvValue::Decimal(d) => ToSqlOutput::Owned(Value::Real(*d)),
            CsvValue::DateTime(dt) => {
                ToSqlOutput::Owned(Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
            }
            CsvValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Extract the file path from `Data Source=<path>;...` or a bare path.
pub fn parse_connection_string(connection_string: &str) -> Option<PathBuf> {
    let trimmed = connection_string.trim();
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.contains('=') {
        return Some(PathBuf::from(trimmed));
    }
    trimmed.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        (matches!(key.as_str(), "data source" | "datasource" | "filename") && !value.is_empty())
            .then(|| PathBuf::from(value))
    })
}

/// Outcome of inserting one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchInsertOutcome {
    pub inserted: usize,
    /// Index into the submitted rows and the failure message.
    pub failed: Vec<(usize, String)>,
}

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub has_default: bool,
    pub primary_key: bool,
}

/// One row from `query_rows`, values rendered as text.
pub type QueryRow = Vec<Option<String>>;

/// Columns and rows returned by `query_rows`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<QueryRow>,
}

/// Interrupts the shared connection on behalf of one timed call only.
///
/// A timed call registers a ticket in `owner` while it holds the connection
/// and clears it before releasing the connection. `interrupt_if_owner`
/// checks and interrupts under the same lock, so an expired call can never
/// interrupt a statement issued by another caller.
struct Interrupter {
    handle: InterruptHandle,
    owner: Mutex<u64>,
    next_ticket: AtomicU64,
}

impl Interrupter {
    fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    fn set_owner(&self, ticket: u64) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = ticket;
    }

    /// Returns whether the interrupt was sent.
    fn interrupt_if_owner(&self, ticket: u64) -> bool {
        let owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == ticket {
            self.handle.interrupt();
            true
        } else {
            false
        }
    }
}

/// No timed call holds the connection.
const NO_OWNER: u64 = 0;

/// Handle to a SQLite database used as migration target or legacy source.
#[derive(Clone)]
pub struct TargetDatabase {
    conn: Arc<Mutex<Connection>>,
    interrupter: Arc<Interrupter>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for TargetDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetDatabase")
            .field("path", &self.path)
            .finish()
    }
}

impl TargetDatabase {
    /// Open (or create) a database file with WAL journaling and foreign keys on.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MigrationError::Io {
                message: format!("Failed to create database directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| MigrationError::Database {
            message: format!("Failed to open database {}: {}", db_path.display(), e),
            source: Some(e),
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )
        .map_err(|e| MigrationError::Database {
            message: format!("Failed to set pragmas: {}", e),
            source: Some(e),
        })?;

        debug!(path = %db_path.display(), "Opened target database");
        Ok(Self::wrap(conn, Some(db_path.to_path_buf())))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::wrap(conn, None))
    }

    /// Open an existing database file without write access.
    pub fn open_read_only(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if !db_path.exists() {
            return Err(MigrationError::FileNotFound(db_path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| MigrationError::Database {
            message: format!("Failed to open {} read-only: {}", db_path.display(), e),
            source: Some(e),
        })?;
        Ok(Self::wrap(conn, Some(db_path.to_path_buf())))
    }

    /// Open a legacy database from its connection string, read-only.
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let path = parse_connection_string(connection_string).ok_or_else(|| {
            MigrationError::Config {
                message: "Legacy connection string does not name a data source".into(),
            }
        })?;
        Self::open_read_only(path)
    }

    fn wrap(conn: Connection, path: Option<PathBuf>) -> Self {
        let interrupter = Arc::new(Interrupter {
            handle: conn.get_interrupt_handle(),
            owner: Mutex::new(NO_OWNER),
            next_ticket: AtomicU64::new(NO_OWNER + 1),
        });
        Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupter,
            path,
        }
    }

    /// Path of the backing file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure against the connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| MigrationError::Database {
                message: format!("Failed to lock database: {}", e),
                source: None,
            })?;
            f(&mut guard)
        })
        .await?
    }

    /// Like `run`, but interrupts the statement in flight once `timeout` elapses.
    ///
    /// The clock starts once the connection is acquired, so time spent
    /// queued behind another caller does not count. Only this call's own
    /// statements are ever interrupted. The closure receives the deadline so
    /// multi-statement work can stop between statements as well.
    pub async fn run_with_timeout<T, F>(
        &self,
        operation: &str,
        timeout: Option<Duration>,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, Option<Instant>) -> Result<T> + Send + 'static,
    {
        let Some(limit) = timeout else {
            return self.run(move |conn| f(conn, None)).await;
        };

        let ticket = self.interrupter.ticket();
        let interrupter = self.interrupter.clone();
        let conn = self.conn.clone();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<Instant>();

        let mut task = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| MigrationError::Database {
                message: format!("Failed to lock database: {}", e),
                source: None,
            })?;
            let started = Instant::now();
            interrupter.set_owner(ticket);
            let _ = started_tx.send(started);
            let outcome = f(&mut guard, Some(started + limit));
            interrupter.set_owner(NO_OWNER);
            drop(guard);
            outcome
        });

        // The sender is dropped without sending only if locking failed.
        let Ok(started) = started_rx.await else {
            return task.await?;
        };
        let deadline = tokio::time::Instant::from_std(started + limit);

        let timed_out = || MigrationError::Timeout {
            operation: operation.to_string(),
            after: limit,
        };
        match tokio::time::timeout_at(deadline, &mut task).await {
            // A deadline seen between rows reports the configured limit too.
            Ok(joined) => joined?.map_err(|e| match e {
                MigrationError::Timeout { .. } => timed_out(),
                other => other,
            }),
            Err(_) => {
                if self.interrupter.interrupt_if_owner(ticket) {
                    warn!(operation, timeout = ?limit, "Database operation timed out, interrupting");
                }
                // Wait for the statement to unwind so the transaction is rolled back.
                task.await?.map_err(|_| timed_out())
            }
        }
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let table = table.to_string();
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                [&table],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    /// User tables, sorted by name.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
        .await
    }

    /// Column metadata from `PRAGMA table_info`, in declaration order.
    pub async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        self.run(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get(1)?,
                        declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        not_null: row.get::<_, i64>(3)? != 0,
                        has_default: row.get::<_, Option<String>>(4)?.is_some(),
                        primary_key: row.get::<_, i64>(5)? > 0,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(columns)
        })
        .await
    }

    pub async fn row_count(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        self.run(move |conn| {
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    /// Delete every row in a table, returning the number removed.
    pub async fn delete_all(&self, table: &str) -> Result<u64> {
        let sql = format!("DELETE FROM {}", quote_ident(table));
        self.run(move |conn| Ok(conn.execute(&sql, [])? as u64)).await
    }

    /// Execute statements one by one inside a single transaction.
    pub async fn execute_script(&self, statements: Vec<String>) -> Result<()> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for statement in &statements {
                tx.execute_batch(statement).map_err(|e| MigrationError::Database {
                    message: format!("Failed to execute statement: {}: {}", e, first_line(statement)),
                    source: Some(e),
                })?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Insert rows into `table`.
    ///
    /// With `use_transaction` the batch is all-or-nothing: the first failing
    /// row rolls the whole batch back and is returned as the error. Without
    /// it, rows are inserted individually and failures are collected in the
    /// outcome.
    pub async fn insert_batch(
        &self,
        table: &str,
        columns: Vec<String>,
        rows: Vec<Vec<CsvValue>>,
        use_transaction: bool,
        timeout: Option<Duration>,
    ) -> Result<BatchInsertOutcome> {
        if rows.is_empty() {
            return Ok(BatchInsertOutcome::default());
        }

        let sql = insert_statement(table, &columns);
        let operation = format!("Insert batch into {}", table);
        let label = operation.clone();
        let table = table.to_string();

        self.run_with_timeout(&label, timeout, move |conn, deadline| {
            let check_deadline = |deadline: Option<Instant>| -> Result<()> {
                match deadline {
                    Some(d) if Instant::now() >= d => Err(MigrationError::Timeout {
                        operation: operation.clone(),
                        after: Duration::ZERO,
                    }),
                    _ => Ok(()),
                }
            };

            let mut outcome = BatchInsertOutcome::default();
            if use_transaction {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(&sql)?;
                    for (index, row) in rows.iter().enumerate() {
                        check_deadline(deadline)?;
                        stmt.execute(rusqlite::params_from_iter(row.iter()))
                            .map_err(|e| MigrationError::Database {
                                message: format!("Row {} of batch into {} failed: {}", index + 1, table, e),
                                source: Some(e),
                            })?;
                        outcome.inserted += 1;
                    }
                }
                tx.commit()?;
            } else {
                let mut stmt = conn.prepare(&sql)?;
                for (index, row) in rows.iter().enumerate() {
                    check_deadline(deadline)?;
                    match stmt.execute(rusqlite::params_from_iter(row.iter())) {
                        Ok(_) => outcome.inserted += 1,
                        Err(e) => outcome.failed.push((index, e.to_string())),
                    }
                }
            }
            Ok(outcome)
        })
        .await
    }

    /// Rows reported by `PRAGMA foreign_key_check`, rendered as messages.
    pub async fn foreign_key_violations(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
            let violations = stmt
                .query_map([], |row| {
                    let table: String = row.get(0)?;
                    let rowid: Option<i64> = row.get(1)?;
                    let parent: String = row.get(2)?;
                    Ok(match rowid {
                        Some(id) => format!("{} row {} references missing {} row", table, id, parent),
                        None => format!("{} references missing {} row", table, parent),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(violations)
        })
        .await
    }

    /// Messages from `PRAGMA integrity_check`, empty when the file is sound.
    pub async fn integrity_check(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("PRAGMA integrity_check")?;
            let messages = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages.into_iter().filter(|m| m != "ok").collect())
        })
        .await
    }

    /// Run a read query and render every value as text.
    pub async fn query_rows(&self, sql: &str, timeout: Option<Duration>) -> Result<QueryOutput> {
        let sql = sql.to_string();
        self.run_with_timeout("Query", timeout, move |conn, _| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
            let width = columns.len();
            let rows = stmt
                .query_map([], |row| {
                    (0..width)
                        .map(|i| row.get_ref(i).map(render_value))
                        .collect::<rusqlite::Result<QueryRow>>()
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(QueryOutput { columns, rows })
        })
        .await
    }

    /// `sqlite_version()` of the linked library.
    pub async fn version(&self) -> Result<String> {
        self.run(|conn| Ok(conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?))
            .await
    }
}

fn insert_statement(table: &str, columns: &[String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

fn render_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(format!("<{} bytes>", b.len())),
    }
}

fn first_line(statement: &str) -> &str {
    statement.trim().lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seeded_db() -> (TempDir, TargetDatabase) {
        let dir = TempDir::new().unwrap();
        let db = TargetDatabase::open(dir.path().join("target.db")).unwrap();
        db.execute_script(vec![
            "CREATE TABLE Parent (ID INTEGER PRIMARY KEY, Name TEXT NOT NULL)".into(),
            "CREATE TABLE Child (ID INTEGER PRIMARY KEY, ParentID INTEGER REFERENCES Parent(ID))"
                .into(),
        ])
        .await
        .unwrap();
        (dir, db)
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_connection_string() {
        assert_eq!(
            parse_connection_string("Data Source=/var/lab/legacy.db;Mode=ReadOnly"),
            Some(PathBuf::from("/var/lab/legacy.db"))
        );
        assert_eq!(
            parse_connection_string("legacy.db"),
            Some(PathBuf::from("legacy.db"))
        );
        assert_eq!(parse_connection_string("Server=x;Database=y"), None);
        assert_eq!(parse_connection_string("  "), None);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("Test"), "\"Test\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[tokio::test]
    async fn test_table_queries() {
        let (_dir, db) = seeded_db().await;
        assert!(db.table_exists("parent").await.unwrap());
        assert!(!db.table_exists("Missing").await.unwrap());
        assert_eq!(db.list_tables().await.unwrap(), vec!["Child", "Parent"]);
        assert_eq!(db.row_count("Parent").await.unwrap(), 0);

        let columns = db.table_columns("Parent").await.unwrap();
        assert_eq!(columns.len(), 2);
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].name, "Name");
        assert!(columns[1].not_null);
        assert_eq!(columns[1].declared_type, "TEXT");
    }

    #[tokio::test]
    async fn test_transactional_batch_rolls_back() {
        let (_dir, db) = seeded_db().await;
        let rows = vec![
            vec![CsvValue::Integer(1), CsvValue::Text("a".into())],
            vec![CsvValue::Integer(2), CsvValue::Null],
        ];
        let result = db
            .insert_batch("Parent", cols(&["ID", "Name"]), rows, true, None)
            .await;
        assert!(result.is_err());
        assert_eq!(db.row_count("Parent").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_transactional_batch_collects_failures() {
        let (_dir, db) = seeded_db().await;
        let rows = vec![
            vec![CsvValue::Integer(1), CsvValue::Text("a".into())],
            vec![CsvValue::Integer(2), CsvValue::Null],
            vec![CsvValue::Integer(3), CsvValue::Text("c".into())],
        ];
        let outcome = db
            .insert_batch("Parent", cols(&["ID", "Name"]), rows, false, None)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, 1);
        assert_eq!(db.row_count("Parent").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_foreign_key_enforced_and_reported() {
        let (_dir, db) = seeded_db().await;
        let orphan = db
            .insert_batch(
                "Child",
                cols(&["ID", "ParentID"]),
                vec![vec![CsvValue::Integer(1), CsvValue::Integer(99)]],
                true,
                None,
            )
            .await;
        assert!(orphan.is_err());

        db.run(|conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys=OFF; INSERT INTO Child (ID, ParentID) VALUES (1, 99); PRAGMA foreign_keys=ON;",
            )?;
            Ok(())
        })
        .await
        .unwrap();
        let violations = db.foreign_key_violations().await.unwrap();
        assert_eq!(violations.len(), 1);
        assert!(db.integrity_check().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_all_and_query_rows() {
        let (_dir, db) = seeded_db().await;
        db.insert_batch(
            "Parent",
            cols(&["ID", "Name"]),
            vec![
                vec![CsvValue::Integer(1), CsvValue::Text("a".into())],
                vec![CsvValue::Integer(2), CsvValue::Boolean(true)],
            ],
            true,
            None,
        )
        .await
        .unwrap();

        let output = db
            .query_rows("SELECT ID, Name FROM Parent ORDER BY ID", None)
            .await
            .unwrap();
        assert_eq!(output.columns, cols(&["ID", "Name"]));
        assert_eq!(output.rows[1], vec![Some("2".into()), Some("1".into())]);

        assert_eq!(db.delete_all("Parent").await.unwrap(), 2);
        assert_eq!(db.row_count("Parent").await.unwrap(), 0);
    }

    /// Counts to ten million; takes well over a few hundred milliseconds.
    const SLOW_QUERY: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 10000000) SELECT count(*) FROM c";

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_batch_does_not_interrupt_connection_holder() {
        let (_dir, db) = seeded_db().await;

        let holder = db.clone();
        let long_read = tokio::spawn(async move {
            holder
                .run(|conn| Ok(conn.query_row(SLOW_QUERY, [], |row| row.get::<_, i64>(0))?))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Queued behind the read for longer than its own limit.
        let batch = db
            .insert_batch(
                "Parent",
                cols(&["ID", "Name"]),
                vec![vec![CsvValue::Integer(1), CsvValue::Text("a".into())]],
                true,
                Some(Duration::from_millis(100)),
            )
            .await;

        assert_eq!(long_read.await.unwrap().unwrap(), 10_000_000);
        assert_eq!(batch.unwrap().inserted, 1);
        assert_eq!(db.row_count("Parent").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_timeout_interrupts_own_statement() {
        let (_dir, db) = seeded_db().await;
        let started = Instant::now();

        let result = db.query_rows(SLOW_QUERY, Some(Duration::from_millis(50))).await;

        assert!(matches!(result, Err(MigrationError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        // The connection stays usable after the interrupt.
        assert_eq!(db.row_count("Parent").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE Parent (ID INTEGER PRIMARY KEY); INSERT INTO Parent VALUES (1);")
                .unwrap();
        }

        let legacy =
            TargetDatabase::from_connection_string(&format!("Data Source={}", path.display())).unwrap();
        assert_eq!(legacy.row_count("Parent").await.unwrap(), 1);
        assert!(legacy.delete_all("Parent").await.is_err());
        assert!(!legacy.version().await.unwrap().is_empty());

        let missing = TargetDatabase::open_read_only(dir.path().join("none.db"));
        assert!(matches!(missing, Err(MigrationError::FileNotFound(_))));
    }
}
