//! Text-level handling of table creation scripts.
//!
//! Nothing here touches a database: scripts are cleaned, split into
//! statements and scanned for created and referenced tables.

use crate::csv_import::{ColumnType, CsvColumnDefinition, CsvSchema};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bCREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:[\["`]?\w+[\]"`]?\.)?[\["`]?(\w+)[\]"`]?"#)
        .expect("create table regex must compile")
});

static REFERENCES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bREFERENCES\s+(?:[\["`]?\w+[\]"`]?\.)?[\["`]?(\w+)[\]"`]?\s*\("#)
        .expect("references regex must compile")
});

static SCHEMA_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\[dbo\]|\bdbo)\.").expect("schema qualifier regex must compile")
});

static SESSION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:GO|USE\s+\S+|SET\s+(?:ANSI_NULLS|QUOTED_IDENTIFIER)\s+\w+)\s*;?\s*$")
        .expect("session line regex must compile")
});

static DELETE_WITHOUT_WHERE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*DELETE\s+FROM\s+\S+\s*$").expect("delete regex must compile")
});

static ALTER_DROP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*ALTER\s+TABLE\s+\S+\s+DROP\b").expect("alter drop regex must compile")
});

static LENGTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*(\d+)\s*\)").expect("length regex must compile"));

/// Remove `--` and `/* */` comments outside string literals.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Normalize a script for SQLite: drop comments, batch separators, session
/// settings and `dbo` schema qualifiers.
pub fn clean_script(sql: &str) -> String {
    let without_comments = strip_comments(sql);
    let without_session = SESSION_LINE.replace_all(&without_comments, "");
    SCHEMA_QUALIFIER.replace_all(&without_session, "").into_owned()
}

/// Split on `;` outside quotes and brackets, dropping empty statements.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in sql.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                }
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '[' => {
                    quote = Some(']');
                    current.push(c);
                }
                _ => current.push(c),
            },
        }
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, statement: &str) {
    let trimmed = statement.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// Clean a script and split it into executable statements.
pub fn prepare_statements(sql: &str) -> Vec<String> {
    split_statements(&clean_script(sql))
}

/// Tables created by the script, in order of appearance.
pub fn created_tables(sql: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    CREATE_TABLE
        .captures_iter(sql)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| seen.insert(name.to_ascii_lowercase()))
        .collect()
}

/// Tables named in `REFERENCES` clauses.
pub fn referenced_tables(sql: &str) -> BTreeSet<String> {
    REFERENCES
        .captures_iter(sql)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Whether parentheses balance outside string literals.
pub fn parentheses_balanced(sql: &str) -> bool {
    let mut depth: i64 = 0;
    let mut quote: Option<char> = None;
    for c in sql.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Warnings for statements outside the safe subset.
pub fn statement_warnings(statements: &[String]) -> Vec<String> {
    let mut warnings = Vec::new();
    for statement in statements {
        let upper = statement.trim_start().to_ascii_uppercase();
        let summary = summarize(statement);

        if upper.starts_with("DROP ") {
            warnings.push(format!("Script drops objects: {}", summary));
        } else if upper.starts_with("TRUNCATE ") {
            warnings.push(format!("Script truncates a table: {}", summary));
        } else if ALTER_DROP.is_match(statement) {
            warnings.push(format!("Script drops columns or constraints: {}", summary));
        } else if DELETE_WITHOUT_WHERE.is_match(statement) {
            warnings.push(format!("DELETE without WHERE clause: {}", summary));
        } else if !is_safe_statement(&upper) {
            warnings.push(format!("Unsupported statement: {}", summary));
        }
    }
    warnings
}

fn is_safe_statement(upper: &str) -> bool {
    const SAFE_PREFIXES: [&str; 7] = [
        "CREATE TABLE",
        "CREATE INDEX",
        "CREATE UNIQUE INDEX",
        "CREATE VIEW",
        "INSERT ",
        "ALTER TABLE",
        "DELETE ",
    ];
    let normalized: String = upper.split_whitespace().collect::<Vec<_>>().join(" ");
    SAFE_PREFIXES.iter().any(|p| normalized.starts_with(p))
}

fn summarize(statement: &str) -> String {
    let line = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() > 80 {
        format!("{}...", line.chars().take(80).collect::<String>())
    } else {
        line
    }
}

/// Map a declared SQL column type to a CSV coercion target and length limit.
pub fn column_type_for(declared: &str) -> (ColumnType, Option<usize>) {
    let upper = declared
        .replace(['[', ']', '"', '`'], "")
        .trim()
        .to_ascii_uppercase();
    let base = upper
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default();

    let column_type = match base {
        "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => ColumnType::Integer,
        "BIT" | "BOOL" | "BOOLEAN" => ColumnType::Boolean,
        "DECIMAL" | "NUMERIC" | "FLOAT" | "REAL" | "DOUBLE" | "MONEY" | "SMALLMONEY" => {
            ColumnType::Decimal
        }
        "DATE" | "DATETIME" | "DATETIME2" | "SMALLDATETIME" | "DATETIMEOFFSET" | "TIMESTAMP" => {
            ColumnType::DateTime
        }
        _ => ColumnType::String,
    };

    let max_length = match column_type {
        ColumnType::String => LENGTH
            .captures(&upper)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok()),
        _ => None,
    };
    (column_type, max_length)
}

/// Derive a CSV schema from the first CREATE TABLE statement in `sql`.
///
/// NOT NULL columns without a default or identity are required; `(n)` on
/// character types becomes the maximum length.
pub fn schema_from_create_table(sql: &str) -> Option<CsvSchema> {
    let cleaned = clean_script(sql);
    let captures = CREATE_TABLE.captures(&cleaned)?;
    let table_name = captures.get(1)?.as_str().to_string();
    let after_name = captures.get(0)?.end();
    let body = parenthesized_body(&cleaned[after_name..])?;

    let columns = split_top_level(body)
        .into_iter()
        .filter_map(|definition| column_definition(&definition))
        .collect();

    Some(CsvSchema {
        table_name,
        columns,
        validation_rules: Vec::new(),
    })
}

fn parenthesized_body(text: &str) -> Option<&str> {
    let start = text.find('(')?;
    let mut depth = 0usize;
    for (offset, c) in text[start..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start + 1..start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in body.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn column_definition(definition: &str) -> Option<CsvColumnDefinition> {
    let upper = definition.to_ascii_uppercase();
    const TABLE_CONSTRAINTS: [&str; 6] =
        ["CONSTRAINT", "PRIMARY", "FOREIGN", "UNIQUE", "CHECK", "INDEX"];
    let first_word = upper.split_whitespace().next()?;
    if TABLE_CONSTRAINTS.contains(&first_word) {
        return None;
    }

    let mut tokens = definition.split_whitespace();
    let name = tokens
        .next()?
        .trim_matches(|c| matches!(c, '[' | ']' | '"' | '`'))
        .to_string();
    let declared: String = tokens.collect::<Vec<_>>().join(" ");
    let (data_type, max_length) = column_type_for(&declared);

    let generated = upper.contains("IDENTITY") || upper.contains("AUTOINCREMENT");
    let is_required = upper.contains("NOT NULL") && !upper.contains("DEFAULT") && !generated;

    Some(CsvColumnDefinition {
        name,
        data_type,
        is_required,
        max_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQL_SERVER_SCRIPT: &str = r#"
USE [LabResults]
GO
SET ANSI_NULLS ON
GO
SET QUOTED_IDENTIFIER ON
GO
-- sample results
CREATE TABLE [dbo].[TestReadings](
    [sampleID] [int] NOT NULL,
    [testID] [smallint] NOT NULL,
    [value1] [float] NULL,
    [status] [nvarchar](10) NOT NULL DEFAULT 'open', /* workflow */
    [entryDate] [datetime] NULL,
    CONSTRAINT FK_Test FOREIGN KEY ([testID]) REFERENCES [dbo].[Test] ([ID])
);
GO
"#;

    #[test]
    fn test_clean_script_removes_session_noise() {
        let cleaned = clean_script(SQL_SERVER_SCRIPT);
        assert!(!cleaned.contains("GO"));
        assert!(!cleaned.contains("USE"));
        assert!(!cleaned.contains("ANSI_NULLS"));
        assert!(!cleaned.contains("sample results"));
        assert!(!cleaned.contains("workflow"));
        assert!(!cleaned.contains("dbo"));
        assert!(cleaned.contains("CREATE TABLE [TestReadings]"));
    }

    #[test]
    fn test_split_respects_quotes() {
        let statements = split_statements("INSERT INTO t VALUES ('a;b'); CREATE TABLE [x;y] (id INT);;");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "INSERT INTO t VALUES ('a;b')");
    }

    #[test]
    fn test_detects_created_and_referenced_tables() {
        assert_eq!(created_tables(SQL_SERVER_SCRIPT), vec!["TestReadings"]);
        let referenced = referenced_tables(SQL_SERVER_SCRIPT);
        assert_eq!(referenced.into_iter().collect::<Vec<_>>(), vec!["Test"]);
    }

    #[test]
    fn test_parentheses_balance() {
        assert!(parentheses_balanced("CREATE TABLE t (a INT, b VARCHAR(5))"));
        assert!(!parentheses_balanced("CREATE TABLE t (a INT, b VARCHAR(5)"));
        assert!(parentheses_balanced("INSERT INTO t VALUES (')')"));
    }

    #[test]
    fn test_statement_warnings() {
        let statements = vec![
            "CREATE TABLE t (a INT)".to_string(),
            "DROP TABLE old".to_string(),
            "DELETE FROM t".to_string(),
            "DELETE FROM t WHERE a = 1".to_string(),
            "ALTER TABLE t DROP COLUMN a".to_string(),
            "EXEC sp_rename 'a', 'b'".to_string(),
        ];
        let warnings = statement_warnings(&statements);
        assert_eq!(warnings.len(), 4);
        assert!(warnings[0].contains("drops objects"));
        assert!(warnings[3].starts_with("Unsupported statement"));
    }

    #[test]
    fn test_schema_from_create_table() {
        let schema = schema_from_create_table(SQL_SERVER_SCRIPT).unwrap();
        assert_eq!(schema.table_name, "TestReadings");
        assert_eq!(schema.columns.len(), 5);

        let sample = schema.column("sampleid").unwrap();
        assert_eq!(sample.data_type, ColumnType::Integer);
        assert!(sample.is_required);

        let status = schema.column("status").unwrap();
        assert_eq!(status.data_type, ColumnType::String);
        assert_eq!(status.max_length, Some(10));
        assert!(!status.is_required);

        assert_eq!(schema.column("value1").unwrap().data_type, ColumnType::Decimal);
        assert_eq!(schema.column("entryDate").unwrap().data_type, ColumnType::DateTime);
    }

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(column_type_for("INTEGER PRIMARY KEY"), (ColumnType::Integer, None));
        assert_eq!(column_type_for("bit"), (ColumnType::Boolean, None));
        assert_eq!(column_type_for("NVARCHAR(MAX)"), (ColumnType::String, None));
        assert_eq!(column_type_for("TEXT"), (ColumnType::String, None));
        assert_eq!(column_type_for("decimal(9,2)"), (ColumnType::Decimal, None));
    }
}
