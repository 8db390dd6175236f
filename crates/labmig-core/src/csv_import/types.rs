//! Types for CSV parsing, batching and schema validation.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

/// Target type a CSV column is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Integer,
    Decimal,
    Boolean,
    DateTime,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::DateTime => "datetime",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options controlling how a CSV file is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CsvParseOptions {
    /// Treat the first record as column names.
    pub has_header: bool,
    /// Record per-row failures and keep reading instead of aborting.
    pub continue_on_error: bool,
    pub trim_whitespace: bool,
    /// Column name → coercion target. Untyped columns stay text.
    pub column_types: HashMap<String, ColumnType>,
    pub delimiter: u8,
    /// Skip records whose fields are all empty.
    pub skip_empty_lines: bool,
    /// Abort after this many errors; 0 means unlimited.
    pub max_errors: usize,
}

impl Default for CsvParseOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            continue_on_error: true,
            trim_whitespace: true,
            column_types: HashMap::new(),
            delimiter: b',',
            skip_empty_lines: true,
            max_errors: 0,
        }
    }
}

impl CsvParseOptions {
    /// Resolve a column's declared type, falling back to a case-insensitive match.
    pub fn type_for(&self, column: &str) -> Option<ColumnType> {
        self.column_types.get(column).copied().or_else(|| {
            self.column_types
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, t)| *t)
        })
    }
}

/// One cell after coercion.
///
/// Empty cells are `Null`. A cell that fails coercion keeps its raw text as
/// `Text`, so a later schema check against the declared type reports it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CsvValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    DateTime(NaiveDateTime),
    Text(String),
}

impl CsvValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CsvValue::Null)
    }

    /// Whether the value is null or an empty string.
    pub fn is_blank(&self) -> bool {
        match self {
            CsvValue::Null => true,
            CsvValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the value, parsing text when possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CsvValue::Integer(i) => Some(*i as f64),
            CsvValue::Decimal(d) => Some(*d),
            CsvValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            CsvValue::Text(s) => s.trim().parse().ok(),
            CsvValue::Null | CsvValue::DateTime(_) => None,
        }
    }

    /// Whether the value satisfies a declared column type.
    pub fn matches_type(&self, column_type: ColumnType) -> bool {
        match (self, column_type) {
            (CsvValue::Null, _) => true,
            (_, ColumnType::String) => true,
            (CsvValue::Integer(_), ColumnType::Integer) => true,
            (CsvValue::Integer(_) | CsvValue::Decimal(_), ColumnType::Decimal) => true,
            (CsvValue::Boolean(_), ColumnType::Boolean) => true,
            (CsvValue::Integer(0 | 1), ColumnType::Boolean) => true,
            (CsvValue::DateTime(_), ColumnType::DateTime) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CsvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsvValue::Null => Ok(()),
            CsvValue::Boolean(b) => write!(f, "{}", b),
            CsvValue::Integer(i) => write!(f, "{}", i),
            CsvValue::Decimal(d) => write!(f, "{}", d),
            CsvValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            CsvValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A parsed data row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvRow {
    /// 1-based line number in the source file.
    pub row_number: usize,
    pub values: BTreeMap<String, CsvValue>,
    /// Set when any cell failed to parse or the field count was wrong.
    pub has_errors: bool,
}

impl CsvRow {
    /// Look up a column, falling back to a case-insensitive match.
    pub fn get(&self, column: &str) -> Option<&CsvValue> {
        self.values.get(column).or_else(|| {
            self.values
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, v)| v)
        })
    }
}

/// Category of a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsvErrorType {
    FileNotFound,
    ReadError,
    ParseError,
    TypeConversion,
    FieldCount,
}

/// A failure recorded while reading a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvParseError {
    /// 1-based line number, 0 when the failure is not tied to a row.
    pub row_number: usize,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    pub message: String,
    pub error_type: CsvErrorType,
}

/// Result of parsing a whole file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvParseResult {
    /// False when the file could not be read or parsing aborted.
    pub success: bool,
    pub file_path: Option<PathBuf>,
    pub headers: Vec<String>,
    pub data: Vec<CsvRow>,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub errors: Vec<CsvParseError>,
    #[serde(with = "crate::config::timespan")]
    pub duration: TimeDelta,
}

impl CsvParseResult {
    pub(crate) fn empty(file_path: Option<PathBuf>) -> Self {
        Self {
            success: true,
            file_path,
            headers: Vec::new(),
            data: Vec::new(),
            total_rows: 0,
            valid_rows: 0,
            error_rows: 0,
            errors: Vec::new(),
            duration: TimeDelta::zero(),
        }
    }
}

/// A chunk of rows produced by `process_in_batches`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvBatch {
    /// 1-based batch index.
    pub batch_number: usize,
    pub headers: Vec<String>,
    pub data: Vec<CsvRow>,
    pub is_last_batch: bool,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub errors: Vec<CsvParseError>,
}

impl CsvBatch {
    pub(crate) fn new(batch_number: usize, headers: Vec<String>) -> Self {
        Self {
            batch_number,
            headers,
            data: Vec::new(),
            is_last_batch: false,
            valid_rows: 0,
            error_rows: 0,
            errors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Expected shape of a CSV file's columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvSchema {
    pub table_name: String,
    pub columns: Vec<CsvColumnDefinition>,
    #[serde(default)]
    pub validation_rules: Vec<CsvValidationRule>,
}

impl CsvSchema {
    /// Column name → type map suitable for `CsvParseOptions::column_types`.
    pub fn column_types(&self) -> HashMap<String, ColumnType> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.data_type))
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&CsvColumnDefinition> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvColumnDefinition {
    pub name: String,
    pub data_type: ColumnType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub max_length: Option<usize>,
}

/// A named per-column rule.
///
/// Supported `rule_type`s: `positive`, `non_negative`, `range` (value
/// `"min,max"`), `regex` (value is the pattern), `allowed_values` (value is a
/// comma-separated list). Unknown types are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvValidationRule {
    pub column_name: String,
    pub rule_type: String,
    #[serde(default)]
    pub rule_value: Option<String>,
    pub error_message: String,
    /// Advisory rules land in `warnings` and do not fail validation.
    #[serde(default)]
    pub is_warning: bool,
}

/// One finding from `validate_csv_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvValidationIssue {
    pub row_number: usize,
    pub column: String,
    #[serde(default)]
    pub value: Option<String>,
    pub message: String,
    /// `required`, `max_length`, `data_type` or the rule's `rule_type`.
    pub rule_type: String,
}

/// Outcome of validating parsed rows against a schema.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvDataValidationResult {
    pub is_valid: bool,
    pub validated_rows: usize,
    pub errors: Vec<CsvValidationIssue>,
    pub warnings: Vec<CsvValidationIssue>,
}

impl CsvDataValidationResult {
    /// Row numbers that have at least one error.
    pub fn invalid_rows(&self) -> std::collections::BTreeSet<usize> {
        self.errors.iter().map(|e| e.row_number).collect()
    }
}
