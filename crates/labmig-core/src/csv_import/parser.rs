//! CSV reading with per-cell coercion.
//!
//! Both the whole-file parser and the batch stream share `RowDecoder`, so a
//! row parses identically whichever entry point reads it.

use super::types::{
    ColumnType, CsvBatch, CsvErrorType, CsvParseError, CsvParseOptions, CsvParseResult, CsvRow,
    CsvValue,
};
use crate::config::timespan;
use crate::error::{MigrationError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parse a whole CSV file.
///
/// Never fails: an unreadable file yields `success = false` with a single
/// `FileNotFound` or `ReadError` entry.
pub async fn parse_csv_file(path: impl AsRef<Path>, options: &CsvParseOptions) -> CsvParseResult {
    let path = path.as_ref().to_path_buf();
    let options = options.clone();

    let task_path = path.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let mut result = match File::open(&task_path) {
            Ok(file) => parse_csv_reader(file, &options),
            Err(e) => open_failure(&task_path, e),
        };
        result.file_path = Some(task_path);
        result.duration = timespan::from_std(started.elapsed());
        result
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) => {
            let mut result = CsvParseResult::empty(Some(path));
            result.success = false;
            result.errors.push(CsvParseError {
                row_number: 0,
                column: None,
                value: None,
                message: format!("Parser task failed: {}", e),
                error_type: CsvErrorType::ReadError,
            });
            result
        }
    }
}

fn open_failure(path: &Path, e: std::io::Error) -> CsvParseResult {
    let mut result = CsvParseResult::empty(Some(path.to_path_buf()));
    result.success = false;
    let (message, error_type) = if e.kind() == std::io::ErrorKind::NotFound {
        (format!("File not found: {}", path.display()), CsvErrorType::FileNotFound)
    } else {
        (format!("Failed to open {}: {}", path.display(), e), CsvErrorType::ReadError)
    };
    result.errors.push(CsvParseError {
        row_number: 0,
        column: None,
        value: None,
        message,
        error_type,
    });
    result
}

/// Parse CSV from any reader.
pub fn parse_csv_reader<R: Read>(reader: R, options: &CsvParseOptions) -> CsvParseResult {
    let mut result = CsvParseResult::empty(None);
    let mut decoder: Option<RowDecoder> = None;

    for next in build_reader(reader, options).into_records() {
        let record = match next {
            Ok(record) => record,
            Err(e) => {
                let row_number = e.position().map(|p| p.line() as usize).unwrap_or(0);
                result.total_rows += 1;
                result.error_rows += 1;
                result.errors.push(CsvParseError {
                    row_number,
                    column: None,
                    value: None,
                    message: e.to_string(),
                    error_type: CsvErrorType::ParseError,
                });
                if !options.continue_on_error || error_limit_reached(options, result.errors.len()) {
                    result.success = false;
                    break;
                }
                continue;
            }
        };

        if options.skip_empty_lines && is_blank_record(&record) {
            continue;
        }

        if decoder.is_none() {
            let d = RowDecoder::new(&record, options);
            result.headers = d.headers.clone();
            decoder = Some(d);
            if options.has_header {
                continue;
            }
        }
        let Some(decoder) = decoder.as_ref() else {
            continue;
        };

        let (row, errors) = decoder.decode(&record);
        result.total_rows += 1;
        if errors.is_empty() {
            result.valid_rows += 1;
        } else {
            result.error_rows += 1;
            result.errors.extend(errors);
        }
        let failed = row.has_errors;
        result.data.push(row);

        if failed && (!options.continue_on_error || error_limit_reached(options, result.errors.len())) {
            result.success = false;
            break;
        }
    }

    debug!(
        rows = result.total_rows,
        errors = result.error_rows,
        "Parsed CSV data"
    );
    result
}

/// Stream a CSV file in chunks of `batch_size` rows.
///
/// The reader runs on a blocking thread and stays at most one batch ahead of
/// the consumer. The final batch carries `is_last_batch = true`; an empty file
/// yields no batches. An unreadable file yields a single error item, as does an
/// aborting row error when `continue_on_error` is off.
pub fn process_in_batches(
    path: impl Into<PathBuf>,
    batch_size: usize,
    options: CsvParseOptions,
) -> BoxStream<'static, Result<CsvBatch>> {
    let path = path.into();
    let batch_size = batch_size.max(1);
    let (tx, rx) = mpsc::channel::<Result<CsvBatch>>(1);

    tokio::task::spawn_blocking(move || produce_batches(&path, batch_size, &options, &tx));

    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

/// Count data records without decoding them.
pub async fn count_data_rows(path: impl Into<PathBuf>, options: &CsvParseOptions) -> Result<usize> {
    let path = path.into();
    let options = options.clone();
    tokio::task::spawn_blocking(move || -> Result<usize> {
        let file = File::open(&path).map_err(|e| MigrationError::io_with_path(e, &path))?;
        let mut records = 0usize;
        for next in build_reader(file, &options).into_records() {
            let record = next?;
            if options.skip_empty_lines && is_blank_record(&record) {
                continue;
            }
            records += 1;
        }
        Ok(records.saturating_sub(usize::from(options.has_header)))
    })
    .await?
}

fn produce_batches(
    path: &Path,
    batch_size: usize,
    options: &CsvParseOptions,
    tx: &mpsc::Sender<Result<CsvBatch>>,
) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            let _ = tx.blocking_send(Err(MigrationError::io_with_path(e, path)));
            return;
        }
    };

    let mut decoder: Option<RowDecoder> = None;
    let mut current = CsvBatch::new(1, Vec::new());
    let mut error_count = 0usize;

    for next in build_reader(file, options).into_records() {
        let record = match next {
            Ok(record) => record,
            Err(e) => {
                error_count += 1;
                if !options.continue_on_error || error_limit_reached(options, error_count) {
                    let _ = tx.blocking_send(Err(e.into()));
                    return;
                }
                let row_number = e.position().map(|p| p.line() as usize).unwrap_or(0);
                warn!(path = %path.display(), row_number, "Skipping unreadable CSV record: {}", e);
                current.error_rows += 1;
                current.errors.push(CsvParseError {
                    row_number,
                    column: None,
                    value: None,
                    message: e.to_string(),
                    error_type: CsvErrorType::ParseError,
                });
                continue;
            }
        };

        if options.skip_empty_lines && is_blank_record(&record) {
            continue;
        }

        if decoder.is_none() {
            let d = RowDecoder::new(&record, options);
            current.headers = d.headers.clone();
            decoder = Some(d);
            if options.has_header {
                continue;
            }
        }
        let Some(decoder) = decoder.as_ref() else {
            continue;
        };

        // A full batch is only sent once another row proves it is not the last
        if current.data.len() >= batch_size {
            let next_number = current.batch_number + 1;
            let full = std::mem::replace(&mut current, CsvBatch::new(next_number, decoder.headers.clone()));
            if tx.blocking_send(Ok(full)).is_err() {
                return;
            }
        }

        let (row, errors) = decoder.decode(&record);
        if errors.is_empty() {
            current.valid_rows += 1;
        } else {
            error_count += errors.len();
            current.error_rows += 1;
            if !options.continue_on_error || error_limit_reached(options, error_count) {
                let first = &errors[0];
                let _ = tx.blocking_send(Err(MigrationError::Csv {
                    message: first.message.clone(),
                    row: Some(first.row_number),
                }));
                return;
            }
            current.errors.extend(errors);
        }
        current.data.push(row);
    }

    if !current.data.is_empty() || !current.errors.is_empty() {
        current.is_last_batch = true;
        let _ = tx.blocking_send(Ok(current));
    }
}

fn build_reader<R: Read>(reader: R, options: &CsvParseOptions) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(options.delimiter)
        .trim(if options.trim_whitespace { Trim::All } else { Trim::None })
        .from_reader(reader)
}

fn is_blank_record(record: &StringRecord) -> bool {
    record.iter().all(|f| f.trim().is_empty())
}

fn error_limit_reached(options: &CsvParseOptions, errors: usize) -> bool {
    options.max_errors > 0 && errors >= options.max_errors
}

/// Turns raw records into typed rows for a fixed header set.
struct RowDecoder {
    headers: Vec<String>,
    types: Vec<Option<ColumnType>>,
}

impl RowDecoder {
    fn new(first: &StringRecord, options: &CsvParseOptions) -> Self {
        let headers: Vec<String> = if options.has_header {
            first
                .iter()
                .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
                .collect()
        } else {
            (1..=first.len()).map(|i| format!("Column{}", i)).collect()
        };
        let types = headers.iter().map(|h| options.type_for(h)).collect();
        Self { headers, types }
    }

    fn decode(&self, record: &StringRecord) -> (CsvRow, Vec<CsvParseError>) {
        let row_number = record.position().map(|p| p.line() as usize).unwrap_or(0);
        let mut errors = Vec::new();
        let mut values = BTreeMap::new();

        if record.len() != self.headers.len() {
            errors.push(CsvParseError {
                row_number,
                column: None,
                value: None,
                message: format!(
                    "Expected {} fields but found {}",
                    self.headers.len(),
                    record.len()
                ),
                error_type: CsvErrorType::FieldCount,
            });
        }

        for (index, header) in self.headers.iter().enumerate() {
            let raw = record.get(index).unwrap_or("");
            let value = match coerce(raw, self.types[index]) {
                Ok(value) => value,
                Err(expected) => {
                    errors.push(CsvParseError {
                        row_number,
                        column: Some(header.clone()),
                        value: Some(raw.to_string()),
                        message: format!(
                            "Cannot convert '{}' in column {} to {}",
                            raw, header, expected
                        ),
                        error_type: CsvErrorType::TypeConversion,
                    });
                    CsvValue::Text(raw.to_string())
                }
            };
            values.insert(header.clone(), value);
        }

        let row = CsvRow {
            row_number,
            values,
            has_errors: !errors.is_empty(),
        };
        (row, errors)
    }
}

/// Coerce one cell; on failure returns the expected type.
fn coerce(raw: &str, column_type: Option<ColumnType>) -> std::result::Result<CsvValue, ColumnType> {
    if raw.is_empty() {
        return Ok(CsvValue::Null);
    }
    let Some(column_type) = column_type else {
        return Ok(CsvValue::Text(raw.to_string()));
    };
    let trimmed = raw.trim();

    match column_type {
        ColumnType::String => Ok(CsvValue::Text(raw.to_string())),
        ColumnType::Integer => trimmed
            .parse::<i64>()
            .map(CsvValue::Integer)
            .map_err(|_| column_type),
        ColumnType::Decimal => trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(CsvValue::Decimal)
            .ok_or(column_type),
        ColumnType::Boolean => parse_bool(trimmed).map(CsvValue::Boolean).ok_or(column_type),
        ColumnType::DateTime => parse_datetime(trimmed)
            .map(CsvValue::DateTime)
            .ok_or(column_type),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Some(true),
        "false" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
