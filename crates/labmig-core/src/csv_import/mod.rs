//! CSV parsing for seed data.
//!
//! Files are read with the `csv` crate, cells are coerced to declared column
//! types, and failures are captured per row so the caller decides whether to
//! continue.

mod parser;
mod types;
mod validate;

pub use parser::{count_data_rows, parse_csv_file, parse_csv_reader, process_in_batches};
pub use types::{
    ColumnType, CsvBatch, CsvColumnDefinition, CsvDataValidationResult, CsvErrorType,
    CsvParseError, CsvParseOptions, CsvParseResult, CsvRow, CsvSchema, CsvValidationIssue,
    CsvValidationRule, CsvValue,
};
pub use validate::validate_csv_data;
