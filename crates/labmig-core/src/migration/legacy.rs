//! Comparing seeded tables with the legacy database.

use crate::cancel::CancellationToken;
use crate::config::{timespan, ValidationOptions};
use crate::database::{quote_ident, QueryOutput, QueryRow, TargetDatabase};
use crate::error::Result;
use chrono::TimeDelta;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of comparing one table.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryComparison {
    pub query_name: String,
    pub data_matches: bool,
    pub current_row_count: usize,
    pub legacy_row_count: usize,
    /// All differences found, including unrecorded ones.
    pub discrepancy_count: usize,
    pub discrepancies: Vec<String>,
    #[serde(with = "timespan")]
    pub current_execution_time: TimeDelta,
    #[serde(with = "timespan")]
    pub legacy_execution_time: TimeDelta,
    /// Target time divided by legacy time.
    pub performance_ratio: f64,
    pub performance_regression: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyValidationResult {
    pub queries_validated: u64,
    pub queries_matched: u64,
    pub queries_failed: u64,
    pub match_percentage: f64,
    pub results: Vec<QueryComparison>,
    #[serde(with = "timespan")]
    pub duration: TimeDelta,
}

fn included(options: &ValidationOptions, table: &str) -> bool {
    let matches = |list: &[String]| list.iter().any(|q| q.eq_ignore_ascii_case(table));
    !matches(&options.exclude_queries) && (options.include_queries.is_empty() || matches(&options.include_queries))
}

/// Compare each of `tables` between `target` and the legacy database named by
/// `LegacyConnectionString`.
///
/// Fails only when the legacy database cannot be opened or on cancellation;
/// per-table problems are reported in the result.
pub async fn compare_with_legacy(
    target: &TargetDatabase,
    options: &ValidationOptions,
    tables: &[String],
    cancel: &CancellationToken,
) -> Result<LegacyValidationResult> {
    let started = Instant::now();
    let legacy = TargetDatabase::from_connection_string(&options.legacy_connection_string)?;
    let timeout = timespan::to_std_positive(&options.query_timeout);
    let mut result = LegacyValidationResult::default();

    for table in tables.iter().filter(|t| included(options, t)) {
        cancel.check()?;
        let comparison = compare_table(target, &legacy, table, options, timeout).await;
        result.queries_validated += 1;
        if comparison.error.is_none() && comparison.data_matches {
            result.queries_matched += 1;
        } else {
            result.queries_failed += 1;
        }
        result.results.push(comparison);
    }

    if result.queries_validated > 0 {
        result.match_percentage = result.queries_matched as f64 / result.queries_validated as f64 * 100.0;
    }
    result.duration = timespan::from_std(started.elapsed());
    info!(
        validated = result.queries_validated,
        matched = result.queries_matched,
        failed = result.queries_failed,
        "Legacy comparison finished"
    );
    Ok(result)
}

async fn timed_query(
    db: &TargetDatabase,
    sql: &str,
    timeout: Option<Duration>,
) -> (Result<QueryOutput>, TimeDelta) {
    let started = Instant::now();
    let output = db.query_rows(sql, timeout).await;
    (output, timespan::from_std(started.elapsed()))
}

async fn compare_table(
    target: &TargetDatabase,
    legacy: &TargetDatabase,
    table: &str,
    options: &ValidationOptions,
    timeout: Option<Duration>,
) -> QueryComparison {
    let sql = format!("SELECT * FROM {}", quote_ident(table));
    let mut comparison = QueryComparison {
        query_name: table.to_string(),
        ..Default::default()
    };

    let (current, current_time) = timed_query(target, &sql, timeout).await;
    let (previous, legacy_time) = timed_query(legacy, &sql, timeout).await;
    comparison.current_execution_time = current_time;
    comparison.legacy_execution_time = legacy_time;

    let (current, previous) = match (current, previous) {
        (Ok(c), Ok(p)) => (c, p),
        (Err(e), _) | (_, Err(e)) => {
            warn!(table, error = %e, "Legacy comparison query failed");
            comparison.error = Some(e.to_string());
            return comparison;
        }
    };
    comparison.current_row_count = current.rows.len();
    comparison.legacy_row_count = previous.rows.len();

    if options.compare_query_results {
        let limit = options.max_discrepancies_to_report.max(0) as usize;
        let mut found = Vec::new();
        diff_rows(&current, &previous, &mut found);
        comparison.discrepancy_count = found.len();
        found.truncate(limit);
        comparison.discrepancies = found;
    }
    comparison.data_matches =
        comparison.discrepancy_count == 0 && comparison.current_row_count == comparison.legacy_row_count;

    if options.compare_performance {
        let legacy_secs = duration_secs(&legacy_time);
        if legacy_secs > 0.0 {
            comparison.performance_ratio = duration_secs(&current_time) / legacy_secs;
            comparison.performance_regression =
                (comparison.performance_ratio - 1.0) * 100.0 > options.performance_threshold_percent;
        }
    }
    comparison
}

fn duration_secs(value: &TimeDelta) -> f64 {
    value.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
}

/// Rows keyed by their first column; values compared by column name.
fn diff_rows(current: &QueryOutput, legacy: &QueryOutput, found: &mut Vec<String>) {
    if current.rows.len() != legacy.rows.len() {
        found.push(format!(
            "Row count differs: {} in target, {} in legacy",
            current.rows.len(),
            legacy.rows.len()
        ));
    }

    let key_of = |row: &QueryRow| row.first().cloned().flatten().unwrap_or_default();
    let current_rows: BTreeMap<String, &QueryRow> = current.rows.iter().map(|r| (key_of(r), r)).collect();
    let legacy_rows: BTreeMap<String, &QueryRow> = legacy.rows.iter().map(|r| (key_of(r), r)).collect();

    for key in legacy_rows.keys().filter(|k| !current_rows.contains_key(*k)) {
        found.push(format!("Row {} missing from target", key));
    }
    for key in current_rows.keys().filter(|k| !legacy_rows.contains_key(*k)) {
        found.push(format!("Row {} not present in legacy", key));
    }

    for (key, row) in &current_rows {
        let Some(old) = legacy_rows.get(key) else {
            continue;
        };
        for (index, column) in current.columns.iter().enumerate() {
            let Some(legacy_index) = legacy.columns.iter().position(|c| c.eq_ignore_ascii_case(column)) else {
                continue;
            };
            let new_value = row.get(index).cloned().flatten();
            let old_value = old.get(legacy_index).cloned().flatten();
            if !values_equal(new_value.as_deref(), old_value.as_deref()) {
                found.push(format!(
                    "Row {} column {}: target {:?}, legacy {:?}",
                    key, column, new_value, old_value
                ));
            }
        }
    }
}

/// Text equality, or numeric equality when both sides parse as numbers.
fn values_equal(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) if a != b => match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => (x - y).abs() < 1e-9,
            _ => false,
        },
        (a, b) => a == b,
    }
}
