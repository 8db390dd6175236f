//! Schema and rule checks over parsed rows.

use super::types::{
    CsvDataValidationResult, CsvRow, CsvSchema, CsvValidationIssue, CsvValidationRule, CsvValue,
};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Validate rows against a schema's column definitions and rules.
///
/// Column checks run first (required, max length, declared type), then each
/// rule for that column. Rules with `is_warning` land in `warnings`.
pub fn validate_csv_data(rows: &[CsvRow], schema: &CsvSchema) -> CsvDataValidationResult {
    let mut result = CsvDataValidationResult {
        validated_rows: rows.len(),
        ..Default::default()
    };
    let mut patterns: HashMap<String, Option<Regex>> = HashMap::new();

    for row in rows {
        for column in &schema.columns {
            let value = row.get(&column.name).unwrap_or(&CsvValue::Null);

            if column.is_required && value.is_blank() {
                result.errors.push(finding(
                    row,
                    &column.name,
                    value,
                    format!("{} is required", column.name),
                    "required",
                ));
                continue;
            }

            if let (Some(max), CsvValue::Text(text)) = (column.max_length, value) {
                if text.chars().count() > max {
                    result.errors.push(finding(
                        row,
                        &column.name,
                        value,
                        format!("{} exceeds maximum length of {}", column.name, max),
                        "max_length",
                    ));
                }
            }

            if !value.matches_type(column.data_type) {
                result.errors.push(finding(
                    row,
                    &column.name,
                    value,
                    format!("{} must be of type {}", column.name, column.data_type),
                    "data_type",
                ));
            }
        }

        for rule in &schema.validation_rules {
            let value = row.get(&rule.column_name).unwrap_or(&CsvValue::Null);
            if value.is_null() {
                continue;
            }
            if let Some(passed) = evaluate_rule(rule, value, &mut patterns) {
                if !passed {
                    let issue =
                        finding(row, &rule.column_name, value, rule.error_message.clone(), &rule.rule_type);
                    if rule.is_warning {
                        result.warnings.push(issue);
                    } else {
                        result.errors.push(issue);
                    }
                }
            }
        }
    }

    result.is_valid = result.errors.is_empty();
    debug!(
        table = %schema.table_name,
        rows = rows.len(),
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "Validated CSV data"
    );
    result
}

/// `Some(passed)` for a known rule type, `None` when the rule cannot apply.
fn evaluate_rule(
    rule: &CsvValidationRule,
    value: &CsvValue,
    patterns: &mut HashMap<String, Option<Regex>>,
) -> Option<bool> {
    match rule.rule_type.to_ascii_lowercase().as_str() {
        "positive" => Some(value.as_f64().is_some_and(|n| n > 0.0)),
        "non_negative" => Some(value.as_f64().is_some_and(|n| n >= 0.0)),
        "range" => {
            let (min, max) = rule.rule_value.as_deref()?.split_once(',')?;
            let (min, max) = (min.trim().parse::<f64>().ok()?, max.trim().parse::<f64>().ok()?);
            Some(value.as_f64().is_some_and(|n| n >= min && n <= max))
        }
        "regex" => {
            let pattern = rule.rule_value.as_deref()?;
            let compiled = patterns
                .entry(pattern.to_string())
                .or_insert_with(|| Regex::new(pattern).ok());
            compiled.as_ref().map(|re| re.is_match(&value.to_string()))
        }
        "allowed_values" => {
            let allowed = rule.rule_value.as_deref()?;
            let text = value.to_string();
            Some(allowed.split(',').any(|a| a.trim().eq_ignore_ascii_case(text.trim())))
        }
        other => {
            debug!(rule_type = other, "Ignoring unknown validation rule");
            None
        }
    }
}

fn finding(
    row: &CsvRow,
    column: &str,
    value: &CsvValue,
    message: String,
    rule_type: &str,
) -> CsvValidationIssue {
    CsvValidationIssue {
        row_number: row.row_number,
        column: column.to_string(),
        value: (!value.is_null()).then(|| value.to_string()),
        message,
        rule_type: rule_type.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_import::types::{ColumnType, CsvColumnDefinition};
    use std::collections::BTreeMap;

    fn row(number: usize, cells: &[(&str, CsvValue)]) -> CsvRow {
        let values: BTreeMap<String, CsvValue> = cells
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        CsvRow {
            row_number: number,
            values,
            has_errors: false,
        }
    }

    fn rule(column: &str, rule_type: &str, is_warning: bool) -> CsvValidationRule {
        CsvValidationRule {
            column_name: column.to_string(),
            rule_type: rule_type.to_string(),
            rule_value: None,
            error_message: format!("{column} failed {rule_type}"),
            is_warning,
        }
    }

    fn test_schema() -> CsvSchema {
        CsvSchema {
            table_name: "Test".into(),
            columns: vec![
                CsvColumnDefinition {
                    name: "ID".into(),
                    data_type: ColumnType::Integer,
                    is_required: true,
                    max_length: None,
                },
                CsvColumnDefinition {
                    name: "Name".into(),
                    data_type: ColumnType::String,
                    is_required: true,
                    max_length: Some(5),
                },
                CsvColumnDefinition {
                    name: "Value".into(),
                    data_type: ColumnType::Decimal,
                    is_required: false,
                    max_length: None,
                },
            ],
            validation_rules: vec![rule("ID", "positive", false), rule("Value", "positive", false)],
        }
    }

    #[test]
    fn test_valid_rows_pass() {
        let rows = vec![row(
            2,
            &[
                ("ID", CsvValue::Integer(1)),
                ("Name", CsvValue::Text("abc".into())),
                ("Value", CsvValue::Decimal(2.5)),
            ],
        )];
        let result = validate_csv_data(&rows, &test_schema());
        assert!(result.is_valid);
        assert_eq!(result.validated_rows, 1);
    }

    #[test]
    fn test_required_and_positive_rules() {
        let rows = vec![row(
            2,
            &[
                ("ID", CsvValue::Integer(-1)),
                ("Name", CsvValue::Null),
                ("Value", CsvValue::Decimal(-5.0)),
            ],
        )];
        let result = validate_csv_data(&rows, &test_schema());
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
        assert_eq!(result.validated_rows, 1);
    }

    #[test]
    fn test_max_length() {
        let rows = vec![row(
            2,
            &[("ID", CsvValue::Integer(1)), ("Name", CsvValue::Text("toolong".into()))],
        )];
        let result = validate_csv_data(&rows, &test_schema());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].rule_type, "max_length");
    }

    #[test]
    fn test_uncoerced_text_fails_type_check() {
        let rows = vec![row(
            4,
            &[("ID", CsvValue::Text("abc".into())), ("Name", CsvValue::Text("x".into()))],
        )];
        let result = validate_csv_data(&rows, &test_schema());
        assert!(result.errors.iter().any(|e| e.rule_type == "data_type"));
        assert_eq!(result.invalid_rows().into_iter().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_warning_rules_are_advisory() {
        let mut schema = test_schema();
        schema.validation_rules = vec![rule("Value", "positive", true)];
        let rows = vec![row(
            2,
            &[
                ("ID", CsvValue::Integer(1)),
                ("Name", CsvValue::Text("a".into())),
                ("Value", CsvValue::Integer(0)),
            ],
        )];
        let result = validate_csv_data(&rows, &schema);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_range_regex_and_allowed_values() {
        let schema = CsvSchema {
            table_name: "T".into(),
            columns: vec![],
            validation_rules: vec![
                CsvValidationRule {
                    rule_value: Some("0,10".into()),
                    ..rule("Score", "range", false)
                },
                CsvValidationRule {
                    rule_value: Some("^[A-Z]{2}$".into()),
                    ..rule("Code", "regex", false)
                },
                CsvValidationRule {
                    rule_value: Some("open, closed".into()),
                    ..rule("State", "allowed_values", false)
                },
            ],
        };
        let good = row(
            2,
            &[
                ("Score", CsvValue::Integer(7)),
                ("Code", CsvValue::Text("AB".into())),
                ("State", CsvValue::Text("Closed".into())),
            ],
        );
        let bad = row(
            3,
            &[
                ("Score", CsvValue::Integer(11)),
                ("Code", CsvValue::Text("abc".into())),
                ("State", CsvValue::Text("pending".into())),
            ],
        );
        let result = validate_csv_data(&[good, bad], &schema);
        assert_eq!(result.errors.len(), 3);
        assert!(result.errors.iter().all(|e| e.row_number == 3));
    }
}
