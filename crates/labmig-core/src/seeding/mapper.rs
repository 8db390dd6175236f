//! CSV file name → target table name.

use std::path::Path;

/// Map a seed file name to its table name.
///
/// The extension is dropped. Plain alphanumeric stems get a leading capital,
/// and a trailing `list` becomes `List` (`testlist.csv` → `TestList`). Stems
/// containing any other character pass through unchanged
/// (`custom-table.csv` → `custom-table`).
pub fn map_csv_file_to_table_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);

    if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_alphanumeric()) {
        return stem.to_string();
    }

    let (base, list_suffix) = match stem.len().checked_sub(4) {
        Some(split) if split > 0 && stem[split..].eq_ignore_ascii_case("list") => {
            (&stem[..split], true)
        }
        _ => (stem, false),
    };

    let mut name = capitalize(base);
    if list_suffix {
        name.push_str("List");
    }
    name
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_name_is_capitalized() {
        assert_eq!(map_csv_file_to_table_name("test.csv"), "Test");
        assert_eq!(map_csv_file_to_table_name("Lubricant.csv"), "Lubricant");
    }

    #[test]
    fn test_list_suffix() {
        assert_eq!(map_csv_file_to_table_name("testlist.csv"), "TestList");
        assert_eq!(map_csv_file_to_table_name("lubetechlist.csv"), "LubetechList");
        assert_eq!(map_csv_file_to_table_name("list.csv"), "List");
    }

    #[test]
    fn test_separators_pass_through() {
        assert_eq!(map_csv_file_to_table_name("custom-table.csv"), "custom-table");
        assert_eq!(map_csv_file_to_table_name("eq_lubrication_pt_t.csv"), "eq_lubrication_pt_t");
    }

    #[test]
    fn test_mapping_is_deterministic() {
        for name in ["test.csv", "testlist.csv", "custom-table.csv"] {
            assert_eq!(map_csv_file_to_table_name(name), map_csv_file_to_table_name(name));
        }
    }
}
