//! Duplicate removal keyed on a subset of columns

use crate::error::Result;
use crate::table::{CellKey, CellValue, Table};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

/// Optional text normalization applied to key cells before comparison
///
/// Only affects the comparison; kept rows are never rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyNormalization {
    /// Ignore leading/trailing whitespace
    pub trim: bool,
    /// Compare text case-insensitively
    pub case_insensitive: bool,
}

impl KeyNormalization {
    /// Exact comparison (the default)
    pub fn exact() -> Self {
        Self::default()
    }

    fn key(&self, cell: &CellValue) -> CellKey {
        match cell {
            CellValue::Text(s) if self.trim || self.case_insensitive => {
                let mut s = if self.trim { s.trim() } else { s.as_str() }.to_string();
                if self.case_insensitive {
                    s = s.to_lowercase();
                }
                if s.is_empty() {
                    // Whitespace-only text trims down to a missing value
                    CellKey::Missing
                } else {
                    CellKey::Text(s)
                }
            }
            other => other.key(),
        }
    }
}

/// Which columns identify a row, and how to compare them
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeOptions {
    /// Key columns; empty means every column
    pub keys: Vec<String>,
    pub normalize: KeyNormalization,
}

impl DedupeOptions {
    /// Dedupe on the given columns with exact comparison
    pub fn on<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            normalize: KeyNormalization::exact(),
        }
    }
}

/// Output of [`dedupe`]
#[derive(Debug, Clone)]
pub struct Deduplicated {
    /// Rows that survived, in original order
    pub table: Table,
    /// Number of rows dropped as duplicates
    pub removed: usize,
}

/// Remove duplicate rows, keeping the first occurrence of each key
///
/// The input table is left untouched.
pub fn dedupe(table: &Table, options: &DedupeOptions) -> Result<Deduplicated> {
    let key_indices: Vec<usize> = if options.keys.is_empty() {
        (0..table.column_count()).collect()
    } else {
        options
            .keys
            .iter()
            .map(|k| table.column_index(k))
            .collect::<Result<_>>()?
    };

    let mut seen: HashSet<Vec<CellKey>> = HashSet::with_capacity(table.row_count());
    let mut out = Table {
        columns: table.columns.clone(),
        rows: Vec::new(),
        source_path: table.source_path.clone(),
    };

    for row in &table.rows {
        let projection: Vec<CellKey> = key_indices
            .iter()
            .map(|&i| {
                row.get(i)
                    .map(|c| options.normalize.key(c))
                    .unwrap_or(CellKey::Missing)
            })
            .collect();

        if seen.insert(projection) {
            out.rows.push(row.clone());
        }
    }

    let removed = table.row_count() - out.row_count();
    info!(
        "Removed {} duplicate rows ({} kept) keyed on {}",
        removed,
        out.row_count(),
        if options.keys.is_empty() {
            "all columns".to_string()
        } else {
            options.keys.join(", ")
        }
    );

    Ok(Deduplicated {
        table: out,
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::loader::parse_delimited_str;

    fn leads() -> Table {
        let csv = "source,revenue\nA,100\nA,100\nB,50\n";
        parse_delimited_str(csv, b',', "leads.csv").unwrap()
    }

    #[test]
    fn test_dedupe_scenario() {
        let result = dedupe(&leads(), &DedupeOptions::on(["source", "revenue"])).unwrap();

        assert_eq!(result.removed, 1);
        assert_eq!(result.table.row_count(), 2);
        assert_eq!(result.table.rows[0].cells[0], CellValue::Text("A".into()));
        assert_eq!(result.table.rows[0].cells[1], CellValue::Number(100.0));
        assert_eq!(result.table.rows[1].cells[0], CellValue::Text("B".into()));
    }

    #[test]
    fn test_default_keys_are_all_columns() {
        let csv = "source,revenue\nA,100\nA,90\nA,100\n";
        let table = parse_delimited_str(csv, b',', "leads.csv").unwrap();
        let result = dedupe(&table, &DedupeOptions::default()).unwrap();

        assert_eq!(result.removed, 1);
        assert_eq!(result.table.row_count(), 2);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let csv = "phone,agent\n555,amy\n556,bob\n555,carl\n";
        let table = parse_delimited_str(csv, b',', "leads.csv").unwrap();
        let result = dedupe(&table, &DedupeOptions::on(["phone"])).unwrap();

        assert_eq!(result.table.row_count(), 2);
        assert_eq!(result.table.rows[0].cells[1], CellValue::Text("amy".into()));
        assert_eq!(result.table.rows[1].cells[1], CellValue::Text("bob".into()));
    }

    #[test]
    fn test_input_is_not_mutated() {
        let table = leads();
        let before = table.clone();
        dedupe(&table, &DedupeOptions::default()).unwrap();
        assert_eq!(table, before);
    }

    #[test]
    fn test_unknown_key_column() {
        let err = dedupe(&leads(), &DedupeOptions::on(["source", "agent"])).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { column } if column == "agent"));
    }

    #[test]
    fn test_exact_comparison_is_case_and_space_sensitive() {
        let csv = "agent\nAmy\namy\n Amy\n";
        let table = parse_delimited_str(csv, b',', "leads.csv").unwrap();
        let result = dedupe(&table, &DedupeOptions::default()).unwrap();
        assert_eq!(result.removed, 0);
    }

    #[test]
    fn test_normalized_comparison() {
        let csv = "agent\nAmy\namy\n Amy \n";
        let table = parse_delimited_str(csv, b',', "leads.csv").unwrap();
        let options = DedupeOptions {
            keys: vec![],
            normalize: KeyNormalization {
                trim: true,
                case_insensitive: true,
            },
        };
        let result = dedupe(&table, &options).unwrap();

        assert_eq!(result.removed, 2);
        // The kept row is the original text, not the normalized key
        assert_eq!(result.table.rows[0].cells[0], CellValue::Text("Amy".into()));
    }

    #[test]
    fn test_text_and_number_are_distinct_keys() {
        let mut table = Table::new(["id"]);
        table.push_row(vec![CellValue::Number(1.0)]);
        table.push_row(vec![CellValue::Text("1".into())]);
        let result = dedupe(&table, &DedupeOptions::default()).unwrap();
        assert_eq!(result.removed, 0);
    }

    #[test]
    fn test_missing_values_are_equal_keys() {
        let csv = "phone,agent\n,amy\n,amy\n";
        let table = parse_delimited_str(csv, b',', "leads.csv").unwrap();
        let result = dedupe(&table, &DedupeOptions::default()).unwrap();
        assert_eq!(result.removed, 1);
    }

    #[test]
    fn test_output_unique_verbatim_and_idempotent() {
        let csv = "source,agent,revenue\nA,amy,100\nB,bob,50\nA,amy,100\nA,bob,100\nB,bob,50\nC,,\nC,,\n";
        let table = parse_delimited_str(csv, b',', "leads.csv").unwrap();
        let options = DedupeOptions::on(["source", "agent"]);

        let once = dedupe(&table, &options).unwrap();
        let keys: HashSet<Vec<CellKey>> = once
            .table
            .rows
            .iter()
            .map(|r| vec![r.cells[0].key(), r.cells[1].key()])
            .collect();
        assert_eq!(keys.len(), once.table.row_count());
        assert!(once.table.rows.iter().all(|r| table.rows.contains(r)));

        let twice = dedupe(&once.table, &options).unwrap();
        assert_eq!(twice.removed, 0);
        assert_eq!(twice.table, once.table);
    }
}
