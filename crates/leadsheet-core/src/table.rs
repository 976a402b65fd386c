//! Core table types for representing a loaded sheet

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// An in-memory sheet: named columns over uniform rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Column definitions, in sheet order
    pub columns: Vec<Column>,
    /// Row data, in sheet order
    pub rows: Vec<Row>,
    /// File the table was loaded from, if any
    pub source_path: Option<PathBuf>,
}

impl Table {
    /// Create an empty table with the given column names
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Column::new(name.into(), i))
            .collect();
        Self {
            columns,
            rows: Vec::new(),
            source_path: None,
        }
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column names in order
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Find a column by exact name
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Index of a column by exact name, or `UnknownColumn`
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.find_column(name)
            .map(|c| c.index)
            .ok_or_else(|| Error::unknown_column(name))
    }

    /// Append a row, padding or truncating it to the column count
    pub fn push_row(&mut self, mut cells: Vec<CellValue>) {
        cells.resize(self.columns.len(), CellValue::Missing);
        self.rows.push(Row::new(cells));
    }

    /// Cell at (row, column) by column name
    pub fn cell(&self, row: usize, column: &str) -> Option<&CellValue> {
        let col = self.find_column(column)?;
        self.rows.get(row).and_then(|r| r.get(col.index))
    }

    /// A copy holding only the first `n` rows
    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
            source_path: self.source_path.clone(),
        }
    }

    /// A copy holding only the named columns, in the order given
    pub fn select_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<Table> {
        let indices: Vec<usize> = names
            .iter()
            .map(|n| self.column_index(n.as_ref()))
            .collect::<Result<_>>()?;

        let mut out = Table::new(names.iter().map(|n| n.as_ref().to_string()));
        out.source_path = self.source_path.clone();
        out.rows = self
            .rows
            .iter()
            .map(|row| {
                Row::new(
                    indices
                        .iter()
                        .map(|&i| row.cells.get(i).cloned().unwrap_or_default())
                        .collect(),
                )
            })
            .collect();
        Ok(out)
    }

    /// A copy holding only rows that satisfy `filter`
    pub fn filter_rows(&self, filter: &RowFilter) -> Result<Table> {
        let idx = self.column_index(filter.column())?;
        let rows = self
            .rows
            .iter()
            .filter(|row| row.get(idx).is_some_and(|cell| filter.matches(cell)))
            .cloned()
            .collect();
        Ok(Table {
            columns: self.columns.clone(),
            rows,
            source_path: self.source_path.clone(),
        })
    }
}

/// A column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name from the header row
    pub name: String,
    /// Column index (0-based)
    pub index: usize,
}

impl Column {
    /// Create a new column
    pub fn new(name: String, index: usize) -> Self {
        Self { name, index }
    }
}

/// A row of data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Cell values for each column
    pub cells: Vec<CellValue>,
}

impl Row {
    /// Create a new row
    pub fn new(cells: Vec<CellValue>) -> Self {
        Self { cells }
    }

    /// Get a cell value by column index
    pub fn get(&self, index: usize) -> Option<&CellValue> {
        self.cells.get(index)
    }

    /// Non-missing cell count
    pub fn filled(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_missing()).count()
    }
}

/// A cell value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum CellValue {
    /// Text, kept verbatim
    Text(String),
    /// Numeric value
    Number(f64),
    /// Empty/null cell
    #[default]
    Missing,
}

impl CellValue {
    /// Parse a delimited-text field into a CellValue, detecting numbers
    pub fn parse(s: &str) -> Self {
        if s.trim().is_empty() {
            return CellValue::Missing;
        }
        match parse_number(s) {
            Some(n) => CellValue::Number(n),
            None => CellValue::Text(s.to_string()),
        }
    }

    /// Check if the cell is missing
    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Missing)
    }

    /// Numeric view: numbers as-is, text only if it is a plain decimal
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => parse_number(s),
            CellValue::Missing => None,
        }
    }

    /// Numeric view tolerant of currency symbols and thousands separators
    pub fn as_currency(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => parse_currency(s),
            CellValue::Missing => None,
        }
    }

    /// Convert to a display string
    pub fn to_string_value(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Missing => String::new(),
        }
    }

    /// Hashable identity of the value under exact comparison
    pub fn key(&self) -> CellKey {
        match self {
            CellValue::Text(s) => CellKey::Text(s.clone()),
            // -0.0 and 0.0 compare equal, so they must share a key
            CellValue::Number(n) if *n == 0.0 => CellKey::Number(0f64.to_bits()),
            CellValue::Number(n) => CellKey::Number(n.to_bits()),
            CellValue::Missing => CellKey::Missing,
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Missing => write!(f, ""),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

/// Exact-comparison key for a cell; no equality across variants
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellKey {
    Text(String),
    Number(u64),
    Missing,
}

/// Parse a standard decimal number (`12`, `-3.5`, `1e3`); rejects `NaN`, `inf` and the like
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    let plain = t
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !plain || !t.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    t.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Parse a currency-like string by dropping everything except digits, `.` and `-`
pub fn parse_currency(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    parse_number(&cleaned)
}

/// Row predicate used to narrow a table before export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RowFilter {
    /// Cell equals `value` exactly
    Equals { column: String, value: CellValue },
    /// Cell is numeric and strictly greater than `threshold`
    NumberAbove { column: String, threshold: f64 },
}

impl RowFilter {
    /// Column the filter inspects
    pub fn column(&self) -> &str {
        match self {
            RowFilter::Equals { column, .. } | RowFilter::NumberAbove { column, .. } => column,
        }
    }

    fn matches(&self, cell: &CellValue) -> bool {
        match self {
            RowFilter::Equals { value, .. } => cell.key() == value.key(),
            RowFilter::NumberAbove { threshold, .. } => {
                cell.as_number().is_some_and(|n| n > *threshold)
            }
        }
    }

    /// Parse `column=value` or `column>number`
    pub fn parse(expr: &str) -> Option<Self> {
        if let Some((column, rhs)) = expr.split_once('>') {
            let threshold = parse_number(rhs)?;
            return Some(RowFilter::NumberAbove {
                column: column.trim().to_string(),
                threshold,
            });
        }
        let (column, rhs) = expr.split_once('=')?;
        Some(RowFilter::Equals {
            column: column.trim().to_string(),
            value: CellValue::parse(rhs),
        })
    }
}

/// Make header names unique: blanks become `column_<n>`, repeats get `.1`, `.2`, ...
pub fn unique_column_names(raw: Vec<String>) -> Vec<String> {
    let bases: Vec<String> = raw
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            if name.trim().is_empty() {
                format!("column_{}", i + 1)
            } else {
                name
            }
        })
        .collect();

    // Generated suffixes never take a name that appears verbatim elsewhere in the header
    let reserved: HashSet<&str> = bases.iter().map(String::as_str).collect();
    let mut emitted: HashSet<String> = HashSet::with_capacity(bases.len());
    let mut next_suffix: HashMap<&str, usize> = HashMap::new();
    let mut names = Vec::with_capacity(bases.len());

    for base in &bases {
        let name = if emitted.contains(base) {
            let n = next_suffix.entry(base.as_str()).or_insert(1);
            loop {
                let candidate = format!("{}.{}", base, n);
                *n += 1;
                if !emitted.contains(&candidate) && !reserved.contains(candidate.as_str()) {
                    break candidate;
                }
            }
        } else {
            base.clone()
        };
        emitted.insert(name.clone());
        names.push(name);
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(["source", "revenue"]);
        t.push_row(vec!["A".into(), 100.0.into()]);
        t.push_row(vec!["B".into(), CellValue::Text("N/A".into())]);
        t.push_row(vec!["A".into(), 25.5.into()]);
        t
    }

    #[test]
    fn test_cell_value_parse_number() {
        assert_eq!(CellValue::parse("42"), CellValue::Number(42.0));
        assert_eq!(CellValue::parse("-2.5"), CellValue::Number(-2.5));
        assert_eq!(CellValue::parse(" 7 "), CellValue::Number(7.0));
        assert_eq!(CellValue::parse("1e3"), CellValue::Number(1000.0));
    }

    #[test]
    fn test_cell_value_parse_text_is_verbatim() {
        assert_eq!(CellValue::parse(" Alice "), CellValue::Text(" Alice ".into()));
        assert_eq!(CellValue::parse("N/A"), CellValue::Text("N/A".into()));
        assert_eq!(CellValue::parse("NaN"), CellValue::Text("NaN".into()));
        assert_eq!(CellValue::parse("inf"), CellValue::Text("inf".into()));
        assert_eq!(CellValue::parse("-"), CellValue::Text("-".into()));
    }

    #[test]
    fn test_cell_value_parse_missing() {
        assert_eq!(CellValue::parse(""), CellValue::Missing);
        assert_eq!(CellValue::parse("   "), CellValue::Missing);
    }

    #[test]
    fn test_key_has_no_cross_variant_equality() {
        assert_ne!(CellValue::Text("1".into()).key(), CellValue::Number(1.0).key());
        assert_eq!(CellValue::Number(-0.0).key(), CellValue::Number(0.0).key());
        assert_ne!(CellValue::Text("a".into()).key(), CellValue::Text("A".into()).key());
    }

    #[test]
    fn test_parse_currency() {
        assert_eq!(parse_currency("$1,200.50"), Some(1200.5));
        assert_eq!(parse_currency("USD -40"), Some(-40.0));
        assert_eq!(parse_currency("n/a"), None);
    }

    #[test]
    fn test_select_columns_reorders() {
        let t = sample().select_columns(&["revenue", "source"]).unwrap();
        assert_eq!(t.column_names(), vec!["revenue", "source"]);
        assert_eq!(t.rows[0].cells[1], CellValue::Text("A".into()));
    }

    #[test]
    fn test_select_unknown_column() {
        let err = sample().select_columns(&["agent"]).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { column } if column == "agent"));
    }

    #[test]
    fn test_filter_rows() {
        let t = sample();
        let only_a = t.filter_rows(&RowFilter::parse("source=A").unwrap()).unwrap();
        assert_eq!(only_a.row_count(), 2);

        let big = t.filter_rows(&RowFilter::parse("revenue>50").unwrap()).unwrap();
        assert_eq!(big.row_count(), 1);
        assert_eq!(big.rows[0].cells[1], CellValue::Number(100.0));
    }

    #[test]
    fn test_unique_column_names() {
        let names = unique_column_names(vec![
            "Name".into(),
            "".into(),
            "Name".into(),
            "Name".into(),
        ]);
        assert_eq!(names, vec!["Name", "column_2", "Name.1", "Name.2"]);
    }

    #[test]
    fn test_unique_column_names_skip_existing_suffixes() {
        let names = unique_column_names(vec!["Name".into(), "Name".into(), "Name.1".into()]);
        assert_eq!(names, vec!["Name", "Name.2", "Name.1"]);

        let names = unique_column_names(vec![
            "Name.1".into(),
            "Name".into(),
            "Name".into(),
            "Name.1".into(),
        ]);
        assert_eq!(names, vec!["Name.1", "Name", "Name.2", "Name.1.1"]);

        let table = Table::new(unique_column_names(vec![
            "Name".into(),
            "Name".into(),
            "Name.1".into(),
        ]));
        assert_eq!(table.column_index("Name.1").unwrap(), 2);
        assert_eq!(table.column_index("Name.2").unwrap(), 1);
    }
}
