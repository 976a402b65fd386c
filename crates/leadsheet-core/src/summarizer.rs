//! Grouped aggregates (count, sum, mean) with exclusion accounting

use crate::error::{Error, Result};
use crate::table::{CellKey, CellValue, Table};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

/// Aggregate applied to each group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    Count,
    Sum,
    Mean,
}

impl Aggregate {
    /// Whether the aggregate reads a numeric column
    pub fn is_numeric(self) -> bool {
        !matches!(self, Aggregate::Count)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Mean => "mean",
        }
    }
}

impl FromStr for Aggregate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" | "size" => Ok(Aggregate::Count),
            "sum" | "total" => Ok(Aggregate::Sum),
            "mean" | "avg" | "average" => Ok(Aggregate::Mean),
            _ => Err(Error::UnsupportedAggregate(s.to_string())),
        }
    }
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How numeric cells are recognised under sum/mean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberParsing {
    /// Numbers, and text holding a plain decimal
    #[default]
    Strict,
    /// Also accept currency text such as `$1,200.50`
    Currency,
}

impl NumberParsing {
    fn read(self, cell: &CellValue) -> Option<f64> {
        match self {
            NumberParsing::Strict => cell.as_number(),
            NumberParsing::Currency => cell.as_currency(),
        }
    }
}

/// A grouped aggregate to compute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRequest {
    /// Categorical column to group by
    pub group_by: String,
    /// Numeric column for sum/mean
    #[serde(default)]
    pub value_column: Option<String>,
    pub aggregate: Aggregate,
    #[serde(default)]
    pub numbers: NumberParsing,
}

impl SummaryRequest {
    /// Row count per group
    pub fn count(group_by: impl Into<String>) -> Self {
        Self {
            group_by: group_by.into(),
            value_column: None,
            aggregate: Aggregate::Count,
            numbers: NumberParsing::Strict,
        }
    }

    /// Sum of `value_column` per group
    pub fn sum(group_by: impl Into<String>, value_column: impl Into<String>) -> Self {
        Self {
            value_column: Some(value_column.into()),
            aggregate: Aggregate::Sum,
            ..Self::count(group_by)
        }
    }

    /// Mean of `value_column` per group
    pub fn mean(group_by: impl Into<String>, value_column: impl Into<String>) -> Self {
        Self {
            aggregate: Aggregate::Mean,
            ..Self::sum(group_by, value_column)
        }
    }

    pub fn with_numbers(mut self, numbers: NumberParsing) -> Self {
        self.numbers = numbers;
        self
    }

    /// Column header used when the summary is rendered as a table
    pub fn label(&self) -> String {
        match (&self.value_column, self.aggregate) {
            (Some(col), agg) if agg.is_numeric() => format!("{}({})", agg, col),
            _ => "count".to_string(),
        }
    }
}

/// One group of a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryGroup {
    /// Distinct group-by value
    pub key: CellValue,
    /// Rows that contributed
    pub rows: usize,
    /// Sum of contributing values (0 for count)
    pub total: f64,
    /// The aggregate result
    pub value: f64,
}

/// Rows left out of a summary, by reason
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Exclusions {
    /// Rows with an empty group-by cell
    pub missing_group: usize,
    /// Rows whose value was missing or not a number (sum/mean only)
    pub non_numeric: usize,
    /// Parseable values carried by rows excluded for a missing group
    pub excluded_value_total: f64,
}

impl Exclusions {
    /// Total rows excluded
    pub fn total(&self) -> usize {
        self.missing_group + self.non_numeric
    }
}

/// Result of [`summarize`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub request: SummaryRequest,
    /// Groups in order of first appearance
    pub groups: Vec<SummaryGroup>,
    pub excluded: Exclusions,
}

impl Summary {
    /// Aggregate value for a group key
    pub fn get(&self, key: &CellValue) -> Option<f64> {
        let key = key.key();
        self.groups
            .iter()
            .find(|g| g.key.key() == key)
            .map(|g| g.value)
    }

    /// Aggregate value for a text group key
    pub fn get_text(&self, key: &str) -> Option<f64> {
        self.get(&CellValue::Text(key.to_string()))
    }

    /// Sum of group values
    pub fn values_total(&self) -> f64 {
        self.groups.iter().map(|g| g.value).sum()
    }

    /// Order groups by key: numbers ascending, then text
    pub fn sort_by_key(&mut self) {
        self.groups.sort_by(|a, b| compare_keys(&a.key, &b.key));
    }

    /// Order groups by value, largest first; equal values fall back to key order
    pub fn sort_by_value_desc(&mut self) {
        self.groups.sort_by(|a, b| {
            b.value
                .partial_cmp(&a.value)
                .unwrap_or(Ordering::Equal)
                .then_with(|| compare_keys(&a.key, &b.key))
        });
    }

    /// Render as a two-column table: group key and aggregate
    pub fn to_table(&self) -> Table {
        let mut table = Table::new([self.request.group_by.clone(), self.request.label()]);
        for group in &self.groups {
            table.push_row(vec![group.key.clone(), CellValue::Number(group.value)]);
        }
        table
    }
}

fn compare_keys(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (CellValue::Number(_), _) => Ordering::Less,
        (_, CellValue::Number(_)) => Ordering::Greater,
        _ => a.to_string_value().cmp(&b.to_string_value()),
    }
}

/// Compute a grouped aggregate over `table`
pub fn summarize(table: &Table, request: &SummaryRequest) -> Result<Summary> {
    let group_idx = table.column_index(&request.group_by)?;
    let value_idx = match &request.value_column {
        Some(col) => Some(table.column_index(col)?),
        None if request.aggregate.is_numeric() => {
            return Err(Error::unknown_column("(no value column)"));
        }
        None => None,
    };
    let value_idx = value_idx.filter(|_| request.aggregate.is_numeric());

    let mut groups: Vec<SummaryGroup> = Vec::new();
    let mut index: HashMap<CellKey, usize> = HashMap::new();
    let mut excluded = Exclusions::default();

    for row in &table.rows {
        let group = row.get(group_idx).cloned().unwrap_or_default();
        let value = value_idx.map(|i| {
            row.get(i)
                .and_then(|cell| request.numbers.read(cell))
        });

        if group.is_missing() {
            excluded.missing_group += 1;
            if let Some(Some(v)) = value {
                excluded.excluded_value_total += v;
            }
            continue;
        }

        let amount = match value {
            Some(Some(v)) => v,
            Some(None) => {
                excluded.non_numeric += 1;
                continue;
            }
            None => 0.0,
        };

        let slot = *index.entry(group.key()).or_insert_with(|| {
            groups.push(SummaryGroup {
                key: group.clone(),
                rows: 0,
                total: 0.0,
                value: 0.0,
            });
            groups.len() - 1
        });
        let entry = &mut groups[slot];
        entry.rows += 1;
        entry.total += amount;
    }

    for group in &mut groups {
        group.value = match request.aggregate {
            Aggregate::Count => group.rows as f64,
            Aggregate::Sum => group.total,
            Aggregate::Mean => group.total / group.rows as f64,
        };
    }

    if excluded.total() > 0 {
        debug!(
            "Excluded {} rows without '{}' and {} non-numeric rows",
            excluded.missing_group, request.group_by, excluded.non_numeric
        );
    }
    info!(
        "Summarized {} by '{}' into {} groups",
        request.label(),
        request.group_by,
        groups.len()
    );

    Ok(Summary {
        request: request.clone(),
        groups,
        excluded,
    })
}
