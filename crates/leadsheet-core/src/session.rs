//! Working session over a loaded table
//!
//! A session owns the table the user is working on, the table as it was
//! loaded, the last computed summary and a timestamped log of operations.
//! Every transform pushes the previous table onto an undo stack. A failing
//! operation leaves the session exactly as it was.

use crate::cleaner::{dedupe, DedupeOptions};
use crate::error::{Error, Result};
use crate::exporter::{export_table, ExportOptions, ExportReport};
use crate::loader::{load_table, parse_pasted, LoadOptions, Preview};
use crate::summarizer::{summarize, Summary, SummaryRequest};
use crate::table::{RowFilter, Table};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// An operation that changed (or exported) session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Load { path: PathBuf, rows: usize },
    Paste { rows: usize },
    Dedupe { keys: Vec<String>, removed: usize },
    Filter { filter: RowFilter, kept: usize },
    Select { columns: Vec<String> },
    Summarize { label: String, groups: usize },
    Export { path: PathBuf, rows: usize },
    Undo,
    Reset,
}

/// A record of an operation and when it happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
}

/// Which table an export writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportTarget {
    /// The working table, after any cleaning and filtering
    #[default]
    Current,
    /// The table as it was loaded
    Original,
    /// The last summary, as a two-column table
    Summary,
}

#[derive(Debug, Clone)]
pub struct Session {
    current: Table,
    original: Table,
    last_summary: Option<Summary>,
    undo_stack: Vec<Table>,
    history: Vec<SessionEvent>,
    load_options: LoadOptions,
}

impl Session {
    /// Start a session on an already-built table
    pub fn from_table(table: Table) -> Self {
        Self {
            original: table.clone(),
            current: table,
            last_summary: None,
            undo_stack: Vec::new(),
            history: Vec::new(),
            load_options: LoadOptions::default(),
        }
    }

    /// Start a session by loading a file
    pub fn open<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let loaded = load_table(path, &options)?;
        let rows = loaded.table.row_count();
        let mut session = Self::from_table(loaded.table);
        session.load_options = options;
        session.record(Operation::Load {
            path: path.to_path_buf(),
            rows,
        });
        Ok(session)
    }

    /// Start a session from pasted text
    pub fn paste(text: &str) -> Result<Self> {
        let table = parse_pasted(text)?;
        let rows = table.row_count();
        let mut session = Self::from_table(table);
        session.record(Operation::Paste { rows });
        Ok(session)
    }

    /// Replace the working table with a newly loaded file
    ///
    /// The current table is only discarded once the new file loaded cleanly.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<Preview> {
        let path = path.as_ref();
        let loaded = load_table(path, &self.load_options)?;
        let rows = loaded.table.row_count();

        self.original = loaded.table.clone();
        self.current = loaded.table;
        self.last_summary = None;
        self.undo_stack.clear();
        self.record(Operation::Load {
            path: path.to_path_buf(),
            rows,
        });
        Ok(loaded.preview)
    }

    pub fn set_load_options(&mut self, options: LoadOptions) {
        self.load_options = options;
    }

    pub fn table(&self) -> &Table {
        &self.current
    }

    pub fn original(&self) -> &Table {
        &self.original
    }

    pub fn last_summary(&self) -> Option<&Summary> {
        self.last_summary.as_ref()
    }

    pub fn history(&self) -> &[SessionEvent] {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Preview of the working table
    pub fn preview(&self) -> Preview {
        Preview::of(&self.current, self.load_options.preview_rows)
    }

    /// Remove duplicates from the working table, returning the removed count
    pub fn dedupe(&mut self, options: &DedupeOptions) -> Result<usize> {
        let result = dedupe(&self.current, options)?;
        self.replace(result.table);
        self.record(Operation::Dedupe {
            keys: options.keys.clone(),
            removed: result.removed,
        });
        Ok(result.removed)
    }

    /// Keep only rows matching `filter`, returning the kept count
    pub fn filter(&mut self, filter: &RowFilter) -> Result<usize> {
        let table = self.current.filter_rows(filter)?;
        let kept = table.row_count();
        self.replace(table);
        self.record(Operation::Filter {
            filter: filter.clone(),
            kept,
        });
        Ok(kept)
    }

    /// Keep only the named columns
    pub fn select(&mut self, columns: &[String]) -> Result<()> {
        let table = self.current.select_columns(columns)?;
        self.replace(table);
        self.record(Operation::Select {
            columns: columns.to_vec(),
        });
        Ok(())
    }

    /// Summarize the working table and remember the result
    pub fn summarize(&mut self, request: &SummaryRequest) -> Result<&Summary> {
        let summary = summarize(&self.current, request)?;
        self.record(Operation::Summarize {
            label: request.label(),
            groups: summary.groups.len(),
        });
        Ok(self.last_summary.insert(summary))
    }

    /// Write one of the session's tables to `path`
    pub fn export<P: AsRef<Path>>(
        &mut self,
        target: ExportTarget,
        path: P,
        options: &ExportOptions,
    ) -> Result<ExportReport> {
        let path = path.as_ref();
        let summary_table;
        let table = match target {
            ExportTarget::Current => &self.current,
            ExportTarget::Original => &self.original,
            ExportTarget::Summary => {
                let summary = self
                    .last_summary
                    .as_ref()
                    .ok_or_else(|| Error::write_failure(path, "no summary has been computed"))?;
                summary_table = summary.to_table();
                &summary_table
            }
        };

        let report = export_table(table, path, options)?;
        self.record(Operation::Export {
            path: report.path.clone(),
            rows: report.rows_written,
        });
        Ok(report)
    }

    /// Restore the table as it was before the last transform
    pub fn undo(&mut self) -> bool {
        match self.undo_stack.pop() {
            Some(previous) => {
                self.current = previous;
                self.record(Operation::Undo);
                true
            }
            None => false,
        }
    }

    /// Discard every transform and return to the loaded table
    pub fn reset(&mut self) {
        let current = std::mem::replace(&mut self.current, self.original.clone());
        self.undo_stack.push(current);
        self.record(Operation::Reset);
    }

    fn replace(&mut self, table: Table) {
        let previous = std::mem::replace(&mut self.current, table);
        self.undo_stack.push(previous);
    }

    fn record(&mut self, operation: Operation) {
        debug!("Session operation: {:?}", operation);
        self.history.push(SessionEvent {
            timestamp: Utc::now(),
            operation,
        });
    }
}
