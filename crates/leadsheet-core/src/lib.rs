//! leadsheet-core: Core library for cleaning and summarizing sales-lead spreadsheets
//!
//! This library provides functionality to:
//! - Load the first sheet of a workbook or delimited file into a table
//! - Remove duplicate rows keyed on a subset of columns
//! - Compute count/sum/mean summaries grouped by a column
//! - Credit sales to lead sources and report per-source cost
//! - Export tables to xlsx, csv or tsv
//! - Track a working session with undo, or run a whole job from JSON

pub mod attribution;
pub mod cleaner;
pub mod error;
pub mod exporter;
pub mod job;
pub mod loader;
pub mod session;
pub mod summarizer;
pub mod table;

pub use attribution::{
    attribute_sales, clean_leads, Attribution, AttributionConfig, CleanedLeads, ColumnHints,
};
pub use cleaner::{dedupe, DedupeOptions, Deduplicated, KeyNormalization};
pub use error::{Error, ErrorKind, Result};
pub use exporter::{destination_exists, export_table, ExportFormat, ExportOptions, ExportReport};
pub use job::{run_job, ExportStep, JobFile, JobReport};
pub use loader::{load_table, parse_pasted, HeaderRow, LoadOptions, LoadedTable, Preview};
pub use session::{ExportTarget, Operation, Session, SessionEvent};
pub use summarizer::{
    summarize, Aggregate, Exclusions, NumberParsing, Summary, SummaryGroup, SummaryRequest,
};
pub use table::{CellValue, Column, Row, RowFilter, Table};
