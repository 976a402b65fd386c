//! Job files: a whole load, clean, summarize and export run described in JSON

use crate::cleaner::DedupeOptions;
use crate::error::{Error, Result};
use crate::exporter::{ExportOptions, ExportReport};
use crate::loader::LoadOptions;
use crate::session::{ExportTarget, Session, SessionEvent};
use crate::summarizer::{Summary, SummaryRequest};
use crate::table::RowFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

/// One export performed at the end of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportStep {
    /// Destination; the extension picks the format
    pub path: PathBuf,
    #[serde(default)]
    pub target: ExportTarget,
    #[serde(flatten)]
    pub options: ExportOptions,
}

/// A job file
///
/// Steps run in field order: load, dedupe, filters, column selection,
/// summaries, exports. Exports with the `summary` target write the last
/// summary in the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFile {
    /// Spreadsheet to load
    pub input: PathBuf,
    #[serde(default)]
    pub load: LoadOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe: Option<DedupeOptions>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<RowFilter>,
    /// Columns to keep, in order; empty keeps all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summaries: Vec<SummaryRequest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<ExportStep>,
}

impl JobFile {
    /// A job that only loads `input`
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            load: LoadOptions::default(),
            dedupe: None,
            filters: Vec::new(),
            columns: Vec::new(),
            summaries: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// A starter job: dedupe on every column, count rows per `group_by`,
    /// export the cleaned table next to the input
    pub fn template(input: impl Into<PathBuf>, group_by: impl Into<String>) -> Self {
        let input = input.into();
        let output = input.with_file_name(format!(
            "{}_cleaned.xlsx",
            input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "leads".to_string())
        ));
        Self {
            dedupe: Some(DedupeOptions::default()),
            summaries: vec![SummaryRequest::count(group_by)],
            exports: vec![ExportStep {
                path: output,
                target: ExportTarget::Current,
                options: ExportOptions::default(),
            }],
            ..Self::new(input)
        }
    }

    /// Load a job file from JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            IoErrorKind::NotFound => Error::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => Error::unreadable_from(path, e),
        })?;
        serde_json::from_str(&content).map_err(|e| Error::unreadable_from(path, e))
    }

    /// Save the job file as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::write_failure_from(path, e))?;
        fs::write(path, content).map_err(|e| Error::write_failure_from(path, e))
    }

    /// Resolve relative paths against `base` (usually the job file's directory)
    pub fn relative_to(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.input);
        for step in &mut self.exports {
            resolve(&mut step.path);
        }
        self
    }
}

/// What a job did
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub rows_loaded: usize,
    pub duplicates_removed: usize,
    pub rows_final: usize,
    pub summaries: Vec<Summary>,
    pub exports: Vec<ExportReport>,
    pub history: Vec<SessionEvent>,
}

/// Run every step of a job, stopping at the first failure
pub fn run_job(job: &JobFile) -> Result<JobReport> {
    let mut session = Session::open(&job.input, job.load.clone())?;
    let rows_loaded = session.table().row_count();

    let duplicates_removed = match &job.dedupe {
        Some(options) => session.dedupe(options)?,
        None => 0,
    };
    for filter in &job.filters {
        session.filter(filter)?;
    }
    if !job.columns.is_empty() {
        session.select(&job.columns)?;
    }

    let mut summaries = Vec::with_capacity(job.summaries.len());
    for request in &job.summaries {
        summaries.push(session.summarize(request)?.clone());
    }

    let mut exports = Vec::with_capacity(job.exports.len());
    for step in &job.exports {
        exports.push(session.export(step.target, &step.path, &step.options)?);
    }

    info!(
        "Job on {} finished: {} rows loaded, {} duplicates removed, {} exports",
        job.input.display(),
        rows_loaded,
        duplicates_removed,
        exports.len()
    );

    Ok(JobReport {
        rows_loaded,
        duplicates_removed,
        rows_final: session.table().row_count(),
        summaries,
        exports,
        history: session.history().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{load_table, HeaderRow};
    use crate::table::CellValue;
    use tempfile::TempDir;

    #[test]
    fn test_job_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.json");

        let mut job = JobFile::template("leads.xlsx", "Source");
        job.filters.push(RowFilter::parse("Deposit>0").unwrap());
        job.save(&path).unwrap();

        let loaded = JobFile::load(&path).unwrap();
        assert_eq!(loaded, job);
        assert_eq!(loaded.exports[0].path, PathBuf::from("leads_cleaned.xlsx"));
    }

    #[test]
    fn test_minimal_job_json() {
        let json = r#"{
            "input": "leads.csv",
            "load": { "header": { "containing": ["phone", "source"] } },
            "dedupe": { "keys": ["Phone"] },
            "summaries": [{ "group_by": "Source", "aggregate": "count" }],
            "exports": [{ "path": "out.csv", "target": "summary", "overwrite": true }]
        }"#;
        let job: JobFile = serde_json::from_str(json).unwrap();

        assert_eq!(
            job.load.header,
            HeaderRow::Containing(vec!["phone".into(), "source".into()])
        );
        assert_eq!(job.load.preview_rows, 5);
        assert_eq!(job.exports[0].target, ExportTarget::Summary);
        assert!(job.exports[0].options.overwrite);
        assert_eq!(job.exports[0].options.sheet_name, "Sheet1");
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let missing = JobFile::load(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, Error::FileNotFound { .. }));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(JobFile::load(&bad).unwrap_err(), Error::UnreadableFormat { .. }));
    }

    #[test]
    fn test_run_job() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("leads.csv"),
            "Source,Agent,Revenue\nWeb,amy,100\nWeb,amy,100\nRadio,bob,50\nWeb,carl,25\n",
        )
        .unwrap();

        let mut job = JobFile::template("leads.csv", "Source");
        job.summaries.push(SummaryRequest::sum("Source", "Revenue"));
        job.exports.push(ExportStep {
            path: PathBuf::from("summary.csv"),
            target: ExportTarget::Summary,
            options: ExportOptions::default(),
        });
        let job = job.relative_to(dir.path());

        let report = run_job(&job).unwrap();
        assert_eq!(report.rows_loaded, 4);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.rows_final, 3);
        assert_eq!(report.summaries.len(), 2);
        assert_eq!(report.summaries[0].get_text("Web"), Some(2.0));
        assert_eq!(report.exports.len(), 2);

        let cleaned = load_table(dir.path().join("leads_cleaned.xlsx"), &LoadOptions::default())
            .unwrap()
            .table;
        assert_eq!(cleaned.row_count(), 3);

        let summary = load_table(dir.path().join("summary.csv"), &LoadOptions::default())
            .unwrap()
            .table;
        assert_eq!(summary.column_names(), vec!["Source", "sum(Revenue)"]);
        assert_eq!(summary.rows[0].cells[1], CellValue::Number(125.0));
    }

    #[test]
    fn test_run_job_stops_on_unknown_column() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("leads.csv"), "Source\nWeb\n").unwrap();
        let job = JobFile::template("leads.csv", "Agent").relative_to(dir.path());

        let err = run_job(&job).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { column } if column == "Agent"));
        assert!(!dir.path().join("leads_cleaned.xlsx").exists());
    }
}
