//! Leadsheet CLI
//!
//! Command-line tool for previewing, cleaning, summarizing and exporting sales-lead spreadsheets.

use clap::{Parser, Subcommand, ValueEnum};
use leadsheet_core::{
    attribute_sales, clean_leads, destination_exists, load_table, run_job, AttributionConfig,
    ColumnHints, DedupeOptions, Error, ExportOptions, ExportTarget, HeaderRow, JobFile,
    KeyNormalization, LoadOptions, NumberParsing, RowFilter, Session, Summary, SummaryRequest,
    Table,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leadsheet")]
#[command(about = "Sales lead spreadsheet cleaner", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Header row selection shared by every command that loads a sheet
#[derive(clap::Args)]
struct HeaderArgs {
    /// Use this 0-based row as the header
    #[arg(long, conflicts_with = "header_contains")]
    header_row: Option<usize>,

    /// Use the first leading row mentioning all of these words as the header
    #[arg(long, value_delimiter = ',')]
    header_contains: Vec<String>,
}

impl HeaderArgs {
    fn load_options(&self) -> LoadOptions {
        let header = match (self.header_row, self.header_contains.is_empty()) {
            (Some(n), _) => HeaderRow::Fixed(n),
            (None, false) => HeaderRow::Containing(self.header_contains.clone()),
            (None, true) => HeaderRow::Auto,
        };
        LoadOptions {
            header,
            ..LoadOptions::default()
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SortOrder {
    /// First appearance in the sheet
    Appearance,
    /// By group key
    Key,
    /// Largest value first
    Value,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Current,
    Original,
    Summary,
}

impl From<Target> for ExportTarget {
    fn from(t: Target) -> Self {
        match t {
            Target::Current => ExportTarget::Current,
            Target::Original => ExportTarget::Original,
            Target::Summary => ExportTarget::Summary,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the first rows of a spreadsheet
    Preview {
        /// Spreadsheet to load
        #[arg(short, long)]
        file: PathBuf,

        /// Number of rows to show
        #[arg(short, long, default_value_t = 5)]
        rows: usize,

        #[command(flatten)]
        header: HeaderArgs,

        /// Print the preview as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove duplicate rows and write the result
    Dedupe {
        #[arg(short, long)]
        file: PathBuf,

        /// Key columns (repeat or comma-separate); default is every column
        #[arg(short, long, value_delimiter = ',')]
        key: Vec<String>,

        /// Ignore surrounding whitespace when comparing keys
        #[arg(long)]
        trim: bool,

        /// Compare keys case-insensitively
        #[arg(long)]
        ignore_case: bool,

        /// Output file (.xlsx, .csv or .tsv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace the output file if it exists
        #[arg(long)]
        overwrite: bool,

        #[command(flatten)]
        header: HeaderArgs,
    },

    /// Count, sum or average a column per group
    Summarize {
        #[arg(short, long)]
        file: PathBuf,

        /// Column to group by
        #[arg(short, long)]
        group_by: String,

        /// Column to aggregate (required for sum and mean)
        #[arg(long)]
        value: Option<String>,

        /// count, sum or mean
        #[arg(short, long, default_value = "count")]
        aggregate: String,

        /// Accept currency-formatted values like "$1,200.50"
        #[arg(long)]
        currency: bool,

        #[arg(long, value_enum, default_value_t = SortOrder::Appearance)]
        sort: SortOrder,

        /// Also write the summary to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        overwrite: bool,

        #[arg(long)]
        json: bool,

        #[command(flatten)]
        header: HeaderArgs,
    },

    /// Export a spreadsheet, optionally narrowed by columns and row filters
    Export {
        #[arg(short, long)]
        file: PathBuf,

        /// Output file (.xlsx, .csv or .tsv)
        #[arg(short, long)]
        output: PathBuf,

        /// Columns to keep, in order
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Row filters: `column=value` or `column>number`
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,

        /// Keep at most this many rows
        #[arg(short, long)]
        limit: Option<usize>,

        /// Remove duplicates (on every column) before exporting
        #[arg(long)]
        dedupe: bool,

        #[arg(long)]
        overwrite: bool,

        /// Worksheet name for xlsx output
        #[arg(long, default_value = "Sheet1")]
        sheet_name: String,

        #[command(flatten)]
        header: HeaderArgs,
    },

    /// Credit sales to lead sources and report lead cost per source
    Attribute {
        /// Sales sheet (agent, name, deposit, order id)
        #[arg(short, long)]
        sales: PathBuf,

        /// Leads sheet (number, customer name, assigned to, source)
        #[arg(short, long)]
        leads: PathBuf,

        /// Cost per lead for a source, as `Source=cost` (repeatable)
        #[arg(long, value_parser = parse_lead_cost)]
        lead_cost: Vec<(String, f64)>,

        /// Cost per lead for sources without a --lead-cost entry
        #[arg(long, default_value_t = 1.0)]
        default_cost: f64,

        /// Write the matched sales table here
        #[arg(long)]
        matched_output: Option<PathBuf>,

        /// Write the per-source report here
        #[arg(long)]
        report_output: Option<PathBuf>,

        #[arg(long)]
        overwrite: bool,

        #[arg(long)]
        json: bool,
    },

    /// Normalize assigned agents, drop repeated leads and count leads per source
    CleanLeads {
        /// Leads sheet (phone, assigned to, source)
        #[arg(short, long)]
        leads: PathBuf,

        /// Write the cleaned leads here
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        overwrite: bool,

        #[arg(long)]
        json: bool,
    },

    /// Run a job file
    Run {
        /// Path to job file (JSON)
        #[arg(short, long)]
        job: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Create a job file template
    CreateJob {
        /// Spreadsheet the job should load
        #[arg(short, long)]
        input: PathBuf,

        /// Column to count rows by
        #[arg(short, long, default_value = "Source")]
        group_by: String,

        /// Output path for the job file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Ask whether a destination already exists (exit status 0 if it does)
    Exists {
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> leadsheet_core::Result<()> {
    match command {
        Commands::Preview {
            file,
            rows,
            header,
            json,
        } => cmd_preview(&file, rows, &header, json),
        Commands::Dedupe {
            file,
            key,
            trim,
            ignore_case,
            output,
            overwrite,
            header,
        } => {
            let options = DedupeOptions {
                keys: key,
                normalize: KeyNormalization {
                    trim,
                    case_insensitive: ignore_case,
                },
            };
            cmd_dedupe(&file, &options, output.as_deref(), overwrite, &header)
        }
        Commands::Summarize {
            file,
            group_by,
            value,
            aggregate,
            currency,
            sort,
            output,
            overwrite,
            json,
            header,
        } => {
            let request = SummaryRequest {
                group_by,
                value_column: value,
                aggregate: aggregate.parse()?,
                numbers: if currency {
                    NumberParsing::Currency
                } else {
                    NumberParsing::Strict
                },
            };
            cmd_summarize(&file, &request, sort, output.as_deref(), overwrite, json, &header)
        }
        Commands::Export {
            file,
            output,
            columns,
            filters,
            limit,
            dedupe,
            overwrite,
            sheet_name,
            header,
        } => {
            let options = ExportOptions {
                overwrite,
                sheet_name,
            };
            cmd_export(&file, &output, &columns, &filters, limit, dedupe, &options, &header)
        }
        Commands::Attribute {
            sales,
            leads,
            lead_cost,
            default_cost,
            matched_output,
            report_output,
            overwrite,
            json,
        } => {
            let config = AttributionConfig {
                lead_costs: lead_cost.into_iter().collect(),
                default_lead_cost: default_cost,
                ..AttributionConfig::default()
            };
            cmd_attribute(
                &sales,
                &leads,
                &config,
                matched_output.as_deref(),
                report_output.as_deref(),
                overwrite,
                json,
            )
        }
        Commands::CleanLeads {
            leads,
            output,
            overwrite,
            json,
        } => cmd_clean_leads(&leads, output.as_deref(), overwrite, json),
        Commands::Run { job, json } => cmd_run(&job, json),
        Commands::CreateJob {
            input,
            group_by,
            output,
        } => cmd_create_job(&input, &group_by, &output),
        Commands::Exists { path } => {
            if destination_exists(&path) {
                println!("{} exists", path.display());
                Ok(())
            } else {
                println!("{} does not exist", path.display());
                std::process::exit(2);
            }
        }
    }
}

fn cmd_preview(file: &Path, rows: usize, header: &HeaderArgs, json: bool) -> leadsheet_core::Result<()> {
    let options = LoadOptions {
        preview_rows: rows,
        ..header.load_options()
    };
    let loaded = load_table(file, &options)?;

    if json {
        return print_json(&loaded.preview);
    }

    println!("File: {}", file.display());
    println!("Columns: {}", loaded.table.column_count());
    println!("Rows: {}", loaded.table.row_count());
    println!();
    print_table(&loaded.table, rows);

    Ok(())
}

fn cmd_dedupe(
    file: &Path,
    options: &DedupeOptions,
    output: Option<&Path>,
    overwrite: bool,
    header: &HeaderArgs,
) -> leadsheet_core::Result<()> {
    let mut session = Session::open(file, header.load_options())?;
    let before = session.table().row_count();
    let removed = session.dedupe(options)?;

    println!("Removed {} duplicate rows ({} of {} kept)", removed, before - removed, before);

    if let Some(output) = output {
        let report = session.export(ExportTarget::Current, output, &export_options(overwrite))?;
        println!("Exported {} rows to {}", report.rows_written, report.path.display());
    } else {
        print_table(session.table(), 10);
    }

    Ok(())
}

fn cmd_summarize(
    file: &Path,
    request: &SummaryRequest,
    sort: SortOrder,
    output: Option<&Path>,
    overwrite: bool,
    json: bool,
    header: &HeaderArgs,
) -> leadsheet_core::Result<()> {
    let mut session = Session::open(file, header.load_options())?;
    session.summarize(request)?;

    // sorting happens on a copy so the session keeps first-appearance order
    let mut summary = match session.last_summary() {
        Some(s) => s.clone(),
        None => return Ok(()),
    };
    match sort {
        SortOrder::Appearance => {}
        SortOrder::Key => summary.sort_by_key(),
        SortOrder::Value => summary.sort_by_value_desc(),
    }

    if json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }

    if let Some(output) = output {
        let report = leadsheet_core::export_table(&summary.to_table(), output, &export_options(overwrite))?;
        println!("Exported {} groups to {}", report.rows_written, report.path.display());
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_export(
    file: &Path,
    output: &Path,
    columns: &[String],
    filters: &[String],
    limit: Option<usize>,
    dedupe: bool,
    options: &ExportOptions,
    header: &HeaderArgs,
) -> leadsheet_core::Result<()> {
    let mut session = Session::open(file, header.load_options())?;

    if dedupe {
        let removed = session.dedupe(&DedupeOptions::default())?;
        println!("Removed {} duplicate rows", removed);
    }

    for expr in filters {
        let filter = match RowFilter::parse(expr) {
            Some(f) => f,
            None => {
                eprintln!("Invalid filter '{}'. Expected 'column=value' or 'column>number'", expr);
                std::process::exit(1);
            }
        };
        let kept = session.filter(&filter)?;
        println!("Filter '{}' kept {} rows", expr, kept);
    }

    if !columns.is_empty() {
        session.select(columns)?;
    }

    let report = match limit {
        Some(n) => leadsheet_core::export_table(&session.table().head(n), output, options)?,
        None => session.export(ExportTarget::Current, output, options)?,
    };

    println!("Exported {} rows to {}", report.rows_written, report.path.display());

    Ok(())
}

fn cmd_attribute(
    sales: &Path,
    leads: &Path,
    config: &AttributionConfig,
    matched_output: Option<&Path>,
    report_output: Option<&Path>,
    overwrite: bool,
    json: bool,
) -> leadsheet_core::Result<()> {
    let sales = load_table(sales, &LoadOptions::default())?.table;
    let leads = load_leads(leads)?;

    let result = attribute_sales(&sales, &leads, config)?;

    if json {
        print_json(&serde_json::json!({
            "matched": &result.matched,
            "report": &result.report,
            "sales_considered": result.sales_considered,
            "unmatched": result.unmatched,
            "leads_removed": result.leads_removed,
        }))?;
    } else {
        println!("Removed {} duplicate leads", result.leads_removed);
        println!(
            "Matched {} of {} sales to a lead source",
            result.sales_considered - result.unmatched,
            result.sales_considered
        );
        println!();
        print_table(&result.report, result.report.row_count());
    }

    let options = export_options(overwrite);
    for (table, path) in [(&result.matched, matched_output), (&result.report, report_output)] {
        if let Some(path) = path {
            let report = leadsheet_core::export_table(table, path, &options)?;
            println!("Exported {} rows to {}", report.rows_written, report.path.display());
        }
    }

    Ok(())
}

fn load_leads(path: &Path) -> leadsheet_core::Result<Table> {
    let options = LoadOptions {
        header: HeaderRow::Containing(vec!["assigned".into(), "source".into()]),
        ..LoadOptions::default()
    };
    Ok(load_table(path, &options)?.table)
}

fn cmd_clean_leads(
    leads: &Path,
    output: Option<&Path>,
    overwrite: bool,
    json: bool,
) -> leadsheet_core::Result<()> {
    let leads = load_leads(leads)?;
    let cleaned = clean_leads(&leads, &ColumnHints::default())?;

    if json {
        print_json(&serde_json::json!({
            "removed": cleaned.removed,
            "leads_per_source": &cleaned.leads_per_source,
        }))?;
    } else {
        println!(
            "Removed {} duplicate leads ({} kept)",
            cleaned.removed,
            cleaned.table.row_count()
        );
        println!();
        print_summary(&cleaned.leads_per_source);
    }

    if let Some(path) = output {
        let options = export_options(overwrite);
        let report = leadsheet_core::export_table(&cleaned.table, path, &options)?;
        println!("Exported {} rows to {}", report.rows_written, report.path.display());
    }

    Ok(())
}

fn cmd_run(job_path: &Path, json: bool) -> leadsheet_core::Result<()> {
    let base = job_path.parent().unwrap_or_else(|| Path::new("."));
    let job = JobFile::load(job_path)?.relative_to(base);

    println!("Running job on {}", job.input.display());
    let report = run_job(&job)?;

    if json {
        return print_json(&report);
    }

    println!("Job complete:");
    println!("  {} rows loaded", report.rows_loaded);
    println!("  {} duplicates removed", report.duplicates_removed);
    println!("  {} rows after filters", report.rows_final);

    for summary in &report.summaries {
        println!();
        print_summary(summary);
    }

    if !report.exports.is_empty() {
        println!();
        for export in &report.exports {
            println!("  - {} ({} rows)", export.path.display(), export.rows_written);
        }
    }

    Ok(())
}

fn cmd_create_job(input: &Path, group_by: &str, output: &Path) -> leadsheet_core::Result<()> {
    let job = JobFile::template(input, group_by);

    job.save(output)?;
    println!("Created job file: {}", output.display());
    println!();
    println!("Edit the file to configure your job, then run:");
    println!("  leadsheet run --job {}", output.display());

    Ok(())
}

/// Parse a `Source=cost` pair for `--lead-cost`
fn parse_lead_cost(entry: &str) -> Result<(String, f64), String> {
    let (source, cost) = entry
        .split_once('=')
        .ok_or_else(|| format!("expected 'Source=cost', got '{}'", entry))?;
    let source = source.trim();
    if source.is_empty() {
        return Err(format!("missing source name in '{}'", entry));
    }
    let cost: f64 = cost
        .trim()
        .parse()
        .map_err(|_| format!("invalid cost '{}' for source '{}'", cost.trim(), source))?;
    if !cost.is_finite() || cost < 0.0 {
        return Err(format!("cost for '{}' must be a non-negative number", source));
    }
    Ok((source.to_string(), cost))
}

fn export_options(overwrite: bool) -> ExportOptions {
    ExportOptions {
        overwrite,
        ..ExportOptions::default()
    }
}

fn print_json<T: Serialize>(value: &T) -> leadsheet_core::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::write_failure_from("<stdout>", e))?;
    println!("{}", json);
    Ok(())
}

fn print_table(table: &Table, limit: usize) {
    let header = table.column_names();
    println!("{}", header.join("\t"));
    println!("{}", "-".repeat(header.len() * 12));

    for row in table.rows.iter().take(limit) {
        let values: Vec<String> = row.cells.iter().map(|c| c.to_string_value()).collect();
        println!("{}", values.join("\t"));
    }

    if table.row_count() > limit {
        println!("... ({} more rows)", table.row_count() - limit);
    }
}

fn print_summary(summary: &Summary) {
    println!("{}\t{}", summary.request.group_by, summary.request.label());
    println!("{}", "-".repeat(24));
    for group in &summary.groups {
        println!("{}\t{}", group.key, group.value);
    }

    let excluded = &summary.excluded;
    if excluded.total() > 0 {
        println!();
        println!("Excluded rows:");
        if excluded.missing_group > 0 {
            println!("  {} with no '{}'", excluded.missing_group, summary.request.group_by);
        }
        if excluded.non_numeric > 0 {
            println!("  {} with a non-numeric value", excluded.non_numeric);
        }
    }
}
