//! Spreadsheet loader: workbook and delimited files into a Table

use crate::error::{Error, Result};
use crate::table::{unique_column_names, CellValue, Row, Table};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

/// Rows inspected when guessing where the header is
const HEADER_SNIFF_ROWS: usize = 3;
/// Rows searched for a keyword-matched header
const HEADER_SEARCH_ROWS: usize = 5;

/// How to locate the header row
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderRow {
    /// First non-empty row
    First,
    /// Skip leading banner rows (at most one filled cell) among the first few rows
    #[default]
    Auto,
    /// Fixed 0-based row index among the records read (blank csv lines are not records)
    Fixed(usize),
    /// First of the leading rows that mentions every keyword (case-insensitive)
    Containing(Vec<String>),
}

/// Options controlling how a sheet is read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Header detection strategy
    pub header: HeaderRow,
    /// Rows to include in the preview
    pub preview_rows: usize,
    /// Stop after this many data rows
    pub max_rows: Option<usize>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            header: HeaderRow::Auto,
            preview_rows: 5,
            max_rows: None,
        }
    }
}

/// First rows of a table for quick display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Row count of the full table
    pub total_rows: usize,
}

impl Preview {
    /// Build a preview of the first `n` rows of `table`
    pub fn of(table: &Table, n: usize) -> Self {
        Self {
            columns: table.columns.iter().map(|c| c.name.clone()).collect(),
            rows: table.rows.iter().take(n).cloned().collect(),
            total_rows: table.row_count(),
        }
    }
}

/// A loaded table together with its preview
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub table: Table,
    pub preview: Preview,
}

/// On-disk layouts the loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SheetFormat {
    Delimited(u8),
    /// Delimiter decided from the content
    SniffedText,
    Workbook,
}

impl SheetFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(SheetFormat::Delimited(b',')),
            "tsv" | "tab" => Some(SheetFormat::Delimited(b'\t')),
            "txt" => Some(SheetFormat::SniffedText),
            "xlsx" | "xlsm" | "xlsb" | "xlam" | "xls" | "xla" | "ods" => {
                Some(SheetFormat::Workbook)
            }
            _ => None,
        }
    }
}

/// Load the first sheet of a spreadsheet file
pub fn load_table<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<LoadedTable> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let format = SheetFormat::from_path(path)
        .ok_or_else(|| Error::unreadable(path, "unsupported file extension"))?;
    debug!("Reading {} as {:?}", path.display(), format);

    let raw = match format {
        SheetFormat::Workbook => read_workbook(path)?,
        SheetFormat::Delimited(delimiter) => {
            let file = open(path)?;
            read_delimited(BufReader::new(file), delimiter, path)?
        }
        SheetFormat::SniffedText => {
            let mut content = String::new();
            open(path)?
                .read_to_string(&mut content)
                .map_err(|e| Error::unreadable_from(path, e))?;
            read_delimited(content.as_bytes(), sniff_delimiter(&content), path)?
        }
    };

    let mut table = build_table(raw, options, path)?;
    table.source_path = Some(path.to_path_buf());

    info!(
        "Loaded {} rows x {} columns from {}",
        table.row_count(),
        table.column_count(),
        path.display()
    );

    let preview = Preview::of(&table, options.preview_rows);
    Ok(LoadedTable { table, preview })
}

/// Parse text pasted from a spreadsheet or CSV (tab-delimited if it contains a tab)
pub fn parse_pasted(text: &str) -> Result<Table> {
    let source = Path::new("<pasted>");
    let raw = read_delimited(text.as_bytes(), sniff_delimiter(text), source)?;
    let options = LoadOptions {
        header: HeaderRow::First,
        ..LoadOptions::default()
    };
    build_table(raw, &options, source)
}

/// Parse delimited text from a string (useful for testing)
pub fn parse_delimited_str(content: &str, delimiter: u8, source_name: &str) -> Result<Table> {
    let source = Path::new(source_name);
    let raw = read_delimited(content.as_bytes(), delimiter, source)?;
    let options = LoadOptions {
        header: HeaderRow::First,
        ..LoadOptions::default()
    };
    build_table(raw, &options, source)
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => Error::unreadable_from(path, e),
    })
}

fn sniff_delimiter(content: &str) -> u8 {
    if content.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

fn read_delimited<R: Read>(reader: R, delimiter: u8, path: &Path) -> Result<Vec<Vec<CellValue>>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(|e| Error::unreadable_from(path, e))?;
        rows.push(record.iter().map(CellValue::parse).collect());
    }
    Ok(rows)
}

fn read_workbook(path: &Path) -> Result<Vec<Vec<CellValue>>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| Error::unreadable_from(path, e))?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| Error::unreadable_from(path, e))?,
        None => {
            return Err(Error::EmptySheet {
                path: path.to_path_buf(),
            })
        }
    };
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect())
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) if s.is_empty() => CellValue::Missing,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => CellValue::Text(format_datetime(value)),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
        Data::Empty => CellValue::Missing,
    }
}

fn format_datetime(value: NaiveDateTime) -> String {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0);
    if Some(value.time()) == midnight {
        value.format("%Y-%m-%d").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn filled(row: &[CellValue]) -> usize {
    row.iter().filter(|c| !c.is_missing()).count()
}

/// Locate the header row within `raw`
fn detect_header(raw: &[Vec<CellValue>], header: &HeaderRow) -> Option<usize> {
    let first_filled = raw.iter().position(|r| filled(r) > 0)?;
    match header {
        HeaderRow::First => Some(first_filled),
        HeaderRow::Fixed(n) => raw.get(*n).filter(|r| filled(r) > 0).map(|_| *n),
        HeaderRow::Auto => {
            let window = &raw[first_filled..];
            let widest = window
                .iter()
                .take(HEADER_SNIFF_ROWS + 1)
                .map(|r| filled(r))
                .max()
                .unwrap_or(0);
            if widest <= 1 {
                return Some(first_filled);
            }
            let skipped = window
                .iter()
                .take(HEADER_SNIFF_ROWS)
                .take_while(|r| filled(r) <= 1)
                .count();
            Some(first_filled + skipped)
        }
        HeaderRow::Containing(keywords) => {
            let found = raw.iter().take(HEADER_SEARCH_ROWS).position(|row| {
                let cells: Vec<String> = row
                    .iter()
                    .filter(|c| !c.is_missing())
                    .map(|c| c.to_string_value().to_lowercase())
                    .collect();
                keywords.iter().all(|k| {
                    let k = k.to_lowercase();
                    cells.iter().any(|c| c.contains(&k))
                })
            });
            match found {
                Some(i) => Some(i),
                None => {
                    debug!("No header row mentions {:?}, using row 0", keywords);
                    raw.first().filter(|r| filled(r) > 0).map(|_| 0)
                }
            }
        }
    }
}

fn build_table(raw: Vec<Vec<CellValue>>, options: &LoadOptions, path: &Path) -> Result<Table> {
    let header_idx = detect_header(&raw, &options.header).ok_or_else(|| Error::EmptySheet {
        path: path.to_path_buf(),
    })?;
    if header_idx > 0 {
        debug!("Header found at row {} in {}", header_idx + 1, path.display());
    }

    let mut rows = raw.into_iter().skip(header_idx);
    let header = rows.next().unwrap_or_default();

    // Trailing blank header cells are sheet padding, not columns
    let width = header.iter().rposition(|c| !c.is_missing()).map_or(0, |i| i + 1);
    let names = header
        .iter()
        .take(width)
        .map(|c| c.to_string_value().trim().to_string())
        .collect();
    let mut table = Table::new(unique_column_names(names));

    // Blank rows after the header are kept as rows of Missing cells
    let limit = options.max_rows.unwrap_or(usize::MAX);
    for (offset, cells) in rows.enumerate() {
        if table.row_count() >= limit {
            break;
        }
        if filled(&cells[width.min(cells.len())..]) > 0 {
            warn!(
                "Row {} in {} has more cells than columns, truncating",
                header_idx + offset + 2,
                path.display()
            );
        }
        table.push_row(cells);
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_parse_simple_csv() {
        let csv = "Source,Agent,Revenue\nWeb,amy,100\nRadio,bob,50\n";
        let table = parse_delimited_str(csv, b',', "test.csv").unwrap();

        assert_eq!(table.column_names(), vec!["Source", "Agent", "Revenue"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows[0].cells[2], CellValue::Number(100.0));
        assert_eq!(table.rows[1].cells[0], CellValue::Text("Radio".into()));
    }

    #[test]
    fn test_parse_pads_short_rows() {
        let csv = "A,B,C\n1,2\n4,5,6\n";
        let table = parse_delimited_str(csv, b',', "test.csv").unwrap();

        assert_eq!(table.rows[0].cells.len(), 3);
        assert_eq!(table.rows[0].cells[2], CellValue::Missing);
    }

    #[test]
    fn test_parse_truncates_long_rows() {
        let csv = "A,B\n1,2,3\n";
        let table = parse_delimited_str(csv, b',', "test.csv").unwrap();

        assert_eq!(table.rows[0].cells, vec![CellValue::Number(1.0), CellValue::Number(2.0)]);
    }

    #[test]
    fn test_blank_rows_after_header_are_kept() {
        let csv = "A,B\n1,2\n,\n3,4\n,\n";
        let table = parse_delimited_str(csv, b',', "test.csv").unwrap();

        assert_eq!(table.row_count(), 4);
        assert_eq!(table.rows[1].cells, vec![CellValue::Missing, CellValue::Missing]);
        assert_eq!(table.rows[3].filled(), 0);
    }

    #[test]
    fn test_blank_rows_before_header_are_skipped() {
        let csv = ",\n,\nA,B\n1,2\n";
        let table = parse_delimited_str(csv, b',', "test.csv").unwrap();

        assert_eq!(table.column_names(), vec!["A", "B"]);
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_fixed_header_row() {
        let csv = "Weekly export,,\nPhone,Assigned To,Source\n555,amy,Web\n";
        let (_dir, path) = write_temp("leads.csv", csv);
        let options = LoadOptions {
            header: HeaderRow::Fixed(1),
            ..LoadOptions::default()
        };
        let loaded = load_table(&path, &options).unwrap();

        assert_eq!(loaded.table.column_names(), vec!["Phone", "Assigned To", "Source"]);
        assert_eq!(loaded.table.row_count(), 1);

        let options = LoadOptions {
            header: HeaderRow::Fixed(0),
            ..LoadOptions::default()
        };
        let loaded = load_table(&path, &options).unwrap();
        assert_eq!(loaded.table.column_names(), vec!["Weekly export"]);
        assert_eq!(loaded.table.row_count(), 2);
    }

    #[test]
    fn test_fixed_header_on_blank_row_is_empty_sheet() {
        let csv = "Weekly export,,\n,,\nPhone,Assigned To,Source\n";
        let (_dir, path) = write_temp("leads.csv", csv);

        for n in [1, 7] {
            let options = LoadOptions {
                header: HeaderRow::Fixed(n),
                ..LoadOptions::default()
            };
            let err = load_table(&path, &options).unwrap_err();
            assert!(matches!(err, Error::EmptySheet { .. }), "row {}: {:?}", n, err);
        }
    }

    #[test]
    fn test_auto_header_skips_banner_rows() {
        let csv = "Weekly Leads Report,,\n,,\nPhone,Assigned To,Source\n555,amy,Web\n";
        let (_dir, path) = write_temp("leads.csv", csv);
        let loaded = load_table(&path, &LoadOptions::default()).unwrap();

        assert_eq!(loaded.table.column_names(), vec!["Phone", "Assigned To", "Source"]);
        assert_eq!(loaded.table.row_count(), 1);
    }

    #[test]
    fn test_auto_header_keeps_single_column_sheet() {
        let csv = "Phone\n555\n556\n";
        let (_dir, path) = write_temp("phones.csv", csv);
        let loaded = load_table(&path, &LoadOptions::default()).unwrap();

        assert_eq!(loaded.table.column_names(), vec!["Phone"]);
        assert_eq!(loaded.table.row_count(), 2);
    }

    #[test]
    fn test_keyword_header_detection() {
        let raw = vec![
            vec![CellValue::Text("Export".into()), CellValue::Text("2024".into())],
            vec![
                CellValue::Text("Phone".into()),
                CellValue::Text("Assigned To".into()),
                CellValue::Text("Lead Source".into()),
            ],
        ];
        let header = HeaderRow::Containing(vec!["phone".into(), "assigned".into(), "source".into()]);
        assert_eq!(detect_header(&raw, &header), Some(1));

        let header = HeaderRow::Containing(vec!["deposit".into()]);
        assert_eq!(detect_header(&raw, &header), Some(0));
    }

    #[test]
    fn test_preview_is_bounded() {
        let mut csv = String::from("Source,Revenue\n");
        for i in 0..12 {
            csv.push_str(&format!("S{},{}\n", i, i * 10));
        }
        let (_dir, path) = write_temp("many.csv", &csv);
        let loaded = load_table(&path, &LoadOptions::default()).unwrap();

        assert_eq!(loaded.preview.rows.len(), 5);
        assert_eq!(loaded.preview.total_rows, 12);
        assert_eq!(loaded.table.row_count(), 12);
    }

    #[test]
    fn test_max_rows_limits_load() {
        let (_dir, path) = write_temp("many.csv", "A\n1\n2\n3\n");
        let options = LoadOptions {
            max_rows: Some(2),
            ..LoadOptions::default()
        };
        let loaded = load_table(&path, &options).unwrap();
        assert_eq!(loaded.table.row_count(), 2);
    }

    #[test]
    fn test_missing_file() {
        let err = load_table("/definitely/not/here.xlsx", &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[test]
    fn test_empty_file_is_empty_sheet() {
        let (_dir, path) = write_temp("empty.csv", "\n\n");
        let err = load_table(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::EmptySheet { .. }));
    }

    #[test]
    fn test_garbage_workbook_is_unreadable() {
        let (_dir, path) = write_temp("broken.xlsx", "this is not a zip archive");
        let err = load_table(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnreadableFormat { .. }));
    }

    #[test]
    fn test_workbook_without_sheets_is_empty_sheet() {
        use zip::write::FileOptions;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nosheets.xlsx");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        let parts = [
            (
                "[Content_Types].xml",
                r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/></Types>"#,
            ),
            (
                "_rels/.rels",
                r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
            ),
            (
                "xl/workbook.xml",
                r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheets/></workbook>"#,
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"/>"#,
            ),
        ];
        for (name, xml) in parts {
            zip.start_file(name, FileOptions::default()).unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
        }
        zip.finish().unwrap();

        let err = load_table(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::EmptySheet { .. }), "{:?}", err);
    }

    #[test]
    fn test_unknown_extension_is_unreadable() {
        let (_dir, path) = write_temp("notes.pdf", "A,B\n1,2\n");
        let err = load_table(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnreadableFormat { .. }));
    }

    #[test]
    fn test_parse_pasted_tabs() {
        let pasted = "Order ID\tName\tDeposit\n1001\tJane Doe\t$250\n";
        let table = parse_pasted(pasted).unwrap();

        assert_eq!(table.column_names(), vec!["Order ID", "Name", "Deposit"]);
        assert_eq!(table.rows[0].cells[1], CellValue::Text("Jane Doe".into()));
        assert_eq!(table.rows[0].cells[2], CellValue::Text("$250".into()));
    }

    #[test]
    fn test_parse_pasted_blank() {
        assert!(matches!(parse_pasted("  \n"), Err(Error::EmptySheet { .. })));
    }

    #[test]
    fn test_cell_from_data() {
        assert_eq!(cell_from_data(&Data::Int(3)), CellValue::Number(3.0));
        assert_eq!(cell_from_data(&Data::Empty), CellValue::Missing);
        assert_eq!(cell_from_data(&Data::String(String::new())), CellValue::Missing);
        assert_eq!(
            cell_from_data(&Data::Bool(true)),
            CellValue::Text("TRUE".into())
        );
    }
}
