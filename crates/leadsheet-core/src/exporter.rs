//! Export tables to xlsx, csv or tsv
//!
//! Workbooks are written directly as ZIP/XML (Office Open XML, one sheet,
//! inline strings). Every export goes through a temporary file in the
//! destination directory and is renamed into place only once complete.

use crate::error::{Error, Result};
use crate::table::{CellValue, Table};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::ZipWriter;

/// Output file layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Xlsx,
    Csv,
    Tsv,
}

impl ExportFormat {
    /// Pick the format from a destination file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" | "xlsm" => Some(ExportFormat::Xlsx),
            "csv" => Some(ExportFormat::Csv),
            "tsv" => Some(ExportFormat::Tsv),
            _ => None,
        }
    }
}

/// Export settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Replace an existing destination; must be confirmed by the caller
    pub overwrite: bool,
    /// Worksheet name for xlsx output
    pub sheet_name: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            sheet_name: "Sheet1".to_string(),
        }
    }
}

impl ExportOptions {
    /// Default options with overwrite confirmed
    pub fn overwriting() -> Self {
        Self {
            overwrite: true,
            ..Self::default()
        }
    }
}

/// Result of a successful export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub rows_written: usize,
}

/// Whether `path` already exists, so the caller can ask before exporting
pub fn destination_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists()
}

/// Write `table` to `path` with a header row, in column order
pub fn export_table<P: AsRef<Path>>(
    table: &Table,
    path: P,
    options: &ExportOptions,
) -> Result<ExportReport> {
    let path = path.as_ref();
    let format = ExportFormat::from_path(path).ok_or_else(|| {
        Error::write_failure(path, "unsupported export format, use .xlsx, .csv or .tsv")
    })?;

    if path.exists() && !options.overwrite {
        return Err(Error::write_failure(
            path,
            "destination exists and overwrite was not confirmed",
        ));
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir).map_err(|e| Error::write_failure_from(path, e))?;

    let tmp = match format {
        ExportFormat::Xlsx => write_xlsx(table, tmp, &options.sheet_name),
        ExportFormat::Csv => write_delimited(table, tmp, b','),
        ExportFormat::Tsv => write_delimited(table, tmp, b'\t'),
    }
    .map_err(|e| Error::write_failure_from(path, e))?;

    let persisted = if options.overwrite {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    persisted.map_err(|e| Error::write_failure_from(path, e.error))?;

    info!(
        "Exported {} rows to {} ({:?})",
        table.row_count(),
        path.display(),
        format
    );

    Ok(ExportReport {
        path: path.to_path_buf(),
        format,
        rows_written: table.row_count(),
    })
}

fn write_delimited<W: Write>(table: &Table, out: W, delimiter: u8) -> io::Result<W> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(out);

    writer.write_record(table.columns.iter().map(|c| c.name.as_str()))?;
    for row in &table.rows {
        writer.write_record(row.cells.iter().map(|c| c.to_string_value()))?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())
}

fn zip_error(e: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

fn write_xlsx<W: Write + io::Seek>(table: &Table, out: W, sheet_name: &str) -> io::Result<W> {
    let mut zip = ZipWriter::new(out);
    let options = FileOptions::default();

    let parts: [(&str, String); 8] = [
        ("[Content_Types].xml", content_types_xml()),
        ("_rels/.rels", root_rels_xml()),
        ("docProps/app.xml", app_props_xml(sheet_name)),
        ("docProps/core.xml", core_props_xml()),
        ("xl/workbook.xml", workbook_xml(sheet_name)),
        ("xl/_rels/workbook.xml.rels", workbook_rels_xml()),
        ("xl/styles.xml", styles_xml()),
        ("xl/worksheets/sheet1.xml", sheet_xml(table)),
    ];

    for (name, body) in parts {
        zip.start_file(name, options).map_err(zip_error)?;
        zip.write_all(body.as_bytes())?;
    }

    zip.finish().map_err(zip_error)
}

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;
const SHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

fn content_types_xml() -> String {
    format!(
        r#"{XML_HEADER}
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>
<Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>
</Types>"#
    )
}

fn root_rels_xml() -> String {
    format!(
        r#"{XML_HEADER}
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="{REL_NS}/officeDocument" Target="xl/workbook.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
<Relationship Id="rId3" Type="{REL_NS}/extended-properties" Target="docProps/app.xml"/>
</Relationships>"#
    )
}

fn app_props_xml(sheet_name: &str) -> String {
    format!(
        r#"{XML_HEADER}
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties" xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes">
<Application>leadsheet</Application>
<TitlesOfParts><vt:vector size="1" baseType="lpstr"><vt:lpstr>{}</vt:lpstr></vt:vector></TitlesOfParts>
</Properties>"#,
        escape_xml(&sheet_title(sheet_name))
    )
}

fn core_props_xml() -> String {
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    format!(
        r#"{XML_HEADER}
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<dc:creator>leadsheet</dc:creator>
<dcterms:created xsi:type="dcterms:W3CDTF">{now}</dcterms:created>
<dcterms:modified xsi:type="dcterms:W3CDTF">{now}</dcterms:modified>
</cp:coreProperties>"#
    )
}

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        r#"{XML_HEADER}
<workbook xmlns="{SHEET_NS}" xmlns:r="{REL_NS}">
<sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#,
        escape_xml(&sheet_title(sheet_name))
    )
}

fn workbook_rels_xml() -> String {
    format!(
        r#"{XML_HEADER}
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="{REL_NS}/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="{REL_NS}/styles" Target="styles.xml"/>
</Relationships>"#
    )
}

fn styles_xml() -> String {
    format!(
        r#"{XML_HEADER}
<styleSheet xmlns="{SHEET_NS}">
<fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>
<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>
<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
<cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>
<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>
</styleSheet>"#
    )
}

fn sheet_xml(table: &Table) -> String {
    let mut xml = String::with_capacity(64 * (table.row_count() + 1) * table.column_count().max(1));
    xml.push_str(XML_HEADER);
    xml.push_str(&format!("\n<worksheet xmlns=\"{SHEET_NS}\">"));

    if table.column_count() > 0 {
        xml.push_str(&format!(
            "<dimension ref=\"A1:{}{}\"/>",
            column_letter(table.column_count() - 1),
            table.row_count() + 1
        ));
    }
    xml.push_str("<sheetData>");

    let mut dropped = 0;
    xml.push_str("<row r=\"1\">");
    for col in &table.columns {
        dropped += push_text_cell(&mut xml, col.index, 1, &col.name);
    }
    xml.push_str("</row>");

    for (i, row) in table.rows.iter().enumerate() {
        let r = i + 2;
        xml.push_str(&format!("<row r=\"{}\">", r));
        if row.filled() == 0 && !row.cells.is_empty() {
            // Readers skip rows without cells; an empty string reads back as Missing
            push_text_cell(&mut xml, 0, r, "");
        }
        for (c, cell) in row.cells.iter().enumerate() {
            match cell {
                CellValue::Text(s) => dropped += push_text_cell(&mut xml, c, r, s),
                CellValue::Number(n) => {
                    xml.push_str(&format!("<c r=\"{}{}\"><v>{}</v></c>", column_letter(c), r, n))
                }
                CellValue::Missing => {}
            }
        }
        xml.push_str("</row>");
    }

    xml.push_str("</sheetData></worksheet>");
    if dropped > 0 {
        warn!("Dropped {} control characters that xlsx cannot store", dropped);
    }
    xml
}

/// Append an inline string cell, returning how many characters were dropped
fn push_text_cell(xml: &mut String, col: usize, row: usize, text: &str) -> usize {
    xml.push_str(&format!(
        "<c r=\"{}{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
        column_letter(col),
        row,
        escape_xml(text)
    ));
    unstorable_chars(text)
}

/// Spreadsheet column letters: 0 -> A, 25 -> Z, 26 -> AA
fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Excel sheet names: at most 31 chars, none of `[]:*?/\`
fn sheet_title(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(31)
        .collect();
    if cleaned.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

/// Control characters other than tab and newlines are not representable in XML 1.0
fn is_unstorable(c: char) -> bool {
    (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r')
}

fn unstorable_chars(s: &str) -> usize {
    s.chars().filter(|&c| is_unstorable(c)).count()
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if is_unstorable(c) => {}
            c => out.push(c),
        }
    }
    out
}
