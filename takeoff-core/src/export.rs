use rust_xlsxwriter::{Format, FormatAlign, Formula, Workbook};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::error::TakeoffError;
use crate::model::TakeoffTable;

/// UTF-8 byte order mark; spreadsheet tools need it to read non-ASCII labels
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub const CSV_FILE_NAME: &str = "takeoff.csv";
pub const XLSX_FILE_NAME: &str = "takeoff.xlsx";

const SHEET_NAME: &str = "Takeoff";
const HEADERS: [&str; 4] = ["item", "formula", "subtotal", "unit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, TakeoffError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(TakeoffError::UnsupportedFormat(format!(".{}", other))),
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ExportFormat::Csv => CSV_FILE_NAME,
            ExportFormat::Xlsx => XLSX_FILE_NAME,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ExportRecord<'a> {
    item: &'a str,
    formula: &'a str,
    subtotal: String,
    unit: &'a str,
}

/// Write the table as CSV (with BOM) into any writer
pub fn write_csv<W: Write>(table: &TakeoffTable, mut writer: W) -> Result<W, TakeoffError> {
    writer.write_all(UTF8_BOM)?;

    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in &table.rows {
        csv_writer.serialize(ExportRecord {
            item: &row.label,
            formula: &row.formula,
            subtotal: format!("{:.2}", row.result),
            unit: row.unit.as_str(),
        })?;
    }
    // Headers come from the first record; an empty table still gets them
    if table.rows.is_empty() {
        csv_writer.write_record(HEADERS)?;
    }

    csv_writer
        .into_inner()
        .map_err(|e| TakeoffError::Io(e.into_error()))
}

pub fn to_csv_bytes(table: &TakeoffTable) -> Result<Vec<u8>, TakeoffError> {
    write_csv(table, Vec::new())
}

/// Build the XLSX workbook: header, one row per item, then a TOTAL row
pub fn to_xlsx_bytes(table: &TakeoffTable) -> Result<Vec<u8>, TakeoffError> {
    let mut workbook = build_workbook(table)?;
    Ok(workbook.save_to_buffer()?)
}

fn build_workbook(table: &TakeoffTable) -> Result<Workbook, TakeoffError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let header = Format::new().set_bold().set_align(FormatAlign::Center);
    let number = Format::new().set_num_format("0.00");
    let bold = Format::new().set_bold();
    let bold_number = Format::new().set_bold().set_num_format("0.00");

    for (col, title) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &header)?;
    }
    worksheet.set_column_width(0, 28.0)?;
    worksheet.set_column_width(1, 18.0)?;
    worksheet.set_column_width(2, 12.0)?;
    worksheet.set_column_width(3, 8.0)?;

    for (i, row) in table.rows.iter().enumerate() {
        let r = (i + 1) as u32;
        worksheet.write_string(r, 0, &row.label)?;
        worksheet.write_string(r, 1, &row.formula)?;
        worksheet.write_number_with_format(r, 2, row.result, &number)?;
        worksheet.write_string(r, 3, row.unit.as_str())?;
    }

    let total_row = (table.rows.len() + 1) as u32;
    worksheet.write_string_with_format(total_row, 0, "TOTAL", &bold)?;
    if table.rows.is_empty() {
        worksheet.write_number_with_format(total_row, 2, 0.0, &bold_number)?;
    } else {
        // Spreadsheet rows are 1-based and the header sits on row 1
        let formula = Formula::new(format!("SUM(C2:C{})", total_row))
            .set_result(format!("{}", table.total));
        worksheet.write_formula_with_format(total_row, 2, formula, &bold_number)?;
    }
    worksheet.write_string_with_format(total_row, 3, table.unit.as_str(), &bold)?;

    Ok(workbook)
}

/// Export to a file, choosing CSV or XLSX from the extension
pub fn export_to_path(table: &TakeoffTable, path: &Path) -> Result<ExportFormat, TakeoffError> {
    let format = ExportFormat::from_path(path)?;
    let bytes = export_bytes(table, format)?;
    std::fs::write(path, bytes)?;

    info!("Exported {} rows to {}", table.len(), path.display());
    Ok(format)
}

pub fn export_bytes(table: &TakeoffTable, format: ExportFormat) -> Result<Vec<u8>, TakeoffError> {
    match format {
        ExportFormat::Csv => to_csv_bytes(table),
        ExportFormat::Xlsx => to_xlsx_bytes(table),
    }
}
