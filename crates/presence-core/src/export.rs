//! CSV, JSON and XLSX exports of the attendance log.

use crate::error::{Error, Result};
use crate::reports::AttendanceRow;
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

const CSV_HEADER: [&str; 6] = ["EMP ID", "Name", "Date", "Time In", "Time Out", "Status"];
const XLSX_HEADER: [&str; 7] = ["EMP ID", "Name", "Date", "Time In", "Time Out", "Duration (Hours)", "Status"];
const XLSX_WIDTHS: [f64; 7] = [12.0, 20.0, 12.0, 12.0, 12.0, 16.0, 12.0];
const XLSX_SHEET: &str = "Attendance";
const HEADER_FILL: u32 = 0x366092;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "xlsx" | "excel" => Ok(Self::Xlsx),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    emp_id: i64,
    name: &'a str,
    date: &'a str,
    time_in: Option<&'a str>,
    time_out: Option<&'a str>,
    status: &'a str,
}

pub fn write_csv<W: Write>(rows: &[AttendanceRow], writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(CSV_HEADER)?;
    for row in rows {
        out.write_record([
            row.staff_id.to_string().as_str(),
            row.name.as_str(),
            row.date.as_str(),
            row.time_in.as_deref().unwrap_or(""),
            row.time_out.as_deref().unwrap_or(""),
            row.status.as_str(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_json<W: Write>(rows: &[AttendanceRow], writer: W) -> Result<()> {
    let records: Vec<JsonRecord<'_>> = rows
        .iter()
        .map(|row| JsonRecord {
            emp_id: row.staff_id,
            name: &row.name,
            date: &row.date,
            time_in: row.time_in.as_deref(),
            time_out: row.time_out.as_deref(),
            status: &row.status,
        })
        .collect();
    serde_json::to_writer_pretty(writer, &records)?;
    Ok(())
}

/// Build the workbook in memory. Duration cells stay blank when unavailable.
pub fn xlsx_bytes(rows: &[AttendanceRow]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(XLSX_SHEET)?;

    let header = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_FILL))
        .set_align(FormatAlign::Center);

    for (col, (title, width)) in XLSX_HEADER.iter().zip(XLSX_WIDTHS).enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, *title, &header)?;
        sheet.set_column_width(col, width)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        sheet.write_number(r, 0, row.staff_id as f64)?;
        sheet.write_string(r, 1, &row.name)?;
        sheet.write_string(r, 2, &row.date)?;
        sheet.write_string(r, 3, row.time_in.as_deref().unwrap_or(""))?;
        sheet.write_string(r, 4, row.time_out.as_deref().unwrap_or(""))?;
        if let Some(hours) = row.duration_hours {
            sheet.write_number(r, 5, hours)?;
        }
        sheet.write_string(r, 6, &row.status)?;
    }

    Ok(workbook.save_to_buffer()?)
}

/// Write `rows` to `path` in `format`.
pub fn export_to_path(rows: &[AttendanceRow], format: ExportFormat, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match format {
        ExportFormat::Csv => write_csv(rows, std::fs::File::create(path)?)?,
        ExportFormat::Json => write_json(rows, std::io::BufWriter::new(std::fs::File::create(path)?))?,
        ExportFormat::Xlsx => std::fs::write(path, xlsx_bytes(rows)?)?,
    }
    tracing::info!(rows = rows.len(), %format, path = %path.display(), "attendance exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<AttendanceRow> {
        vec![
            AttendanceRow {
                id: 2,
                staff_id: 4,
                name: "Lovelace, Ada".into(),
                date: "2026-03-10".into(),
                time_in: Some("09:00:00".into()),
                time_out: None,
                status: "Present".into(),
                duration_hours: None,
            },
            AttendanceRow {
                id: 1,
                staff_id: 3,
                name: "Grace".into(),
                date: "2026-03-09".into(),
                time_in: Some("08:00:00".into()),
                time_out: Some("16:30:00".into()),
                status: "Present".into(),
                duration_hours: Some(8.5),
            },
        ]
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("excel".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::Json.to_string(), "json");
        assert!(matches!("pdf".parse::<ExportFormat>(), Err(Error::UnsupportedFormat(f)) if f == "pdf"));
    }

    #[test]
    fn test_csv() {
        let mut buf = Vec::new();
        write_csv(&rows(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "EMP ID,Name,Date,Time In,Time Out,Status");
        assert_eq!(lines[1], "4,\"Lovelace, Ada\",2026-03-10,09:00:00,,Present");
        assert_eq!(lines[2], "3,Grace,2026-03-09,08:00:00,16:30:00,Present");
    }

    #[test]
    fn test_json() {
        let mut buf = Vec::new();
        write_json(&rows(), &mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(
            value[0],
            serde_json::json!({
                "emp_id": 4,
                "name": "Lovelace, Ada",
                "date": "2026-03-10",
                "time_in": "09:00:00",
                "time_out": null,
                "status": "Present"
            })
        );
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_xlsx_is_zip() {
        let bytes = xlsx_bytes(&rows()).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn test_export_to_path() {
        let dir = tempfile::tempdir().unwrap();
        for format in [ExportFormat::Csv, ExportFormat::Json, ExportFormat::Xlsx] {
            let path = dir.path().join(format!("out/attendance.{}", format.extension()));
            export_to_path(&rows(), format, &path).unwrap();
            assert!(std::fs::metadata(&path).unwrap().len() > 0);
        }
    }

    #[test]
    fn test_empty_csv_has_header_only() {
        let mut buf = Vec::new();
        write_csv(&[], &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "EMP ID,Name,Date,Time In,Time Out,Status\n");
    }
}
