//! Report files, written to the export directory and downloaded later by name.

use std::path::Path;

use chrono::{NaiveDateTime, Utc};
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::web::errors::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    #[serde(alias = "excel")]
    Xlsx,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat::Csv
    }
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "Sensor")]
    pub sensor_name: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Visitors")]
    pub visitor_count: i32,
    #[serde(rename = "Timestamp", serialize_with = "plain_time")]
    pub recorded_at: NaiveDateTime,
}

const HEADERS: [&str; 4] = ["Sensor", "Location", "Visitors", "Timestamp"];
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Both formats print timestamps the same way.
fn plain_time<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&value.format(TIME_FORMAT))
}

pub fn export_file_name(now: NaiveDateTime, format: ExportFormat) -> String {
    format!("report_{}_{}.{}", now.format("%Y%m%d_%H%M%S"), Uuid::new_v4().simple(), format.extension())
}

/// Only plain names produced by `export_file_name` can be downloaded.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() &&
        !name.contains("..") &&
        name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn write_csv(path: &Path, rows: &[ExportRow]) -> ServiceResult<()> {
    let map_err = |e: csv::Error| ServiceError::InternalServerError(format!("CSV error: {}", e));

    let mut writer = csv::Writer::from_path(path).map_err(map_err)?;
    if rows.is_empty() {
        writer.write_record(&HEADERS).map_err(map_err)?;
    }
    for row in rows {
        writer.serialize(row).map_err(map_err)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xlsx(path: &Path, rows: &[ExportRow]) -> ServiceResult<()> {
    let map_err = |e: rust_xlsxwriter::XlsxError| ServiceError::InternalServerError(format!("XLSX error: {}", e));

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Visitors").map_err(map_err)?;

    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &bold).map_err(map_err)?;
    }
    for (i, row) in rows.iter().enumerate() {
        let line = i as u32 + 1;
        sheet.write_string(line, 0, row.sensor_name.as_str()).map_err(map_err)?;
        sheet.write_string(line, 1, row.location.as_str()).map_err(map_err)?;
        sheet.write_number(line, 2, row.visitor_count as f64).map_err(map_err)?;
        sheet.write_string(line, 3, row.recorded_at.format(TIME_FORMAT).to_string()).map_err(map_err)?;
    }
    sheet.set_column_width(0, 24).map_err(map_err)?;
    sheet.set_column_width(1, 24).map_err(map_err)?;
    sheet.set_column_width(3, 20).map_err(map_err)?;

    workbook.save(path).map_err(map_err)?;
    Ok(())
}

/// Writes the rows into a new file inside `dir` and returns its name.
pub fn write_export(dir: &Path, rows: &[ExportRow], format: ExportFormat) -> ServiceResult<String> {
    std::fs::create_dir_all(dir)?;

    let name = export_file_name(Utc::now().naive_utc(), format);
    let path = dir.join(&name);

    match format {
        ExportFormat::Csv => write_csv(&path, rows)?,
        ExportFormat::Xlsx => write_xlsx(&path, rows)?,
    }

    Ok(name)
}
