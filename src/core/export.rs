use chrono::{DateTime, Utc};
use rust_xlsxwriter::Workbook;

use crate::{
    error::{Error, Result},
    util::{format_local_date, iso_date},
};

use super::{
    attendee::{AttendeeField, AttendeeRecord, ColumnSelection, FieldValue},
    Download,
};

pub const SHEET_NAME: &str = "Attendees";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
/// Longest text a worksheet cell can hold.
pub const MAX_CELL_CHARS: usize = 32_767;

/// One exported record: the selected fields, in selection order.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ExportRow(Vec<(AttendeeField, String)>);

impl ExportRow {
    pub fn keys(&self) -> impl Iterator<Item = AttendeeField> + '_ {
        self.0.iter().map(|(field, _)| *field)
    }

    pub fn get(&self, field: AttendeeField) -> Option<&str> {
        self.0
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, value)| value.as_str())
    }
}

/// Project records onto the selected fields.
///
/// Registration dates are rendered as local dates with `date_format`; every
/// other field is copied verbatim.
pub fn project_rows<'a>(
    records: impl IntoIterator<Item = &'a AttendeeRecord>,
    selection: &ColumnSelection,
    date_format: &str,
) -> Vec<ExportRow> {
    records
        .into_iter()
        .map(|record| {
            ExportRow(
                selection
                    .fields()
                    .iter()
                    .map(|field| {
                        let value = match record.field(*field) {
                            FieldValue::Text(text) => text.to_owned(),
                            FieldValue::Date(date) => format_local_date(date, date_format),
                        };
                        (*field, value)
                    })
                    .collect(),
            )
        })
        .collect()
}

/// Clip text to what a worksheet cell can hold. Profile picture data URIs are
/// routinely longer than that.
fn cell_text(value: &str) -> &str {
    match value.char_indices().nth(MAX_CELL_CHARS) {
        Some((end, _)) => {
            log::debug!("Clipping {} character cell", value.chars().count());
            &value[..end]
        }
        None => value,
    }
}

/// Write rows into a single-sheet workbook with a header row of field names.
///
/// With no selected fields the sheet stays empty.
pub fn write_workbook(selection: &ColumnSelection, rows: &[ExportRow]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    if !selection.is_empty() {
        for (col, field) in selection.fields().iter().enumerate() {
            worksheet.write_string(0, col as u16, field.name())?;
        }
        for (i, row) in rows.iter().enumerate() {
            for (col, value) in row.values().enumerate() {
                worksheet.write_string(i as u32 + 1, col as u16, cell_text(value))?;
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("tea-gathering-attendees-{}.xlsx", iso_date(now))
}

/// Build the attendee spreadsheet. Read-only: the store is never touched.
pub async fn generate_export(
    records: Vec<AttendeeRecord>,
    selection: ColumnSelection,
    date_format: String,
) -> Result<Download> {
    let count = records.len();
    let file_name = export_file_name(Utc::now());

    let bytes = tokio::task::spawn_blocking(move || {
        let rows = project_rows(&records, &selection, &date_format);
        write_workbook(&selection, &rows)
    })
    .await
    .map_err(|e| Error::artifact("spreadsheet", e))?;

    match bytes {
        Ok(bytes) => {
            log::info!("Exported {} attendees to {}", count, file_name);
            Ok(Download {
                file_name,
                content_type: XLSX_CONTENT_TYPE,
                bytes,
            })
        }
        Err(e) => {
            log::error!("Export failed: {}", e);
            Err(e)
        }
    }
}
