//! Record export helpers shared by the CLI and API.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::models::Record;

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

/// Serializable record representation used in JSON and Markdown exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub local_version: i64,
    pub remote_version: i64,
    pub sync_state: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Convert a record into an export item.
#[must_use]
pub fn record_to_export_item(record: &Record) -> ExportRecord {
    ExportRecord {
        id: record.id.to_string(),
        kind: record.kind.as_str().to_string(),
        payload: record.payload.clone(),
        local_version: record.local_version,
        remote_version: record.remote_version,
        sync_state: record.sync_state.as_str().to_string(),
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

/// Render records as pretty-printed JSON.
pub fn render_json_export(records: &[Record]) -> serde_json::Result<String> {
    let items = records
        .iter()
        .map(record_to_export_item)
        .collect::<Vec<ExportRecord>>();
    serde_json::to_string_pretty(&items)
}

/// Render records in Markdown with frontmatter blocks.
#[must_use]
pub fn render_markdown_export(records: &[Record]) -> String {
    let mut output = String::new();

    for (index, record) in records.iter().enumerate() {
        if index > 0 {
            output.push('\n');
        }

        let item = record_to_export_item(record);
        let _ = writeln!(output, "---");
        let _ = writeln!(output, "id: {}", item.id);
        let _ = writeln!(output, "kind: {}", item.kind);
        let _ = writeln!(output, "created_at: {}", item.created_at);
        let _ = writeln!(output, "updated_at: {}", item.updated_at);
        let _ = writeln!(output, "sync_state: {}", item.sync_state);
        let _ = writeln!(output, "---");
        let _ = writeln!(output);
        let body = serde_json::to_string_pretty(&item.payload).unwrap_or_default();
        output.push_str(&body);
        output.push('\n');
    }

    output
}

/// Render records based on the selected export format.
pub fn render_records_export(
    records: &[Record],
    format: ExportFormat,
) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => render_json_export(records),
        ExportFormat::Markdown => Ok(render_markdown_export(records)),
    }
}

/// Build a deterministic default file name for export flows.
#[must_use]
pub fn suggested_export_file_name(format: ExportFormat, timestamp_ms: i64) -> String {
    format!("jotter-export-{timestamp_ms}.{}", format.extension())
}
