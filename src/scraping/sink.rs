//! CSV sink
//!
//! Append-only CSV writer shared by all workers. Rows from one place are
//! written as a single batch under a lock, so concurrent places never
//! interleave. The header row is written only when the destination is new
//! or empty, which makes resumed runs append cleanly.

use chrono::SecondsFormat;
use csv::WriterBuilder;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::types::ReviewRecord;

/// Output columns, in exact order.
pub const OUT_HEADER: [&str; 18] = [
    "Beach ID",
    "Place",
    "Category",
    "Categories",
    "Place (UI)",
    "Place URL",
    "Input URL",
    "Review ID",
    "Review URL",
    "Rating",
    "Date",
    "Author",
    "Author URL",
    "Author Photo",
    "Is Local Guide",
    "Text",
    "Photo URLs (list)",
    "RawReview",
];

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open output '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write output row: {0}")]
    Write(#[from] csv::Error),
    #[error("failed to flush output: {0}")]
    Flush(#[from] std::io::Error),
}

/// Serialized append-only review sink. Sink errors are fatal for the run;
/// continuing after a failed write would silently drop collected data.
pub struct ReviewSink {
    writer: Mutex<csv::Writer<File>>,
}

impl ReviewSink {
    /// Open (or create) the output file for appending. The header is
    /// written immediately if the file is new or empty.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let need_header = file
            .metadata()
            .map_err(|source| SinkError::Open {
                path: path.to_path_buf(),
                source,
            })?
            .len()
            == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if need_header {
            writer.write_record(OUT_HEADER)?;
            writer.flush()?;
            info!(path = %path.display(), "created output file");
        } else {
            info!(path = %path.display(), "appending to existing output file");
        }

        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    /// Write one place's records as an uninterrupted batch and flush.
    /// Returns the number of rows written.
    pub async fn write_batch(&self, records: &[ReviewRecord]) -> Result<usize, SinkError> {
        let mut writer = self.writer.lock().await;
        for record in records {
            writer.write_record(format_row(record))?;
        }
        writer.flush()?;
        Ok(records.len())
    }
}

/// Render one record as output cells, in `OUT_HEADER` order.
///
/// Absent optional fields become empty cells; list fields are JSON-encoded
/// so a cell stays a single value.
pub fn format_row(record: &ReviewRecord) -> Vec<String> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let json_list = |v: &Vec<String>| {
        serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
    };

    vec![
        opt(&record.beach_id),
        record.place.clone(),
        opt(&record.category),
        if record.categories.is_empty() {
            String::new()
        } else {
            json_list(&record.categories)
        },
        opt(&record.place_ui_name),
        opt(&record.place_url),
        record.input_url.clone(),
        record.review_id.clone(),
        opt(&record.review_url),
        record.rating.to_string(),
        record
            .date
            .map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, false))
            .unwrap_or_default(),
        opt(&record.author),
        opt(&record.author_url),
        opt(&record.author_photo_url),
        record.is_local_guide.to_string(),
        opt(&record.text),
        json_list(&record.photo_urls),
        opt(&record.raw_json),
    ]
}
