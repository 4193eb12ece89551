//! Core types for the review-extraction pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Canonical place-page URL template keyed by place id.
pub const PLACE_ID_URL_PREFIX: &str = "https://www.google.com/maps/place/?q=place_id:";

/// One mapped location for which reviews are collected.
///
/// Immutable input unit: read once from the input list and never mutated.
/// `place_id` and `name` are required; everything else is optional
/// pass-through used to label output rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub place_id: String,
    pub name: String,
    #[serde(default)]
    pub beach_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub place_url: Option<String>,
}

impl Place {
    /// The place-id based URL used as the `InputURL` output column and as
    /// the primary navigation target.
    pub fn id_url(&self) -> String {
        format!("{}{}", PLACE_ID_URL_PREFIX, self.place_id)
    }

    /// Navigation targets in preference order: the id URL first, the
    /// explicit input URL as a fallback when id navigation fails, each
    /// with the review-language `hl` parameter appended.
    pub fn nav_targets(&self, language: &str) -> Vec<String> {
        let mut targets = vec![with_language(&self.id_url(), language)];
        if let Some(url) = &self.place_url {
            let url = with_language(url, language);
            if !targets.contains(&url) {
                targets.push(url);
            }
        }
        targets
    }
}

/// Append the `hl` parameter. Malformed URLs pass through unchanged;
/// navigation will surface the error.
fn with_language(url: &str, language: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair("hl", language);
            parsed.into()
        }
        Err(_) => url.to_string(),
    }
}

/// One normalized user review, immutable once constructed.
///
/// `review_id` is unique within a place's result set; the driver relies on
/// that for dedup across scroll rounds. `review_url` is an extension point
/// that is currently never populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub beach_id: Option<String>,
    pub place: String,
    pub category: Option<String>,
    pub categories: Vec<String>,
    pub place_ui_name: Option<String>,
    pub place_url: Option<String>,
    pub input_url: String,
    pub review_id: String,
    pub review_url: Option<String>,
    pub rating: u8,
    pub date: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub author_url: Option<String>,
    pub author_photo_url: Option<String>,
    pub is_local_guide: bool,
    pub text: Option<String>,
    pub photo_urls: Vec<String>,
    /// Verbatim structured payload the front end served for this review,
    /// kept for downstream debugging.
    pub raw_json: Option<String>,
}

/// Terminal outcome of one place after the retry controller is done with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// The place reached `Done`; `records` were flushed to the sink.
    Success { records: usize },
    /// All attempts failed; no records from the final attempt were kept.
    Failure { reason: String },
}

impl PlaceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Aggregate result of a whole run, reported by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub places_total: usize,
    pub places_succeeded: usize,
    pub places_failed: usize,
    pub records_written: usize,
    /// (place name, failure reason) for every permanent failure.
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    /// Fold one place's terminal outcome into the totals.
    pub fn record(&mut self, place_name: &str, outcome: PlaceOutcome) {
        match outcome {
            PlaceOutcome::Success { records } => {
                self.places_succeeded += 1;
                self.records_written += records;
            }
            PlaceOutcome::Failure { reason } => {
                self.places_failed += 1;
                self.failures.push((place_name.to_string(), reason));
            }
        }
    }
}
