//! Review record extractor
//!
//! Turns one raw DOM snapshot of a review card into a normalized
//! `ReviewRecord`. The driver collects snapshots in the page with one
//! evaluated script; everything here is pure and runs without a browser,
//! which is also how it is tested.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

use crate::dates;
use crate::types::{Place, ReviewRecord};

/// Raw field values pulled from one review card, exactly as the DOM
/// served them. Every field is optional; policy about what is mandatory
/// lives in `extract`, not in the collection script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawReviewNode {
    pub review_id: Option<String>,
    /// Accessible label of the star-rating node ("4 stars", "Rated 4.0 out of 5").
    pub rating_label: Option<String>,
    pub date_text: Option<String>,
    pub author: Option<String>,
    pub author_url: Option<String>,
    pub author_photo: Option<String>,
    /// Reviewer subtitle line; carries the local-guide marker when present.
    pub badge_text: Option<String>,
    pub text: Option<String>,
    /// Raw `src`/`style` values of photo thumbnails.
    pub photo_urls: Vec<String>,
}

/// Context shared by every card of one place.
pub struct PlaceContext<'a> {
    pub place: &'a Place,
    pub ui_name: Option<String>,
    /// Canonical share link read from the page; fills the place URL
    /// column when the input row does not carry one.
    pub canonical_url: Option<String>,
    pub language: &'a str,
    pub reference: DateTime<Utc>,
    /// Structured review payloads captured from the page's own network
    /// traffic, matched back to cards by review id.
    pub raw_blobs: &'a [String],
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("review card has no parsable rating (label: {0:?})")]
    MissingRating(Option<String>),
}

/// Normalize one card snapshot. A card without a parsable 1..=5 rating is
/// rejected; the caller counts rejects and keeps going.
pub fn extract(raw: &RawReviewNode, ctx: &PlaceContext<'_>) -> Result<ReviewRecord, ExtractError> {
    let rating = raw
        .rating_label
        .as_deref()
        .and_then(parse_rating)
        .ok_or_else(|| ExtractError::MissingRating(raw.rating_label.clone()))?;

    let review_id = match &raw.review_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => synthesize_review_id(raw),
    };

    let date = raw
        .date_text
        .as_deref()
        .and_then(|t| dates::normalize(t, ctx.language, ctx.reference).ok());

    let raw_json = find_raw_payload(&review_id, ctx.raw_blobs);

    Ok(ReviewRecord {
        beach_id: ctx.place.beach_id.clone(),
        place: ctx.place.name.clone(),
        category: ctx.place.category.clone(),
        categories: ctx.place.categories.clone(),
        place_ui_name: ctx.ui_name.clone(),
        place_url: ctx
            .place
            .place_url
            .clone()
            .or_else(|| ctx.canonical_url.clone()),
        input_url: ctx.place.id_url(),
        review_id,
        review_url: None,
        rating,
        date,
        author: clean_opt(&raw.author),
        author_url: raw.author_url.as_deref().map(absolutize_url),
        author_photo_url: clean_opt(&raw.author_photo),
        is_local_guide: raw
            .badge_text
            .as_deref()
            .map(is_local_guide_badge)
            .unwrap_or(false),
        text: clean_opt(&raw.text),
        photo_urls: normalize_photo_urls(&raw.photo_urls),
        raw_json,
    })
}

fn clean_opt(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// First number in the rating label, accepted when it lands in 1..=5.
pub fn parse_rating(label: &str) -> Option<u8> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(\d+(?:[.,]\d+)?)").unwrap());
    let m = re.captures(label)?;
    let value: f64 = m[1].replace(',', ".").parse().ok()?;
    let rounded = value.round();
    if (1.0..=5.0).contains(&rounded) {
        Some(rounded as u8)
    } else {
        None
    }
}

fn is_local_guide_badge(badge: &str) -> bool {
    let lower = badge.to_lowercase();
    lower.contains("local guide") || lower.contains("местный эксперт")
}

/// Links served relative to the page origin are made absolute.
fn absolutize_url(href: &str) -> String {
    let href = href.trim();
    if href.starts_with('/') {
        format!("https://www.google.com{}", href)
    } else {
        href.to_string()
    }
}

/// Extract content-photo URLs from raw `src`/`style` values and pin them
/// to the original-size variant. Order is preserved, duplicates dropped.
pub fn normalize_photo_urls(raw: &[String]) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"https://lh\d\.googleusercontent\.com/p/[A-Za-z0-9_\-]+").unwrap()
    });

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in raw {
        for m in re.find_iter(value) {
            let url = format!("{}=s0", m.as_str());
            if seen.insert(url.clone()) {
                out.push(url);
            }
        }
    }
    out
}

/// Stable synthetic id for cards whose id attribute is missing: a v5 UUID
/// over the fields that identify a review to a human. Re-running the same
/// place yields the same id for the same review.
pub fn synthesize_review_id(raw: &RawReviewNode) -> String {
    let text_prefix: String = raw
        .text
        .as_deref()
        .unwrap_or("")
        .chars()
        .take(80)
        .collect();
    let key = format!(
        "{}|{}|{}|{}",
        raw.author.as_deref().unwrap_or(""),
        raw.rating_label.as_deref().unwrap_or(""),
        raw.date_text.as_deref().unwrap_or(""),
        text_prefix,
    );
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// Find the smallest JSON subtree in the captured payloads that mentions
/// `review_id`. Keeping the subtree instead of the whole response keeps
/// row sizes sane while preserving the served structure verbatim.
pub fn find_raw_payload(review_id: &str, blobs: &[String]) -> Option<String> {
    for blob in blobs {
        // Responses are served with an anti-hijacking prefix before the
        // JSON body.
        let body = blob.trim_start_matches(")]}'").trim_start();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
            continue;
        };
        if let Some(subtree) = smallest_subtree_containing(&value, review_id) {
            return serde_json::to_string(subtree).ok();
        }
    }
    None
}

fn smallest_subtree_containing<'v>(
    value: &'v serde_json::Value,
    needle: &str,
) -> Option<&'v serde_json::Value> {
    if !contains_needle(value, needle) {
        return None;
    }
    let children: Vec<&serde_json::Value> = match value {
        serde_json::Value::Array(items) => items.iter().collect(),
        serde_json::Value::Object(map) => map.values().collect(),
        _ => return Some(value),
    };
    let mut holders = children
        .into_iter()
        .filter(|c| contains_needle(c, needle));
    match (holders.next(), holders.next()) {
        // Exactly one container child holds the id: descend. A scalar
        // holder means this node is already the smallest container.
        (Some(only), None) if only.is_array() || only.is_object() => {
            smallest_subtree_containing(only, needle)
        }
        _ => Some(value),
    }
}

fn contains_needle(value: &serde_json::Value, needle: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s.contains(needle),
        serde_json::Value::Array(items) => items.iter().any(|v| contains_needle(v, needle)),
        serde_json::Value::Object(map) => map.values().any(|v| contains_needle(v, needle)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn place() -> Place {
        Place {
            place_id: "ChIJx123".to_string(),
            name: "Sunny Cove".to_string(),
            beach_id: Some("b1".to_string()),
            category: Some("Beach".to_string()),
            categories: vec!["Beach".to_string()],
            place_url: None,
        }
    }

    fn ctx<'a>(place: &'a Place, blobs: &'a [String]) -> PlaceContext<'a> {
        PlaceContext {
            place,
            ui_name: Some("Sunny Cove Beach".to_string()),
            canonical_url: None,
            language: "en",
            reference: Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap(),
            raw_blobs: blobs,
        }
    }

    fn raw() -> RawReviewNode {
        RawReviewNode {
            review_id: Some("rid-001".to_string()),
            rating_label: Some("4 stars".to_string()),
            date_text: Some("2 days ago".to_string()),
            author: Some("  Sam  ".to_string()),
            author_url: Some("/maps/contrib/1234".to_string()),
            author_photo: Some("https://lh3.googleusercontent.com/a/avatar".to_string()),
            badge_text: Some("Local Guide · 120 reviews".to_string()),
            text: Some("Lovely sand".to_string()),
            photo_urls: vec![
                "https://lh3.googleusercontent.com/p/AF1Qip_abc=w100-h100-p".to_string(),
            ],
        }
    }

    #[test]
    fn extracts_a_complete_card() {
        let place = place();
        let record = extract(&raw(), &ctx(&place, &[])).unwrap();
        assert_eq!(record.review_id, "rid-001");
        assert_eq!(record.rating, 4);
        assert_eq!(record.author.as_deref(), Some("Sam"));
        assert_eq!(
            record.author_url.as_deref(),
            Some("https://www.google.com/maps/contrib/1234")
        );
        assert!(record.is_local_guide);
        assert_eq!(
            record.date.unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 13, 12, 0, 0).unwrap()
        );
        assert_eq!(
            record.photo_urls,
            vec!["https://lh3.googleusercontent.com/p/AF1Qip_abc=s0"]
        );
        assert_eq!(record.place_ui_name.as_deref(), Some("Sunny Cove Beach"));
        assert_eq!(record.input_url, place.id_url());
    }

    #[test]
    fn card_without_rating_is_rejected() {
        let place = place();
        let mut r = raw();
        r.rating_label = None;
        assert!(matches!(
            extract(&r, &ctx(&place, &[])),
            Err(ExtractError::MissingRating(None))
        ));
        r.rating_label = Some("no stars here".to_string());
        assert!(extract(&r, &ctx(&place, &[])).is_err());
    }

    #[test]
    fn rating_label_variants_parse() {
        assert_eq!(parse_rating("5 stars"), Some(5));
        assert_eq!(parse_rating("Rated 4.0 out of 5"), Some(4));
        assert_eq!(parse_rating("3,5"), Some(4));
        assert_eq!(parse_rating("1 star"), Some(1));
        assert_eq!(parse_rating("0 stars"), None);
        assert_eq!(parse_rating("stars"), None);
    }

    #[test]
    fn unparseable_date_becomes_null_not_error() {
        let place = place();
        let mut r = raw();
        r.date_text = Some("around the solstice".to_string());
        let record = extract(&r, &ctx(&place, &[])).unwrap();
        assert!(record.date.is_none());
    }

    #[test]
    fn missing_optionals_stay_empty() {
        let place = place();
        let r = RawReviewNode {
            review_id: Some("rid-002".to_string()),
            rating_label: Some("5 stars".to_string()),
            ..RawReviewNode::default()
        };
        let record = extract(&r, &ctx(&place, &[])).unwrap();
        assert!(record.author.is_none());
        assert!(record.author_photo_url.is_none());
        assert!(record.text.is_none());
        assert!(!record.is_local_guide);
        assert!(record.photo_urls.is_empty());
    }

    #[test]
    fn canonical_url_fills_missing_place_url() {
        let place = place();
        let mut c = ctx(&place, &[]);
        c.canonical_url = Some("https://maps.google.com/?cid=42".to_string());
        let record = extract(&raw(), &c).unwrap();
        assert_eq!(
            record.place_url.as_deref(),
            Some("https://maps.google.com/?cid=42")
        );
    }

    #[test]
    fn input_place_url_wins_over_canonical() {
        let mut place = place();
        place.place_url = Some("https://maps.example.test/in".to_string());
        let mut c = ctx(&place, &[]);
        c.canonical_url = Some("https://maps.google.com/?cid=42".to_string());
        let record = extract(&raw(), &c).unwrap();
        assert_eq!(record.place_url.as_deref(), Some("https://maps.example.test/in"));
    }

    #[test]
    fn synthesized_id_is_stable_and_distinct() {
        let mut a = raw();
        a.review_id = None;
        let mut b = a.clone();
        let place = place();
        let id1 = extract(&a, &ctx(&place, &[])).unwrap().review_id;
        let id2 = extract(&a, &ctx(&place, &[])).unwrap().review_id;
        assert_eq!(id1, id2);

        b.author = Some("Alex".to_string());
        let id3 = extract(&b, &ctx(&place, &[])).unwrap().review_id;
        assert_ne!(id1, id3);
    }

    #[test]
    fn photo_urls_dedupe_and_pin_size() {
        let urls = normalize_photo_urls(&[
            "background-image: url(\"https://lh3.googleusercontent.com/p/tok_A=w300\")".to_string(),
            "https://lh3.googleusercontent.com/p/tok_A=w100-h100".to_string(),
            "https://lh5.googleusercontent.com/p/tok_B".to_string(),
            "https://unrelated.example/img.png".to_string(),
        ]);
        assert_eq!(
            urls,
            vec![
                "https://lh3.googleusercontent.com/p/tok_A=s0",
                "https://lh5.googleusercontent.com/p/tok_B=s0",
            ]
        );
    }

    #[test]
    fn raw_payload_is_smallest_subtree() {
        let blob = r#")]}'
        [["header"],[["rid-001","text one",["extra"]],["rid-777","text two"]]]"#;
        let found = find_raw_payload("rid-777", &[blob.to_string()]).unwrap();
        assert_eq!(found, r#"["rid-777","text two"]"#);
        assert!(find_raw_payload("rid-404", &[blob.to_string()]).is_none());
    }

    #[test]
    fn unparseable_blob_is_skipped() {
        let blobs = vec!["not json at all".to_string(), r#"["rid-9"]"#.to_string()];
        assert_eq!(find_raw_payload("rid-9", &blobs).unwrap(), r#"["rid-9"]"#);
    }
}
