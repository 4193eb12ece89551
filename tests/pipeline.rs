//! End-to-end pipeline tests over a synthetic scraper.
//!
//! Drive the scheduler, retry controller and CSV sink together, with the
//! browser layer replaced by a scripted implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::watch;

use revscrape::scraping::proxy::{ProxyEndpoint, ProxyPool};
use revscrape::scraping::retry::RetryController;
use revscrape::scraping::scheduler::Scheduler;
use revscrape::scraping::sink::{ReviewSink, OUT_HEADER};
use revscrape::scraping::{PlaceError, PlaceScraper};
use revscrape::types::{Place, ReviewRecord};

/// Scripted scraper: each place fails a fixed number of times before
/// succeeding, or fails forever when scripted with `u32::MAX`.
struct ScriptedScraper {
    failures_before_success: HashMap<String, u32>,
    calls: HashMap<String, AtomicU32>,
}

impl ScriptedScraper {
    fn new(script: &[(&str, u32)]) -> Self {
        Self {
            failures_before_success: script
                .iter()
                .map(|(id, n)| (id.to_string(), *n))
                .collect(),
            calls: script
                .iter()
                .map(|(id, _)| (id.to_string(), AtomicU32::new(0)))
                .collect(),
        }
    }
}

#[async_trait]
impl PlaceScraper for ScriptedScraper {
    async fn scrape_place(
        &self,
        place: &Place,
        _proxy: Option<&ProxyEndpoint>,
    ) -> Result<Vec<ReviewRecord>, PlaceError> {
        let budget = self
            .failures_before_success
            .get(&place.place_id)
            .copied()
            .unwrap_or(0);
        let attempt = self.calls[&place.place_id].fetch_add(1, Ordering::SeqCst);
        if attempt < budget {
            return Err(PlaceError::Timeout {
                operation: "review cards",
            });
        }
        Ok(vec![record(place)])
    }
}

fn record(place: &Place) -> ReviewRecord {
    ReviewRecord {
        beach_id: place.beach_id.clone(),
        place: place.name.clone(),
        category: place.category.clone(),
        categories: place.categories.clone(),
        place_ui_name: Some(place.name.clone()),
        place_url: place.place_url.clone(),
        input_url: place.id_url(),
        review_id: format!("{}-r1", place.place_id),
        review_url: None,
        rating: 4,
        date: Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
        author: Some("Reviewer".to_string()),
        author_url: None,
        author_photo_url: None,
        is_local_guide: true,
        text: Some("solid spot".to_string()),
        photo_urls: vec![],
        raw_json: None,
    }
}

fn place(id: &str, name: &str) -> Place {
    Place {
        place_id: id.to_string(),
        name: name.to_string(),
        beach_id: None,
        category: None,
        categories: vec![],
        place_url: None,
    }
}

fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader
        .headers()
        .unwrap()
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}

#[tokio::test]
async fn transient_failures_recover_and_permanent_failures_stay_out_of_the_csv() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("reviews.csv");
    let sink = Arc::new(ReviewSink::open(&out).unwrap());

    // A succeeds immediately, B needs one retry, C never succeeds.
    let scraper = Arc::new(ScriptedScraper::new(&[
        ("pa", 0),
        ("pb", 1),
        ("pc", u32::MAX),
    ]));
    let scheduler = Scheduler::new(
        Arc::clone(&scraper) as Arc<dyn PlaceScraper>,
        sink,
        ProxyPool::default(),
        RetryController::new(2),
        2,
        false,
    );

    let (_tx, rx) = watch::channel(false);
    let summary = scheduler
        .run(
            vec![
                place("pa", "Alpha Beach"),
                place("pb", "Bravo Cove"),
                place("pc", "Charlie Pier"),
            ],
            rx,
        )
        .await
        .unwrap();

    assert_eq!(summary.places_total, 3);
    assert_eq!(summary.places_succeeded, 2);
    assert_eq!(summary.places_failed, 1);
    assert_eq!(summary.records_written, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, "Charlie Pier");

    // C used its whole attempt budget.
    assert_eq!(scraper.calls["pc"].load(Ordering::SeqCst), 2);

    let (header, rows) = read_rows(&out);
    assert_eq!(header, OUT_HEADER);
    let mut ids: Vec<&str> = rows.iter().map(|r| r[7].as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["pa-r1", "pb-r1"]);
}

#[tokio::test]
async fn header_is_written_once_across_consecutive_runs() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("reviews.csv");

    for batch in 0..2 {
        let sink = Arc::new(ReviewSink::open(&out).unwrap());
        let scraper = Arc::new(ScriptedScraper::new(&[("p0", 0), ("p1", 0)]));
        let scheduler = Scheduler::new(
            scraper,
            sink,
            ProxyPool::default(),
            RetryController::new(1),
            2,
            false,
        );
        let (_tx, rx) = watch::channel(false);
        let summary = scheduler
            .run(
                vec![
                    place("p0", &format!("Run {} First", batch)),
                    place("p1", &format!("Run {} Second", batch)),
                ],
                rx,
            )
            .await
            .unwrap();
        assert_eq!(summary.records_written, 2);
    }

    let content = std::fs::read_to_string(&out).unwrap();
    let header_lines = content
        .lines()
        .filter(|l| l.starts_with("Beach ID,"))
        .count();
    assert_eq!(header_lines, 1);

    let (_, rows) = read_rows(&out);
    assert_eq!(rows.len(), 4);
}

#[tokio::test]
async fn record_fields_survive_the_sink_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("reviews.csv");
    let sink = Arc::new(ReviewSink::open(&out).unwrap());

    let scraper = Arc::new(ScriptedScraper::new(&[("px", 0)]));
    let scheduler = Scheduler::new(
        scraper,
        sink,
        ProxyPool::default(),
        RetryController::new(1),
        1,
        false,
    );

    let mut p = place("px", "Fidelity Point");
    p.beach_id = Some("B-9".to_string());
    p.category = Some("Beach".to_string());
    p.categories = vec!["Beach".to_string(), "Park".to_string()];

    let (_tx, rx) = watch::channel(false);
    scheduler.run(vec![p], rx).await.unwrap();

    let (header, rows) = read_rows(&out);
    assert_eq!(header.len(), OUT_HEADER.len());
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row[0], "B-9");
    assert_eq!(row[1], "Fidelity Point");
    assert_eq!(row[2], "Beach");
    assert_eq!(row[3], r#"["Beach","Park"]"#);
    assert_eq!(row[7], "px-r1");
    // Review URL is never populated.
    assert_eq!(row[8], "");
    assert_eq!(row[9], "4");
    assert_eq!(row[10], "2024-06-01T12:00:00+00:00");
    assert_eq!(row[11], "Reviewer");
    // Absent optionals stay empty rather than turning into literals.
    assert_eq!(row[12], "");
    assert_eq!(row[13], "");
    assert_eq!(row[14], "true");
    assert_eq!(row[15], "solid spot");
    assert_eq!(row[16], "[]");
    assert_eq!(row[17], "");
}
