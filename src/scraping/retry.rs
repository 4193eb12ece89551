//! Retry controller
//!
//! Wraps one place's scraping in bounded re-attempts. Every attempt is a
//! fully fresh session (the scraper launches a new browser context per
//! call), so no DOM or network state survives a failed attempt. After the
//! budget is spent the last error becomes the place's permanent failure.

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::types::{Place, ReviewRecord};

use super::proxy::ProxyEndpoint;
use super::{PlaceError, PlaceScraper};

const BACKOFF_STEP: Duration = Duration::from_millis(700);
const BACKOFF_CAP: Duration = Duration::from_millis(2_500);
const JITTER_MAX_MS: u64 = 250;

/// Bounded re-attempt policy for one place.
#[derive(Debug, Clone)]
pub struct RetryController {
    /// Total attempts, inclusive of the first.
    max_attempts: u32,
}

impl RetryController {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before the attempt after `attempt` failed (1-based): a linear
    /// ramp capped at 2.5s.
    pub fn backoff(&self, attempt: u32) -> Duration {
        (BACKOFF_STEP * attempt).min(BACKOFF_CAP)
    }

    /// Drive the scraper until one attempt succeeds or the budget is
    /// spent. Returns the records of the successful attempt, or the last
    /// attempt's error.
    pub async fn run(
        &self,
        scraper: &dyn PlaceScraper,
        place: &Place,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Vec<ReviewRecord>, PlaceError> {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match scraper.scrape_place(place, proxy).await {
                Ok(records) => {
                    info!(
                        place = %place.name,
                        attempt,
                        records = records.len(),
                        "place completed"
                    );
                    return Ok(records);
                }
                Err(e) => {
                    warn!(
                        place = %place.name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < self.max_attempts {
                        let jitter =
                            Duration::from_millis(rand::thread_rng().gen_range(0..=JITTER_MAX_MS));
                        sleep(self.backoff(attempt) + jitter).await;
                    }
                }
            }
        }
        // max_attempts >= 1, so at least one attempt ran and set last_err.
        Err(last_err.unwrap_or(PlaceError::Timeout {
            operation: "retry budget",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyScraper {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl PlaceScraper for FlakyScraper {
        async fn scrape_place(
            &self,
            place: &Place,
            _proxy: Option<&ProxyEndpoint>,
        ) -> Result<Vec<ReviewRecord>, PlaceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Err(PlaceError::Timeout {
                    operation: "review cards",
                })
            } else {
                Ok(vec![record(&place.place_id, call)])
            }
        }
    }

    fn record(place_id: &str, attempt: u32) -> ReviewRecord {
        ReviewRecord {
            beach_id: None,
            place: place_id.to_string(),
            category: None,
            categories: vec![],
            place_ui_name: None,
            place_url: None,
            input_url: format!("https://maps.example.test/{}", place_id),
            review_id: format!("{}-a{}", place_id, attempt),
            review_url: None,
            rating: 5,
            date: None,
            author: None,
            author_url: None,
            author_photo_url: None,
            is_local_guide: false,
            text: None,
            photo_urls: vec![],
            raw_json: None,
        }
    }

    fn place() -> Place {
        Place {
            place_id: "p1".to_string(),
            name: "Sunny Cove".to_string(),
            beach_id: None,
            category: None,
            categories: vec![],
            place_url: None,
        }
    }

    #[test]
    fn backoff_ramps_linearly_and_caps() {
        let c = RetryController::new(5);
        assert_eq!(c.backoff(1), Duration::from_millis(700));
        assert_eq!(c.backoff(2), Duration::from_millis(1_400));
        assert_eq!(c.backoff(3), Duration::from_millis(2_100));
        assert_eq!(c.backoff(4), Duration::from_millis(2_500));
        assert_eq!(c.backoff(100), Duration::from_millis(2_500));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try_without_retrying() {
        let scraper = FlakyScraper {
            calls: AtomicU32::new(0),
            fail_first: 0,
        };
        let records = RetryController::new(3)
            .run(&scraper, &place(), None)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let scraper = FlakyScraper {
            calls: AtomicU32::new(0),
            fail_first: 2,
        };
        let records = RetryController::new(3)
            .run(&scraper, &place(), None)
            .await
            .unwrap();
        assert_eq!(records[0].review_id, "p1-a3");
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_last_error() {
        let scraper = FlakyScraper {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        };
        let err = RetryController::new(3)
            .run(&scraper, &place(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlaceError::Timeout { .. }));
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_is_clamped_to_one_attempt() {
        let scraper = FlakyScraper {
            calls: AtomicU32::new(0),
            fail_first: 0,
        };
        RetryController::new(0)
            .run(&scraper, &place(), None)
            .await
            .unwrap();
        assert_eq!(scraper.calls.load(Ordering::SeqCst), 1);
    }
}
