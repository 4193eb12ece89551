//! Scraping-loop and browser-session configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the per-place extraction loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// UI language requested via the `hl` parameter and used by the
    /// relative-date normalizer.
    pub review_language: String,
    /// Consecutive scroll rounds without new review ids before stopping.
    pub scroll_idle_rounds: u32,
    /// Pause after each scroll step (milliseconds).
    pub scroll_pause_ms: u64,
    /// Total attempts per place, inclusive of the first.
    pub max_retries_per_place: u32,
    /// Per-place review cap; 0 means unbounded.
    pub max_reviews_per_place: usize,
    /// Absolute ceiling on scroll rounds per place.
    pub max_scroll_rounds: u32,
    /// Attempt the translate-reviews UI toggle before extraction.
    pub translate_switch: bool,
    /// Overall wall-clock budget for one place (seconds). Exceeding it is a
    /// stop condition, not an error: records collected so far are kept.
    pub place_hard_timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            review_language: "en".to_string(),
            scroll_idle_rounds: 3,
            scroll_pause_ms: 1000,
            max_retries_per_place: 3,
            max_reviews_per_place: 0,
            max_scroll_rounds: 1800,
            translate_switch: false,
            place_hard_timeout_secs: 240,
        }
    }
}

impl ScrapeConfig {
    pub fn scroll_pause(&self) -> Duration {
        Duration::from_millis(self.scroll_pause_ms)
    }

    pub fn place_hard_timeout(&self) -> Duration {
        Duration::from_secs(self.place_hard_timeout_secs)
    }
}

/// Browser-session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run the browser without a visible window.
    pub headless: bool,
    /// Browser engine. Only `chromium` is supported; validated at startup.
    pub browser: String,
    /// Explicit chromium executable path; autodetected when absent.
    pub executable: Option<PathBuf>,
    /// Abort non-essential resource requests (media, fonts, ad hosts)
    /// before navigation.
    pub block_resources: bool,
    /// Navigation timeout (milliseconds).
    pub nav_timeout_ms: u64,
    /// Timeout for individual DOM waits and queries (milliseconds).
    pub op_timeout_ms: u64,
    /// Viewport for headed sessions.
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: false,
            browser: "chromium".to_string(),
            executable: None,
            block_resources: true,
            nav_timeout_ms: 45_000,
            op_timeout_ms: 45_000,
            viewport_width: 1360,
            viewport_height: 900,
        }
    }
}

impl SessionConfig {
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.nav_timeout_ms)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}
