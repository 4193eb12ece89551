//! Revscrape: concurrent Google Maps review scraper
//!
//! Collects the full review history for a list of places, featuring:
//! - One isolated chromium session per place, driven over CDP
//! - Attribute-first selector resolution that survives class churn
//! - Scroll loop with idle, round-limit, cap and hard-timeout stops
//! - Proxy-bound worker pool with preflight probing and retry
//! - Append-only CSV sink with a fixed column contract

pub mod config;
pub mod dates;
pub mod input;
pub mod scraping;
pub mod types;

pub use config::Config;
pub use types::*;
