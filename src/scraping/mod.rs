//! Review scraping pipeline
//!
//! Layered per place: the scheduler fans places out over proxy-bound
//! workers, the retry controller drives repeated attempts, each attempt
//! runs one browser session through the place state machine, and the
//! extractor turns DOM snapshots into records for the CSV sink.

pub mod driver;
pub mod extract;
pub mod proxy;
pub mod retry;
pub mod scheduler;
pub mod selectors;
pub mod session;
pub mod sink;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Place, ReviewRecord};
use proxy::ProxyEndpoint;
use selectors::SemanticRole;

/// Failure of one scraping attempt for one place.
///
/// Every variant is treated as transient by the retry controller; permanent
/// failure is only declared after the attempt budget is spent.
#[derive(Debug, Error)]
pub enum PlaceError {
    #[error("navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out waiting for {operation}")]
    Timeout { operation: &'static str },

    #[error("required element role {0} never appeared")]
    MissingRole(SemanticRole),

    #[error("proxy endpoint unusable: {0}")]
    ProxyUnusable(String),

    #[error("browser session error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("page script returned unexpected payload: {0}")]
    Script(String),

    #[error("failed to launch browser: {0}")]
    Launch(String),
}

/// One full scraping attempt for one place.
///
/// The production implementation launches a browser session; tests drive
/// the retry controller and scheduler with synthetic implementations.
#[async_trait]
pub trait PlaceScraper: Send + Sync {
    async fn scrape_place(
        &self,
        place: &Place,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Vec<ReviewRecord>, PlaceError>;
}
