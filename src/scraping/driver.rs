//! Place session driver
//!
//! Runs one place through its whole flow: navigate, clear the consent
//! interstitial, force the reviews UI open, scroll until the list stops
//! growing, then hand the collected DOM snapshots to the extractor. One
//! driver run equals one attempt; the retry controller decides whether a
//! failed run gets another session.

use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::{Config, ScrapeConfig, SessionConfig};
use crate::types::{Place, ReviewRecord};

use super::extract::{self, PlaceContext, RawReviewNode};
use super::proxy::ProxyEndpoint;
use super::selectors::{self, SemanticRole};
use super::session::BrowserSession;
use super::{PlaceError, PlaceScraper};

/// Phases of one place run, logged as the run advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Navigating,
    ConsentCheck,
    AwaitingContent,
    Scrolling,
    Extracting,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why the scroll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No new review ids for the configured number of consecutive rounds.
    Idle,
    /// Absolute round ceiling reached.
    RoundLimit,
    /// Per-place review cap reached.
    Cap,
    /// Per-place wall-clock budget spent. Not an error: collected records
    /// are kept.
    HardTimeout,
}

/// Dedup and stop-condition bookkeeping for the scroll loop. Pure state,
/// fed one round of observed review ids at a time.
#[derive(Debug, Default)]
pub struct ScrollState {
    seen: HashSet<String>,
    idle_rounds: u32,
    total_rounds: u32,
}

impl ScrollState {
    /// Record one completed scroll round. Returns how many ids were new.
    pub fn note_round<'a, I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.total_rounds += 1;
        let before = self.seen.len();
        for id in ids {
            self.seen.insert(id.to_string());
        }
        let new = self.seen.len() - before;
        if new == 0 {
            self.idle_rounds += 1;
        } else {
            self.idle_rounds = 0;
        }
        new
    }

    pub fn collected(&self) -> usize {
        self.seen.len()
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    /// Stop verdict after the most recent round, if any condition holds.
    /// The cap wins over idleness so a capped run is reported as capped.
    pub fn verdict(&self, cfg: &ScrapeConfig) -> Option<StopReason> {
        if cfg.max_reviews_per_place > 0 && self.seen.len() >= cfg.max_reviews_per_place {
            return Some(StopReason::Cap);
        }
        if self.idle_rounds >= cfg.scroll_idle_rounds {
            return Some(StopReason::Idle);
        }
        if self.total_rounds >= cfg.max_scroll_rounds {
            return Some(StopReason::RoundLimit);
        }
        None
    }
}

/// Production `PlaceScraper`: one fresh browser session per call.
pub struct SessionDriver {
    scrape: ScrapeConfig,
    session: SessionConfig,
}

impl SessionDriver {
    pub fn new(config: &Config) -> Self {
        Self {
            scrape: config.scrape.clone(),
            session: config.session.clone(),
        }
    }

    async fn run_place(
        &self,
        session: &BrowserSession,
        place: &Place,
    ) -> Result<Vec<ReviewRecord>, PlaceError> {
        let page = session.page();
        let started = Instant::now();
        let hard_deadline = self.scrape.place_hard_timeout();

        debug!(place = %place.name, phase = %Phase::Navigating, "place run");
        // The id URL is tried first; the explicit input URL is only a
        // fallback when id navigation fails.
        let mut nav_err = None;
        let mut navigated = false;
        for url in place.nav_targets(&self.scrape.review_language) {
            match timeout(self.session.nav_timeout(), page.goto(url.clone())).await {
                Ok(Ok(_)) => {
                    navigated = true;
                    break;
                }
                Ok(Err(e)) => {
                    debug!(place = %place.name, url = %url, error = %e, "navigation failed");
                    nav_err = Some(PlaceError::Navigation {
                        url,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    debug!(place = %place.name, url = %url, "navigation timed out");
                    nav_err = Some(PlaceError::Timeout {
                        operation: "navigation",
                    });
                }
            }
        }
        if !navigated {
            return Err(nav_err.unwrap_or(PlaceError::Timeout {
                operation: "navigation",
            }));
        }

        debug!(place = %place.name, phase = %Phase::ConsentCheck, "place run");
        self.dismiss_consent(session).await;

        debug!(place = %place.name, phase = %Phase::AwaitingContent, "place run");
        self.open_reviews_ui(session).await;
        if self.scrape.translate_switch {
            self.click_role(session, SemanticRole::TranslateToggle).await;
        }

        if selectors::resolve_first(page, SemanticRole::ReviewCard)
            .await
            .is_none()
        {
            self.await_role(session, SemanticRole::ReviewCard).await?;
        }
        self.sort_by_newest(session).await;

        debug!(place = %place.name, phase = %Phase::Scrolling, "place run");
        let mut state = ScrollState::default();
        let mut snapshots: Vec<RawReviewNode> = Vec::new();
        let mut snapshot_ids: HashSet<String> = HashSet::new();

        let stop = loop {
            self.expand_visible_cards(session).await;
            let round = self.collect_cards(session).await?;
            let round_keys: Vec<String> = round.iter().map(snapshot_key).collect();
            for (node, key) in round.into_iter().zip(&round_keys) {
                if snapshot_ids.insert(key.clone()) {
                    snapshots.push(node);
                }
            }
            let new = state.note_round(round_keys.iter().map(String::as_str));
            debug!(
                place = %place.name,
                round = state.total_rounds(),
                new,
                collected = state.collected(),
                "scroll round"
            );

            if let Some(reason) = state.verdict(&self.scrape) {
                break reason;
            }
            if started.elapsed() >= hard_deadline {
                break StopReason::HardTimeout;
            }

            self.scroll_reviews(session).await?;
            sleep(self.scrape.scroll_pause()).await;
        };
        info!(
            place = %place.name,
            cards = snapshots.len(),
            rounds = state.total_rounds(),
            stop = ?stop,
            "scroll loop finished"
        );

        debug!(place = %place.name, phase = %Phase::Extracting, "place run");
        let ui_name = self.read_place_title(session).await;
        let canonical_url = self.read_canonical_url(session).await;
        let payloads = session.captured_payloads().await;
        let ctx = PlaceContext {
            place,
            ui_name,
            canonical_url,
            language: &self.scrape.review_language,
            reference: Utc::now(),
            raw_blobs: &payloads,
        };

        let mut records = Vec::with_capacity(snapshots.len());
        let mut dropped = 0usize;
        for snapshot in &snapshots {
            match extract::extract(snapshot, &ctx) {
                Ok(record) => records.push(record),
                Err(e) => {
                    dropped += 1;
                    debug!(place = %place.name, error = %e, "dropping card");
                }
            }
        }
        if dropped > 0 {
            warn!(place = %place.name, dropped, "cards dropped during extraction");
        }
        if self.scrape.max_reviews_per_place > 0 {
            records.truncate(self.scrape.max_reviews_per_place);
        }

        debug!(place = %place.name, phase = %Phase::Done, records = records.len(), "place run");
        Ok(records)
    }

    /// Single-attempt consent dismissal; absence means no consent wall.
    async fn dismiss_consent(&self, session: &BrowserSession) {
        let page = session.page();
        for role in [
            SemanticRole::ConsentAcceptButton,
            SemanticRole::ConsentRejectButton,
        ] {
            if let Some(button) = selectors::resolve_first(page, role).await {
                if button.click().await.is_ok() {
                    debug!(role = %role, "consent dismissed");
                    sleep(self.scrape.scroll_pause()).await;
                    return;
                }
            }
        }
    }

    /// Force the reviews list open: the dedicated button when present, the
    /// reviews tab otherwise, and one re-click when the first click did
    /// not surface any cards.
    async fn open_reviews_ui(&self, session: &BrowserSession) {
        let page = session.page();
        for _ in 0..2 {
            if selectors::resolve_first(page, SemanticRole::ReviewCard)
                .await
                .is_some()
            {
                return;
            }
            let opened = self.click_role(session, SemanticRole::MoreButton).await
                || self.click_role(session, SemanticRole::ReviewsTab).await;
            if !opened {
                return;
            }
            sleep(self.scrape.scroll_pause()).await;
        }
    }

    /// Best-effort sort by newest via the sort menu.
    async fn sort_by_newest(&self, session: &BrowserSession) {
        if self.click_role(session, SemanticRole::SortButton).await {
            sleep(self.scrape.scroll_pause()).await;
            if self.click_role(session, SemanticRole::SortNewestItem).await {
                sleep(self.scrape.scroll_pause()).await;
            }
        }
    }

    /// Click the first match for a role; false when the role is absent or
    /// the click failed.
    async fn click_role(&self, session: &BrowserSession, role: SemanticRole) -> bool {
        match selectors::resolve_first(session.page(), role).await {
            Some(el) => el.click().await.is_ok(),
            None => false,
        }
    }

    /// Poll for an essential role until the operation timeout runs out.
    async fn await_role(
        &self,
        session: &BrowserSession,
        role: SemanticRole,
    ) -> Result<(), PlaceError> {
        let deadline = Instant::now() + self.session.op_timeout();
        loop {
            if selectors::resolve_first(session.page(), role).await.is_some() {
                return Ok(());
            }
            if session.is_closed() {
                return Err(PlaceError::Timeout {
                    operation: "browser transport",
                });
            }
            if Instant::now() >= deadline {
                return Err(PlaceError::MissingRole(role));
            }
            sleep(std::time::Duration::from_millis(250)).await;
        }
    }

    /// Click every collapsed "read more" expander currently in the DOM so
    /// the subsequent collection sees full review text.
    async fn expand_visible_cards(&self, session: &BrowserSession) {
        let script = format!(
            r#"(() => {{
                let clicked = 0;
                for (const sel of {expand}) {{
                    for (const el of document.querySelectorAll(sel)) {{
                        try {{ el.click(); clicked++; }} catch (_) {{}}
                    }}
                    if (clicked) break;
                }}
                return clicked;
            }})()"#,
            expand = SemanticRole::ExpandButton.candidates_json(),
        );
        if let Err(e) = session.page().evaluate(script).await {
            debug!(error = %e, "expand pass failed");
        }
    }

    /// Snapshot every review card currently in the DOM.
    async fn collect_cards(
        &self,
        session: &BrowserSession,
    ) -> Result<Vec<RawReviewNode>, PlaceError> {
        let script = format!(
            r#"(() => {{
                const pick = (root, sels) => {{
                    for (const s of sels) {{
                        const el = root.querySelector(s);
                        if (el) return el;
                    }}
                    return null;
                }};
                const text = (el) => el ? (el.textContent || '').trim() : null;
                let cards = [];
                for (const s of {cards}) {{
                    cards = Array.from(document.querySelectorAll(s));
                    if (cards.length) break;
                }}
                return cards.map(card => {{
                    const rating = pick(card, {rating});
                    const author_link = pick(card, {author_link});
                    const photos = [];
                    for (const s of {photos}) {{
                        for (const el of card.querySelectorAll(s)) {{
                            photos.push(
                                el.getAttribute('style')
                                || el.getAttribute('src')
                                || el.getAttribute('href')
                                || ''
                            );
                        }}
                        if (photos.length) break;
                    }}
                    return {{
                        review_id: card.getAttribute('data-review-id'),
                        rating_label: rating
                            ? (rating.getAttribute('aria-label') || text(rating))
                            : null,
                        date_text: text(pick(card, {date})),
                        author: text(pick(card, {author_name})),
                        author_url: author_link
                            ? (author_link.getAttribute('href')
                                || author_link.getAttribute('data-href'))
                            : null,
                        author_photo: (() => {{
                            const img = pick(card, {author_photo});
                            return img ? img.getAttribute('src') : null;
                        }})(),
                        badge_text: text(pick(card, {badge})),
                        text: text(pick(card, {body})),
                        photo_urls: photos,
                    }};
                }});
            }})()"#,
            cards = SemanticRole::ReviewCard.candidates_json(),
            rating = SemanticRole::StarRatingNode.candidates_json(),
            author_link = SemanticRole::AuthorLink.candidates_json(),
            author_name = SemanticRole::AuthorName.candidates_json(),
            author_photo = SemanticRole::AuthorPhoto.candidates_json(),
            date = SemanticRole::ReviewDate.candidates_json(),
            badge = SemanticRole::LocalGuideBadge.candidates_json(),
            body = SemanticRole::ReviewText.candidates_json(),
            photos = SemanticRole::PhotoThumb.candidates_json(),
        );

        let value = session.page().evaluate(script).await?;
        value
            .into_value::<Vec<RawReviewNode>>()
            .map_err(|e| PlaceError::Script(e.to_string()))
    }

    /// One scroll step on the reviews container, falling back to the
    /// window when no container resolves.
    async fn scroll_reviews(&self, session: &BrowserSession) -> Result<(), PlaceError> {
        let script = format!(
            r#"(() => {{
                for (const s of {container}) {{
                    const el = document.querySelector(s);
                    if (el) {{
                        el.scrollTop = el.scrollHeight;
                        return true;
                    }}
                }}
                window.scrollBy(0, window.innerHeight);
                return false;
            }})()"#,
            container = SemanticRole::ScrollContainer.candidates_json(),
        );
        session.page().evaluate(script).await?;
        Ok(())
    }

    /// UI heading of the place, falling back to the document title with
    /// its service suffix stripped.
    async fn read_place_title(&self, session: &BrowserSession) -> Option<String> {
        let page = session.page();
        if let Some(el) = selectors::resolve_first(page, SemanticRole::PlaceTitle).await {
            if let Ok(Some(t)) = el.inner_text().await {
                let t = t.trim().to_string();
                if !t.is_empty() {
                    return Some(t);
                }
            }
        }
        match page.get_title().await {
            Ok(Some(title)) => {
                let title = title
                    .trim_end_matches("- Google Maps")
                    .trim()
                    .to_string();
                (!title.is_empty()).then_some(title)
            }
            _ => None,
        }
    }

    /// Canonical share link of the place, used for the output URL column
    /// when the input row does not carry one.
    async fn read_canonical_url(&self, session: &BrowserSession) -> Option<String> {
        let el =
            selectors::resolve_first(session.page(), SemanticRole::PlaceCanonicalLink).await?;
        el.attribute("href").await.ok().flatten()
    }
}

/// Round key for dedup: the DOM id when present, otherwise the synthetic
/// id the extractor would assign.
fn snapshot_key(node: &RawReviewNode) -> String {
    match &node.review_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => extract::synthesize_review_id(node),
    }
}

#[async_trait]
impl PlaceScraper for SessionDriver {
    async fn scrape_place(
        &self,
        place: &Place,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Vec<ReviewRecord>, PlaceError> {
        let session = BrowserSession::launch(&self.session, proxy).await?;
        let result = self.run_place(&session, place).await;
        session.close().await;
        result
    }
}
