//! Selector resolver
//!
//! The target front end ships obfuscated, frequently-reshuffled markup, so
//! no single CSS lookup stays valid for long. Every element the pipeline
//! touches is named by a semantic role, and each role maps to an ordered
//! list of independent locator strategies tried in sequence at call time.
//! Markup drift is absorbed by editing one table here instead of chasing
//! selectors through the extraction logic.

use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use std::fmt;
use tracing::debug;

/// Semantic element roles the pipeline needs to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticRole {
    /// One review card in the reviews list.
    ReviewCard,
    /// The scrollable element containing the reviews list.
    ScrollContainer,
    /// The "all reviews" affordance that opens the reviews UI.
    MoreButton,
    /// The reviews tab on the place page.
    ReviewsTab,
    /// Consent-interstitial accept button.
    ConsentAcceptButton,
    /// Consent-interstitial reject button, tried when accept is absent.
    ConsentRejectButton,
    /// Star-rating node carrying the numeric rating in its label.
    StarRatingNode,
    /// Reviewer display name.
    AuthorName,
    /// Link to the reviewer's profile.
    AuthorLink,
    /// Reviewer avatar image.
    AuthorPhoto,
    /// Review body text.
    ReviewText,
    /// Relative date label of a review.
    ReviewDate,
    /// "Read more" expander inside a card.
    ExpandButton,
    /// Reviewer subtitle line that carries the local-guide marker.
    LocalGuideBadge,
    /// Photo thumbnails attached to a review.
    PhotoThumb,
    /// Translate-reviews toggle.
    TranslateToggle,
    /// Sort-order button for the reviews list.
    SortButton,
    /// "Newest" entry in the sort menu.
    SortNewestItem,
    /// Place heading shown in the UI.
    PlaceTitle,
    /// Canonical share link of the place.
    PlaceCanonicalLink,
}

impl SemanticRole {
    /// Roles without which a reviews-capable page cannot be processed.
    /// Their absence after full load is a place-level failure; every other
    /// role degrades to "feature currently unavailable".
    pub fn is_essential(self) -> bool {
        matches!(self, Self::ReviewCard)
    }

    /// Ordered locator strategies for this role. Attribute-based lookups
    /// come first, class-based ones (most drift-prone) last.
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            Self::ReviewCard => &["div[data-review-id]", "div.jftiEf"],
            Self::ScrollContainer => &[
                "div[role='dialog'] div.m6QErb.DxyBCb",
                "div.m6QErb[tabindex='-1']",
                "div[role='main'] div[tabindex='-1']",
            ],
            Self::MoreButton => &[
                "button[jsaction*='pane.review.moreReviews']",
                "button[jsaction*='moreReviews']",
                "button[aria-label*='More reviews']",
            ],
            Self::ReviewsTab => &[
                "button[role='tab'][aria-label*='Review']",
                "button[role='tab'][data-tab-index='1']",
            ],
            Self::ConsentAcceptButton => &[
                "button#L2AGLb",
                "button[aria-label*='Accept all']",
                "form[action*='consent.google'] button[type='submit']",
            ],
            Self::ConsentRejectButton => &["button#W0wltc", "button[aria-label*='Reject all']"],
            Self::StarRatingNode => &[
                "span[role='img'][aria-label*='star']",
                "span[aria-label*='out of 5']",
                "span.kvMYJc",
            ],
            Self::AuthorName => &["div.d4r55", "button[jsaction*='reviewerLink'] div"],
            Self::AuthorLink => &[
                "a[href*='/maps/contrib/']",
                "button[data-href*='/maps/contrib/']",
            ],
            Self::AuthorPhoto => &["img.NBa7we", "img[src*='googleusercontent.com']"],
            Self::ReviewText => &[
                "span.wiI7pd",
                "span[jsname='bN97Pc']",
                "div[data-review-text]",
            ],
            Self::ReviewDate => &["span.rsqaWe", "span.xRkPPb"],
            Self::ExpandButton => &[
                "button[jsname='gxjVle']",
                "button[jsname='fk8dgd']",
                "button[aria-expanded='false'][jsaction*='review']",
            ],
            Self::LocalGuideBadge => &["div.RfnDt", "button[jsaction*='reviewerLink'] span"],
            Self::PhotoThumb => &[
                "button[data-photo-index]",
                "button.Tya61d",
                "a[href*='lh3.googleusercontent.com']",
            ],
            Self::TranslateToggle => &[
                "button[aria-label*='Translate']",
                "button[jsname='nPaQu']",
            ],
            Self::SortButton => &[
                "button[aria-label*='Sort']",
                "button[data-value='Sort']",
            ],
            Self::SortNewestItem => &[
                "div[role='menuitemradio'][data-index='1']",
                "div[role='menuitem'][data-index='1']",
            ],
            Self::PlaceTitle => &[
                "h1.DUwDvf",
                "div.DUwDvf[role='heading']",
                "h1[aria-level='1']",
            ],
            Self::PlaceCanonicalLink => &["a[href^='https://maps.google.com/?cid=']"],
        }
    }

    /// Candidate list rendered as a JSON string array, for interpolation
    /// into collection scripts evaluated in the page.
    pub fn candidates_json(self) -> String {
        serde_json::to_string(self.candidates()).expect("static selector list serializes")
    }
}

impl fmt::Display for SemanticRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Try each strategy for `role` against the page and return all matches of
/// the first strategy that yields any. `None` means the role is currently
/// unavailable; callers decide whether that is fatal via `is_essential`.
pub async fn resolve_all(page: &Page, role: SemanticRole) -> Option<Vec<Element>> {
    for (i, css) in role.candidates().iter().enumerate() {
        match page.find_elements(*css).await {
            Ok(found) if !found.is_empty() => {
                debug!(role = %role, strategy = i, hits = found.len(), "selector resolved");
                return Some(found);
            }
            Ok(_) => {}
            // A failing strategy is the same as a non-matching one.
            Err(e) => debug!(role = %role, strategy = i, error = %e, "selector strategy failed"),
        }
    }
    None
}

/// First match for `role`, if any strategy resolves.
pub async fn resolve_first(page: &Page, role: SemanticRole) -> Option<Element> {
    resolve_all(page, role).await.and_then(|v| v.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ROLES: &[SemanticRole] = &[
        SemanticRole::ReviewCard,
        SemanticRole::ScrollContainer,
        SemanticRole::MoreButton,
        SemanticRole::ReviewsTab,
        SemanticRole::ConsentAcceptButton,
        SemanticRole::ConsentRejectButton,
        SemanticRole::StarRatingNode,
        SemanticRole::AuthorName,
        SemanticRole::AuthorLink,
        SemanticRole::AuthorPhoto,
        SemanticRole::ReviewText,
        SemanticRole::ReviewDate,
        SemanticRole::ExpandButton,
        SemanticRole::LocalGuideBadge,
        SemanticRole::PhotoThumb,
        SemanticRole::TranslateToggle,
        SemanticRole::SortButton,
        SemanticRole::SortNewestItem,
        SemanticRole::PlaceTitle,
        SemanticRole::PlaceCanonicalLink,
    ];

    #[test]
    fn every_role_has_at_least_one_strategy() {
        for role in ALL_ROLES {
            assert!(
                !role.candidates().is_empty(),
                "{} has no locator strategies",
                role
            );
        }
    }

    #[test]
    fn only_review_card_is_essential() {
        for role in ALL_ROLES {
            assert_eq!(
                role.is_essential(),
                matches!(role, SemanticRole::ReviewCard),
                "{}",
                role
            );
        }
    }

    #[test]
    fn candidates_json_is_a_json_array_of_strings() {
        for role in ALL_ROLES {
            let parsed: Vec<String> = serde_json::from_str(&role.candidates_json()).unwrap();
            assert_eq!(parsed.len(), role.candidates().len(), "{}", role);
        }
    }

    #[test]
    fn review_card_anchor_strategy_is_attribute_based() {
        // The data-review-id anchor is the stable id source for dedup; it
        // must be tried before any class-based fallback.
        assert_eq!(SemanticRole::ReviewCard.candidates()[0], "div[data-review-id]");
    }
}
