//! Per-phrase walk over search result pages.

use std::collections::HashSet;

use jobwatch_adapters::SiteAdapter;
use jobwatch_core::OfferStub;
use jobwatch_storage::{PageSource, Pacer};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    FetchFailed,
    EmptyPage,
    NoNewCandidates,
    DepthCap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseHarvest {
    pub phrase: String,
    /// Unique by identity, in first-seen page order.
    pub stubs: Vec<OfferStub>,
    pub pages_fetched: u32,
    pub stop: StopReason,
}

/// Case-insensitive substring match of the phrase against the title.
pub fn title_matches(title: &str, phrase: &str) -> bool {
    title.to_lowercase().contains(&phrase.trim().to_lowercase())
}

/// Walk pages 1..=`max_pages` for one phrase.
///
/// Stops on a failed fetch (keeping what was collected), on a page with no
/// candidates, or on a page after the first that adds no unseen identity;
/// the site repeats its last page once pages run out.
pub async fn collect_phrase(
    adapter: &dyn SiteAdapter,
    source: &dyn PageSource,
    pacer: &Pacer,
    phrase: &str,
    max_pages: u32,
) -> PhraseHarvest {
    let mut stubs = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut pages_fetched = 0;
    let mut stop = StopReason::DepthCap;

    for page in 1..=max_pages {
        let url = adapter.search_url(phrase, page);
        pacer.wait().await;
        let html = match source.fetch_text(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(phrase, page, error = %e, "listing fetch failed; ending phrase early");
                stop = StopReason::FetchFailed;
                break;
            }
        };
        pages_fetched = page;

        let candidates = adapter.parse_listing(&html);
        if candidates.is_empty() {
            debug!(phrase, page, "listing page has no candidates");
            stop = StopReason::EmptyPage;
            break;
        }

        let fresh: Vec<OfferStub> = candidates
            .into_iter()
            .filter(|stub| title_matches(&stub.title, phrase))
            .filter(|stub| !seen.contains(&stub.identity))
            .collect();
        if fresh.is_empty() && page > 1 {
            debug!(phrase, page, "listing page repeats earlier candidates");
            stop = StopReason::NoNewCandidates;
            break;
        }

        debug!(phrase, page, new = fresh.len(), "listing page collected");
        for stub in fresh {
            seen.insert(stub.identity.clone());
            stubs.push(stub);
        }
    }

    info!(
        phrase,
        pages = pages_fetched,
        stubs = stubs.len(),
        stop = ?stop,
        "phrase pagination finished"
    );
    PhraseHarvest {
        phrase: phrase.to_string(),
        stubs,
        pages_fetched,
        stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{listing_page, ScriptedSite};
    use jobwatch_adapters::PracujAdapter;
    use std::time::Duration;

    const PHRASE: &str = "Chief Accountant";

    fn url(page: u32) -> String {
        PracujAdapter::new().search_url(PHRASE, page)
    }

    #[tokio::test]
    async fn repeated_page_stops_after_page_two() {
        let page = listing_page(PHRASE, 1000001..1000011);
        let mut site = ScriptedSite::default();
        for p in 1..=20 {
            site.insert(url(p), page.clone());
        }

        let harvest = collect_phrase(
            &PracujAdapter::new(),
            &site,
            &Pacer::new(Duration::ZERO),
            PHRASE,
            20,
        )
        .await;

        assert_eq!(harvest.pages_fetched, 2);
        assert_eq!(harvest.stop, StopReason::NoNewCandidates);
        assert_eq!(harvest.stubs.len(), 10);
        assert_eq!(site.requests().await, vec![url(1), url(2)]);
    }

    #[tokio::test]
    async fn fetch_failure_keeps_collected_stubs() {
        let mut site = ScriptedSite::default();
        site.insert(url(1), listing_page(PHRASE, 1000001..1000006));

        let harvest = collect_phrase(
            &PracujAdapter::new(),
            &site,
            &Pacer::new(Duration::ZERO),
            PHRASE,
            20,
        )
        .await;

        assert_eq!(harvest.stop, StopReason::FetchFailed);
        assert_eq!(harvest.pages_fetched, 1);
        assert_eq!(harvest.stubs.len(), 5);
    }

    #[tokio::test]
    async fn depth_cap_bounds_the_walk() {
        let mut site = ScriptedSite::default();
        for p in 1..=5u32 {
            let start = 1000000 + p * 100;
            site.insert(url(p), listing_page(PHRASE, start..start + 3));
        }

        let harvest = collect_phrase(
            &PracujAdapter::new(),
            &site,
            &Pacer::new(Duration::ZERO),
            PHRASE,
            3,
        )
        .await;

        assert_eq!(harvest.stop, StopReason::DepthCap);
        assert_eq!(harvest.pages_fetched, 3);
        assert_eq!(harvest.stubs.len(), 9);
    }

    #[tokio::test]
    async fn titles_not_matching_phrase_are_dropped() {
        let mut site = ScriptedSite::default();
        let mut html = listing_page("chief ACCOUNTANT", 1000001..1000003);
        html.push_str(&listing_page("Junior Accountant", 1000010..1000012));
        site.insert(url(1), html);

        let harvest = collect_phrase(
            &PracujAdapter::new(),
            &site,
            &Pacer::new(Duration::ZERO),
            PHRASE,
            1,
        )
        .await;

        let ids: Vec<_> = harvest.stubs.iter().map(|s| s.identity.as_str()).collect();
        assert_eq!(ids, vec!["1000001", "1000002"]);
    }

    #[test]
    fn title_match_ignores_case() {
        assert!(title_matches("GŁÓWNA KSIĘGOWA / Chief Accountant", "główna księgowa"));
        assert!(!title_matches("Księgowa", "Główna księgowa"));
    }
}
