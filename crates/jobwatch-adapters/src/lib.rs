//! Site adapter contract and the pracuj.pl implementation.

use jobwatch_core::{Extraction, OfferStub, SITE_ORIGIN, SOURCE_TAG};
use jobwatch_storage::PageSource;
use scraper::Selector;
use thiserror::Error;
use tracing::debug;

pub mod detail;
pub mod listing;

pub use detail::{
    DetailEnricher, DetailFields, DetailPage, DetailStrategy, DomSelectorStrategy,
    FieldEvidence, FreeTextStrategy, JsonLdStrategy,
};
pub use listing::{CardSelectorStrategy, ListingExtractor, ListingStrategy, OfferAnchorStrategy};

pub const CRATE_NAME: &str = "jobwatch-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector {0:?}")]
    Selector(String),
}

pub(crate) fn parse_selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|_| AdapterError::Selector(css.to_string()))
}

pub(crate) fn text_or_none(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Everything the pipeline needs to know about one job board.
pub trait SiteAdapter: Send + Sync {
    fn source_tag(&self) -> &'static str;

    /// Search results URL for `phrase`, page numbering starts at 1.
    fn search_url(&self, phrase: &str, page: u32) -> String;

    fn parse_listing(&self, html: &str) -> Vec<OfferStub>;

    fn parse_detail(&self, html: &str) -> Extraction<DetailFields>;
}

pub struct PracujAdapter {
    listing: ListingExtractor,
    detail: DetailEnricher,
}

impl Default for PracujAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PracujAdapter {
    pub fn new() -> Self {
        let listing = ListingExtractor::new(vec![
            Box::new(CardSelectorStrategy {
                card: "[data-test='default-offer'], [data-test='positioned-offer']",
                title_link: "a[data-test='link-offer'], [data-test='offer-title'] a",
                company: "[data-test='text-company-name']",
                location: "[data-test='text-region']",
            }),
            Box::new(OfferAnchorStrategy {
                anchor: "a[href*='/praca/'][href*='oferta']",
            }),
        ]);
        let detail = DetailEnricher::new(vec![
            Box::new(JsonLdStrategy),
            Box::new(DomSelectorStrategy {
                employer_name: Some(
                    "[data-test='text-employerName'], [data-scroll-id='employer-name']",
                ),
                industry: Some("[data-test='text-industry'], [data-test='sections-benefit-industry']"),
                published: Some("[data-test='text-published']"),
                expires: Some(
                    "[data-test='sections-benefit-expiration'] [data-test='offer-badge-description']",
                ),
            }),
            Box::new(FreeTextStrategy),
        ]);
        Self { listing, detail }
    }
}

impl SiteAdapter for PracujAdapter {
    fn source_tag(&self) -> &'static str {
        SOURCE_TAG
    }

    fn search_url(&self, phrase: &str, page: u32) -> String {
        let keyword = urlencoding::encode(phrase.trim());
        let base = format!("{SITE_ORIGIN}/praca/{keyword}%3Bkw");
        if page > 1 {
            format!("{base}?pn={page}")
        } else {
            base
        }
    }

    fn parse_listing(&self, html: &str) -> Vec<OfferStub> {
        self.listing.extract(html)
    }

    fn parse_detail(&self, html: &str) -> Extraction<DetailFields> {
        self.detail.extract(html)
    }
}

/// Which stubs of a harvest get a detail page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPolicy {
    Every,
    /// Positions 0, n, 2n, ... of the harvest.
    EveryNth(usize),
}

impl SamplingPolicy {
    pub fn should_enrich(&self, index: usize) -> bool {
        match self {
            Self::Every => true,
            Self::EveryNth(0) | Self::EveryNth(1) => true,
            Self::EveryNth(n) => index % n == 0,
        }
    }
}

/// Fetch and parse one detail page. Fetch problems come back as `Failed`,
/// never as an error, so one broken page cannot abort a run.
pub async fn enrich_offer(
    adapter: &dyn SiteAdapter,
    source: &dyn PageSource,
    stub: &OfferStub,
) -> Extraction<DetailFields> {
    match source.fetch_text(&stub.link).await {
        Ok(html) => {
            let outcome = adapter.parse_detail(&html);
            if !outcome.is_found() {
                debug!(identity = %stub.identity, "detail page yielded no fields");
            }
            outcome
        }
        Err(e) => {
            debug!(identity = %stub.identity, error = %e, "detail fetch failed");
            Extraction::Failed(e.to_string())
        }
    }
}
