//! Listing page extraction: search result page body -> offer stubs.

use std::collections::HashMap;

use jobwatch_core::{Extraction, OfferStub};
use scraper::{ElementRef, Html};
use tracing::{debug, warn};

use crate::{parse_selector, text_or_none, AdapterError};

/// One way of locating offers on a listing page.
pub trait ListingStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, document: &Html) -> Extraction<Vec<OfferStub>>;
}

/// Offer cards with dedicated title/company/region elements.
#[derive(Debug, Clone, Copy)]
pub struct CardSelectorStrategy {
    pub card: &'static str,
    pub title_link: &'static str,
    pub company: &'static str,
    pub location: &'static str,
}

impl ListingStrategy for CardSelectorStrategy {
    fn name(&self) -> &'static str {
        "card-selector"
    }

    fn extract(&self, document: &Html) -> Extraction<Vec<OfferStub>> {
        match self.collect(document) {
            Ok(stubs) => Extraction::from_option(Some(stubs).filter(|s| !s.is_empty())),
            Err(e) => Extraction::Failed(e.to_string()),
        }
    }
}

impl CardSelectorStrategy {
    fn collect(&self, document: &Html) -> Result<Vec<OfferStub>, AdapterError> {
        let card_sel = parse_selector(self.card)?;
        let link_sel = parse_selector(self.title_link)?;
        let company_sel = parse_selector(self.company)?;
        let location_sel = parse_selector(self.location)?;

        let mut stubs = Vec::new();
        for card in document.select(&card_sel) {
            let Some(anchor) = card.select(&link_sel).next() else {
                continue;
            };
            let Some(stub) = stub_from_anchor(&anchor) else {
                continue;
            };
            let company = card.select(&company_sel).next().and_then(element_text);
            let location = card.select(&location_sel).next().and_then(element_text);
            stubs.push(stub.with_company_guess(company).with_location(location));
        }
        Ok(stubs)
    }
}

/// Any anchor whose href looks like an offer detail link.
#[derive(Debug, Clone, Copy)]
pub struct OfferAnchorStrategy {
    pub anchor: &'static str,
}

impl ListingStrategy for OfferAnchorStrategy {
    fn name(&self) -> &'static str {
        "offer-anchor"
    }

    fn extract(&self, document: &Html) -> Extraction<Vec<OfferStub>> {
        let sel = match parse_selector(self.anchor) {
            Ok(sel) => sel,
            Err(e) => return Extraction::Failed(e.to_string()),
        };
        let stubs: Vec<_> = document
            .select(&sel)
            .filter_map(|a| stub_from_anchor(&a))
            .collect();
        Extraction::from_option(Some(stubs).filter(|s| !s.is_empty()))
    }
}

fn element_text(el: ElementRef<'_>) -> Option<String> {
    text_or_none(el.text().collect::<Vec<_>>().join(" "))
}

fn stub_from_anchor(anchor: &ElementRef<'_>) -> Option<OfferStub> {
    let href = anchor.value().attr("href")?;
    let title = element_text(*anchor).or_else(|| {
        anchor
            .value()
            .attr("title")
            .and_then(|t| text_or_none(t.to_string()))
    })?;
    OfferStub::new(&title, href)
}

/// Runs every strategy in priority order and unions their stubs by identity.
///
/// The first strategy to produce an identity owns it; later duplicates only
/// fill in a missing company or location.
pub struct ListingExtractor {
    strategies: Vec<Box<dyn ListingStrategy>>,
}

impl ListingExtractor {
    pub fn new(strategies: Vec<Box<dyn ListingStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn extract(&self, html: &str) -> Vec<OfferStub> {
        let document = Html::parse_document(html);
        let mut merged: Vec<OfferStub> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for strategy in &self.strategies {
            let stubs = match strategy.extract(&document) {
                Extraction::Found(stubs) => stubs,
                Extraction::Empty => {
                    debug!(strategy = strategy.name(), "listing strategy found nothing");
                    continue;
                }
                Extraction::Failed(reason) => {
                    warn!(strategy = strategy.name(), %reason, "listing strategy failed");
                    continue;
                }
            };
            for stub in stubs {
                match index.get(&stub.identity) {
                    Some(&i) => {
                        let existing = &mut merged[i];
                        if existing.company_guess.is_none() {
                            existing.company_guess = stub.company_guess;
                        }
                        if existing.location.is_none() {
                            existing.location = stub.location;
                        }
                    }
                    None => {
                        index.insert(stub.identity.clone(), merged.len());
                        merged.push(stub);
                    }
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_strategy() -> CardSelectorStrategy {
        CardSelectorStrategy {
            card: "[data-test='default-offer']",
            title_link: "a[data-test='link-offer']",
            company: "[data-test='text-company-name']",
            location: "[data-test='text-region']",
        }
    }

    fn anchor_strategy() -> OfferAnchorStrategy {
        OfferAnchorStrategy {
            anchor: "a[href*='/praca/'][href*='oferta']",
        }
    }

    const CARDS: &str = r#"
        <html><body>
          <div data-test="default-offer">
            <a data-test="link-offer" href="/praca/glowna-ksiegowa-warszawa,oferta,1004000001?s=1">Główna księgowa</a>
            <h3 data-test="text-company-name">ACME sp. z o.o.</h3>
            <h4 data-test="text-region">Warszawa, mazowieckie</h4>
          </div>
          <div data-test="default-offer">
            <a data-test="link-offer" href="https://www.pracuj.pl/praca/chief-accountant,oferta,1004000002">Chief Accountant</a>
          </div>
          <div data-test="default-offer">
            <a data-test="link-offer" href="/praca/glowna-ksiegowa-warszawa,oferta,1004000001?s=2">Główna księgowa</a>
          </div>
          <div data-test="default-offer">
            <a data-test="link-offer" href="/praca/glowny-ksiegowy-gdansk,oferta">Główny księgowy</a>
          </div>
          <div data-test="default-offer"><span>no link in this card</span></div>
        </body></html>
    "#;

    #[test]
    fn card_strategy_reads_company_and_region() {
        let document = Html::parse_document(CARDS);
        let stubs = card_strategy().extract(&document).found().unwrap();
        assert_eq!(stubs.len(), 4);
        assert_eq!(stubs[0].identity, "1004000001");
        assert_eq!(stubs[0].company_guess.as_deref(), Some("ACME sp. z o.o."));
        assert_eq!(stubs[0].location.as_deref(), Some("Warszawa, mazowieckie"));
        assert_eq!(stubs[1].company_guess, None);
    }

    #[test]
    fn extractor_collapses_duplicates_and_keys_missing_ids_by_link() {
        let extractor = ListingExtractor::new(vec![
            Box::new(card_strategy()),
            Box::new(anchor_strategy()),
        ]);
        let stubs = extractor.extract(CARDS);
        let ids: Vec<_> = stubs.iter().map(|s| s.identity.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "1004000001",
                "1004000002",
                "https://www.pracuj.pl/praca/glowny-ksiegowy-gdansk,oferta",
            ]
        );
        assert_eq!(stubs[0].company_guess.as_deref(), Some("ACME sp. z o.o."));
    }

    #[test]
    fn anchor_strategy_covers_pages_without_cards() {
        let html = r#"
            <ul>
              <li><a href="/praca/chief-accountant-krakow,oferta,1004000003">Chief Accountant</a></li>
              <li><a href="/praca/chief-accountant-krakow,oferta,1004000003" title="Chief Accountant"><img alt=""></a></li>
              <li><a href="/pracodawcy">Dla firm</a></li>
            </ul>
        "#;
        let extractor = ListingExtractor::new(vec![
            Box::new(card_strategy()),
            Box::new(anchor_strategy()),
        ]);
        let stubs = extractor.extract(html);
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].title, "Chief Accountant");
    }

    #[test]
    fn invalid_selector_fails_without_panicking() {
        let strategy = OfferAnchorStrategy { anchor: "a[href" };
        let document = Html::parse_document("<a href='/praca/x,oferta,1234567'>x</a>");
        assert!(matches!(strategy.extract(&document), Extraction::Failed(_)));
    }

    #[test]
    fn empty_page_yields_no_stubs() {
        let extractor = ListingExtractor::new(vec![Box::new(anchor_strategy())]);
        assert!(extractor.extract("<html><body>Brak ofert</body></html>").is_empty());
    }
}
