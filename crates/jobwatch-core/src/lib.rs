//! Core domain model for jobwatch: offers, identity derivation, extraction outcomes.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub mod dates;

pub const CRATE_NAME: &str = "jobwatch-core";

/// Origin tag written into every corpus row.
pub const SOURCE_TAG: &str = "pracuj.pl";

pub const SITE_ORIGIN: &str = "https://www.pracuj.pl";

/// Result of one extraction attempt for a single field.
///
/// `Empty` means the strategy ran and found nothing, `Failed` means it could
/// not run at all (fetch error, undecodable payload, bad selector). Callers
/// decide whether either is worth more than a debug log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<T> {
    Found(T),
    Empty,
    Failed(String),
}

impl<T> Extraction<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::Found(value),
            None => Self::Empty,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Extraction<U>) -> Extraction<U> {
        match self {
            Self::Found(value) => f(value),
            Self::Empty => Extraction::Empty,
            Self::Failed(reason) => Extraction::Failed(reason),
        }
    }

    /// Keep a found value, otherwise evaluate the next strategy.
    pub fn or_else(self, next: impl FnOnce() -> Extraction<T>) -> Extraction<T> {
        match self {
            Self::Found(value) => Self::Found(value),
            _ => next(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Deep pagination; forced when no corpus exists yet.
    Full,
    Incremental,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

/// Minimal offer produced by listing extraction, before enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferStub {
    pub identity: String,
    pub title: String,
    pub link: String,
    pub company_guess: Option<String>,
    pub location: Option<String>,
}

impl OfferStub {
    /// Build a stub from raw listing values; `None` when title or link is unusable.
    pub fn new(title: &str, raw_link: &str) -> Option<Self> {
        let title = collapse_whitespace(title);
        if title.is_empty() {
            return None;
        }
        let link = canonical_link(raw_link)?;
        Some(Self {
            identity: derive_identity(&link),
            title,
            link,
            company_guess: None,
            location: None,
        })
    }

    pub fn with_company_guess(mut self, company: Option<String>) -> Self {
        self.company_guess = company.map(|c| collapse_whitespace(&c)).filter(|c| !c.is_empty());
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location.map(|l| collapse_whitespace(&l)).filter(|l| !l.is_empty());
        self
    }
}

/// Corpus file header, in order.
pub const CORPUS_COLUMNS: [&str; 10] = [
    "identity",
    "title",
    "employer_name",
    "location",
    "link",
    "industry",
    "published_raw",
    "published_resolved",
    "first_seen",
    "source_tag",
];

/// Persisted offer. Field order is the corpus column order.
///
/// Aliases accept the column names of corpus files written before the
/// column set was fixed (`job_id`, `company`, `url`, `published`, `source`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    #[serde(alias = "job_id", default)]
    pub identity: String,
    pub title: String,
    #[serde(alias = "company", default)]
    pub employer_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(alias = "url")]
    pub link: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(alias = "published", default)]
    pub published_raw: Option<String>,
    #[serde(default)]
    pub published_resolved: Option<NaiveDate>,
    #[serde(with = "first_seen_format")]
    pub first_seen: DateTime<FixedOffset>,
    #[serde(alias = "source", default = "default_source_tag")]
    pub source_tag: String,
}

fn default_source_tag() -> String {
    SOURCE_TAG.to_string()
}

/// RFC 3339 on write; also reads the `%Y-%m-%d %H:%M:%S%z` stamps of older files.
mod first_seen_format {
    use chrono::{DateTime, FixedOffset};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<FixedOffset>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<FixedOffset>, D::Error> {
        let text = String::deserialize(deserializer)?;
        let text = text.trim();
        DateTime::parse_from_rfc3339(text)
            .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%z"))
            .map_err(|e| D::Error::custom(format!("invalid first_seen {text:?}: {e}")))
    }
}

impl Offer {
    /// Promote a stub; the listing company guess is the lowest-priority employer value.
    pub fn from_stub(stub: OfferStub, first_seen: DateTime<FixedOffset>) -> Self {
        Self {
            identity: stub.identity,
            title: stub.title,
            employer_name: stub.company_guess,
            location: stub.location,
            link: stub.link,
            industry: None,
            published_raw: None,
            published_resolved: None,
            first_seen,
            source_tag: SOURCE_TAG.to_string(),
        }
    }

    /// Title and link are both required for an offer to be kept.
    pub fn is_retainable(&self) -> bool {
        !self.title.trim().is_empty() && !self.link.trim().is_empty()
    }

    /// Re-derive a missing identity from the link (rows written by older runs).
    pub fn ensure_identity(&mut self) {
        if self.identity.trim().is_empty() {
            self.identity = derive_identity(&self.link);
        }
    }
}

/// All offers ever merged, one record per identity, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    offers: Vec<Offer>,
    index: HashMap<String, usize>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from stored rows; a repeated identity keeps the earliest row.
    pub fn from_offers(offers: impl IntoIterator<Item = Offer>) -> Self {
        let mut corpus = Self::new();
        for offer in offers {
            corpus.insert(offer);
        }
        corpus
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.index.contains_key(identity)
    }

    pub fn get(&self, identity: &str) -> Option<&Offer> {
        self.index.get(identity).map(|&i| &self.offers[i])
    }

    /// Returns `false` (and leaves the stored record untouched) for a known identity.
    pub fn insert(&mut self, mut offer: Offer) -> bool {
        offer.ensure_identity();
        if self.index.contains_key(&offer.identity) {
            return false;
        }
        self.index.insert(offer.identity.clone(), self.offers.len());
        self.offers.push(offer);
        true
    }

    pub fn offers(&self) -> &[Offer] {
        &self.offers
    }

    pub fn newest_first_seen(&self) -> Option<DateTime<FixedOffset>> {
        self.offers.iter().map(|o| o.first_seen).max()
    }
}

fn offer_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"oferta.*?(\d{7,})").expect("static regex"))
}

/// Absolute http(s) URL with query and fragment removed.
pub fn canonical_link(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let base = Url::parse(SITE_ORIGIN).ok()?;
    let mut url = base.join(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

/// Site-assigned numeric offer id embedded in a detail link.
pub fn numeric_offer_id(link: &str) -> Option<String> {
    offer_id_regex()
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// The one identity function used by extraction, merge and reporting alike.
pub fn derive_identity(link: &str) -> String {
    if let Some(id) = numeric_offer_id(link) {
        return id;
    }
    canonical_link(link).unwrap_or_else(|| link.trim().to_string())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 9, 14, 8, 30, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn identity_prefers_numeric_id() {
        let link = "https://www.pracuj.pl/praca/glowna-ksiegowa-warszawa,oferta,1004237651?s=abc";
        assert_eq!(derive_identity(link), "1004237651");
    }

    #[test]
    fn identity_falls_back_to_canonical_link() {
        let link = "/praca/chief-accountant-krakow,oferta,12345?sug=list#top";
        assert_eq!(
            derive_identity(link),
            "https://www.pracuj.pl/praca/chief-accountant-krakow,oferta,12345"
        );
    }

    #[test]
    fn canonical_link_rejects_non_http() {
        assert_eq!(canonical_link("mailto:hr@example.com"), None);
        assert_eq!(canonical_link("   "), None);
    }

    #[test]
    fn stub_requires_title_and_link() {
        assert!(OfferStub::new("  ", "/praca/x,oferta,1234567").is_none());
        assert!(OfferStub::new("Chief Accountant", "").is_none());

        let stub = OfferStub::new("  Chief   Accountant ", "/praca/x,oferta,1234567")
            .unwrap()
            .with_company_guess(Some("  ACME  sp. z o.o. ".to_string()))
            .with_location(Some("".to_string()));
        assert_eq!(stub.title, "Chief Accountant");
        assert_eq!(stub.identity, "1234567");
        assert_eq!(stub.company_guess.as_deref(), Some("ACME sp. z o.o."));
        assert_eq!(stub.location, None);
    }

    #[test]
    fn offer_from_stub_carries_guess_and_tag() {
        let stub = OfferStub::new("Główna księgowa", "/praca/a,oferta,7654321")
            .unwrap()
            .with_company_guess(Some("Biuro Rachunkowe".to_string()));
        let offer = Offer::from_stub(stub, ts());
        assert_eq!(offer.employer_name.as_deref(), Some("Biuro Rachunkowe"));
        assert_eq!(offer.source_tag, SOURCE_TAG);
        assert_eq!(offer.first_seen, ts());
        assert!(offer.is_retainable());
    }

    #[test]
    fn ensure_identity_rederives_blank_keys() {
        let stub = OfferStub::new("Chief Accountant", "/praca/a,oferta,7654321").unwrap();
        let mut offer = Offer::from_stub(stub, ts());
        offer.identity = String::new();
        offer.ensure_identity();
        assert_eq!(offer.identity, "7654321");
    }

    #[test]
    fn corpus_insert_keeps_first_record() {
        let stub = OfferStub::new("Chief Accountant", "/praca/a,oferta,7654321").unwrap();
        let first = Offer::from_stub(stub.clone(), ts());
        let mut later = Offer::from_stub(stub, ts() + chrono::Duration::days(3));
        later.title = "Chief Accountant (updated)".to_string();

        let mut corpus = Corpus::new();
        assert!(corpus.insert(first.clone()));
        assert!(!corpus.insert(later));
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.get("7654321"), Some(&first));
    }

    #[test]
    fn extraction_chain_takes_first_found() {
        let chained = Extraction::<String>::Failed("bad json".into())
            .or_else(|| Extraction::Empty)
            .or_else(|| Extraction::Found("ACME".to_string()))
            .or_else(|| Extraction::Found("ignored".to_string()));
        assert_eq!(chained.found().as_deref(), Some("ACME"));
    }
}
