//! Detail page enrichment: employer, industry and publication date candidates.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset};
use jobwatch_core::dates::{DateResolver, ResolvedDate};
use jobwatch_core::{collapse_whitespace, Extraction, Offer};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{parse_selector, text_or_none};

/// Parsed detail page shared by all strategies.
pub struct DetailPage {
    document: Html,
    json_ld: Vec<Result<JsonValue, String>>,
}

impl DetailPage {
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);
        let json_ld = match Selector::parse("script[type='application/ld+json']") {
            Ok(sel) => document
                .select(&sel)
                .map(|script| {
                    let text = script.text().collect::<String>();
                    serde_json::from_str::<JsonValue>(text.trim()).map_err(|e| e.to_string())
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        Self { document, json_ld }
    }

    fn body_text(&self) -> String {
        collapse_whitespace(&self.document.root_element().text().collect::<Vec<_>>().join(" "))
    }
}

/// One way of reading detail fields; strategies are consulted in priority order per field.
pub trait DetailStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn employer_name(&self, page: &DetailPage) -> Extraction<String>;
    fn industry(&self, page: &DetailPage) -> Extraction<String>;
    fn published(&self, page: &DetailPage) -> Extraction<String>;

    /// Offer expiry, used as a date only when no publication date resolves.
    fn expires(&self, _page: &DetailPage) -> Extraction<String> {
        Extraction::Empty
    }
}

/// schema.org `JobPosting` embedded as JSON-LD.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLdStrategy;

impl JsonLdStrategy {
    fn posting<'a>(&self, page: &'a DetailPage) -> Extraction<&'a JsonValue> {
        if let Some(posting) = page
            .json_ld
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .find_map(find_job_posting)
        {
            return Extraction::Found(posting);
        }
        match page.json_ld.iter().find_map(|r| r.as_ref().err()) {
            Some(err) => Extraction::Failed(format!("undecodable ld+json: {err}")),
            None => Extraction::Empty,
        }
    }
}

fn find_job_posting(value: &JsonValue) -> Option<&JsonValue> {
    match value {
        JsonValue::Array(items) => items.iter().find_map(find_job_posting),
        JsonValue::Object(map) => {
            let is_posting = match map.get("@type") {
                Some(JsonValue::String(t)) => t == "JobPosting",
                Some(JsonValue::Array(types)) => types.iter().any(|t| t == "JobPosting"),
                _ => false,
            };
            if is_posting {
                return Some(value);
            }
            map.get("@graph").and_then(find_job_posting)
        }
        _ => None,
    }
}

fn json_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s.clone()),
        JsonValue::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(json_text).collect();
            text_or_none(parts.join(", "))
        }
        _ => None,
    }
}

impl DetailStrategy for JsonLdStrategy {
    fn name(&self) -> &'static str {
        "json-ld"
    }

    fn employer_name(&self, page: &DetailPage) -> Extraction<String> {
        self.posting(page).and_then(|posting| {
            let org = posting.get("hiringOrganization");
            let name = org
                .and_then(|o| o.get("name"))
                .and_then(json_text)
                .or_else(|| org.and_then(json_text));
            Extraction::from_option(name)
        })
    }

    fn industry(&self, page: &DetailPage) -> Extraction<String> {
        self.posting(page)
            .and_then(|posting| Extraction::from_option(posting.get("industry").and_then(json_text)))
    }

    fn published(&self, page: &DetailPage) -> Extraction<String> {
        self.posting(page).and_then(|posting| {
            Extraction::from_option(posting.get("datePosted").and_then(json_text))
        })
    }
}

/// Site-specific CSS selectors, one selector group per field; `None` skips the field.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomSelectorStrategy {
    pub employer_name: Option<&'static str>,
    pub industry: Option<&'static str>,
    pub published: Option<&'static str>,
    pub expires: Option<&'static str>,
}

impl DomSelectorStrategy {
    fn first_text(&self, page: &DetailPage, selector: Option<&str>) -> Extraction<String> {
        let Some(selector) = selector else {
            return Extraction::Empty;
        };
        match parse_selector(selector) {
            Ok(sel) => Extraction::from_option(
                page.document
                    .select(&sel)
                    .find_map(|el| text_or_none(el.text().collect::<Vec<_>>().join(" ")))
                    .map(|t| collapse_whitespace(&t)),
            ),
            Err(e) => Extraction::Failed(e.to_string()),
        }
    }
}

impl DetailStrategy for DomSelectorStrategy {
    fn name(&self) -> &'static str {
        "dom-selector"
    }

    fn employer_name(&self, page: &DetailPage) -> Extraction<String> {
        self.first_text(page, self.employer_name)
    }

    fn industry(&self, page: &DetailPage) -> Extraction<String> {
        self.first_text(page, self.industry)
    }

    fn published(&self, page: &DetailPage) -> Extraction<String> {
        self.first_text(page, self.published)
    }

    fn expires(&self, page: &DetailPage) -> Extraction<String> {
        self.first_text(page, self.expires)
    }
}

/// Labelled phrases in visible text ("Opublikowana: ...", "Branża: ...").
#[derive(Debug, Clone, Copy, Default)]
pub struct FreeTextStrategy;

fn published_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)opublikowan[ay]\s*:?\s*\d{1,2}\s+\p{L}+\.?(?:\s+\d{4})?")
            .expect("static regex")
    })
}

fn industry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bbranża\s*:?\s*(.+)$").expect("static regex"))
}

fn employer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:pracodawca|firma)\s*:\s*(.+)$").expect("static regex"))
}

const LABEL_ELEMENTS: &str = "li, dd, p, span, div";
const MAX_LABEL_TEXT: usize = 160;

impl FreeTextStrategy {
    /// First short element whose text matches `re`; capture group 1 is the value.
    fn labelled(&self, page: &DetailPage, re: &Regex) -> Extraction<String> {
        let sel = match parse_selector(LABEL_ELEMENTS) {
            Ok(sel) => sel,
            Err(e) => return Extraction::Failed(e.to_string()),
        };
        let value = page.document.select(&sel).find_map(|el| {
            let text = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
            if text.is_empty() || text.chars().count() > MAX_LABEL_TEXT {
                return None;
            }
            re.captures(&text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| text_or_none(m.as_str().to_string()))
        });
        Extraction::from_option(value)
    }
}

impl DetailStrategy for FreeTextStrategy {
    fn name(&self) -> &'static str {
        "free-text"
    }

    fn employer_name(&self, page: &DetailPage) -> Extraction<String> {
        self.labelled(page, employer_regex())
    }

    fn industry(&self, page: &DetailPage) -> Extraction<String> {
        self.labelled(page, industry_regex())
    }

    fn published(&self, page: &DetailPage) -> Extraction<String> {
        Extraction::from_option(
            published_regex()
                .find(&page.body_text())
                .map(|m| m.as_str().to_string()),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldEvidence {
    pub field: &'static str,
    pub strategy: &'static str,
}

/// Fields read from one detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetailFields {
    pub employer_name: Option<String>,
    pub industry: Option<String>,
    /// Every date string found, highest-priority strategy first.
    pub published_candidates: Vec<String>,
    pub expiry_candidates: Vec<String>,
    pub evidence: Vec<FieldEvidence>,
}

impl DetailFields {
    pub fn is_empty(&self) -> bool {
        self.employer_name.is_none()
            && self.industry.is_none()
            && self.published_candidates.is_empty()
            && self.expiry_candidates.is_empty()
    }

    /// Publication candidates first; expiry dates only if none of those parse.
    pub fn resolve_date(
        &self,
        resolver: &DateResolver,
        first_seen: &DateTime<FixedOffset>,
    ) -> Option<ResolvedDate> {
        let published: Vec<&str> = self.published_candidates.iter().map(String::as_str).collect();
        let expiry: Vec<&str> = self.expiry_candidates.iter().map(String::as_str).collect();
        resolver.resolve_tiered(&[published.as_slice(), expiry.as_slice()], Some(first_seen))
    }

    /// Detail values outrank the listing guess; unset fields leave the offer untouched.
    /// The date is resolved here too, and `published_raw` keeps the text it came from.
    pub fn apply_to(&self, offer: &mut Offer, resolver: &DateResolver) {
        if let Some(employer) = &self.employer_name {
            offer.employer_name = Some(employer.clone());
        }
        if let Some(industry) = &self.industry {
            offer.industry = Some(industry.clone());
        }
        if let Some(resolved) = self.resolve_date(resolver, &offer.first_seen) {
            offer.published_resolved = Some(resolved.date);
            if resolved.raw.is_some() {
                offer.published_raw = resolved.raw;
            }
        }
    }
}

/// Priority-ordered strategy chain applied to one detail page.
pub struct DetailEnricher {
    strategies: Vec<Box<dyn DetailStrategy>>,
}

impl DetailEnricher {
    pub fn new(strategies: Vec<Box<dyn DetailStrategy>>) -> Self {
        Self { strategies }
    }

    /// Never fails outright: `Empty` when no strategy found anything.
    pub fn extract(&self, html: &str) -> Extraction<DetailFields> {
        let page = DetailPage::parse(html);
        let mut fields = DetailFields::default();

        fields.employer_name = self.first_found(&page, "employer_name", &mut fields.evidence, |s, p| {
            s.employer_name(p)
        });
        fields.industry =
            self.first_found(&page, "industry", &mut fields.evidence, |s, p| s.industry(p));

        fields.published_candidates =
            self.all_found(&page, "published", &mut fields.evidence, |s, p| s.published(p));
        fields.expiry_candidates =
            self.all_found(&page, "expires", &mut fields.evidence, |s, p| s.expires(p));

        if fields.is_empty() {
            Extraction::Empty
        } else {
            Extraction::Found(fields)
        }
    }

    fn first_found(
        &self,
        page: &DetailPage,
        field: &'static str,
        evidence: &mut Vec<FieldEvidence>,
        read: impl Fn(&dyn DetailStrategy, &DetailPage) -> Extraction<String>,
    ) -> Option<String> {
        for strategy in &self.strategies {
            match read(strategy.as_ref(), page) {
                Extraction::Found(value) => {
                    evidence.push(FieldEvidence {
                        field,
                        strategy: strategy.name(),
                    });
                    return Some(value);
                }
                other => log_miss(strategy.name(), field, &other),
            }
        }
        None
    }

    /// Distinct values from every strategy, in strategy order.
    fn all_found(
        &self,
        page: &DetailPage,
        field: &'static str,
        evidence: &mut Vec<FieldEvidence>,
        read: impl Fn(&dyn DetailStrategy, &DetailPage) -> Extraction<String>,
    ) -> Vec<String> {
        let mut values = Vec::new();
        for strategy in &self.strategies {
            match read(strategy.as_ref(), page) {
                Extraction::Found(value) => {
                    if !values.contains(&value) {
                        values.push(value);
                        evidence.push(FieldEvidence {
                            field,
                            strategy: strategy.name(),
                        });
                    }
                }
                other => log_miss(strategy.name(), field, &other),
            }
        }
        values
    }
}

fn log_miss(strategy: &str, field: &str, outcome: &Extraction<String>) {
    match outcome {
        Extraction::Failed(reason) => debug!(strategy, field, %reason, "detail strategy failed"),
        _ => debug!(strategy, field, "detail strategy found nothing"),
    }
}
