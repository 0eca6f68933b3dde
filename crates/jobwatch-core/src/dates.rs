//! Publication date resolution.
//!
//! Candidates are evaluated stage by stage: every candidate is tried as an
//! ISO/structured date before any of them is tried as natural language, and
//! so on. The acquisition timestamp is the last resort.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    Structured,
    NaturalLanguage,
    Generic,
    FirstSeen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDate {
    pub date: NaiveDate,
    pub source: DateSource,
    /// The candidate text that produced `date`; `None` for the first-seen fallback.
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DateResolver {
    today: NaiveDate,
}

impl DateResolver {
    /// `today` supplies the year for natural-language dates that omit it.
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn resolve(
        &self,
        candidates: &[&str],
        first_seen: Option<&DateTime<FixedOffset>>,
    ) -> Option<ResolvedDate> {
        self.resolve_tiered(&[candidates], first_seen)
    }

    /// Like [`resolve`](Self::resolve), but a later tier is only consulted
    /// when no candidate of an earlier tier parses at any stage.
    pub fn resolve_tiered(
        &self,
        tiers: &[&[&str]],
        first_seen: Option<&DateTime<FixedOffset>>,
    ) -> Option<ResolvedDate> {
        tiers
            .iter()
            .find_map(|tier| self.resolve_candidates(tier))
            .or_else(|| {
                first_seen.map(|ts| ResolvedDate {
                    date: ts.date_naive(),
                    source: DateSource::FirstSeen,
                    raw: None,
                })
            })
    }

    fn resolve_candidates(&self, candidates: &[&str]) -> Option<ResolvedDate> {
        let candidates: Vec<&str> = candidates
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();

        first_parsed(&candidates, DateSource::Structured, parse_structured)
            .or_else(|| {
                first_parsed(&candidates, DateSource::NaturalLanguage, |c| {
                    parse_natural_language(c, self.today)
                })
            })
            .or_else(|| first_parsed(&candidates, DateSource::Generic, parse_generic))
    }
}

fn first_parsed(
    candidates: &[&str],
    source: DateSource,
    parse: impl Fn(&str) -> Option<NaiveDate>,
) -> Option<ResolvedDate> {
    candidates.iter().find_map(|&c| {
        parse(c).map(|date| ResolvedDate {
            date,
            source,
            raw: Some(c.to_string()),
        })
    })
}

/// Whole-string ISO 8601 forms: `2025-09-12`, `2025-09-12T08:00:00`, RFC 3339.
pub fn parse_structured(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(ts.date());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn natural_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})\s+([a-z]+)\.?(?:,?\s+(\d{4})\b)?").expect("static regex")
    })
}

/// Day number, month name and optional year, e.g. `Opublikowana: 12 września 2025`
/// or `do 11 paź`. A missing year is taken from `today`.
pub fn parse_natural_language(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let normalized = fold_diacritics(&text.to_lowercase());
    natural_date_regex().captures_iter(&normalized).find_map(|caps| {
        let day: u32 = caps.get(1)?.as_str().parse().ok()?;
        let month = month_number(caps.get(2)?.as_str())?;
        let year = match caps.get(3) {
            Some(y) => y.as_str().parse().ok()?,
            None => today.year(),
        };
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

fn embedded_numeric_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:(\d{4})-(\d{1,2})-(\d{1,2})|(\d{1,2})[./-](\d{1,2})[./-](\d{4}))\b")
            .expect("static regex")
    })
}

/// Best-effort parse of numeric dates, day-first when ambiguous.
pub fn parse_generic(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    for fmt in ["%d.%m.%Y", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d", "%Y.%m.%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(date);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%d %H:%M:%S%:z"] {
        if let Ok(ts) = DateTime::parse_from_str(text, fmt) {
            return Some(ts.date_naive());
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M", "%d.%m.%Y %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(ts.date());
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(text) {
        return Some(ts.date_naive());
    }

    embedded_numeric_regex().captures_iter(text).find_map(|caps| {
        let (y, m, d) = if caps.get(1).is_some() {
            (caps.get(1)?, caps.get(2)?, caps.get(3)?)
        } else {
            (caps.get(6)?, caps.get(5)?, caps.get(4)?)
        };
        NaiveDate::from_ymd_opt(
            y.as_str().parse().ok()?,
            m.as_str().parse().ok()?,
            d.as_str().parse().ok()?,
        )
    })
}

/// Strip diacritics: `paź` -> `paz`, `łódź` -> `lodz`.
pub fn fold_diacritics(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'ł' => 'l',
            'Ł' => 'L',
            other => other,
        })
        .collect()
}

const MONTH_NAMES: &[(&str, u32)] = &[
    // Polish, genitive (as used in dates) then nominative.
    ("stycznia", 1),
    ("lutego", 2),
    ("marca", 3),
    ("kwietnia", 4),
    ("maja", 5),
    ("czerwca", 6),
    ("lipca", 7),
    ("sierpnia", 8),
    ("wrzesnia", 9),
    ("pazdziernika", 10),
    ("listopada", 11),
    ("grudnia", 12),
    ("styczen", 1),
    ("luty", 2),
    ("marzec", 3),
    ("kwiecien", 4),
    ("maj", 5),
    ("czerwiec", 6),
    ("lipiec", 7),
    ("sierpien", 8),
    ("wrzesien", 9),
    ("pazdziernik", 10),
    ("listopad", 11),
    ("grudzien", 12),
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

const MONTH_ABBREVIATIONS: &[(&str, u32)] = &[
    ("sty", 1),
    ("lut", 2),
    ("mar", 3),
    ("kwi", 4),
    ("cze", 6),
    ("lip", 7),
    ("sie", 8),
    ("wrz", 9),
    ("paz", 10),
    ("lis", 11),
    ("gru", 12),
    ("jan", 1),
    ("feb", 2),
    ("apr", 4),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

fn month_number(token: &str) -> Option<u32> {
    MONTH_NAMES
        .iter()
        .chain(MONTH_ABBREVIATIONS)
        .find(|(name, _)| *name == token)
        .map(|(_, month)| *month)
}
