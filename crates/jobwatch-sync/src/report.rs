//! Human-facing rendering of the ranked delta.

use anyhow::Context;
use askama::Template;
use chrono::NaiveDate;
use jobwatch_core::Offer;
use jobwatch_storage::encode_csv;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;

pub const REPORT_SUBJECT: &str =
    "NOWE oferty (Pracuj.pl) – Chief Accountant / Główna/y Księgowa/y";

pub const REPORT_COLUMNS: [&str; 4] = ["employer_name", "title", "link", "date"];

pub const EMPLOYER_PLACEHOLDER: &str = "—";

pub const NO_NEW_OFFERS: &str = "Brak nowych ofert.";

pub const XLSX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const XLSX_SHEET_NAME: &str = "NEW";

/// Rows listed in the plain-text body before the remainder is summarized.
pub const TEXT_SUMMARY_ROWS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub employer_name: String,
    pub title: String,
    pub link: String,
    /// `YYYY-MM-DD`, empty when unresolved.
    pub date: String,
    #[serde(skip)]
    pub identity: String,
    #[serde(skip)]
    pub resolved: Option<NaiveDate>,
}

impl ReportRow {
    fn from_offer(offer: &Offer) -> Self {
        let employer_name = offer
            .employer_name
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(EMPLOYER_PLACEHOLDER)
            .to_string();
        Self {
            employer_name,
            title: offer.title.clone(),
            link: offer.link.clone(),
            date: offer
                .published_resolved
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            identity: offer.identity.clone(),
            resolved: offer.published_resolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupEntry {
    pub employer_name: String,
    pub link: String,
    pub date: String,
}

/// Rows sharing one title, in rank order of the title's first appearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleGroup {
    pub title: String,
    pub entries: Vec<GroupEntry>,
}

#[derive(Template)]
#[template(
    source = r#"<p style="font-family:Arial,sans-serif">Poniżej <strong>nowe oferty</strong> (Pracuj.pl), {{ run_date }}:</p>
{% if rows.is_empty() %}<p style="font-family:Arial,sans-serif">{{ empty_text }}</p>
{% else %}<table border="1" cellpadding="6" cellspacing="0" style="border-collapse:collapse;width:100%;font-family:Arial,sans-serif;font-size:13px">
<thead><tr><th style="text-align:left">Company</th><th style="text-align:left">Title</th><th style="text-align:left">Link</th><th style="text-align:left">Date</th></tr></thead>
<tbody>
{% for row in rows %}<tr><td>{{ row.employer_name }}</td><td>{{ row.title }}</td><td><a href="{{ row.link }}" target="_blank" rel="noopener noreferrer">otwórz ogłoszenie</a></td><td>{{ row.date }}</td></tr>
{% endfor %}</tbody>
</table>
{% endif %}"#,
    ext = "html"
)]
struct DeltaTableTemplate<'a> {
    run_date: String,
    rows: &'a [ReportRow],
    empty_text: &'a str,
}

/// Ranked delta, ready for the daily export and the notification bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaReport {
    pub run_date: NaiveDate,
    pub rows: Vec<ReportRow>,
}

impl DeltaReport {
    /// `ranked` must already be in report order.
    pub fn build(ranked: &[Offer], run_date: NaiveDate) -> Self {
        Self {
            run_date,
            rows: ranked.iter().map(ReportRow::from_offer).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn subject(&self) -> &'static str {
        REPORT_SUBJECT
    }

    pub fn html_body(&self) -> anyhow::Result<String> {
        DeltaTableTemplate {
            run_date: self.run_date.format("%Y-%m-%d").to_string(),
            rows: &self.rows,
            empty_text: NO_NEW_OFFERS,
        }
        .render()
        .context("rendering delta table")
    }

    pub fn text_summary(&self, limit: usize) -> String {
        if self.rows.is_empty() {
            return NO_NEW_OFFERS.to_string();
        }
        let mut lines: Vec<String> = self
            .rows
            .iter()
            .take(limit)
            .map(|row| {
                let date = if row.date.is_empty() { "-" } else { row.date.as_str() };
                format!("- {} | {} | {} | {}", row.employer_name, row.title, row.link, date)
            })
            .collect();
        if self.rows.len() > limit {
            lines.push(format!("... and {} more.", self.rows.len() - limit));
        }
        lines.join("\n")
    }

    /// Header-only when the delta is empty.
    pub fn csv_bytes(&self) -> anyhow::Result<Vec<u8>> {
        encode_csv(&REPORT_COLUMNS, &self.rows)
    }

    /// Same columns as the CSV, as a single `NEW` sheet with a bold header row.
    pub fn xlsx_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name(XLSX_SHEET_NAME)?;
        for (col, name) in (0u16..).zip(REPORT_COLUMNS) {
            sheet.write_string_with_format(0, col, name, &header)?;
        }
        for (row, offer) in (1u32..).zip(&self.rows) {
            let cells = [&offer.employer_name, &offer.title, &offer.link, &offer.date];
            for (col, value) in (0u16..).zip(cells) {
                if !value.is_empty() {
                    sheet.write_string(row, col, value.as_str())?;
                }
            }
        }
        sheet.set_column_width(0, 32)?;
        sheet.set_column_width(1, 40)?;
        sheet.set_column_width(2, 60)?;
        sheet.set_column_width(3, 12)?;
        workbook.save_to_buffer().context("building xlsx workbook")
    }

    pub fn grouped_by_title(&self) -> Vec<TitleGroup> {
        let mut groups: Vec<TitleGroup> = Vec::new();
        for row in &self.rows {
            let entry = GroupEntry {
                employer_name: row.employer_name.clone(),
                link: row.link.clone(),
                date: row.date.clone(),
            };
            match groups.iter_mut().find(|g| g.title == row.title) {
                Some(group) => group.entries.push(entry),
                None => groups.push(TitleGroup {
                    title: row.title.clone(),
                    entries: vec![entry],
                }),
            }
        }
        groups
    }
}
