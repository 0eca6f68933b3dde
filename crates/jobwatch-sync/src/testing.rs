use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use jobwatch_storage::{FetchError, PageSource};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// In-memory site: known URLs return their body, anything else is a 404.
#[derive(Clone, Default)]
pub struct ScriptedSite {
    pages: HashMap<String, String>,
    requests: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl ScriptedSite {
    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.pages.insert(url.into(), body.into());
    }

    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.iter().map(|(url, _)| url.clone()).collect()
    }

    /// Requested URLs with the (tokio) time each request arrived.
    pub async fn timed_requests(&self) -> Vec<(String, Instant)> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl PageSource for ScriptedSite {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        self.requests.lock().await.push((url.to_string(), Instant::now()));
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
    }
}

pub fn listing_page(title: &str, ids: Range<u32>) -> String {
    let cards: String = ids
        .map(|id| {
            format!(
                r#"<div data-test="default-offer"><a data-test="link-offer" href="/praca/chief-accountant,oferta,{id}">{title} {id}</a></div>"#
            )
        })
        .collect();
    format!("<html><body>{cards}</body></html>")
}

pub fn detail_page(employer: &str, date_posted: &str) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">{{"@type":"JobPosting","hiringOrganization":{{"name":"{employer}"}},"datePosted":"{date_posted}"}}</script></head><body></body></html>"#
    )
}
