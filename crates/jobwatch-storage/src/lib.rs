//! Corpus persistence, daily artifact storage and page fetching for jobwatch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use jobwatch_core::{Corpus, Offer, CORPUS_COLUMNS};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use reqwest::StatusCode;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobwatch-storage";

/// Write `bytes` to a temp file beside `path`, then rename it into place.
pub async fn write_file_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("reading corpus {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corpus {} is corrupt at row {row}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        row: u64,
        #[source]
        source: csv::Error,
    },
}

/// Tabular corpus file: one row per offer, fixed column set.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    path: PathBuf,
}

impl CorpusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// A missing file is an empty corpus; an unreadable one is an error.
    pub async fn load(&self) -> Result<Corpus, CorpusError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Corpus::new()),
            Err(source) => {
                return Err(CorpusError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        parse_corpus(&self.path, &bytes)
    }

    pub async fn save(&self, corpus: &Corpus) -> anyhow::Result<()> {
        let bytes = encode_corpus(corpus.offers())?;
        write_file_atomically(&self.path, &bytes)
            .await
            .with_context(|| format!("saving corpus {}", self.path.display()))
    }
}

fn parse_corpus(path: &Path, bytes: &[u8]) -> Result<Corpus, CorpusError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let mut offers = Vec::new();
    for (index, row) in reader.deserialize::<Offer>().enumerate() {
        let offer = row.map_err(|source| CorpusError::Corrupt {
            path: path.to_path_buf(),
            row: source
                .position()
                .map(|p| p.line())
                .unwrap_or(index as u64 + 2),
            source,
        })?;
        if !offer.is_retainable() {
            warn!(row = index + 2, "skipping corpus row without title or link");
            continue;
        }
        offers.push(offer);
    }
    Ok(Corpus::from_offers(offers))
}

fn encode_corpus(offers: &[Offer]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(CORPUS_COLUMNS)
        .context("writing corpus header")?;
    for offer in offers {
        writer
            .serialize(offer)
            .with_context(|| format!("serializing corpus row {}", offer.identity))?;
    }
    writer.into_inner().context("flushing corpus csv")
}

/// Encode rows with an explicit header, so an empty export still carries its schema.
pub fn encode_csv<T: Serialize>(header: &[&str], rows: &[T]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header).context("writing csv header")?;
    for row in rows {
        writer.serialize(row).context("serializing csv row")?;
    }
    writer.into_inner().context("flushing csv")
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub content_hash: String,
    pub byte_size: usize,
}

/// Per-run output files, named by run date.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn daily_file_name(run_date: NaiveDate, extension: &str) -> String {
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        format!("offers_NEW_{}.{ext}", run_date.format("%Y%m%d"))
    }

    /// Overwrites a same-day artifact from an earlier run.
    pub async fn store_daily(
        &self,
        run_date: NaiveDate,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let file_name = Self::daily_file_name(run_date, extension);
        let path = self.root.join(&file_name);
        write_file_atomically(&path, bytes).await?;
        Ok(StoredArtifact {
            file_name,
            path,
            content_hash: Self::sha256_hex(bytes),
            byte_size: bytes.len(),
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Retrieves a page body for a URL; one attempt, no retries.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            user_agent: None,
            accept_language: Some("pl-PL,pl;q=0.9,en;q=0.8".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(lang) = &config.accept_language {
            headers.insert(
                ACCEPT_LANGUAGE,
                HeaderValue::from_str(lang).context("invalid Accept-Language value")?,
            );
        }

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let resp = self.client.get(url).send().await.map_err(request_error)?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.bytes().await.map_err(request_error)?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", url);
        let resp = self.fetch_bytes(url).instrument(span).await?;
        Ok(String::from_utf8_lossy(&resp.body).into_owned())
    }
}

/// Keeps at least `delay` between consecutive requests to the origin.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleeps off whatever remains of the delay since the previous call.
    pub async fn wait(&self) {
        self.wait_for(self.delay).await;
    }

    /// Like [`wait`](Self::wait) with a different minimum gap; both share one clock.
    pub async fn wait_for(&self, gap: Duration) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < gap {
                tokio::time::sleep(gap - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
