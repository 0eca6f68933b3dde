//! Sync pipeline orchestration: acquire, enrich, merge, rank, report, notify.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use jobwatch_adapters::{enrich_offer, PracujAdapter, SamplingPolicy, SiteAdapter};
use jobwatch_core::dates::DateResolver;
use jobwatch_core::{Extraction, Offer, RunMode};
use jobwatch_notify::{Attachment, DeliveryOutcome, Notifier};
use jobwatch_storage::{
    ArtifactStore, CorpusStore, HttpClientConfig, HttpFetcher, PageSource, Pacer, StoredArtifact,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod merge;
pub mod pagination;
pub mod report;

#[cfg(test)]
mod testing;

pub use merge::{merge, pool_offers, rank, MergeOutcome};
pub use pagination::{collect_phrase, PhraseHarvest, StopReason};
pub use report::{
    DeltaReport, ReportRow, TitleGroup, REPORT_SUBJECT, TEXT_SUMMARY_ROWS, XLSX_MIME_TYPE,
};

pub const CRATE_NAME: &str = "jobwatch-sync";

pub const CORPUS_FILE_NAME: &str = "offers_master.csv";

pub const DEFAULT_PHRASES: [&str; 3] = ["Główna księgowa", "Główny księgowy", "Chief Accountant"];

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub phrases_file: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub request_delay: Duration,
    pub detail_delay: Duration,
    pub incremental_pages: u32,
    pub full_pages: u32,
    /// Full runs enrich stubs 0, n, 2n, ...
    pub full_enrich_every: usize,
    pub timezone: Tz,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            phrases_file: PathBuf::from("./phrases.yaml"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 25,
            request_delay: Duration::from_millis(1200),
            detail_delay: Duration::from_millis(200),
            incremental_pages: 20,
            full_pages: 80,
            full_enrich_every: 3,
            timezone: chrono_tz::Europe::Warsaw,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("JOBWATCH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            phrases_file: std::env::var("JOBWATCH_PHRASES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.phrases_file),
            user_agent: std::env::var("JOBWATCH_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("JOBWATCH_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            request_delay: env_parse("JOBWATCH_REQUEST_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_delay),
            detail_delay: env_parse("JOBWATCH_DETAIL_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.detail_delay),
            incremental_pages: env_parse("JOBWATCH_INCREMENTAL_PAGES")
                .unwrap_or(defaults.incremental_pages),
            full_pages: env_parse("JOBWATCH_FULL_PAGES").unwrap_or(defaults.full_pages),
            full_enrich_every: env_parse("JOBWATCH_FULL_ENRICH_EVERY")
                .unwrap_or(defaults.full_enrich_every),
            timezone: env_parse("JOBWATCH_TIMEZONE").unwrap_or(defaults.timezone),
        }
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.data_dir.join(CORPUS_FILE_NAME)
    }

    pub fn max_pages(&self, mode: RunMode) -> u32 {
        match mode {
            RunMode::Full => self.full_pages,
            RunMode::Incremental => self.incremental_pages,
        }
    }

    pub fn sampling(&self, mode: RunMode) -> SamplingPolicy {
        match mode {
            RunMode::Full => SamplingPolicy::EveryNth(self.full_enrich_every),
            RunMode::Incremental => SamplingPolicy::Every,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PhrasesFile {
    phrases: Vec<String>,
}

/// Phrases from the YAML file; a missing file means the built-in set.
pub async fn load_phrases(path: &Path) -> Result<Vec<String>> {
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "phrases file absent; using built-in phrases");
            return Ok(DEFAULT_PHRASES.iter().map(|p| p.to_string()).collect());
        }
        Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
    };
    let file: PhrasesFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let phrases: Vec<String> = file
        .phrases
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if phrases.is_empty() {
        bail!("{} lists no phrases", path.display());
    }
    Ok(phrases)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    pub attempted: usize,
    pub enriched: usize,
    pub empty: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhraseSummary {
    pub phrase: String,
    pub pages_fetched: u32,
    pub stubs: usize,
    pub stop: StopReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    pub file_name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: usize,
}

impl From<&StoredArtifact> for ArtifactSummary {
    fn from(stored: &StoredArtifact) -> Self {
        Self {
            file_name: stored.file_name.clone(),
            path: stored.path.display().to_string(),
            sha256: stored.content_hash.clone(),
            bytes: stored.byte_size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub forced_full: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phrases: Vec<PhraseSummary>,
    pub enrichment: EnrichmentStats,
    pub acquired: usize,
    pub corpus_before: usize,
    pub added: usize,
    pub delta_size: usize,
    pub corpus_size: usize,
    pub daily_csv: ArtifactSummary,
    pub daily_xlsx: ArtifactSummary,
    pub daily_payload: ArtifactSummary,
    pub notification: DeliveryOutcome,
}

impl SyncRunSummary {
    pub fn summary_line(&self) -> String {
        format!(
            "[DONE] mode={} added={} (new today: {}) | corpus total: {} | notification: {}",
            self.mode.as_str(),
            self.added,
            self.delta_size,
            self.corpus_size,
            self.notification
        )
    }
}

/// One finished run: what happened, plus the ranked report it produced.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub summary: SyncRunSummary,
    pub report: DeltaReport,
}

#[derive(Debug, Serialize)]
struct AttachmentRecord<'a> {
    filename: &'a str,
    mime_type: &'a str,
    bytes: usize,
    sha256: &'a str,
}

/// Daily notification payload, written next to the CSV export.
#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    run_id: Uuid,
    run_date: NaiveDate,
    subject: &'a str,
    recipients: &'a [String],
    html_body: &'a str,
    text_body: &'a str,
    attachments: Vec<AttachmentRecord<'a>>,
    grouped_by_title: Vec<TitleGroup>,
}

pub struct SyncPipeline {
    config: SyncConfig,
    adapter: Box<dyn SiteAdapter>,
    source: Box<dyn PageSource>,
    notifier: Option<Notifier>,
    phrases: Option<Vec<String>>,
    corpus_store: CorpusStore,
    artifact_store: ArtifactStore,
    /// One clock for every request to the origin, listing or detail.
    pacer: Pacer,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Ok(Self::with_source(config, Box::new(http)))
    }

    /// Pipeline over an arbitrary page source, with the pracuj.pl adapter.
    pub fn with_source(config: SyncConfig, source: Box<dyn PageSource>) -> Self {
        Self {
            corpus_store: CorpusStore::new(config.corpus_path()),
            artifact_store: ArtifactStore::new(config.data_dir.clone()),
            pacer: Pacer::new(config.request_delay),
            adapter: Box::new(PracujAdapter::new()),
            source,
            notifier: None,
            phrases: None,
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Use these phrases instead of reading the phrases file.
    pub fn with_phrases(mut self, phrases: Vec<String>) -> Self {
        self.phrases = Some(phrases);
        self
    }

    pub async fn run_once(&self, requested: RunMode) -> Result<SyncRun> {
        let now = Utc::now().with_timezone(&self.config.timezone).fixed_offset();
        self.run_once_at(requested, now).await
    }

    /// Run with an explicit acquisition clock; `now` stamps `first_seen` and names the daily files.
    pub async fn run_once_at(&self, requested: RunMode, now: DateTime<FixedOffset>) -> Result<SyncRun> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let run_date = now.date_naive();

        let forced_full = requested == RunMode::Incremental && !self.corpus_store.exists().await;
        let mode = if forced_full { RunMode::Full } else { requested };
        if forced_full {
            info!(path = %self.corpus_store.path().display(), "no corpus yet; forcing full run");
        }

        let corpus = self
            .corpus_store
            .load()
            .await
            .context("loading corpus")?;
        let corpus_before = corpus.len();

        let phrases = match &self.phrases {
            Some(phrases) => phrases.clone(),
            None => load_phrases(&self.config.phrases_file).await?,
        };

        let resolver = DateResolver::new(run_date);
        let sampling = self.config.sampling(mode);
        let max_pages = self.config.max_pages(mode);
        let mut enrichment = EnrichmentStats::default();
        let mut phrase_summaries = Vec::new();
        let mut acquired = Vec::new();

        for phrase in &phrases {
            info!(phrase, mode = mode.as_str(), max_pages, "searching");
            let harvest = collect_phrase(
                self.adapter.as_ref(),
                self.source.as_ref(),
                &self.pacer,
                phrase,
                max_pages,
            )
            .await;
            phrase_summaries.push(PhraseSummary {
                phrase: harvest.phrase.clone(),
                pages_fetched: harvest.pages_fetched,
                stubs: harvest.stubs.len(),
                stop: harvest.stop,
            });

            // the first detail fetch follows a listing fetch and keeps the full delay
            let mut detail_gap = self.config.request_delay.max(self.config.detail_delay);
            for (index, stub) in harvest.stubs.into_iter().enumerate() {
                let mut offer = Offer::from_stub(stub.clone(), now);
                offer.source_tag = self.adapter.source_tag().to_string();
                offer.published_resolved = resolver
                    .resolve(&[], Some(&offer.first_seen))
                    .map(|resolved| resolved.date);

                if sampling.should_enrich(index) {
                    self.pacer.wait_for(detail_gap).await;
                    detail_gap = self.config.detail_delay;
                    enrichment.attempted += 1;
                    match enrich_offer(self.adapter.as_ref(), self.source.as_ref(), &stub).await {
                        Extraction::Found(fields) => {
                            enrichment.enriched += 1;
                            fields.apply_to(&mut offer, &resolver);
                        }
                        Extraction::Empty => enrichment.empty += 1,
                        Extraction::Failed(reason) => {
                            enrichment.failed += 1;
                            debug!(identity = %offer.identity, %reason, "enrichment degraded to stub fields");
                        }
                    }
                }
                acquired.push(offer);
            }
        }
        if enrichment.failed > 0 {
            warn!(failed = enrichment.failed, attempted = enrichment.attempted, "some detail pages could not be read");
        }

        let acquired_count = acquired.len();
        let MergeOutcome { corpus, delta } = merge(corpus, pool_offers(acquired));
        self.corpus_store
            .save(&corpus)
            .await
            .context("persisting corpus")?;

        let ranked = rank(delta);
        let report = DeltaReport::build(&ranked, run_date);

        let csv_bytes = report.csv_bytes()?;
        let daily_csv = self
            .artifact_store
            .store_daily(run_date, "csv", &csv_bytes)
            .await
            .context("writing daily csv")?;
        let xlsx_bytes = report.xlsx_bytes()?;
        let daily_xlsx = self
            .artifact_store
            .store_daily(run_date, "xlsx", &xlsx_bytes)
            .await
            .context("writing daily xlsx")?;

        let recipients: Vec<String> = self
            .notifier
            .as_ref()
            .map(|n| n.recipients().to_vec())
            .unwrap_or_default();
        let html_body = report.html_body()?;
        let text_body = report.text_summary(TEXT_SUMMARY_ROWS);
        let payload = NotificationPayload {
            run_id,
            run_date,
            subject: report.subject(),
            recipients: &recipients,
            html_body: &html_body,
            text_body: &text_body,
            attachments: vec![
                AttachmentRecord {
                    filename: &daily_csv.file_name,
                    mime_type: "text/csv",
                    bytes: daily_csv.byte_size,
                    sha256: &daily_csv.content_hash,
                },
                AttachmentRecord {
                    filename: &daily_xlsx.file_name,
                    mime_type: XLSX_MIME_TYPE,
                    bytes: daily_xlsx.byte_size,
                    sha256: &daily_xlsx.content_hash,
                },
            ],
            grouped_by_title: report.grouped_by_title(),
        };
        let payload_bytes =
            serde_json::to_vec_pretty(&payload).context("serializing notification payload")?;
        let daily_payload = self
            .artifact_store
            .store_daily(run_date, "json", &payload_bytes)
            .await
            .context("writing notification payload")?;

        let notification = match &self.notifier {
            Some(notifier) => {
                notifier
                    .send(
                        &recipients,
                        report.subject(),
                        &html_body,
                        &text_body,
                        vec![
                            Attachment {
                                filename: daily_csv.file_name.clone(),
                                mime_type: "text/csv".to_string(),
                                bytes: csv_bytes,
                            },
                            Attachment {
                                filename: daily_xlsx.file_name.clone(),
                                mime_type: XLSX_MIME_TYPE.to_string(),
                                bytes: xlsx_bytes,
                            },
                        ],
                    )
                    .await
            }
            None => DeliveryOutcome::Skipped {
                reason: "notifier not configured".to_string(),
            },
        };
        if !notification.is_delivered() {
            warn!(outcome = %notification, "daily report was not delivered");
        }

        let summary = SyncRunSummary {
            run_id,
            mode,
            forced_full,
            started_at,
            finished_at: Utc::now(),
            phrases: phrase_summaries,
            enrichment,
            acquired: acquired_count,
            corpus_before,
            added: corpus.len() - corpus_before,
            delta_size: report.len(),
            corpus_size: corpus.len(),
            daily_csv: ArtifactSummary::from(&daily_csv),
            daily_xlsx: ArtifactSummary::from(&daily_xlsx),
            daily_payload: ArtifactSummary::from(&daily_payload),
            notification,
        };
        info!("{}", summary.summary_line());
        Ok(SyncRun { summary, report })
    }
}

pub async fn run_sync_once_from_env(requested: RunMode, notifier: Option<Notifier>) -> Result<SyncRun> {
    let config = SyncConfig::from_env();
    let mut pipeline = SyncPipeline::new(config)?;
    if let Some(notifier) = notifier {
        pipeline = pipeline.with_notifier(notifier);
    }
    pipeline.run_once(requested).await
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusStats {
    pub path: String,
    pub exists: bool,
    pub offers: usize,
    pub newest_first_seen: Option<DateTime<FixedOffset>>,
}

pub async fn corpus_stats(config: &SyncConfig) -> Result<CorpusStats> {
    let store = CorpusStore::new(config.corpus_path());
    let exists = store.exists().await;
    let corpus = store.load().await.context("loading corpus")?;
    Ok(CorpusStats {
        path: store.path().display().to_string(),
        exists,
        offers: corpus.len(),
        newest_first_seen: corpus.newest_first_seen(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{detail_page, listing_page, ScriptedSite};
    use chrono::TimeZone;
    use jobwatch_notify::{MailTransport, NotifyError, OutgoingMail};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tempfile::tempdir;

    const PHRASE: &str = "Chief Accountant";

    fn config(data_dir: &Path) -> SyncConfig {
        SyncConfig {
            data_dir: data_dir.to_path_buf(),
            phrases_file: data_dir.join("phrases.yaml"),
            request_delay: Duration::ZERO,
            detail_delay: Duration::ZERO,
            ..SyncConfig::default()
        }
    }

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 9, 20, 7, 30, 0)
            .single()
            .unwrap()
    }

    fn search(page: u32) -> String {
        PracujAdapter::new().search_url(PHRASE, page)
    }

    fn offer_link(id: u32) -> String {
        format!("https://www.pracuj.pl/praca/chief-accountant,oferta,{id}")
    }

    struct FailingTransport;

    struct RecordingTransport(Arc<Mutex<Vec<OutgoingMail>>>);

    #[async_trait::async_trait]
    impl MailTransport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn deliver(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
            self.0.lock().await.push(mail.clone());
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl MailTransport for FailingTransport {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn deliver(&self, _mail: &OutgoingMail) -> Result<(), NotifyError> {
            Err(NotifyError::Smtp("relay unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn missing_corpus_forces_full_mode_and_sampling() {
        let dir = tempdir().unwrap();
        let mut site = ScriptedSite::default();
        site.insert(search(1), listing_page(PHRASE, 1000001..1000005));
        for id in 1000001..1000005 {
            site.insert(offer_link(id), detail_page("ACME", "2025-09-12"));
        }

        let pipeline = SyncPipeline::with_source(config(dir.path()), Box::new(site.clone()))
            .with_phrases(vec![PHRASE.to_string()]);
        let run = pipeline.run_once_at(RunMode::Incremental, now()).await.unwrap();

        assert!(run.summary.forced_full);
        assert_eq!(run.summary.mode, RunMode::Full);
        assert_eq!(run.summary.enrichment.attempted, 2);
        let details: Vec<_> = site
            .requests()
            .await
            .into_iter()
            .filter(|u| u.contains("oferta"))
            .collect();
        assert_eq!(details, vec![offer_link(1000001), offer_link(1000004)]);
    }

    #[tokio::test]
    async fn failed_detail_fetch_keeps_offer_in_delta() {
        let dir = tempdir().unwrap();
        let mut site = ScriptedSite::default();
        site.insert(search(1), listing_page(PHRASE, 1000001..1000003));
        site.insert(offer_link(1000001), detail_page("ACME", "2025-09-12"));

        let pipeline = SyncPipeline::with_source(config(dir.path()), Box::new(site))
            .with_phrases(vec![PHRASE.to_string()]);
        // seed an empty corpus so the run stays incremental and enriches every stub
        CorpusStore::new(dir.path().join(CORPUS_FILE_NAME))
            .save(&jobwatch_core::Corpus::new())
            .await
            .unwrap();
        let run = pipeline.run_once_at(RunMode::Incremental, now()).await.unwrap();

        assert_eq!(run.summary.mode, RunMode::Incremental);
        assert_eq!(run.summary.enrichment.failed, 1);
        assert_eq!(run.summary.delta_size, 2);

        // the degraded offer falls back to its first_seen date, so it ranks first
        let degraded = &run.report.rows[0];
        assert_eq!(degraded.identity, "1000002");
        assert_eq!(degraded.employer_name, report::EMPLOYER_PLACEHOLDER);
        assert_eq!(degraded.date, "2025-09-20");

        let enriched = &run.report.rows[1];
        assert_eq!(enriched.identity, "1000001");
        assert_eq!(enriched.employer_name, "ACME");
        assert_eq!(enriched.date, "2025-09-12");
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_the_run() {
        let dir = tempdir().unwrap();
        let mut site = ScriptedSite::default();
        site.insert(search(1), listing_page(PHRASE, 1000001..1000002));
        let notifier = Notifier::new(
            None,
            vec!["ops@example.com".to_string()],
            Some(Box::new(FailingTransport)),
            Some(Box::new(FailingTransport)),
        );

        let pipeline = SyncPipeline::with_source(config(dir.path()), Box::new(site))
            .with_phrases(vec![PHRASE.to_string()])
            .with_notifier(notifier);
        let run = pipeline.run_once_at(RunMode::Full, now()).await.unwrap();

        assert!(matches!(run.summary.notification, DeliveryOutcome::Failed { .. }));
        assert!(!run.summary.notification.is_delivered());
        assert_eq!(run.summary.corpus_size, 1);
        assert!(dir.path().join(CORPUS_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn daily_artifacts_are_written_with_digests() {
        let dir = tempdir().unwrap();
        let site = ScriptedSite::default();
        let pipeline = SyncPipeline::with_source(config(dir.path()), Box::new(site))
            .with_phrases(vec![PHRASE.to_string()]);
        let run = pipeline.run_once_at(RunMode::Full, now()).await.unwrap();

        assert!(run.report.is_empty());
        assert_eq!(run.summary.daily_csv.file_name, "offers_NEW_20250920.csv");
        let csv = std::fs::read_to_string(dir.path().join("offers_NEW_20250920.csv")).unwrap();
        assert_eq!(csv, "employer_name,title,link,date\n");

        let payload: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("offers_NEW_20250920.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(payload["subject"], REPORT_SUBJECT);
        assert_eq!(payload["attachments"][0]["sha256"], run.summary.daily_csv.sha256.as_str());
        assert_eq!(payload["attachments"][1]["filename"], "offers_NEW_20250920.xlsx");
        assert_eq!(payload["attachments"][1]["mime_type"], XLSX_MIME_TYPE);
        assert_eq!(payload["attachments"][1]["sha256"], run.summary.daily_xlsx.sha256.as_str());
        assert!(dir.path().join("offers_NEW_20250920.xlsx").exists());
        assert_eq!(payload["text_body"], report::NO_NEW_OFFERS);
        assert!(matches!(run.summary.notification, DeliveryOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn notification_attaches_csv_and_xlsx() {
        let dir = tempdir().unwrap();
        let mut site = ScriptedSite::default();
        site.insert(search(1), listing_page(PHRASE, 1000001..1000002));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let notifier = Notifier::new(
            None,
            vec!["ops@example.com".to_string()],
            Some(Box::new(RecordingTransport(sent.clone()))),
            None,
        );

        let run = SyncPipeline::with_source(config(dir.path()), Box::new(site))
            .with_phrases(vec![PHRASE.to_string()])
            .with_notifier(notifier)
            .run_once_at(RunMode::Full, now())
            .await
            .unwrap();

        assert!(run.summary.notification.is_delivered());
        let sent = sent.lock().await;
        let attachments: Vec<(&str, &str)> = sent[0]
            .attachments
            .iter()
            .map(|a| (a.filename.as_str(), a.mime_type.as_str()))
            .collect();
        assert_eq!(
            attachments,
            vec![
                ("offers_NEW_20250920.csv", "text/csv"),
                ("offers_NEW_20250920.xlsx", XLSX_MIME_TYPE),
            ]
        );
        assert_eq!(sent[0].attachments[1].bytes.len(), run.summary.daily_xlsx.bytes);
    }

    #[tokio::test(start_paused = true)]
    async fn every_origin_fetch_respects_the_politeness_delay() {
        let dir = tempdir().unwrap();
        let mut site = ScriptedSite::default();
        site.insert(search(1), listing_page(PHRASE, 1000001..1000003));
        site.insert(search(2), listing_page(PHRASE, 1000003..1000005));
        for id in 1000001..1000005 {
            site.insert(offer_link(id), detail_page("ACME", "2025-09-12"));
        }
        CorpusStore::new(dir.path().join(CORPUS_FILE_NAME))
            .save(&jobwatch_core::Corpus::new())
            .await
            .unwrap();

        let request_delay = Duration::from_millis(1200);
        let detail_delay = Duration::from_millis(200);
        let cfg = SyncConfig {
            request_delay,
            detail_delay,
            ..config(dir.path())
        };
        SyncPipeline::with_source(cfg, Box::new(site.clone()))
            .with_phrases(vec![PHRASE.to_string(), "Główna księgowa".to_string()])
            .run_once_at(RunMode::Incremental, now())
            .await
            .unwrap();

        let log = site.timed_requests().await;
        let is_detail = |url: &str| url.contains(",oferta,");
        assert_eq!(log.iter().filter(|(url, _)| is_detail(url)).count(), 4);
        for pair in log.windows(2) {
            let (prev_url, prev_at) = &pair[0];
            let (next_url, next_at) = &pair[1];
            let expected = if is_detail(prev_url) && is_detail(next_url) {
                detail_delay
            } else {
                request_delay
            };
            let gap = next_at.duration_since(*prev_at);
            assert!(gap >= expected, "{gap:?} between {prev_url} and {next_url}");
        }
    }

    #[tokio::test]
    async fn phrases_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phrases.yaml");
        assert_eq!(load_phrases(&path).await.unwrap().len(), DEFAULT_PHRASES.len());

        std::fs::write(&path, "phrases:\n  - \"Chief Accountant\"\n  - \"  \"\n").unwrap();
        assert_eq!(load_phrases(&path).await.unwrap(), vec!["Chief Accountant".to_string()]);

        std::fs::write(&path, "phrases: []\n").unwrap();
        assert!(load_phrases(&path).await.is_err());
    }

    #[tokio::test]
    async fn stats_report_size_and_newest_first_seen() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let empty = corpus_stats(&cfg).await.unwrap();
        assert!(!empty.exists);
        assert_eq!(empty.offers, 0);

        let mut site = ScriptedSite::default();
        site.insert(search(1), listing_page(PHRASE, 1000001..1000004));
        SyncPipeline::with_source(cfg.clone(), Box::new(site))
            .with_phrases(vec![PHRASE.to_string()])
            .run_once_at(RunMode::Full, now())
            .await
            .unwrap();

        let stats = corpus_stats(&cfg).await.unwrap();
        assert_eq!(stats.offers, 3);
        assert_eq!(stats.newest_first_seen, Some(now()));
    }

    #[test]
    fn mode_selects_depth_and_sampling() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.max_pages(RunMode::Full), 80);
        assert_eq!(cfg.max_pages(RunMode::Incremental), 20);
        assert_eq!(cfg.sampling(RunMode::Full), SamplingPolicy::EveryNth(3));
        assert_eq!(cfg.sampling(RunMode::Incremental), SamplingPolicy::Every);
        assert_eq!(cfg.corpus_path(), PathBuf::from("./data/offers_master.csv"));
    }
}
