//! Sync jobs: walk Congress API listings, enrich each entry, normalize and upsert.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cq_adapters::{
    items_key, legislation_detail_payload, legislation_detail_url, member_bioguide_id,
    member_detail_payload, normalize_legislation, normalize_member, with_page_limit,
    AdapterError, CongressEndpoints, MEMBERS_KEY,
};
use cq_core::{LegislationRecord, MemberRecord, MemberSeed, Sponsorship, SponsorshipRole};
use cq_storage::{HttpFetcher, PgRecordStore, RecordStore, StoreError};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

mod config;
mod cursor;
mod report;
mod runner;

pub use config::{ConfigError, SyncConfig};
pub use cursor::{PageCursor, PagePolicy, WalkStatus};
pub use report::{write_run_report, SyncRunSummary};
pub use runner::BoundedRunner;

pub const CRATE_NAME: &str = "cq-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Members,
    Legislation,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [Self::Members, Self::Legislation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Members => "members",
            Self::Legislation => "legislation",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job driver states, as they appear in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Start,
    FetchingPage,
    EnrichingBatch,
    Persisting,
    NextPage,
    Done,
    Failed,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::FetchingPage => "fetching_page",
            Self::EnrichingBatch => "enriching_batch",
            Self::Persisting => "persisting",
            Self::NextPage => "next_page",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Install the process-wide subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Legislation gathered from one member's sponsorship lists.
#[derive(Debug, Default)]
struct MemberHarvest {
    records: Vec<LegislationRecord>,
    sponsorships: Vec<Sponsorship>,
    pages_fetched: usize,
    items_seen: usize,
    details_missing: usize,
    items_skipped: usize,
    walks: Vec<WalkStatus>,
    skipped: bool,
}

pub struct SyncPipeline {
    config: SyncConfig,
    endpoints: CongressEndpoints,
    fetcher: HttpFetcher,
    store: Arc<dyn RecordStore>,
    runner: BoundedRunner,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.http_client_config())?;
        Ok(Self::with_fetcher(config, fetcher, store))
    }

    pub fn with_fetcher(config: SyncConfig, fetcher: HttpFetcher, store: Arc<dyn RecordStore>) -> Self {
        Self {
            endpoints: CongressEndpoints::new(config.base_url.as_str()),
            runner: BoundedRunner::new(config.max_concurrent_requests),
            config,
            fetcher,
            store,
        }
    }

    /// Connect to Postgres and build a pipeline over it.
    pub async fn connect(config: SyncConfig) -> Result<Self> {
        let store = PgRecordStore::connect(&config.store_config())
            .await
            .context("connecting to storage")?;
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn run_members(&self) -> Result<SyncRunSummary, SyncError> {
        self.run_job(JobKind::Members).await
    }

    pub async fn run_legislation(&self) -> Result<SyncRunSummary, SyncError> {
        self.run_job(JobKind::Legislation).await
    }

    /// Members first, so the legislation job sees fresh sponsorship URLs.
    pub async fn run_all(&self) -> Result<Vec<SyncRunSummary>, SyncError> {
        let mut summaries = Vec::with_capacity(JobKind::ALL.len());
        for job in JobKind::ALL {
            summaries.push(self.run_job(job).await?);
        }
        Ok(summaries)
    }

    pub async fn run_job(&self, job: JobKind) -> Result<SyncRunSummary, SyncError> {
        let mut summary = SyncRunSummary::start(job);
        let span = info_span!("sync", run_id = %summary.run_id, job = %job);

        let outcome = async {
            info!(phase = %JobPhase::Start, base_url = self.endpoints.base_url(), "job starting");
            let result = match job {
                JobKind::Members => self.sync_members(&mut summary).await,
                JobKind::Legislation => self.sync_legislation(&mut summary).await,
            };
            summary.finish();
            match &result {
                Ok(()) => info!(
                    phase = %JobPhase::Done,
                    pages = summary.pages_fetched,
                    items = summary.items_seen,
                    records = summary.records_upserted,
                    sponsorships = summary.sponsorships_upserted,
                    details_missing = summary.details_missing,
                    "job finished"
                ),
                Err(err) => error!(phase = %JobPhase::Failed, error = %err, "job failed"),
            }
            self.write_report(&summary).await;
            result
        }
        .instrument(span)
        .await;

        outcome.map(|()| summary)
    }

    async fn write_report(&self, summary: &SyncRunSummary) {
        let Some(dir) = &self.config.reports_dir else {
            return;
        };
        match write_run_report(dir, summary).await {
            Ok(path) => info!(path = %path.display(), "run report written"),
            Err(err) => warn!(error = %format!("{err:#}"), "could not write run report"),
        }
    }

    async fn sync_members(&self, summary: &mut SyncRunSummary) -> Result<(), SyncError> {
        let limit = self.config.member_page_limit;
        let start = self
            .endpoints
            .member_list(limit, self.config.current_members_only);
        let mut cursor = PageCursor::new(start, MEMBERS_KEY, self.config.page_policy(limit));

        loop {
            debug!(phase = %JobPhase::FetchingPage, page = cursor.pages_fetched() + 1);
            let Some(items) = cursor.next_page(&self.fetcher).await else {
                break;
            };
            summary.pages_fetched += 1;
            summary.items_seen += items.len();

            debug!(phase = %JobPhase::EnrichingBatch, items = items.len());
            let synced_at = Utc::now();
            let outcomes = self
                .runner
                .run(&items, move |item| self.enrich_member(item, synced_at))
                .await;

            let mut records = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                match outcome {
                    Ok(record) => {
                        if !record.enriched {
                            summary.details_missing += 1;
                        }
                        records.push(record);
                    }
                    Err(err) => {
                        warn!(error = %err, "member listing entry skipped");
                        summary.items_skipped += 1;
                    }
                }
            }

            debug!(phase = %JobPhase::Persisting, records = records.len());
            if !records.is_empty() {
                summary.records_upserted += self.store.upsert_members(&records).await?;
            }
            if cursor.status() == WalkStatus::Running {
                debug!(phase = %JobPhase::NextPage, offset = cursor.offset());
            }
        }

        summary.walk_status = Some(cursor.status());
        summary.record_walk(cursor.status());
        Ok(())
    }

    async fn enrich_member(
        &self,
        item: &JsonValue,
        synced_at: DateTime<Utc>,
    ) -> Result<MemberRecord, AdapterError> {
        let response = match member_bioguide_id(item) {
            Some(id) => self.fetcher.fetch_json(&self.endpoints.member_detail(id)).await,
            None => None,
        };
        normalize_member(item, response.as_ref().and_then(member_detail_payload), synced_at)
    }

    async fn sync_legislation(&self, summary: &mut SyncRunSummary) -> Result<(), SyncError> {
        let seeds = self.store.current_member_seeds().await?;
        info!(members = seeds.len(), "walking sponsorship lists of current members");

        for chunk in seeds.chunks(self.config.member_batch_size) {
            debug!(phase = %JobPhase::EnrichingBatch, members = chunk.len());
            let synced_at = Utc::now();
            let harvests = self
                .runner
                .run(chunk, move |seed| self.collect_member_legislation(seed, synced_at))
                .await;

            let mut records = Vec::new();
            let mut sponsorships = Vec::new();
            for harvest in harvests {
                summary.pages_fetched += harvest.pages_fetched;
                summary.items_seen += harvest.items_seen;
                summary.details_missing += harvest.details_missing;
                summary.items_skipped += harvest.items_skipped;
                if harvest.skipped {
                    summary.members_skipped += 1;
                }
                for status in harvest.walks {
                    summary.record_walk(status);
                }
                records.extend(harvest.records);
                sponsorships.extend(harvest.sponsorships);
            }

            debug!(
                phase = %JobPhase::Persisting,
                records = records.len(),
                sponsorships = sponsorships.len()
            );
            if !records.is_empty() {
                summary.records_upserted += self.store.upsert_legislation(&records).await?;
            }
            if !sponsorships.is_empty() {
                summary.sponsorships_upserted += self.store.upsert_sponsorships(&sponsorships).await?;
            }
        }
        Ok(())
    }

    async fn collect_member_legislation(
        &self,
        seed: &MemberSeed,
        synced_at: DateTime<Utc>,
    ) -> MemberHarvest {
        let mut harvest = MemberHarvest::default();
        if !seed.has_legislation_urls() {
            debug!(bioguide_id = %seed.bioguide_id, "no sponsorship lists; member skipped");
            harvest.skipped = true;
            return harvest;
        }

        let limit = self.config.legislation_page_limit;
        for role in SponsorshipRole::ALL {
            let Some(url) = seed.url_for(role) else {
                continue;
            };
            let mut cursor = PageCursor::new(
                with_page_limit(url, limit),
                items_key(role),
                self.config.page_policy(limit),
            );

            while let Some(items) = cursor.next_page(&self.fetcher).await {
                harvest.pages_fetched += 1;
                harvest.items_seen += items.len();

                let entries: Vec<(&JsonValue, Option<JsonValue>)> = if self.config.legislation_details {
                    self.runner
                        .run(&items, move |item| async move {
                            (item, self.fetch_legislation_detail(item).await)
                        })
                        .await
                } else {
                    items.iter().map(|item| (item, None)).collect()
                };

                for (item, detail) in entries {
                    let payload = detail.as_ref().and_then(legislation_detail_payload);
                    match normalize_legislation(item, payload, synced_at) {
                        Ok(record) => {
                            if self.config.legislation_details && payload.is_none() {
                                harvest.details_missing += 1;
                            }
                            harvest
                                .sponsorships
                                .push(Sponsorship::for_record(&seed.bioguide_id, &record, role));
                            harvest.records.push(record);
                        }
                        Err(err) => {
                            warn!(bioguide_id = %seed.bioguide_id, %role, error = %err, "legislation entry skipped");
                            harvest.items_skipped += 1;
                        }
                    }
                }
            }
            harvest.walks.push(cursor.status());
        }
        harvest
    }

    async fn fetch_legislation_detail(&self, item: &JsonValue) -> Option<JsonValue> {
        let url = legislation_detail_url(item)?;
        self.fetcher.fetch_json(url).await
    }

    /// Register the cron triggers; each firing queues its job on `triggers`.
    pub async fn maybe_build_scheduler(
        &self,
        triggers: mpsc::Sender<JobKind>,
    ) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for (kind, cron) in [
            (JobKind::Members, &self.config.sync_cron_members),
            (JobKind::Legislation, &self.config.sync_cron_legislation),
        ] {
            let tx = triggers.clone();
            let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
                let tx = tx.clone();
                Box::pin(async move {
                    if tx.try_send(kind).is_err() {
                        warn!(job = %kind, "run already queued; trigger dropped");
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
            info!(job = %kind, cron = cron.as_str(), "scheduled");
        }
        Ok(Some(sched))
    }

    /// Run queued jobs one at a time until every sender is gone.
    pub async fn drain_triggers(&self, mut triggers: mpsc::Receiver<JobKind>) {
        while let Some(job) = triggers.recv().await {
            if let Err(err) = self.run_job(job).await {
                error!(job = %job, error = %err, "scheduled run failed");
            }
        }
    }
}

/// One-shot run for the job executables; configuration is checked before
/// anything touches the network.
pub async fn run_job_from_env(job: JobKind) -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env()?;
    let pipeline = SyncPipeline::connect(config).await?;
    Ok(pipeline.run_job(job).await?)
}
