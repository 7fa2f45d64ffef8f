//! Scan orchestration: wires the source stages to the pipeline engine and
//! drives the report lifecycle between phases.
//!
//! A github scan runs the search stage, the fetch stage, then a
//! fragmentizer pass; reports advance `processed → fetched → fragmented →
//! new` in bulk as each phase completes. A gist scan skips the fetch phase
//! because the search response is already the content.

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use leakscan_pipeline::{
    AdaptiveRateLimiter, KeywordSet, RateLimiter, RuleSet, Stage, run_fragmentizer,
    run_middleware_stage,
};
use leakscan_shared::{ReportStatus, Result, ScanConfig};
use leakscan_sources::{GistStage, GithubFetchStage, GithubSearchStage};
use leakscan_storage::{BlobStore, Storage};

/// Totals for one scan run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSummary {
    /// Requests dispatched across all stages.
    pub requests: u64,
    /// Responses accepted and processed.
    pub responses: u64,
    /// Requests abandoned.
    pub skipped: u64,
    /// Texts fragmented.
    pub texts: u64,
    /// Fragments handed to storage (pre-dedup).
    pub fragments: u64,
    /// Reports that reached the `new` status this run.
    pub new_reports: u64,
}

/// Run a full github scan: search, fetch, fragmentize.
#[instrument(skip_all)]
pub async fn run_github_scan(
    storage: Arc<Storage>,
    blobs: BlobStore,
    config: &ScanConfig,
    cancel: &CancellationToken,
) -> Result<ScanSummary> {
    let client = Client::new();
    let limiter: Arc<dyn RateLimiter> = Arc::new(AdaptiveRateLimiter::new(config.request_rate));
    let mut summary = ScanSummary::default();

    let search = Arc::new(GithubSearchStage::new(
        storage.clone(),
        config.clone(),
        cancel.clone(),
    ));
    let stats = run_middleware_stage(search, &client, limiter.clone(), config, cancel).await?;
    summary.requests += stats.requests;
    summary.responses += stats.ok;
    summary.skipped += stats.skipped;

    let fetch = Arc::new(GithubFetchStage::new(
        storage.clone(),
        blobs,
        config.clone(),
    ));
    let stats = run_middleware_stage(fetch.clone(), &client, limiter, config, cancel).await?;
    summary.requests += stats.requests;
    summary.responses += stats.ok;
    summary.skipped += stats.skipped;

    let fetched = storage
        .advance_reports("github", ReportStatus::Processed, ReportStatus::Fetched)
        .await?;
    info!(fetched, "reports fetched");

    let (texts, fragments, new_reports) =
        fragment_pass(fetch, "github", &storage, config, cancel).await?;
    summary.texts = texts;
    summary.fragments = fragments;
    summary.new_reports = new_reports;

    Ok(summary)
}

/// Run a full gist scan: search pages become reports, then fragmentize.
#[instrument(skip_all)]
pub async fn run_gist_scan(
    storage: Arc<Storage>,
    blobs: BlobStore,
    config: &ScanConfig,
    cancel: &CancellationToken,
) -> Result<ScanSummary> {
    let client = Client::new();
    let limiter: Arc<dyn RateLimiter> = Arc::new(AdaptiveRateLimiter::new(config.request_rate));
    let mut summary = ScanSummary::default();

    let stage = Arc::new(GistStage::new(
        storage.clone(),
        blobs,
        config.clone(),
        cancel.clone(),
    ));
    let stats = run_middleware_stage(stage.clone(), &client, limiter, config, cancel).await?;
    summary.requests = stats.requests;
    summary.responses = stats.ok;
    summary.skipped = stats.skipped;

    let (texts, fragments, new_reports) =
        fragment_pass(stage, "gist", &storage, config, cancel).await?;
    summary.texts = texts;
    summary.fragments = fragments;
    summary.new_reports = new_reports;

    Ok(summary)
}

/// Fragmentize every `fetched` report of one source and advance the
/// lifecycle to `new`. Returns (texts, fragments, reports now new).
pub(crate) async fn fragment_pass<S>(
    stage: Arc<S>,
    source: &str,
    storage: &Storage,
    config: &ScanConfig,
    cancel: &CancellationToken,
) -> Result<(u64, u64, u64)>
where
    S: Stage + ?Sized + 'static,
{
    let keywords = Arc::new(KeywordSet::new(&storage.all_keywords().await?));
    let rules = Arc::new(RuleSet::compile(&storage.all_rules().await?)?);

    let stats = run_fragmentizer(stage, keywords, rules, config, cancel).await?;

    let fragmented = storage
        .advance_reports(source, ReportStatus::Fetched, ReportStatus::Fragmented)
        .await?;
    let new_reports = storage
        .advance_reports(source, ReportStatus::Fragmented, ReportStatus::New)
        .await?;
    info!(source, fragmented, new_reports, "lifecycle advanced");

    Ok((stats.texts, stats.fragments, new_reports))
}
