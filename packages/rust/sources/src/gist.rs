//! Gist search stage.
//!
//! Gists have no code-search API, so this stage scrapes the HTML search
//! result pages. The page itself is the content: each body is hashed and
//! stored whole as a `fetched` report, then fragmented like any other text.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use leakscan_pipeline::{
    FixedRateLimiter, MiddlewareStage, Outcome, RateLimiter, ReportText, RequestSink, Stage,
    StageRequest, TextSink,
};
use leakscan_shared::{
    KeywordKind, LeakscanError, ReportStatus, Result, ScanConfig, content_hash,
};
use leakscan_storage::{BlobStore, Storage};

use crate::{auth_token, GITHUB_ACCEPT};

/// Default gist host.
const GIST_BASE: &str = "https://gist.github.com";

/// Marker the search page shows when a page has no results.
const NO_RESULTS_MARKER: &str = "We couldn\u{2019}t find any gists matching";

/// Page depths the probe walks to bound the fan-out per keyword.
const PROBE_PAGES: &[u64] = &[0, 5, 10, 20, 50, 100];

/// Pages loaded when every probe page still has results.
const DEFAULT_PAGES: u64 = 5;

fn search_url(base: &str, keyword: &str, page: u64) -> String {
    format!("{base}/search?p={page}&q={keyword}&ref=searchresults&s=updated")
}

/// Stage scraping gist search pages into `fetched` reports.
pub struct GistStage {
    storage: Arc<Storage>,
    blobs: BlobStore,
    client: Client,
    config: ScanConfig,
    cancel: CancellationToken,
    base: String,
}

impl GistStage {
    pub fn new(
        storage: Arc<Storage>,
        blobs: BlobStore,
        config: ScanConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            storage,
            blobs,
            client: Client::new(),
            config,
            cancel,
            base: GIST_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base(mut self, base: &str) -> Self {
        self.base = base.to_string();
        self
    }

    fn build_request(&self, keyword: &str, page: u64, token: Option<&str>) -> Result<reqwest::Request> {
        let mut builder = self
            .client
            .get(search_url(&self.base, keyword, page))
            .header("Accept", GITHUB_ACCEPT);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("token {token}"));
        }
        builder
            .build()
            .map_err(|e| LeakscanError::Network(e.to_string()))
    }

    /// Walk the probe depths until a page comes back empty; the first empty
    /// depth bounds the fan-out for this keyword.
    async fn probe_page_count(
        &self,
        keyword: &str,
        token: Option<&str>,
        limiter: &FixedRateLimiter,
    ) -> Result<u64> {
        for &page in PROBE_PAGES {
            limiter.wait(&self.cancel, None).await;
            if self.cancel.is_cancelled() {
                return Ok(0);
            }

            let request = self.build_request(keyword, page, token)?;
            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| LeakscanError::Network(format!("gist probe: {e}")))?;
            let body = response
                .text()
                .await
                .map_err(|e| LeakscanError::Network(format!("gist probe body: {e}")))?;

            if body.contains(NO_RESULTS_MARKER) {
                return Ok(page);
            }
        }
        Ok(DEFAULT_PAGES)
    }
}

#[async_trait]
impl MiddlewareStage for GistStage {
    fn name(&self) -> &str {
        "gist"
    }

    async fn build_requests(&self, sink: &RequestSink) -> Result<()> {
        let keywords = self.storage.keywords_by_kind(KeywordKind::Searchable).await?;
        if keywords.is_empty() {
            info!("no searchable keywords configured");
            return Ok(());
        }

        let tokens = &self.config.tokens;
        let limiter = FixedRateLimiter::new(self.config.request_rate);
        let mut id: u64 = 0;

        for (i, keyword) in keywords.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let pages = match self
                .probe_page_count(&keyword.value, auth_token(tokens, i), &limiter)
                .await
            {
                Ok(pages) => pages,
                Err(e) => {
                    warn!(keyword = %keyword.value, error = %e, "gist probe failed");
                    continue;
                }
            };
            debug!(keyword = %keyword.value, pages, "gist fan-out sized");

            for page in 0..pages {
                let request =
                    match self.build_request(&keyword.value, page, auth_token(tokens, id as usize)) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!(keyword = %keyword.value, page, error = %e, "bad gist request");
                            continue;
                        }
                    };
                sink.send(StageRequest::new(id, request)).await?;
                id += 1;
            }
        }
        Ok(())
    }

    fn check_response(&self, status: StatusCode, _attempt: u32) -> Outcome {
        match status.as_u16() {
            200 => Outcome::Ok,
            _ => Outcome::Wait,
        }
    }

    async fn process_response(&self, body: &[u8], _request_id: u64) -> Result<()> {
        // Pages past the end still answer 200 with the empty marker
        if String::from_utf8_lossy(body).contains(NO_RESULTS_MARKER) {
            return Ok(());
        }

        let hash = content_hash(body);
        let inserted = self
            .storage
            .insert_report("gist", ReportStatus::Fetched, &hash, &serde_json::json!({}))
            .await?;
        if inserted.is_none() {
            debug!(hash = %hash, "gist page already known");
            return Ok(());
        }

        self.blobs.write(&hash, body)?;
        Ok(())
    }
}

#[async_trait]
impl Stage for GistStage {
    async fn texts_to_process(&self, sink: &TextSink) -> Result<()> {
        let reports = self
            .storage
            .reports_by_status("gist", ReportStatus::Fetched)
            .await?;

        for report in reports {
            let data = match self.blobs.read(&report.content_hash) {
                Ok(data) => data,
                Err(e) => {
                    warn!(report_id = report.id, error = %e, "blob missing");
                    continue;
                }
            };
            sink.send(ReportText {
                report_id: report.id,
                source: "gist".into(),
                text: String::from_utf8_lossy(&data).into_owned(),
            })
            .await?;
        }
        Ok(())
    }

    async fn process_fragment(&self, fragment: leakscan_shared::TextFragment) -> Result<()> {
        self.storage.insert_fragment(&fragment).await?;
        Ok(())
    }
}
