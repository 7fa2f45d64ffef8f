//! GitHub code-search and blob-fetch stages.
//!
//! Searching fans out over (language, keyword) pairs: a probe request per
//! pair reads `total_count` to size the page fan-out, then one request per
//! page goes through the engine. Fetching turns every `processed` report's
//! stored search item into a blob request against its `git_url`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use leakscan_pipeline::{
    FixedRateLimiter, MiddlewareStage, Outcome, RateLimiter, ReportText, RequestSink, Stage,
    StageRequest, TextSink,
};
use leakscan_shared::{KeywordKind, LeakscanError, ReportStatus, Result, ScanConfig};
use leakscan_storage::{BlobStore, Storage};

use crate::{auth_token, GITHUB_ACCEPT};

/// Default GitHub REST API base.
const API_BASE: &str = "https://api.github.com";

/// Items per search page, the API maximum.
const PAGE_SIZE: u64 = 100;

/// Deepest page the code-search API will serve.
const MAX_PAGES: u64 = 10;

/// Languages the search fans out over. The empty entry searches without a
/// language qualifier.
pub const LANGS: &[&str] = &[
    "",
    "C",
    "C#",
    "C++",
    "CoffeeScript",
    "CSS",
    "Dart",
    "DM",
    "Elixir",
    "Go",
    "Groovy",
    "HTML",
    "Java",
    "JavaScript",
    "Kotlin",
    "Objective-C",
    "Perl",
    "PHP",
    "PowerShell",
    "Python",
    "Ruby",
    "Rust",
    "Scala",
    "Shell",
    "Swift",
    "TypeScript",
    "CSV",
    "JSON",
    "Makefile",
    "Markdown",
    "YAML",
    "XML",
    "Diff",
    "Erlang",
    "GraphQL",
    "Jupyter+Notebook",
    "Lua",
    "Protocol+Buffer",
    "Public+Key",
    "SQL",
    "SSH+Config",
    "Text",
];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepoOwner {
    pub login: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitRepo {
    pub name: String,
    pub full_name: String,
    pub owner: GitRepoOwner,
}

/// One item of a code-search response; stored verbatim as report data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSearchItem {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub url: String,
    pub git_url: String,
    pub html_url: String,
    pub repository: GitRepo,
    #[serde(default)]
    pub score: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitSearchResponse {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<GitSearchItem>,
}

/// Blob response of the git data API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitFetchItem {
    pub content: String,
    pub encoding: String,
}

// ---------------------------------------------------------------------------
// Query / URL building
// ---------------------------------------------------------------------------

/// Search query for a keyword, optionally qualified by language.
pub fn build_search_query(keyword: &str, lang: &str) -> String {
    if lang.is_empty() {
        keyword.to_string()
    } else {
        format!("{keyword}+language:{lang}")
    }
}

fn search_url(base: &str, query: &str, page: u64) -> String {
    format!("{base}/search/code?q={query}&per_page={PAGE_SIZE}&page={page}")
}

fn build_search_request(
    client: &Client,
    base: &str,
    query: &str,
    page: u64,
    token: Option<&str>,
) -> Result<reqwest::Request> {
    let mut builder = client
        .get(search_url(base, query, page))
        .header("Accept", GITHUB_ACCEPT);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("token {token}"));
    }
    builder
        .build()
        .map_err(|e| LeakscanError::Network(e.to_string()))
}

/// Pages needed for `total_count` items, capped at the API page limit.
fn page_count(total_count: u64) -> u64 {
    total_count.div_ceil(PAGE_SIZE).min(MAX_PAGES)
}

// ---------------------------------------------------------------------------
// Search stage
// ---------------------------------------------------------------------------

/// Middleware stage running the code-search fan-out and recording each
/// unseen item as a `processed` report.
pub struct GithubSearchStage {
    storage: Arc<Storage>,
    client: Client,
    config: ScanConfig,
    cancel: CancellationToken,
    api_base: String,
    langs: Vec<String>,
}

impl GithubSearchStage {
    pub fn new(storage: Arc<Storage>, config: ScanConfig, cancel: CancellationToken) -> Self {
        Self {
            storage,
            client: Client::new(),
            config,
            cancel,
            api_base: API_BASE.to_string(),
            langs: LANGS.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.to_string();
        self
    }

    #[cfg(test)]
    fn with_langs(mut self, langs: &[&str]) -> Self {
        self.langs = langs.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Probe one query to learn how many pages it spans.
    async fn probe_page_count(&self, query: &str, token: Option<&str>) -> Result<u64> {
        let request = build_search_request(&self.client, &self.api_base, query, 1, token)?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| LeakscanError::Network(format!("search probe: {e}")))?;
        let parsed: GitSearchResponse = response
            .json()
            .await
            .map_err(|e| LeakscanError::parse(format!("search probe body: {e}")))?;
        Ok(page_count(parsed.total_count))
    }
}

#[async_trait]
impl MiddlewareStage for GithubSearchStage {
    fn name(&self) -> &str {
        "github-search"
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

        for (i, lang) in self.langs.iter().enumerate() {
            for (j, keyword) in keywords.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }

                let query = build_search_query(&keyword.value, lang);
                let probe_token = auth_token(tokens, i * keywords.len() + j);

                limiter.wait(&self.cancel, None).await;
                let pages = match self.probe_page_count(&query, probe_token).await {
                    Ok(pages) => pages,
                    Err(e) => {
                        warn!(query = %query, error = %e, "search probe failed");
                        continue;
                    }
                };
                debug!(query = %query, pages, "search fan-out sized");

                for page in 1..=pages {
                    let request = match build_search_request(
                        &self.client,
                        &self.api_base,
                        &query,
                        page,
                        auth_token(tokens, id as usize),
                    ) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!(query = %query, page, error = %e, "bad search request");
                            continue;
                        }
                    };
                    sink.send(StageRequest::new(id, request)).await?;
                    id += 1;
                }
            }
        }
        Ok(())
    }

    fn check_response(&self, status: StatusCode, _attempt: u32) -> Outcome {
        // 403 is the rate-limit answer; everything non-200 is worth a retry
        match status.as_u16() {
            200 => Outcome::Ok,
            _ => Outcome::Wait,
        }
    }

    async fn process_response(&self, body: &[u8], request_id: u64) -> Result<()> {
        let parsed: GitSearchResponse = serde_json::from_slice(body)
            .map_err(|e| LeakscanError::parse(format!("search response {request_id}: {e}")))?;

        for item in parsed.items {
            let data = serde_json::to_value(&item)
                .map_err(|e| LeakscanError::parse(format!("search item: {e}")))?;
            let inserted = self
                .storage
                .insert_report("github", ReportStatus::Processed, &item.sha, &data)
                .await?;
            if inserted.is_none() {
                debug!(sha = %item.sha, "report already known");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fetch stage
// ---------------------------------------------------------------------------

/// Stage fetching blob content for `processed` reports and feeding the
/// fragmentizer from the `fetched` ones.
pub struct GithubFetchStage {
    storage: Arc<Storage>,
    blobs: BlobStore,
    client: Client,
    config: ScanConfig,
    /// request id → report content hash, for naming the fetched blob.
    hashes: Mutex<HashMap<u64, String>>,
}

impl GithubFetchStage {
    pub fn new(storage: Arc<Storage>, blobs: BlobStore, config: ScanConfig) -> Self {
        Self {
            storage,
            blobs,
            client: Client::new(),
            config,
            hashes: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MiddlewareStage for GithubFetchStage {
    fn name(&self) -> &str {
        "github-fetch"
    }

    async fn build_requests(&self, sink: &RequestSink) -> Result<()> {
        let reports = self
            .storage
            .reports_by_status("github", ReportStatus::Processed)
            .await?;
        let tokens = &self.config.tokens;

        for (i, report) in reports.into_iter().enumerate() {
            let id = i as u64;
            let item: GitSearchItem = match serde_json::from_value(report.data.clone()) {
                Ok(item) => item,
                Err(e) => {
                    warn!(report_id = report.id, error = %e, "report data is not a search item");
                    continue;
                }
            };

            let mut builder = self.client.get(&item.git_url).header("Accept", GITHUB_ACCEPT);
            if let Some(token) = auth_token(tokens, i) {
                builder = builder.header("Authorization", format!("token {token}"));
            }
            let request = match builder.build() {
                Ok(request) => request,
                Err(e) => {
                    warn!(report_id = report.id, error = %e, "bad fetch request");
                    continue;
                }
            };

            self.hashes.lock().await.insert(id, report.content_hash);
            sink.send(StageRequest::new(id, request)).await?;
        }
        Ok(())
    }

    fn check_response(&self, status: StatusCode, _attempt: u32) -> Outcome {
        match status.as_u16() {
            200 => Outcome::Ok,
            _ => Outcome::Wait,
        }
    }

    async fn process_response(&self, body: &[u8], request_id: u64) -> Result<()> {
        let item: GitFetchItem = serde_json::from_slice(body)
            .map_err(|e| LeakscanError::parse(format!("fetch response {request_id}: {e}")))?;

        if item.encoding != "base64" {
            return Err(LeakscanError::parse(format!(
                "unknown blob encoding: {}",
                item.encoding
            )));
        }

        // The API wraps base64 at 60 columns
        let compact: String = item.content.split_whitespace().collect();
        let decoded = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| LeakscanError::parse(format!("blob base64: {e}")))?;

        let hash = {
            let hashes = self.hashes.lock().await;
            hashes.get(&request_id).cloned()
        };
        let Some(hash) = hash else {
            return Err(LeakscanError::validation(format!(
                "no report hash recorded for request {request_id}"
            )));
        };

        self.blobs.write(&hash, &decoded)?;
        Ok(())
    }
}

#[async_trait]
impl Stage for GithubFetchStage {
    async fn texts_to_process(&self, sink: &TextSink) -> Result<()> {
        let reports = self
            .storage
            .reports_by_status("github", ReportStatus::Fetched)
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
                source: "github".into(),
                text: String::from_utf8_lossy(&data).into_owned(),
            })
            .await?;
        }
        Ok(())
    }

    async fn process_fragment(&self, fragment: leakscan_shared::TextFragment) -> Result<()> {
        // insert is a no-op on a known content hash
        self.storage.insert_fragment(&fragment).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use leakscan_shared::{AppConfig, REJECT_NONE, TextFragment, content_hash};
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("leakscan_gh_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    fn test_blobs() -> BlobStore {
        let dir = std::env::temp_dir().join(format!("leakscan_gh_blobs_{}", Uuid::now_v7()));
        BlobStore::open(dir).expect("open blob store")
    }

    fn test_config() -> ScanConfig {
        let mut config = ScanConfig::from(&AppConfig::default());
        config.tokens = vec!["ghp_test".into()];
        config.request_rate = 0.0;
        config.backoff_secs = 0;
        config
    }

    fn search_item(sha: &str, git_url: &str) -> serde_json::Value {
        serde_json::json!({
            "name": "config.py",
            "path": "src/config.py",
            "sha": sha,
            "url": "https://api.github.com/x",
            "git_url": git_url,
            "html_url": "https://github.com/x",
            "repository": {
                "name": "repo",
                "full_name": "owner/repo",
                "owner": { "login": "owner", "url": "" }
            },
            "score": 1.0
        })
    }

    #[test]
    fn query_builder_appends_language() {
        assert_eq!(build_search_query("passwd", ""), "passwd");
        assert_eq!(build_search_query("passwd", "Go"), "passwd+language:Go");
    }

    #[test]
    fn page_count_rounds_up_and_caps() {
        assert_eq!(page_count(0), 0);
        assert_eq!(page_count(1), 1);
        assert_eq!(page_count(100), 1);
        assert_eq!(page_count(101), 2);
        assert_eq!(page_count(250), 3);
        assert_eq!(page_count(100_000), 10);
    }

    #[tokio::test]
    async fn search_stage_inserts_unseen_items() {
        let server = MockServer::start().await;
        let response = serde_json::json!({
            "total_count": 2,
            "incomplete_results": false,
            "items": [
                search_item("sha-one", "https://api.github.com/blob/1"),
                search_item("sha-two", "https://api.github.com/blob/2"),
            ]
        });
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .and(header("authorization", "token ghp_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        storage
            .insert_keyword("SECRET", KeywordKind::Searchable)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let stage = Arc::new(
            GithubSearchStage::new(storage.clone(), test_config(), cancel.clone())
                .with_api_base(&server.uri())
                .with_langs(&[""]),
        );

        let limiter: Arc<dyn RateLimiter> = Arc::new(FixedRateLimiter::new(0.0));
        let stats = leakscan_pipeline::run_middleware_stage(
            stage,
            &Client::new(),
            limiter,
            &test_config(),
            &cancel,
        )
        .await
        .expect("search run");

        // one probe hit (not counted) plus one page through the engine
        assert_eq!(stats.ok, 1);

        let reports = storage
            .reports_by_status("github", ReportStatus::Processed)
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].content_hash, "sha-one");
        assert_eq!(reports[0].data["git_url"], "https://api.github.com/blob/1");
    }

    #[tokio::test]
    async fn search_stage_dedups_by_sha() {
        let server = MockServer::start().await;
        let response = serde_json::json!({
            "total_count": 1,
            "items": [search_item("sha-known", "https://api.github.com/blob/1")]
        });
        Mock::given(method("GET"))
            .and(path("/search/code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        storage
            .insert_keyword("SECRET", KeywordKind::Searchable)
            .await
            .unwrap();
        // sighted on an earlier run
        storage
            .insert_report(
                "github",
                ReportStatus::New,
                "sha-known",
                &serde_json::json!({}),
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let stage = Arc::new(
            GithubSearchStage::new(storage.clone(), test_config(), cancel.clone())
                .with_api_base(&server.uri())
                .with_langs(&[""]),
        );
        let limiter: Arc<dyn RateLimiter> = Arc::new(FixedRateLimiter::new(0.0));
        leakscan_pipeline::run_middleware_stage(
            stage,
            &Client::new(),
            limiter,
            &test_config(),
            &cancel,
        )
        .await
        .expect("search run");

        // the earlier report kept its status, no duplicate appeared
        let processed = storage
            .reports_by_status("github", ReportStatus::Processed)
            .await
            .unwrap();
        assert!(processed.is_empty());
    }

    #[tokio::test]
    async fn fetch_stage_decodes_and_stores_blob() {
        let server = MockServer::start().await;
        let secret = "API_KEY=sk-live-1234\n";
        let blob = serde_json::json!({
            // wrapped the way the API wraps it
            "content": format!("{}\n", BASE64.encode(secret)),
            "encoding": "base64",
        });
        Mock::given(method("GET"))
            .and(path("/blob/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&blob))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let blobs = test_blobs();
        let hash = content_hash(b"report-one");
        storage
            .insert_report(
                "github",
                ReportStatus::Processed,
                &hash,
                &search_item("sha-one", &format!("{}/blob/1", server.uri())),
            )
            .await
            .unwrap();

        let stage = Arc::new(GithubFetchStage::new(
            storage.clone(),
            blobs.clone(),
            test_config(),
        ));
        let cancel = CancellationToken::new();
        let limiter: Arc<dyn RateLimiter> = Arc::new(FixedRateLimiter::new(0.0));
        let stats = leakscan_pipeline::run_middleware_stage(
            stage,
            &Client::new(),
            limiter,
            &test_config(),
            &cancel,
        )
        .await
        .expect("fetch run");

        assert_eq!(stats.ok, 1);
        assert_eq!(blobs.read(&hash).unwrap(), secret.as_bytes());
    }

    #[tokio::test]
    async fn fetch_stage_streams_fetched_texts() {
        let storage = test_storage().await;
        let blobs = test_blobs();

        let hash = content_hash(b"fetched-report");
        blobs.write(&hash, b"password=hunter2").unwrap();
        let report_id = storage
            .insert_report("github", ReportStatus::Fetched, &hash, &serde_json::json!({}))
            .await
            .unwrap()
            .unwrap();

        let stage = GithubFetchStage::new(storage.clone(), blobs, test_config());

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let sink = TextSink::from_sender(tx);
        stage.texts_to_process(&sink).await.expect("stream texts");
        drop(sink);

        let text = rx.recv().await.expect("one text");
        assert_eq!(text.report_id, report_id);
        assert_eq!(text.text, "password=hunter2");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn fragment_insert_is_idempotent() {
        let storage = test_storage().await;
        let report_id = storage
            .insert_report(
                "github",
                ReportStatus::Fragmented,
                &content_hash(b"r"),
                &serde_json::json!({}),
            )
            .await
            .unwrap()
            .unwrap();

        let stage = GithubFetchStage::new(storage.clone(), test_blobs(), test_config());
        let frag = TextFragment::new(report_id, "github", REJECT_NONE, "key=value".into(), vec![]);
        stage.process_fragment(frag.clone()).await.unwrap();
        stage.process_fragment(frag).await.unwrap();

        assert_eq!(storage.fragments_by_report(report_id).await.unwrap().len(), 1);
    }
}
