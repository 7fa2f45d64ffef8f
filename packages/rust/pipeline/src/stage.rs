//! Request/response stage engine.
//!
//! A stage run moves work through three phases over bounded queues: one
//! builder task produces [`StageRequest`]s, dispatch workers send them and
//! classify the responses, and process workers consume the bodies. The run
//! returns only after every phase has drained.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use leakscan_shared::{LeakscanError, Result, ScanConfig, TextFragment};

use crate::fragmentize::TextSink;
use crate::limiter::{RateHints, RateLimiter};

/// Classification of a response by its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Response is good; hand the body to a process worker.
    Ok,
    /// Transient failure; back off and resend the same request.
    Wait,
    /// Unusable request; drop it and move on.
    Skip,
}

/// An outbound request tagged with a stage-chosen correlation ID.
pub struct StageRequest {
    pub id: u64,
    pub request: reqwest::Request,
}

impl StageRequest {
    pub fn new(id: u64, request: reqwest::Request) -> Self {
        Self { id, request }
    }
}

/// Handle a stage uses to push requests into the dispatch queue.
pub struct RequestSink {
    tx: mpsc::Sender<StageRequest>,
}

impl RequestSink {
    /// Wrap a raw sender; used by the engine and by stage tests.
    pub fn from_sender(tx: mpsc::Sender<StageRequest>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, request: StageRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| LeakscanError::validation("request queue closed"))
    }
}

/// A request/response stage: builds requests, classifies responses, and
/// consumes the accepted bodies.
#[async_trait]
pub trait MiddlewareStage: Send + Sync {
    /// Stage name, used in logs.
    fn name(&self) -> &str;

    /// Called once before any request is built.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Called once after every phase has drained.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Push every request this run should send. Closing the sink (by
    /// returning) ends the dispatch phase once the queue drains.
    async fn build_requests(&self, sink: &RequestSink) -> Result<()>;

    /// Classify a response status. `attempt` starts at 1.
    fn check_response(&self, status: StatusCode, attempt: u32) -> Outcome;

    /// Consume an accepted response body. Errors are logged, never fatal.
    async fn process_response(&self, body: &[u8], request_id: u64) -> Result<()>;
}

/// A stage that additionally feeds the fragmentizer: it streams report
/// texts and receives the fragments cut from them.
#[async_trait]
pub trait Stage: MiddlewareStage {
    /// Push every report text awaiting fragmentation.
    async fn texts_to_process(&self, sink: &TextSink) -> Result<()>;

    /// Persist one extracted fragment. Duplicates (by content hash) are
    /// silently dropped by the implementation.
    async fn process_fragment(&self, fragment: TextFragment) -> Result<()>;
}

/// Counters for one stage run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageStats {
    /// Requests handed to dispatch workers.
    pub requests: u64,
    /// Responses accepted and processed.
    pub ok: u64,
    /// Requests abandoned (skip outcome, retry ceiling, network error).
    pub skipped: u64,
}

/// Run the request/response phases of a stage to completion.
///
/// Only a `build_requests` error fails the run, and it is returned after
/// the queues drain. Dispatch and process failures are logged per request.
#[instrument(skip_all, fields(stage = stage.name()))]
pub async fn run_middleware_stage<S>(
    stage: Arc<S>,
    client: &Client,
    limiter: Arc<dyn RateLimiter>,
    config: &ScanConfig,
    cancel: &CancellationToken,
) -> Result<StageStats>
where
    S: MiddlewareStage + ?Sized + 'static,
{
    stage.init().await?;

    let (req_tx, req_rx) = mpsc::channel::<StageRequest>(config.queue_capacity);
    let (resp_tx, resp_rx) = mpsc::channel::<(u64, Vec<u8>)>(config.queue_capacity);
    let req_rx = Arc::new(Mutex::new(req_rx));
    let resp_rx = Arc::new(Mutex::new(resp_rx));
    let last_hints: Arc<Mutex<Option<RateHints>>> = Arc::new(Mutex::new(None));

    let requests = Arc::new(AtomicU64::new(0));
    let ok = Arc::new(AtomicU64::new(0));
    let skipped = Arc::new(AtomicU64::new(0));

    info!(
        dispatch_workers = config.dispatch_workers,
        process_workers = config.process_workers,
        "starting stage"
    );

    let builder = tokio::spawn({
        let stage = stage.clone();
        async move {
            let sink = RequestSink { tx: req_tx };
            stage.build_requests(&sink).await
        }
    });

    let mut dispatchers = Vec::new();
    for _ in 0..config.dispatch_workers.max(1) {
        dispatchers.push(tokio::spawn(dispatch_worker(DispatchContext {
            stage: stage.clone(),
            client: client.clone(),
            limiter: limiter.clone(),
            req_rx: req_rx.clone(),
            resp_tx: resp_tx.clone(),
            last_hints: last_hints.clone(),
            max_retries: config.max_retries,
            backoff: Duration::from_secs(config.backoff_secs),
            cancel: cancel.clone(),
            requests: requests.clone(),
            ok: ok.clone(),
            skipped: skipped.clone(),
        })));
    }
    // Response queue closes when the last dispatcher exits
    drop(resp_tx);

    let mut processors = Vec::new();
    for _ in 0..config.process_workers.max(1) {
        processors.push(tokio::spawn(process_worker(stage.clone(), resp_rx.clone())));
    }

    let build_result = builder
        .await
        .map_err(|e| LeakscanError::validation(format!("builder task panicked: {e}")))?;

    for handle in dispatchers {
        let _ = handle.await;
    }
    for handle in processors {
        let _ = handle.await;
    }

    stage.close().await?;
    build_result?;

    let stats = StageStats {
        requests: requests.load(Ordering::Relaxed),
        ok: ok.load(Ordering::Relaxed),
        skipped: skipped.load(Ordering::Relaxed),
    };
    info!(
        requests = stats.requests,
        ok = stats.ok,
        skipped = stats.skipped,
        "stage finished"
    );
    Ok(stats)
}

struct DispatchContext<S: ?Sized> {
    stage: Arc<S>,
    client: Client,
    limiter: Arc<dyn RateLimiter>,
    req_rx: Arc<Mutex<mpsc::Receiver<StageRequest>>>,
    resp_tx: mpsc::Sender<(u64, Vec<u8>)>,
    last_hints: Arc<Mutex<Option<RateHints>>>,
    max_retries: u32,
    backoff: Duration,
    cancel: CancellationToken,
    requests: Arc<AtomicU64>,
    ok: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
}

/// Pull requests off the queue, pace them, and classify the responses.
async fn dispatch_worker<S>(ctx: DispatchContext<S>)
where
    S: MiddlewareStage + ?Sized,
{
    loop {
        if ctx.cancel.is_cancelled() {
            return;
        }

        let next = { ctx.req_rx.lock().await.recv().await };
        let Some(StageRequest { id, request }) = next else {
            return;
        };
        ctx.requests.fetch_add(1, Ordering::Relaxed);

        if !dispatch_one(&ctx, id, &request).await {
            ctx.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Send one request with retries. Returns `true` if a body was forwarded.
async fn dispatch_one<S>(ctx: &DispatchContext<S>, id: u64, request: &reqwest::Request) -> bool
where
    S: MiddlewareStage + ?Sized,
{
    let stage_name = ctx.stage.name();
    let mut attempt = 1u32;

    loop {
        if ctx.cancel.is_cancelled() {
            return false;
        }

        let hints = { ctx.last_hints.lock().await.clone() };
        ctx.limiter.wait(&ctx.cancel, hints.as_ref()).await;
        if ctx.cancel.is_cancelled() {
            return false;
        }

        // Streaming bodies cannot be replayed; stages only build buffered ones
        let Some(cloned) = request.try_clone() else {
            warn!(stage = stage_name, request_id = id, "request body not cloneable");
            return false;
        };

        match ctx.client.execute(cloned).await {
            Ok(response) => {
                if let Some(hints) = RateHints::from_headers(response.headers()) {
                    *ctx.last_hints.lock().await = Some(hints);
                }

                let status = response.status();
                match ctx.stage.check_response(status, attempt) {
                    Outcome::Ok => match response.bytes().await {
                        Ok(body) => {
                            ctx.ok.fetch_add(1, Ordering::Relaxed);
                            // Send fails only when processors are gone, i.e. shutdown
                            return ctx.resp_tx.send((id, body.to_vec())).await.is_ok();
                        }
                        Err(e) => {
                            warn!(stage = stage_name, request_id = id, error = %e, "body read failed");
                            return false;
                        }
                    },
                    Outcome::Wait => {
                        if attempt >= ctx.max_retries {
                            warn!(
                                stage = stage_name,
                                request_id = id,
                                status = status.as_u16(),
                                attempts = attempt,
                                "retry ceiling reached"
                            );
                            return false;
                        }
                        debug!(
                            stage = stage_name,
                            request_id = id,
                            status = status.as_u16(),
                            attempt,
                            "backing off"
                        );
                        attempt += 1;
                        tokio::select! {
                            _ = ctx.cancel.cancelled() => return false,
                            _ = tokio::time::sleep(ctx.backoff) => {}
                        }
                    }
                    Outcome::Skip => {
                        debug!(
                            stage = stage_name,
                            request_id = id,
                            status = status.as_u16(),
                            "skipping request"
                        );
                        return false;
                    }
                }
            }
            Err(e) if e.is_timeout() => {
                if attempt >= ctx.max_retries {
                    warn!(stage = stage_name, request_id = id, attempts = attempt, "timed out");
                    return false;
                }
                attempt += 1;
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return false,
                    _ = tokio::time::sleep(ctx.backoff) => {}
                }
            }
            Err(e) => {
                warn!(stage = stage_name, request_id = id, error = %e, "request failed");
                return false;
            }
        }
    }
}

/// Drain accepted bodies into the stage.
async fn process_worker<S>(stage: Arc<S>, resp_rx: Arc<Mutex<mpsc::Receiver<(u64, Vec<u8>)>>>)
where
    S: MiddlewareStage + ?Sized,
{
    loop {
        let next = { resp_rx.lock().await.recv().await };
        let Some((id, body)) = next else {
            return;
        };
        if let Err(e) = stage.process_response(&body, id).await {
            warn!(stage = stage.name(), request_id = id, error = %e, "process_response failed");
        }
    }
}
