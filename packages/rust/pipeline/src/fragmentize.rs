//! Keyword-context extraction over fetched report texts.
//!
//! A fragmentizer pass streams texts from a [`Stage`], cuts a context
//! window around every keyword occurrence, filters false positives with
//! the rejection rules, merges overlapping windows, and hands the
//! resulting [`TextFragment`]s back to the stage for persistence.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use leakscan_fragment::{
    Fragment, find_keyword, join, keywords_in_contexts, merge, widen_to_context,
};
use leakscan_shared::{
    Keyword, LeakscanError, REJECT_NONE, RejectRule, Result, ScanConfig, TextFragment,
};

use crate::stage::Stage;

/// A fetched report text awaiting fragmentation.
pub struct ReportText {
    pub report_id: i64,
    pub source: String,
    pub text: String,
}

/// Handle a stage uses to push texts into the fragmentizer queue.
pub struct TextSink {
    tx: mpsc::Sender<ReportText>,
}

impl TextSink {
    /// Wrap a raw sender; used by the engine and by stage tests.
    pub fn from_sender(tx: mpsc::Sender<ReportText>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, text: ReportText) -> Result<()> {
        self.tx
            .send(text)
            .await
            .map_err(|_| LeakscanError::validation("text queue closed"))
    }
}

/// One rejection rule with its pattern compiled.
struct CompiledRule {
    id: i64,
    name: String,
    regex: Regex,
}

/// Immutable snapshot of the rejection rules, compiled once per pass.
///
/// Rules with empty patterns (the reserved triage classifications) never
/// match and are excluded from the snapshot. Evaluation order is rule ID
/// order and the first conclusive match wins.
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn compile(rules: &[RejectRule]) -> Result<Self> {
        let mut compiled = Vec::new();
        for rule in rules {
            if rule.pattern.is_empty() {
                continue;
            }
            let regex = Regex::new(&rule.pattern).map_err(|e| {
                LeakscanError::parse(format!("rule {} ({}): {e}", rule.id, rule.name))
            })?;
            compiled.push(CompiledRule {
                id: rule.id,
                name: rule.name.clone(),
                regex,
            });
        }
        Ok(Self { rules: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Immutable snapshot of the keyword list, taken once per pass.
pub struct KeywordSet {
    values: Vec<String>,
}

impl KeywordSet {
    pub fn new(keywords: &[Keyword]) -> Self {
        Self {
            values: keywords.iter().map(|k| k.value.clone()).collect(),
        }
    }

    pub fn from_values(values: Vec<String>) -> Self {
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Counters for one fragmentizer pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentStats {
    /// Texts pulled off the queue.
    pub texts: u64,
    /// Fragments handed to the stage (force-rejected ones included).
    pub fragments: u64,
}

/// Run a fragmentizer pass over every text the stage has waiting.
///
/// Only a `texts_to_process` error fails the pass, returned after the
/// queues drain; `process_fragment` errors are logged per fragment.
#[instrument(skip_all, fields(stage = stage.name()))]
pub async fn run_fragmentizer<S>(
    stage: Arc<S>,
    keywords: Arc<KeywordSet>,
    rules: Arc<RuleSet>,
    config: &ScanConfig,
    cancel: &CancellationToken,
) -> Result<FragmentStats>
where
    S: Stage + ?Sized + 'static,
{
    let (text_tx, text_rx) = mpsc::channel::<ReportText>(config.queue_capacity);
    let (frag_tx, mut frag_rx) = mpsc::channel::<TextFragment>(config.queue_capacity);
    let text_rx = Arc::new(Mutex::new(text_rx));

    let texts = Arc::new(AtomicU64::new(0));
    let fragments = Arc::new(AtomicU64::new(0));

    info!(workers = config.fragment_workers, "starting fragmentizer");

    let producer = tokio::spawn({
        let stage = stage.clone();
        async move {
            let sink = TextSink { tx: text_tx };
            stage.texts_to_process(&sink).await
        }
    });

    let mut workers = Vec::new();
    for _ in 0..config.fragment_workers.max(1) {
        let text_rx = text_rx.clone();
        let frag_tx = frag_tx.clone();
        let keywords = keywords.clone();
        let rules = rules.clone();
        let cancel = cancel.clone();
        let texts = texts.clone();
        let context_len = config.context_len;
        let max_context_len = config.max_context_len;

        workers.push(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                let next = { text_rx.lock().await.recv().await };
                let Some(report) = next else {
                    return;
                };
                texts.fetch_add(1, Ordering::Relaxed);

                let frags = fragment_text(
                    &report,
                    &keywords,
                    &rules,
                    context_len,
                    max_context_len,
                );
                debug!(
                    report_id = report.report_id,
                    fragments = frags.len(),
                    "fragmented text"
                );
                for frag in frags {
                    if frag_tx.send(frag).await.is_err() {
                        return;
                    }
                }
            }
        }));
    }
    drop(frag_tx);

    // Single consumer keeps persistence ordering simple
    let consumer = tokio::spawn({
        let stage = stage.clone();
        let fragments = fragments.clone();
        async move {
            while let Some(frag) = frag_rx.recv().await {
                fragments.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = stage.process_fragment(frag).await {
                    warn!(stage = stage.name(), error = %e, "process_fragment failed");
                }
            }
        }
    });

    let produce_result = producer
        .await
        .map_err(|e| LeakscanError::validation(format!("producer task panicked: {e}")))?;

    for handle in workers {
        let _ = handle.await;
    }
    let _ = consumer.await;

    produce_result?;

    let stats = FragmentStats {
        texts: texts.load(Ordering::Relaxed),
        fragments: fragments.load(Ordering::Relaxed),
    };
    info!(texts = stats.texts, fragments = stats.fragments, "fragmentizer finished");
    Ok(stats)
}

/// Cut every fragment out of one report text.
///
/// Occurrences that trip a rejection rule become standalone force-rejected
/// fragments and bypass merging; the rest have their context windows merged
/// across keywords, joined under the length ceiling, and emitted with
/// window-relative keyword spans.
pub fn fragment_text(
    report: &ReportText,
    keywords: &KeywordSet,
    rules: &RuleSet,
    context_len: usize,
    max_context_len: usize,
) -> Vec<TextFragment> {
    let text = report.text.as_str();
    let mut rejected = Vec::new();
    let mut contexts: Vec<Fragment> = Vec::new();
    let mut spans: Vec<Fragment> = Vec::new();

    for keyword in &keywords.values {
        let mut kept_contexts = Vec::new();
        let mut kept_spans = Vec::new();

        for hit in find_keyword(text, keyword) {
            // a keyword longer than the configured context still needs a
            // window that contains it
            let window = widen_to_context(text, context_len.max(hit.length), &hit);

            match check_keyword_context(text, &window, &hit, rules) {
                Some(rule_id) => {
                    let Ok(window_text) = window.apply(text) else {
                        continue;
                    };
                    rejected.push(TextFragment::new(
                        report.report_id,
                        report.source.clone(),
                        rule_id,
                        window_text.to_string(),
                        vec![(hit.offset - window.offset, hit.length)],
                    ));
                }
                None => {
                    kept_contexts.push(window);
                    kept_spans.push(hit);
                }
            }
        }

        contexts = merge(&contexts, &kept_contexts);
        spans = merge(&spans, &kept_spans);
    }

    let joined = join(&contexts, max_context_len);
    let grouped = keywords_in_contexts(&spans, &joined);

    let mut out = Vec::new();
    for (window, span_indexes) in joined.iter().zip(grouped) {
        let Ok(window_text) = window.apply(text) else {
            continue;
        };
        let relative: Vec<(usize, usize)> = span_indexes
            .iter()
            .map(|&i| (spans[i].offset - window.offset, spans[i].length))
            .collect();
        out.push(TextFragment::new(
            report.report_id,
            report.source.clone(),
            REJECT_NONE,
            window_text.to_string(),
            relative,
        ));
    }

    out.extend(rejected);
    out
}

/// Apply the rejection rules to one keyword occurrence.
///
/// A rule is conclusive when its pattern matches the context window but no
/// longer matches once the keyword bytes are removed; the match is then
/// attributed to that rule. A pattern matching both with and without the
/// keyword says nothing about this occurrence, so evaluation moves on.
fn check_keyword_context(
    text: &str,
    window: &Fragment,
    keyword: &Fragment,
    rules: &RuleSet,
) -> Option<i64> {
    let Ok(full) = window.apply(text) else {
        return None;
    };
    // a window that does not contain the occurrence says nothing about it
    let start = keyword.offset.checked_sub(window.offset)?;
    let end = start + keyword.length;
    let (Some(before), Some(after)) = (full.get(..start), full.get(end..)) else {
        return None;
    };
    let stripped = format!("{before}{after}");

    for rule in &rules.rules {
        if rule.regex.is_match(full) && !rule.regex.is_match(&stripped) {
            debug!(rule = %rule.name, "keyword context rejected");
            return Some(rule.id);
        }
    }
    None
}
