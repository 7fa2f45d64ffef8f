//! Scan pipeline: rate limiting, the request/response stage engine, and
//! the keyword fragmentizer.
//!
//! Source adapters implement the [`MiddlewareStage`] / [`Stage`] contracts;
//! the engine owns concurrency, retries, pacing, and queue plumbing so the
//! adapters only describe requests and consume responses.

pub mod fragmentize;
pub mod limiter;
pub mod stage;

pub use fragmentize::{
    FragmentStats, KeywordSet, ReportText, RuleSet, TextSink, fragment_text, run_fragmentizer,
};
pub use limiter::{AdaptiveRateLimiter, FixedRateLimiter, RateHints, RateLimiter};
pub use stage::{
    MiddlewareStage, Outcome, RequestSink, Stage, StageRequest, StageStats, run_middleware_stage,
};
