//! Scan orchestration and triage for Leakscan.
//!
//! This crate drives whole scans (stages, fragmentizer passes, lifecycle
//! advances) and owns the triage rules that move reports to their terminal
//! statuses. The CLI is a thin layer over these entry points.

pub mod scan;
pub mod triage;

pub use scan::{ScanSummary, run_github_scan, run_gist_scan};
pub use triage::mark_fragment;
