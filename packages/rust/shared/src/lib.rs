//! Shared types, errors, and configuration for Leakscan.
//!
//! This crate holds everything the pipeline, storage, and source-adapter
//! crates need in common: the [`LeakscanError`] type, the report/fragment
//! domain model, and the TOML application config.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AppConfig, ScanConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, validate_tokens,
};
pub use error::{LeakscanError, Result};
pub use types::{
    Keyword, KeywordKind, REJECT_AUTO_REMOVED, REJECT_MANUAL, REJECT_NONE, REJECT_VERIFIED,
    RejectRule, Report, ReportStatus, TextFragment, content_hash,
};
