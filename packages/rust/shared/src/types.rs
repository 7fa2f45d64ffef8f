//! Core domain types for the leak-scan pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LeakscanError;

/// Reject id of untouched fragments, seeded as rule `none`.
pub const REJECT_NONE: i64 = 1;
/// Reject id assigned when an operator rejects a fragment by hand.
pub const REJECT_MANUAL: i64 = 2;
/// Reject id assigned when an operator confirms a real leak.
pub const REJECT_VERIFIED: i64 = 3;
/// Reject id assigned to siblings of a verified fragment.
pub const REJECT_AUTO_REMOVED: i64 = 4;

/// Compute the SHA-256 content hash of raw bytes, hex-encoded.
///
/// Used both for deduplication and as the blob-store filename.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// ReportStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`Report`].
///
/// Reports move `Processed → Fetched → Fragmented → New` as scan phases
/// complete, then to a terminal `Closed` or `Validated` through triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// A source-search hit has been recorded.
    Processed,
    /// Raw content has been retrieved and stored.
    Fetched,
    /// Keyword fragments have been generated.
    Fragmented,
    /// Visible for operator triage.
    New,
    /// All fragments classified without a verified leak.
    Closed,
    /// At least one fragment confirmed as a real leak.
    Validated,
}

impl ReportStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Fetched => "fetched",
            Self::Fragmented => "fragmented",
            Self::New => "new",
            Self::Closed => "closed",
            Self::Validated => "validated",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReportStatus {
    type Err = LeakscanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "fetched" => Ok(Self::Fetched),
            "fragmented" => Ok(Self::Fragmented),
            "new" => Ok(Self::New),
            "closed" => Ok(Self::Closed),
            "validated" => Ok(Self::Validated),
            other => Err(LeakscanError::validation(format!(
                "unknown report status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// A unit of fetched content from one source adapter.
///
/// The raw payload lives in the blob store under `content_hash`; the `data`
/// field carries adapter-specific JSON metadata (e.g. the search item).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Database row id (0 before insert).
    pub id: i64,
    /// Source adapter name, e.g. "github" or "gist".
    pub source: String,
    /// Lifecycle state.
    pub status: ReportStatus,
    /// Hex SHA-256 of the raw payload; dedup key and blob filename.
    pub content_hash: String,
    /// Adapter metadata (provider search item, etc.).
    pub data: serde_json::Value,
    /// First-sighting timestamp.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TextFragment
// ---------------------------------------------------------------------------

/// A reviewable snippet cut from a report's text.
///
/// `keywords` holds `(offset, length)` byte spans locating matched keywords
/// relative to the start of `text`; every span lies within `[0, text.len())`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextFragment {
    /// Database row id (0 before insert).
    pub id: i64,
    /// Owning report.
    pub report_id: i64,
    /// Triage classification; see the `REJECT_*` constants and [`RejectRule`].
    pub reject_id: i64,
    /// Source adapter name, inherited from the report.
    pub source: String,
    /// The fragment's raw text.
    pub text: String,
    /// Hex SHA-256 of `text`, used for dedup.
    pub content_hash: String,
    /// Keyword spans relative to `text`, ascending by offset.
    pub keywords: Vec<(usize, usize)>,
}

impl TextFragment {
    /// Build a fragment from its text, computing the content hash.
    pub fn new(
        report_id: i64,
        source: impl Into<String>,
        reject_id: i64,
        text: String,
        keywords: Vec<(usize, usize)>,
    ) -> Self {
        let content_hash = content_hash(text.as_bytes());
        Self {
            id: 0,
            report_id,
            reject_id,
            source: source.into(),
            text,
            content_hash,
            keywords,
        }
    }
}

// ---------------------------------------------------------------------------
// RejectRule / Keyword
// ---------------------------------------------------------------------------

/// A false-positive suppression rule.
///
/// `pattern` compiles to a regex; the four seed rules (`none`, `manual`,
/// `verified`, `auto_removed`) carry empty patterns and are never matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRule {
    pub id: i64,
    pub name: String,
    pub pattern: String,
}

/// Whether a keyword drives provider searches or only local fragmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordKind {
    /// Sent to providers as a search query and used during fragmentation.
    Searchable,
    /// Only used during local fragmentation, never sent to a provider.
    Inner,
}

impl KeywordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Searchable => "searchable",
            Self::Inner => "inner",
        }
    }
}

impl std::str::FromStr for KeywordKind {
    type Err = LeakscanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "searchable" => Ok(Self::Searchable),
            "inner" => Ok(Self::Inner),
            other => Err(LeakscanError::validation(format!(
                "unknown keyword kind: {other}"
            ))),
        }
    }
}

/// A sensitive keyword the fragmentizer looks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: i64,
    pub value: String,
    pub kind: KeywordKind,
}
