//! libSQL storage layer for reports, fragments, rules, and keywords.
//!
//! The [`Storage`] struct wraps a local libSQL database holding the report
//! lifecycle table, extracted text fragments, rejection rules, and the
//! keyword list that drives searching. Raw payloads live next to it in a
//! content-addressed [`BlobStore`].

mod blob;
mod migrations;

use std::path::Path;

use chrono::Utc;
use leakscan_shared::{
    Keyword, KeywordKind, LeakscanError, REJECT_AUTO_REMOVED, REJECT_MANUAL, REJECT_NONE,
    RejectRule, Report, ReportStatus, Result, TextFragment,
};
use libsql::{Connection, Database, params};

pub use blob::BlobStore;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LeakscanError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    LeakscanError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Report operations
    // -----------------------------------------------------------------------

    /// Insert a report unless one with the same content hash already exists.
    /// Returns the new row ID, or `None` on a dedup hit.
    pub async fn insert_report(
        &self,
        source: &str,
        status: ReportStatus,
        content_hash: &str,
        data: &serde_json::Value,
    ) -> Result<Option<i64>> {
        if self.report_exists(content_hash).await? {
            return Ok(None);
        }
        let now = Utc::now().to_rfc3339();
        let data_json = serde_json::to_string(data)
            .map_err(|e| LeakscanError::parse(format!("report data: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO reports (source, status, content_hash, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    source,
                    status.as_str(),
                    content_hash,
                    data_json.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Whether a report with this content hash has been sighted before.
    pub async fn report_exists(&self, content_hash: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM reports WHERE content_hash = ?1 LIMIT 1",
                params![content_hash],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(LeakscanError::Storage(e.to_string())),
        }
    }

    /// Get a report by ID.
    pub async fn get_report(&self, id: i64) -> Result<Option<Report>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source, status, content_hash, data, created_at
                 FROM reports WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_report(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LeakscanError::Storage(e.to_string())),
        }
    }

    /// List reports from one source sitting at a lifecycle status, oldest first.
    pub async fn reports_by_status(
        &self,
        source: &str,
        status: ReportStatus,
    ) -> Result<Vec<Report>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source, status, content_hash, data, created_at
                 FROM reports WHERE source = ?1 AND status = ?2 ORDER BY id",
                params![source, status.as_str()],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_report(&row)?);
        }
        Ok(results)
    }

    /// Count reports per status for one source. Returns `(status, count)` pairs.
    pub async fn report_status_counts(&self, source: &str) -> Result<Vec<(String, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM reports WHERE source = ?1
                 GROUP BY status ORDER BY status",
                params![source],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let status: String = row
                .get(0)
                .map_err(|e| LeakscanError::Storage(e.to_string()))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| LeakscanError::Storage(e.to_string()))?;
            results.push((status, count as u64));
        }
        Ok(results)
    }

    /// Set one report's lifecycle status.
    pub async fn update_report_status(&self, id: i64, status: ReportStatus) -> Result<()> {
        self.conn
            .execute(
                "UPDATE reports SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Move every report of `source` from one status to the next in a single
    /// statement. Returns the number of reports advanced.
    pub async fn advance_reports(
        &self,
        source: &str,
        from: ReportStatus,
        to: ReportStatus,
    ) -> Result<u64> {
        let changed = self
            .conn
            .execute(
                "UPDATE reports SET status = ?1 WHERE source = ?2 AND status = ?3",
                params![to.as_str(), source, from.as_str()],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Fragment operations
    // -----------------------------------------------------------------------

    /// Insert a fragment unless an identical one (by content hash) already
    /// exists. Returns the new row ID, or `None` on a dedup hit.
    pub async fn insert_fragment(&self, fragment: &TextFragment) -> Result<Option<i64>> {
        if self.fragment_exists(&fragment.content_hash).await? {
            return Ok(None);
        }
        let keywords_json = serde_json::to_string(&fragment.keywords)
            .map_err(|e| LeakscanError::parse(format!("fragment keywords: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO fragments (report_id, reject_id, source, content, content_hash, keywords)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    fragment.report_id,
                    fragment.reject_id,
                    fragment.source.as_str(),
                    fragment.text.as_str(),
                    fragment.content_hash.as_str(),
                    keywords_json.as_str()
                ],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Whether a fragment with this content hash already exists.
    pub async fn fragment_exists(&self, content_hash: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM fragments WHERE content_hash = ?1 LIMIT 1",
                params![content_hash],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(LeakscanError::Storage(e.to_string())),
        }
    }

    /// Get a fragment by ID.
    pub async fn get_fragment(&self, id: i64) -> Result<Option<TextFragment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, report_id, reject_id, source, content, content_hash, keywords
                 FROM fragments WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_fragment(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LeakscanError::Storage(e.to_string())),
        }
    }

    /// List all fragments cut from one report.
    pub async fn fragments_by_report(&self, report_id: i64) -> Result<Vec<TextFragment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, report_id, reject_id, source, content, content_hash, keywords
                 FROM fragments WHERE report_id = ?1 ORDER BY id",
                params![report_id],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_fragment(&row)?);
        }
        Ok(results)
    }

    /// Page through fragments of one source with a given classification.
    pub async fn fragments_by_reject(
        &self,
        source: &str,
        reject_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TextFragment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, report_id, reject_id, source, content, content_hash, keywords
                 FROM fragments WHERE source = ?1 AND reject_id = ?2
                 ORDER BY id LIMIT ?3 OFFSET ?4",
                params![source, reject_id, limit as i64, offset as i64],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_fragment(&row)?);
        }
        Ok(results)
    }

    /// Count fragments of one source with a given classification.
    pub async fn count_fragments_by_reject(&self, source: &str, reject_id: i64) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM fragments WHERE source = ?1 AND reject_id = ?2",
                params![source, reject_id],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| LeakscanError::Storage(e.to_string()))?;
                Ok(count as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(LeakscanError::Storage(e.to_string())),
        }
    }

    /// Count fragments of a report still awaiting classification.
    pub async fn count_unclassified_in_report(&self, report_id: i64) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM fragments WHERE report_id = ?1 AND reject_id = ?2",
                params![report_id, REJECT_NONE],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| LeakscanError::Storage(e.to_string()))?;
                Ok(count as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(LeakscanError::Storage(e.to_string())),
        }
    }

    /// Set one fragment's classification.
    pub async fn update_fragment_reject(&self, id: i64, reject_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE fragments SET reject_id = ?1 WHERE id = ?2",
                params![reject_id, id],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Mark a report's sibling fragments as auto-removed, sparing the kept
    /// fragment and anything a reviewer marked manually. Returns how many
    /// fragments were touched.
    pub async fn auto_remove_siblings(&self, report_id: i64, keep_fragment_id: i64) -> Result<u64> {
        let changed = self
            .conn
            .execute(
                "UPDATE fragments SET reject_id = ?1
                 WHERE report_id = ?2 AND id != ?3 AND reject_id != ?4",
                params![REJECT_AUTO_REMOVED, report_id, keep_fragment_id, REJECT_MANUAL],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(changed)
    }

    /// Delete a fragment by ID.
    pub async fn delete_fragment(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM fragments WHERE id = ?1", params![id])
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rule operations
    // -----------------------------------------------------------------------

    /// Insert a rejection rule. Returns its row ID.
    pub async fn insert_rule(&self, name: &str, pattern: &str) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO rules (name, pattern) VALUES (?1, ?2)",
                params![name, pattern],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Delete a rejection rule. The reserved classification rows stay.
    pub async fn delete_rule(&self, id: i64) -> Result<()> {
        if id <= REJECT_AUTO_REMOVED {
            return Err(LeakscanError::validation(format!(
                "rule {id} is a reserved classification and cannot be deleted"
            )));
        }
        self.conn
            .execute("DELETE FROM rules WHERE id = ?1", params![id])
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(())
    }

    /// All rejection rules in ID order. The evaluation order of the filter
    /// is exactly this order.
    pub async fn all_rules(&self) -> Result<Vec<RejectRule>> {
        let mut rows = self
            .conn
            .query("SELECT id, name, pattern FROM rules ORDER BY id", params![])
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(RejectRule {
                id: row
                    .get::<i64>(0)
                    .map_err(|e| LeakscanError::Storage(e.to_string()))?,
                name: row
                    .get::<String>(1)
                    .map_err(|e| LeakscanError::Storage(e.to_string()))?,
                pattern: row
                    .get::<String>(2)
                    .map_err(|e| LeakscanError::Storage(e.to_string()))?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Keyword operations
    // -----------------------------------------------------------------------

    /// Insert a keyword. Returns its row ID.
    pub async fn insert_keyword(&self, value: &str, kind: KeywordKind) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO keywords (value, kind) VALUES (?1, ?2)",
                params![value, kind.as_str()],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Delete a keyword by value.
    pub async fn delete_keyword(&self, value: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM keywords WHERE value = ?1", params![value])
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;
        Ok(())
    }

    /// List keywords of one kind.
    pub async fn keywords_by_kind(&self, kind: KeywordKind) -> Result<Vec<Keyword>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, value, kind FROM keywords WHERE kind = ?1 ORDER BY id",
                params![kind.as_str()],
            )
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_keyword(&row)?);
        }
        Ok(results)
    }

    /// List every keyword, regardless of kind.
    pub async fn all_keywords(&self) -> Result<Vec<Keyword>> {
        let mut rows = self
            .conn
            .query("SELECT id, value, kind FROM keywords ORDER BY id", params![])
            .await
            .map_err(|e| LeakscanError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_keyword(&row)?);
        }
        Ok(results)
    }
}

/// Convert a database row to a [`Report`].
fn row_to_report(row: &libsql::Row) -> Result<Report> {
    let status_str: String = row
        .get(2)
        .map_err(|e| LeakscanError::Storage(e.to_string()))?;
    let data_str: String = row
        .get(4)
        .map_err(|e| LeakscanError::Storage(e.to_string()))?;
    let created_str: String = row
        .get(5)
        .map_err(|e| LeakscanError::Storage(e.to_string()))?;
    Ok(Report {
        id: row
            .get::<i64>(0)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        source: row
            .get::<String>(1)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        status: status_str
            .parse::<ReportStatus>()
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        content_hash: row
            .get::<String>(3)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        data: serde_json::from_str(&data_str)
            .map_err(|e| LeakscanError::Storage(format!("invalid report data: {e}")))?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_str)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .map_err(|e| LeakscanError::Storage(format!("invalid date: {e}")))?,
    })
}

/// Convert a database row to a [`TextFragment`].
fn row_to_fragment(row: &libsql::Row) -> Result<TextFragment> {
    let keywords_str: String = row
        .get(6)
        .map_err(|e| LeakscanError::Storage(e.to_string()))?;
    Ok(TextFragment {
        id: row
            .get::<i64>(0)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        report_id: row
            .get::<i64>(1)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        reject_id: row
            .get::<i64>(2)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        source: row
            .get::<String>(3)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        text: row
            .get::<String>(4)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        content_hash: row
            .get::<String>(5)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        keywords: serde_json::from_str(&keywords_str)
            .map_err(|e| LeakscanError::Storage(format!("invalid keyword spans: {e}")))?,
    })
}

/// Convert a database row to a [`Keyword`].
fn row_to_keyword(row: &libsql::Row) -> Result<Keyword> {
    let kind_str: String = row
        .get(2)
        .map_err(|e| LeakscanError::Storage(e.to_string()))?;
    Ok(Keyword {
        id: row
            .get::<i64>(0)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        value: row
            .get::<String>(1)
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
        kind: kind_str
            .parse::<KeywordKind>()
            .map_err(|e| LeakscanError::Storage(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use leakscan_shared::{REJECT_MANUAL, REJECT_VERIFIED, content_hash};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("leakscan_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    async fn seed_report(storage: &Storage, source: &str, status: ReportStatus) -> i64 {
        let hash = content_hash(Uuid::now_v7().to_string().as_bytes());
        storage
            .insert_report(source, status, &hash, &serde_json::json!({}))
            .await
            .expect("insert report")
            .expect("fresh hash")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("leakscan_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn report_insert_dedup_by_hash() {
        let storage = test_storage().await;
        let hash = content_hash(b"payload");

        let first = storage
            .insert_report("github", ReportStatus::Processed, &hash, &serde_json::json!({}))
            .await
            .expect("first insert");
        assert!(first.is_some());

        let second = storage
            .insert_report("github", ReportStatus::Processed, &hash, &serde_json::json!({}))
            .await
            .expect("second insert");
        assert!(second.is_none());
        assert!(storage.report_exists(&hash).await.unwrap());
    }

    #[tokio::test]
    async fn report_status_queries() {
        let storage = test_storage().await;
        seed_report(&storage, "github", ReportStatus::Processed).await;
        seed_report(&storage, "github", ReportStatus::Processed).await;
        seed_report(&storage, "gist", ReportStatus::Processed).await;

        let github = storage
            .reports_by_status("github", ReportStatus::Processed)
            .await
            .expect("select");
        assert_eq!(github.len(), 2);

        // Queries are scoped per source
        let gist = storage
            .reports_by_status("gist", ReportStatus::Processed)
            .await
            .unwrap();
        assert_eq!(gist.len(), 1);
    }

    #[tokio::test]
    async fn advance_reports_is_scoped() {
        let storage = test_storage().await;
        seed_report(&storage, "github", ReportStatus::Processed).await;
        seed_report(&storage, "github", ReportStatus::Processed).await;
        seed_report(&storage, "github", ReportStatus::Fetched).await;
        seed_report(&storage, "gist", ReportStatus::Processed).await;

        let moved = storage
            .advance_reports("github", ReportStatus::Processed, ReportStatus::Fetched)
            .await
            .expect("advance");
        assert_eq!(moved, 2);

        // gist report untouched
        let gist = storage
            .reports_by_status("gist", ReportStatus::Processed)
            .await
            .unwrap();
        assert_eq!(gist.len(), 1);

        let fetched = storage
            .reports_by_status("github", ReportStatus::Fetched)
            .await
            .unwrap();
        assert_eq!(fetched.len(), 3);
    }

    #[tokio::test]
    async fn update_single_report_status() {
        let storage = test_storage().await;
        let id = seed_report(&storage, "github", ReportStatus::New).await;

        storage
            .update_report_status(id, ReportStatus::Validated)
            .await
            .expect("update");

        let report = storage.get_report(id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Validated);
    }

    #[tokio::test]
    async fn fragment_insert_dedup_and_lookup() {
        let storage = test_storage().await;
        let report_id = seed_report(&storage, "github", ReportStatus::Fetched).await;

        let frag = TextFragment::new(
            report_id,
            "github",
            REJECT_NONE,
            "token=abc123".into(),
            vec![(0, 5)],
        );
        let id = storage
            .insert_fragment(&frag)
            .await
            .expect("insert")
            .expect("fresh hash");
        assert!(id > 0);

        // Identical text hashes identically and is dropped
        let dup = TextFragment::new(
            report_id,
            "github",
            REJECT_NONE,
            "token=abc123".into(),
            vec![(0, 5)],
        );
        assert!(storage.insert_fragment(&dup).await.unwrap().is_none());

        let stored = storage.get_fragment(id).await.unwrap().unwrap();
        assert_eq!(stored.text, "token=abc123");
        assert_eq!(stored.keywords, vec![(0, 5)]);
        assert_eq!(stored.reject_id, REJECT_NONE);

        let by_report = storage.fragments_by_report(report_id).await.unwrap();
        assert_eq!(by_report.len(), 1);
    }

    #[tokio::test]
    async fn fragment_pagination_and_counts() {
        let storage = test_storage().await;
        let report_id = seed_report(&storage, "github", ReportStatus::New).await;

        for i in 0..5 {
            let frag = TextFragment::new(
                report_id,
                "github",
                REJECT_NONE,
                format!("secret number {i}"),
                vec![(0, 6)],
            );
            storage.insert_fragment(&frag).await.unwrap();
        }

        assert_eq!(
            storage
                .count_fragments_by_reject("github", REJECT_NONE)
                .await
                .unwrap(),
            5
        );

        let page = storage
            .fragments_by_reject("github", REJECT_NONE, 2, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].text, "secret number 2");
    }

    #[tokio::test]
    async fn auto_remove_spares_kept_and_manual_fragments() {
        let storage = test_storage().await;
        let report_id = seed_report(&storage, "github", ReportStatus::New).await;

        let mut ids = Vec::new();
        for i in 0..4 {
            let frag = TextFragment::new(
                report_id,
                "github",
                REJECT_NONE,
                format!("candidate {i}"),
                vec![],
            );
            ids.push(storage.insert_fragment(&frag).await.unwrap().unwrap());
        }

        storage
            .update_fragment_reject(ids[0], REJECT_VERIFIED)
            .await
            .unwrap();
        storage
            .update_fragment_reject(ids[1], REJECT_MANUAL)
            .await
            .unwrap();

        let removed = storage.auto_remove_siblings(report_id, ids[0]).await.unwrap();
        assert_eq!(removed, 2);

        let verified = storage.get_fragment(ids[0]).await.unwrap().unwrap();
        assert_eq!(verified.reject_id, REJECT_VERIFIED);
        let manual = storage.get_fragment(ids[1]).await.unwrap().unwrap();
        assert_eq!(manual.reject_id, REJECT_MANUAL);
        let other = storage.get_fragment(ids[2]).await.unwrap().unwrap();
        assert_eq!(other.reject_id, REJECT_AUTO_REMOVED);
        assert_eq!(
            storage.count_unclassified_in_report(report_id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn rules_seeded_and_ordered() {
        let storage = test_storage().await;

        let rules = storage.all_rules().await.expect("all rules");
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].id, REJECT_NONE);
        assert_eq!(rules[0].name, "none");
        assert_eq!(rules[1].id, REJECT_MANUAL);
        assert_eq!(rules[3].name, "auto_removed");
        assert!(rules.iter().all(|r| r.pattern.is_empty()));
    }

    #[tokio::test]
    async fn rule_crud_preserves_reserved_rows() {
        let storage = test_storage().await;

        let id = storage
            .insert_rule("example-key", r"(?i)example")
            .await
            .expect("insert rule");
        assert_eq!(id, 5);

        assert!(storage.delete_rule(REJECT_MANUAL).await.is_err());
        storage.delete_rule(id).await.expect("delete custom rule");
        assert_eq!(storage.all_rules().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn keyword_crud_by_kind() {
        let storage = test_storage().await;

        storage
            .insert_keyword("AWS_SECRET", KeywordKind::Searchable)
            .await
            .unwrap();
        storage
            .insert_keyword("passwd", KeywordKind::Inner)
            .await
            .unwrap();

        let searchable = storage
            .keywords_by_kind(KeywordKind::Searchable)
            .await
            .unwrap();
        assert_eq!(searchable.len(), 1);
        assert_eq!(searchable[0].value, "AWS_SECRET");

        assert_eq!(storage.all_keywords().await.unwrap().len(), 2);

        storage.delete_keyword("passwd").await.unwrap();
        assert_eq!(storage.all_keywords().await.unwrap().len(), 1);
    }
}
