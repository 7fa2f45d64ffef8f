//! SQL migration definitions for the Leakscan database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as a batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: reports, fragments, rules, keywords",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per unique payload sighted by a source adapter
CREATE TABLE IF NOT EXISTS reports (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    source       TEXT NOT NULL,
    status       TEXT NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    data         TEXT NOT NULL DEFAULT '{}',
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reports_source_status ON reports(source, status);

-- Reviewable snippets cut from report texts
CREATE TABLE IF NOT EXISTS fragments (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id    INTEGER NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
    reject_id    INTEGER NOT NULL DEFAULT 1,
    source       TEXT NOT NULL,
    content      TEXT NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    keywords     TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_fragments_report ON fragments(report_id);
CREATE INDEX IF NOT EXISTS idx_fragments_source_reject ON fragments(source, reject_id);

-- False-positive suppression rules; the first four rows are reserved
-- triage classifications and carry no pattern
CREATE TABLE IF NOT EXISTS rules (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name    TEXT NOT NULL UNIQUE,
    pattern TEXT NOT NULL DEFAULT ''
);

INSERT INTO rules (name, pattern) VALUES ('none', '');
INSERT INTO rules (name, pattern) VALUES ('manual', '');
INSERT INTO rules (name, pattern) VALUES ('verified', '');
INSERT INTO rules (name, pattern) VALUES ('auto_removed', '');

-- Sensitive keywords driving search and fragmentation
CREATE TABLE IF NOT EXISTS keywords (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    value TEXT NOT NULL UNIQUE,
    kind  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
