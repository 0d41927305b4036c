//! SQL schema for the papertrend SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Raw store ────────────────────────────────────────────────────────────
-- Strictly append-only. No UPDATE or DELETE is ever issued against it.
CREATE TABLE IF NOT EXISTS raw_records (
    raw_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    source        TEXT NOT NULL,   -- 'openreview' | 'openalex' | 's2' | 'arxiv'
    source_id     TEXT NOT NULL,
    title         TEXT NOT NULL,
    abstract      TEXT NOT NULL DEFAULT '',
    authors       TEXT NOT NULL DEFAULT '[]',
    year          INTEGER,
    venue_raw     TEXT,
    categories    TEXT NOT NULL DEFAULT '[]',
    doi           TEXT,
    arxiv_id      TEXT,
    openalex_id   TEXT,
    comments      TEXT,
    journal_ref   TEXT,
    retrieved_at  TEXT NOT NULL,   -- RFC 3339 UTC, fixed width
    published_at  TEXT,            -- as reported by the source
    UNIQUE (source, source_id)
);

-- ── Canonical store ──────────────────────────────────────────────────────
CREATE TABLE IF NOT EXISTS papers (
    paper_id        TEXT PRIMARY KEY,
    canonical_title TEXT NOT NULL,
    display_title   TEXT NOT NULL,
    abstract        TEXT NOT NULL DEFAULT '',
    authors         TEXT NOT NULL DEFAULT '[]',
    year            INTEGER,
    venue           TEXT,
    venue_source    TEXT,
    domain          TEXT,
    quality_flag    TEXT NOT NULL DEFAULT 'unknown',
    categories      TEXT NOT NULL DEFAULT '[]',
    doi             TEXT,
    arxiv_id        TEXT,
    openalex_id     TEXT,
    published_at    TEXT,
    first_seen_at   TEXT NOT NULL,
    primary_source  TEXT NOT NULL,
    origin_raw_id   INTEGER NOT NULL REFERENCES raw_records(raw_id)
);

-- Append-only; one link per raw record.
CREATE TABLE IF NOT EXISTS source_links (
    raw_id           INTEGER PRIMARY KEY REFERENCES raw_records(raw_id),
    paper_id         TEXT NOT NULL REFERENCES papers(paper_id),
    source           TEXT NOT NULL,
    confidence_score REAL NOT NULL CHECK (confidence_score BETWEEN 0 AND 1),
    match_reason     TEXT NOT NULL,
    linked_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS match_conflicts (
    raw_id          INTEGER PRIMARY KEY REFERENCES raw_records(raw_id),
    candidates      TEXT NOT NULL,   -- JSON array of paper ids
    best_similarity REAL NOT NULL,
    recorded_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS paper_keywords (
    paper_id TEXT NOT NULL REFERENCES papers(paper_id),
    keyword  TEXT NOT NULL,
    method   TEXT NOT NULL,
    score    REAL NOT NULL DEFAULT 1.0,
    UNIQUE (paper_id, keyword, method)
);

-- ── Cache store ──────────────────────────────────────────────────────────
-- Rows are only ever upserted; a rebuild writes 0 instead of deleting.
CREATE TABLE IF NOT EXISTS trend_entries (
    scope       TEXT NOT NULL,
    scope_id    TEXT NOT NULL,
    keyword     TEXT NOT NULL,
    granularity TEXT NOT NULL,
    bucket      TEXT NOT NULL,
    count       INTEGER NOT NULL,
    PRIMARY KEY (scope, scope_id, keyword, granularity, bucket)
);

CREATE TABLE IF NOT EXISTS bucket_summaries (
    scope        TEXT NOT NULL,
    scope_id     TEXT NOT NULL,
    granularity  TEXT NOT NULL,
    bucket       TEXT NOT NULL,
    paper_count  INTEGER NOT NULL,
    top_keywords TEXT NOT NULL DEFAULT '[]',
    updated_at   TEXT NOT NULL,
    PRIMARY KEY (scope, scope_id, granularity, bucket)
);

CREATE TABLE IF NOT EXISTS keyword_totals (
    scope    TEXT NOT NULL,
    scope_id TEXT NOT NULL,
    keyword  TEXT NOT NULL,
    count    INTEGER NOT NULL,
    PRIMARY KEY (scope, scope_id, keyword)
);

CREATE TABLE IF NOT EXISTS scope_summaries (
    scope        TEXT NOT NULL,
    scope_id     TEXT NOT NULL,
    paper_count  INTEGER NOT NULL,
    top_keywords TEXT NOT NULL DEFAULT '[]',
    updated_at   TEXT NOT NULL,
    PRIMARY KEY (scope, scope_id)
);

-- Per-item progress: papers already folded into each scope's counts.
CREATE TABLE IF NOT EXISTS processed_papers (
    scope        TEXT NOT NULL,
    scope_id     TEXT NOT NULL,
    paper_id     TEXT NOT NULL,
    published_at TEXT,            -- the paper's bucket timestamp when folded in
    PRIMARY KEY (scope, scope_id, paper_id)
);

CREATE TABLE IF NOT EXISTS analysis_watermarks (
    scope    TEXT NOT NULL,
    scope_id TEXT NOT NULL,
    key      TEXT NOT NULL,   -- 'max_timestamp' | 'paper_count' | 'updated_at'
    value    TEXT NOT NULL,
    PRIMARY KEY (scope, scope_id, key)
);

CREATE TABLE IF NOT EXISTS emerging_records (
    scope          TEXT NOT NULL,
    scope_id       TEXT NOT NULL,
    keyword        TEXT NOT NULL,
    granularity    TEXT NOT NULL,
    growth_rate    REAL,             -- NULL = unbounded (new keyword)
    recent_count   INTEGER NOT NULL,
    previous_count INTEGER NOT NULL,
    first_seen     TEXT NOT NULL,
    trend          TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    PRIMARY KEY (scope, scope_id, keyword)
);

CREATE TABLE IF NOT EXISTS run_log (
    run_id               TEXT PRIMARY KEY,
    started_at           TEXT NOT NULL,
    finished_at          TEXT NOT NULL,
    status               TEXT NOT NULL,
    degraded             INTEGER NOT NULL,
    degraded_papers      INTEGER NOT NULL,
    timestamp_fallbacks  INTEGER NOT NULL,
    bucket_format_errors INTEGER NOT NULL,
    papers_processed     INTEGER NOT NULL,
    note                 TEXT
);

CREATE INDEX IF NOT EXISTS raw_retrieved_idx   ON raw_records(retrieved_at);
CREATE INDEX IF NOT EXISTS papers_doi_idx      ON papers(doi);
CREATE INDEX IF NOT EXISTS papers_venue_idx    ON papers(venue);
CREATE INDEX IF NOT EXISTS papers_seen_idx     ON papers(first_seen_at);
CREATE INDEX IF NOT EXISTS links_paper_idx     ON source_links(paper_id);
CREATE INDEX IF NOT EXISTS run_log_started_idx ON run_log(started_at);

PRAGMA user_version = 1;
";
