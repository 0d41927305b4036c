//! [`SqliteStore`]: the SQLite implementation of the papertrend store traits.

use std::{
  collections::{BTreeSet, HashMap, HashSet},
  path::Path,
};

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use papertrend_core::{
  paper::{CanonicalPaper, MatchConflict, PaperKeyword, SourceLink},
  record::{NewRawRecord, RawRecord},
  run::RunRecord,
  store::{
    BucketRef, CacheCommit, CanonicalStore, CommitMode, FeedStatus, Freshness,
    RawFeed, ScopeStats, StructuringBatch, TrendReader, TrendStore,
  },
  trend::{
    BucketSummary, EmergingRecord, Granularity, KeywordCount, Scope, ScopeKey,
    ScopeSummary, TrendCacheEntry,
  },
  watermark::AnalysisWatermark,
};

use crate::{
  Error, Result,
  encode::{
    LINK_COLUMNS, PAPER_COLUMNS, RAW_RECORD_COLUMNS, RUN_COLUMNS, RawBucketSummary,
    RawConflict, RawEmerging, RawLink, RawPaper, RawRecordRow, RawRun,
    RawScopeSummary, decode_dt, decode_uuid, encode_dt, encode_list, encode_uuid,
  },
  schema::SCHEMA,
};

const WM_MAX_TIMESTAMP: &str = "max_timestamp";
const WM_PAPER_COUNT: &str = "paper_count";
const WM_UPDATED_AT: &str = "updated_at";

// ─── Store ───────────────────────────────────────────────────────────────────

/// The raw feed, canonical store, and trend cache backed by a single SQLite
/// file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_papers(
    &self,
    filter: String,
    params: Vec<String>,
    order: &'static str,
  ) -> Result<Vec<CanonicalPaper>> {
    let raws: Vec<RawPaper> = self
      .conn
      .call(move |conn| {
        let sql =
          format!("SELECT {PAPER_COLUMNS} FROM papers WHERE {filter} ORDER BY {order}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), RawPaper::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPaper::into_paper).collect()
  }
}

/// `WHERE` fragment and parameters selecting the aggregatable papers of
/// `scope`.
fn scope_filter(scope: &ScopeKey) -> (String, Vec<String>) {
  let base = "quality_flag != 'filtered'";
  match scope.scope {
    Scope::Global => (base.to_owned(), Vec::new()),
    Scope::Venue => (format!("{base} AND venue = ?1"), vec![scope.scope_id.clone()]),
    Scope::Category => (
      format!(
        "{base} AND EXISTS (SELECT 1 FROM json_each(papers.categories) WHERE \
         json_each.value = ?1)"
      ),
      vec![scope.scope_id.clone()],
    ),
  }
}

fn sql_count(n: u64) -> i64 { i64::try_from(n).unwrap_or(i64::MAX) }

fn other_err(e: impl std::error::Error + Send + Sync + 'static) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(e))
}

/// Run a `SELECT keyword, count ...` already ordered and limited by SQL.
fn query_ranked<P: rusqlite::Params>(
  conn: &rusqlite::Connection,
  sql: &str,
  params: P,
) -> rusqlite::Result<Vec<KeywordCount>> {
  let mut stmt = conn.prepare_cached(sql)?;
  let ranked = stmt
    .query_map(params, |row| {
      Ok(KeywordCount { keyword: row.get(0)?, count: row.get::<_, i64>(1)?.max(0) as u64 })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(ranked)
}

const BUCKET_TOP_SQL: &str = "SELECT keyword, count FROM trend_entries
   WHERE scope = ?1 AND scope_id = ?2 AND granularity = ?3 AND bucket = ?4
     AND count > 0
   ORDER BY count DESC, keyword ASC
   LIMIT ?5";

const SCOPE_TOP_SQL: &str = "SELECT keyword, count FROM keyword_totals
   WHERE scope = ?1 AND scope_id = ?2 AND count > 0
   ORDER BY count DESC, keyword ASC
   LIMIT ?3";

// ─── RawFeed impl ────────────────────────────────────────────────────────────

impl RawFeed for SqliteStore {
  type Error = Error;

  async fn append(&self, record: NewRawRecord) -> Result<Option<RawRecord>> {
    let source = record.source.to_string();
    let authors = encode_list(&record.authors)?;
    let categories = encode_list(&record.categories)?;
    let retrieved_at = encode_dt(record.retrieved_at);

    let raw_id: Option<i64> = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT OR IGNORE INTO raw_records (
             source, source_id, title, abstract, authors, year, venue_raw,
             categories, doi, arxiv_id, openalex_id, comments, journal_ref,
             retrieved_at, published_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
          rusqlite::params![
            source,
            record.source_id,
            record.title,
            record.abstract_text,
            authors,
            record.year,
            record.venue_raw,
            categories,
            record.doi,
            record.arxiv_id,
            record.openalex_id,
            record.comments,
            record.journal_ref,
            retrieved_at,
            record.published_at,
          ],
        )?;
        Ok((inserted == 1).then(|| conn.last_insert_rowid()))
      })
      .await?;

    match raw_id {
      Some(id) => self.get_raw(id).await,
      None => Ok(None),
    }
  }

  async fn get_raw(&self, raw_id: i64) -> Result<Option<RawRecord>> {
    let raw: Option<RawRecordRow> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {RAW_RECORD_COLUMNS} FROM raw_records WHERE raw_id = ?1"),
            rusqlite::params![raw_id],
            RawRecordRow::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawRecordRow::into_record).transpose()
  }

  async fn retrieved_after(
    &self,
    after: Option<chrono::DateTime<Utc>>,
    limit: usize,
  ) -> Result<Vec<RawRecord>> {
    let after_str = after.map(encode_dt);
    let limit = sql_count(limit as u64);

    let raws: Vec<RawRecordRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RAW_RECORD_COLUMNS} FROM raw_records
           WHERE ?1 IS NULL OR retrieved_at > ?1
           ORDER BY raw_id
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![after_str, limit], RawRecordRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecordRow::into_record).collect()
  }

  async fn feed_status(&self) -> Result<FeedStatus> {
    let (count, max_at): (i64, Option<String>) = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*), MAX(retrieved_at) FROM raw_records",
          [],
          |r| Ok((r.get(0)?, r.get(1)?)),
        )?)
      })
      .await?;

    Ok(FeedStatus {
      record_count:     count.max(0) as u64,
      max_retrieved_at: max_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

// ─── CanonicalStore impl ─────────────────────────────────────────────────────

impl CanonicalStore for SqliteStore {
  type Error = Error;

  async fn unlinked_raw_records(
    &self,
    after_raw_id: i64,
    limit: usize,
  ) -> Result<Vec<RawRecord>> {
    let limit = sql_count(limit as u64);

    let raws: Vec<RawRecordRow> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RAW_RECORD_COLUMNS} FROM raw_records r
           WHERE r.raw_id > ?1
             AND NOT EXISTS (SELECT 1 FROM source_links l WHERE l.raw_id = r.raw_id)
             AND NOT EXISTS (SELECT 1 FROM match_conflicts c WHERE c.raw_id = r.raw_id)
           ORDER BY r.raw_id
           LIMIT ?2"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![after_raw_id, limit], RawRecordRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRecordRow::into_record).collect()
  }

  async fn load_papers(&self) -> Result<Vec<CanonicalPaper>> {
    self.query_papers("1 = 1".to_owned(), Vec::new(), "origin_raw_id").await
  }

  async fn get_paper(&self, paper_id: Uuid) -> Result<Option<CanonicalPaper>> {
    let mut found = self
      .query_papers("paper_id = ?1".to_owned(), vec![encode_uuid(paper_id)], "paper_id")
      .await?;
    Ok(found.pop())
  }

  async fn links_for(&self, paper_id: Uuid) -> Result<Vec<SourceLink>> {
    let id_str = encode_uuid(paper_id);

    let raws: Vec<RawLink> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {LINK_COLUMNS} FROM source_links WHERE paper_id = ?1 ORDER BY raw_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawLink::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLink::into_link).collect()
  }

  async fn all_links(&self) -> Result<Vec<SourceLink>> {
    let raws: Vec<RawLink> = self
      .conn
      .call(|conn| {
        let mut stmt = conn
          .prepare(&format!("SELECT {LINK_COLUMNS} FROM source_links ORDER BY raw_id"))?;
        let rows = stmt
          .query_map([], RawLink::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawLink::into_link).collect()
  }

  async fn commit_structuring(&self, batch: StructuringBatch) -> Result<()> {
    if batch.is_empty() {
      return Ok(());
    }

    let papers = batch
      .papers
      .into_iter()
      .map(|p| {
        let authors = encode_list(&p.authors)?;
        let categories = encode_list(&p.categories)?;
        Ok((p, authors, categories))
      })
      .collect::<Result<Vec<_>>>()?;
    let conflicts = batch
      .conflicts
      .into_iter()
      .map(|c| Ok((c.raw_id, encode_list(&c.candidates)?, c.best_similarity, c.recorded_at)))
      .collect::<Result<Vec<_>>>()?;
    let links = batch.links;
    let resolved = batch.resolved_conflicts;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut upsert = tx.prepare(
            "INSERT INTO papers (
               paper_id, canonical_title, display_title, abstract, authors, year,
               venue, venue_source, domain, quality_flag, categories, doi,
               arxiv_id, openalex_id, published_at, first_seen_at,
               primary_source, origin_raw_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                       ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT (paper_id) DO UPDATE SET
               canonical_title = excluded.canonical_title,
               display_title   = excluded.display_title,
               abstract        = excluded.abstract,
               authors         = excluded.authors,
               year            = excluded.year,
               venue           = excluded.venue,
               venue_source    = excluded.venue_source,
               domain          = excluded.domain,
               quality_flag    = excluded.quality_flag,
               categories      = excluded.categories,
               doi             = excluded.doi,
               arxiv_id        = excluded.arxiv_id,
               openalex_id     = excluded.openalex_id,
               published_at    = excluded.published_at,
               primary_source  = excluded.primary_source",
          )?;
          for (p, authors, categories) in &papers {
            upsert.execute(rusqlite::params![
              encode_uuid(p.paper_id),
              p.canonical_title,
              p.display_title,
              p.abstract_text,
              authors,
              p.year,
              p.venue,
              p.venue_source.map(|s| s.to_string()),
              p.domain.map(|d| d.to_string()),
              p.quality_flag.to_string(),
              categories,
              p.doi,
              p.arxiv_id,
              p.openalex_id,
              p.published_at,
              encode_dt(p.first_seen_at),
              p.primary_source.to_string(),
              p.origin_raw_id,
            ])?;
          }

          let mut insert_link = tx.prepare(&format!(
            "INSERT INTO source_links ({LINK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
          ))?;
          for link in &links {
            insert_link.execute(rusqlite::params![
              link.raw_id,
              encode_uuid(link.paper_id),
              link.source.to_string(),
              link.confidence_score,
              link.match_reason.to_string(),
              encode_dt(link.linked_at),
            ])?;
          }

          let mut upsert_conflict = tx.prepare(
            "INSERT INTO match_conflicts (raw_id, candidates, best_similarity, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (raw_id) DO UPDATE SET
               candidates      = excluded.candidates,
               best_similarity = excluded.best_similarity,
               recorded_at     = excluded.recorded_at",
          )?;
          for (raw_id, candidates, similarity, at) in &conflicts {
            upsert_conflict.execute(rusqlite::params![
              raw_id,
              candidates,
              similarity,
              encode_dt(*at),
            ])?;
          }

          let mut settle =
            tx.prepare("DELETE FROM match_conflicts WHERE raw_id = ?1")?;
          for raw_id in &resolved {
            settle.execute(rusqlite::params![raw_id])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn conflicts(&self) -> Result<Vec<MatchConflict>> {
    let raws: Vec<RawConflict> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT raw_id, candidates, best_similarity, recorded_at
           FROM match_conflicts ORDER BY raw_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawConflict {
              raw_id:          row.get(0)?,
              candidates:      row.get(1)?,
              best_similarity: row.get(2)?,
              recorded_at:     row.get(3)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawConflict::into_conflict).collect()
  }

  async fn papers_in_scope(&self, scope: ScopeKey) -> Result<Vec<CanonicalPaper>> {
    let (filter, params) = scope_filter(&scope);
    self.query_papers(filter, params, "first_seen_at, paper_id").await
  }

  async fn scope_stats(&self, scope: ScopeKey) -> Result<ScopeStats> {
    let (filter, params) = scope_filter(&scope);

    let mut stale_params = params.clone();
    let (scope_at, id_at) = (stale_params.len() + 1, stale_params.len() + 2);
    stale_params.push(scope.scope.to_string());
    stale_params.push(scope.scope_id.clone());

    let (count, max_seen, stale): (i64, Option<String>, i64) = self
      .conn
      .call(move |conn| {
        let (count, max_seen) = conn.query_row(
          &format!("SELECT COUNT(*), MAX(first_seen_at) FROM papers WHERE {filter}"),
          rusqlite::params_from_iter(params.iter()),
          |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        // Ledger members that left the scope or moved to another bucket.
        let stale = conn.query_row(
          &format!(
            "SELECT COUNT(*) FROM processed_papers AS pp
             LEFT JOIN papers ON papers.paper_id = pp.paper_id AND ({filter})
             WHERE pp.scope = ?{scope_at} AND pp.scope_id = ?{id_at}
               AND (papers.paper_id IS NULL OR papers.published_at IS NOT pp.published_at)"
          ),
          rusqlite::params_from_iter(stale_params.iter()),
          |r| r.get(0),
        )?;
        Ok((count, max_seen, stale))
      })
      .await?;

    Ok(ScopeStats {
      paper_count:       count.max(0) as u64,
      max_first_seen_at: max_seen.as_deref().map(decode_dt).transpose()?,
      stale:             stale.max(0) as u64,
    })
  }

  async fn venues_in_use(&self) -> Result<Vec<String>> {
    Ok(
      self
        .conn
        .call(|conn| {
          let mut stmt = conn.prepare(
            "SELECT DISTINCT venue FROM papers
             WHERE venue IS NOT NULL AND quality_flag != 'filtered'
             ORDER BY venue",
          )?;
          let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
          Ok(rows)
        })
        .await?,
    )
  }

  async fn stored_keywords(
    &self,
    paper_ids: Vec<Uuid>,
  ) -> Result<HashMap<Uuid, Vec<String>>> {
    let found: Vec<(Uuid, Vec<String>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT keyword FROM paper_keywords WHERE paper_id = ?1
           ORDER BY score DESC, keyword ASC",
        )?;
        let mut found = Vec::new();
        for id in paper_ids {
          let keywords = stmt
            .query_map(rusqlite::params![encode_uuid(id)], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
          if !keywords.is_empty() {
            found.push((id, keywords));
          }
        }
        Ok(found)
      })
      .await?;

    Ok(found.into_iter().collect())
  }

  async fn save_keywords(&self, keywords: Vec<PaperKeyword>) -> Result<()> {
    if keywords.is_empty() {
      return Ok(());
    }
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut upsert = tx.prepare(
            "INSERT INTO paper_keywords (paper_id, keyword, method, score)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (paper_id, keyword, method) DO UPDATE SET
               score = excluded.score",
          )?;
          for kw in &keywords {
            upsert.execute(rusqlite::params![
              encode_uuid(kw.paper_id),
              kw.keyword,
              kw.method.to_string(),
              kw.score,
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── TrendReader impl ────────────────────────────────────────────────────────

impl TrendReader for SqliteStore {
  type Error = Error;

  async fn list_scopes(&self) -> Result<Vec<ScopeSummary>> {
    let raws: Vec<RawScopeSummary> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT scope, scope_id, paper_count, top_keywords, updated_at
           FROM scope_summaries ORDER BY scope, scope_id",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawScopeSummary {
              scope:        row.get(0)?,
              scope_id:     row.get(1)?,
              paper_count:  row.get(2)?,
              top_keywords: row.get(3)?,
              updated_at:   row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawScopeSummary::into_summary).collect()
  }

  async fn timeseries(
    &self,
    scope: ScopeKey,
    granularity: Granularity,
  ) -> Result<Vec<BucketSummary>> {
    let scope_str = scope.scope.to_string();
    let scope_id = scope.scope_id;
    let granularity = granularity.to_string();

    let raws: Vec<RawBucketSummary> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT scope, scope_id, granularity, bucket, paper_count, top_keywords,
                  updated_at
           FROM bucket_summaries
           WHERE scope = ?1 AND scope_id = ?2 AND granularity = ?3
           ORDER BY bucket",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![scope_str, scope_id, granularity], |row| {
            Ok(RawBucketSummary {
              scope:        row.get(0)?,
              scope_id:     row.get(1)?,
              granularity:  row.get(2)?,
              bucket:       row.get(3)?,
              paper_count:  row.get(4)?,
              top_keywords: row.get(5)?,
              updated_at:   row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawBucketSummary::into_summary).collect()
  }

  async fn top_keywords(
    &self,
    scope: ScopeKey,
    bucket: Option<BucketRef>,
    limit: usize,
  ) -> Result<Vec<KeywordCount>> {
    let scope_str = scope.scope.to_string();
    let scope_id = scope.scope_id;
    let limit = sql_count(limit as u64);

    Ok(
      self
        .conn
        .call(move |conn| {
          let ranked = match bucket {
            Some(b) => query_ranked(
              conn,
              BUCKET_TOP_SQL,
              rusqlite::params![
                scope_str,
                scope_id,
                b.granularity.to_string(),
                b.bucket,
                limit
              ],
            )?,
            None => query_ranked(
              conn,
              SCOPE_TOP_SQL,
              rusqlite::params![scope_str, scope_id, limit],
            )?,
          };
          Ok(ranked)
        })
        .await?,
    )
  }

  async fn emerging(&self, scope: ScopeKey, limit: usize) -> Result<Vec<EmergingRecord>> {
    let scope_str = scope.scope.to_string();
    let scope_id = scope.scope_id;

    let raws: Vec<RawEmerging> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT scope, scope_id, keyword, granularity, growth_rate,
                  recent_count, previous_count, first_seen, trend, updated_at
           FROM emerging_records
           WHERE scope = ?1 AND scope_id = ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![scope_str, scope_id], |row| {
            Ok(RawEmerging {
              scope:          row.get(0)?,
              scope_id:       row.get(1)?,
              keyword:        row.get(2)?,
              granularity:    row.get(3)?,
              growth_rate:    row.get(4)?,
              recent_count:   row.get(5)?,
              previous_count: row.get(6)?,
              first_seen:     row.get(7)?,
              trend:          row.get(8)?,
              updated_at:     row.get(9)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut records = raws
      .into_iter()
      .map(RawEmerging::into_record)
      .collect::<Result<Vec<_>>>()?;
    records.sort_by(|a, b| {
      a.trend
        .cmp(&b.trend)
        .then_with(|| b.growth_rate.total_cmp(&a.growth_rate))
        .then_with(|| b.recent_count.cmp(&a.recent_count))
        .then_with(|| a.keyword.cmp(&b.keyword))
    });
    records.truncate(limit);
    Ok(records)
  }

  async fn freshness(&self, scope: Option<ScopeKey>) -> Result<Freshness> {
    let scope_parts = scope.map(|s| (s.scope.to_string(), s.scope_id));

    let (updated, run): (Option<String>, Option<RawRun>) = self
      .conn
      .call(move |conn| {
        let updated: Option<String> = match scope_parts {
          Some((scope, scope_id)) => conn
            .query_row(
              "SELECT value FROM analysis_watermarks
               WHERE scope = ?1 AND scope_id = ?2 AND key = ?3",
              rusqlite::params![scope, scope_id, WM_UPDATED_AT],
              |r| r.get(0),
            )
            .optional()?,
          None => conn.query_row(
            "SELECT MAX(value) FROM analysis_watermarks WHERE key = ?1",
            rusqlite::params![WM_UPDATED_AT],
            |r| r.get(0),
          )?,
        };
        let run = conn
          .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM run_log ORDER BY started_at DESC LIMIT 1"),
            [],
            RawRun::from_row,
          )
          .optional()?;
        Ok((updated, run))
      })
      .await?;

    Ok(Freshness {
      last_updated: updated.as_deref().map(decode_dt).transpose()?,
      last_run:     run.map(RawRun::into_run).transpose()?,
    })
  }
}

// ─── TrendStore impl ─────────────────────────────────────────────────────────

impl TrendStore for SqliteStore {
  async fn watermark(&self, scope: ScopeKey) -> Result<AnalysisWatermark> {
    let scope_str = scope.scope.to_string();
    let scope_id = scope.scope_id;

    let pairs: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT key, value FROM analysis_watermarks WHERE scope = ?1 AND scope_id = ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![scope_str, scope_id], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut wm = AnalysisWatermark::default();
    for (key, value) in pairs {
      match key.as_str() {
        WM_MAX_TIMESTAMP => wm.max_timestamp = Some(decode_dt(&value)?),
        WM_UPDATED_AT => wm.updated_at = Some(decode_dt(&value)?),
        WM_PAPER_COUNT => {
          let count = value
            .parse()
            .map_err(|_| Error::UnknownValue { column: "paper_count", value })?;
          wm.paper_count = Some(count);
        }
        _ => {}
      }
    }
    Ok(wm)
  }

  async fn processed_papers(&self, scope: ScopeKey) -> Result<HashSet<Uuid>> {
    let scope_str = scope.scope.to_string();
    let scope_id = scope.scope_id;

    let ids: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT paper_id FROM processed_papers WHERE scope = ?1 AND scope_id = ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![scope_str, scope_id], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    ids.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn commit_cache(&self, commit: CacheCommit) -> Result<()> {
    let scope_str = commit.scope.scope.to_string();
    let scope_id = commit.scope.scope_id;
    let replace = commit.mode == CommitMode::Replace;
    let now = encode_dt(Utc::now());
    let top_n = sql_count(commit.top_n as u64);

    let entries: Vec<(String, String, String, i64)> = commit
      .delta
      .entries
      .iter()
      .flat_map(|(b, keywords)| {
        keywords.iter().map(move |(kw, n)| {
          (b.granularity.to_string(), b.bucket.clone(), kw.clone(), sql_count(*n))
        })
      })
      .collect();
    let touched: BTreeSet<&BucketRef> = commit
      .delta
      .entries
      .keys()
      .chain(commit.delta.bucket_papers.keys())
      .collect();
    let bucket_papers: Vec<(String, String, i64)> = touched
      .into_iter()
      .map(|b| {
        let n = commit.delta.bucket_papers.get(b).copied().unwrap_or(0);
        (b.granularity.to_string(), b.bucket.clone(), sql_count(n))
      })
      .collect();
    let totals: Vec<(String, i64)> = commit
      .delta
      .keyword_totals
      .iter()
      .map(|(kw, n)| (kw.clone(), sql_count(*n)))
      .collect();
    let paper_count = sql_count(commit.delta.paper_count);
    let processed: Vec<String> = commit.processed.into_iter().map(encode_uuid).collect();
    let watermark: Vec<(&'static str, String)> = [
      commit.watermark.max_timestamp.map(|t| (WM_MAX_TIMESTAMP, encode_dt(t))),
      commit.watermark.paper_count.map(|n| (WM_PAPER_COUNT, n.to_string())),
      commit.watermark.updated_at.map(|t| (WM_UPDATED_AT, encode_dt(t))),
    ]
    .into_iter()
    .flatten()
    .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        if replace {
          tx.execute(
            "UPDATE trend_entries SET count = 0 WHERE scope = ?1 AND scope_id = ?2",
            rusqlite::params![scope_str, scope_id],
          )?;
          tx.execute(
            "UPDATE bucket_summaries SET paper_count = 0 WHERE scope = ?1 AND scope_id = ?2",
            rusqlite::params![scope_str, scope_id],
          )?;
          tx.execute(
            "UPDATE keyword_totals SET count = 0 WHERE scope = ?1 AND scope_id = ?2",
            rusqlite::params![scope_str, scope_id],
          )?;
          tx.execute(
            "DELETE FROM processed_papers WHERE scope = ?1 AND scope_id = ?2",
            rusqlite::params![scope_str, scope_id],
          )?;
        }

        let (count_update, paper_update) = if replace {
          ("count = excluded.count", "paper_count = excluded.paper_count")
        } else {
          ("count = count + excluded.count", "paper_count = paper_count + excluded.paper_count")
        };

        {
          let mut upsert_entry = tx.prepare(&format!(
            "INSERT INTO trend_entries (scope, scope_id, granularity, bucket, keyword, count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (scope, scope_id, keyword, granularity, bucket)
             DO UPDATE SET {count_update}"
          ))?;
          for (granularity, bucket, keyword, n) in &entries {
            upsert_entry.execute(rusqlite::params![
              scope_str, scope_id, granularity, bucket, keyword, n
            ])?;
          }

          let mut upsert_bucket = tx.prepare(&format!(
            "INSERT INTO bucket_summaries
               (scope, scope_id, granularity, bucket, paper_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (scope, scope_id, granularity, bucket)
             DO UPDATE SET {paper_update}, updated_at = excluded.updated_at"
          ))?;
          for (granularity, bucket, n) in &bucket_papers {
            upsert_bucket.execute(rusqlite::params![
              scope_str, scope_id, granularity, bucket, n, now
            ])?;
          }

          let mut upsert_total = tx.prepare(&format!(
            "INSERT INTO keyword_totals (scope, scope_id, keyword, count)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (scope, scope_id, keyword) DO UPDATE SET {count_update}"
          ))?;
          for (keyword, n) in &totals {
            upsert_total.execute(rusqlite::params![scope_str, scope_id, keyword, n])?;
          }

          tx.execute(
            &format!(
              "INSERT INTO scope_summaries (scope, scope_id, paper_count, updated_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT (scope, scope_id)
               DO UPDATE SET {paper_update}, updated_at = excluded.updated_at"
            ),
            rusqlite::params![scope_str, scope_id, paper_count, now],
          )?;

          let mut mark = tx.prepare(
            "INSERT OR REPLACE INTO processed_papers (scope, scope_id, paper_id, published_at)
             VALUES (?1, ?2, ?3, (SELECT published_at FROM papers WHERE paper_id = ?3))",
          )?;
          for paper_id in &processed {
            mark.execute(rusqlite::params![scope_str, scope_id, paper_id])?;
          }
        }

        // Re-materialise the top-N blobs of every bucket whose counts moved.
        let refresh: Vec<(String, String)> = if replace {
          let mut stmt = tx.prepare(
            "SELECT granularity, bucket FROM bucket_summaries
             WHERE scope = ?1 AND scope_id = ?2",
          )?;
          let rows = stmt
            .query_map(rusqlite::params![scope_str, scope_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
          rows
        } else {
          bucket_papers.iter().map(|(g, b, _)| (g.clone(), b.clone())).collect()
        };
        for (granularity, bucket) in &refresh {
          let top = query_ranked(
            &tx,
            BUCKET_TOP_SQL,
            rusqlite::params![scope_str, scope_id, granularity, bucket, top_n],
          )?;
          tx.execute(
            "UPDATE bucket_summaries SET top_keywords = ?5, updated_at = ?6
             WHERE scope = ?1 AND scope_id = ?2 AND granularity = ?3 AND bucket = ?4",
            rusqlite::params![
              scope_str,
              scope_id,
              granularity,
              bucket,
              serde_json::to_string(&top).map_err(other_err)?,
              now,
            ],
          )?;
        }

        let top = query_ranked(
          &tx,
          SCOPE_TOP_SQL,
          rusqlite::params![scope_str, scope_id, top_n],
        )?;
        tx.execute(
          "UPDATE scope_summaries SET top_keywords = ?3 WHERE scope = ?1 AND scope_id = ?2",
          rusqlite::params![
            scope_str,
            scope_id,
            serde_json::to_string(&top).map_err(other_err)?
          ],
        )?;

        {
          let mut upsert_wm = tx.prepare(
            "INSERT INTO analysis_watermarks (scope, scope_id, key, value)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (scope, scope_id, key) DO UPDATE SET value = excluded.value",
          )?;
          for (key, value) in &watermark {
            upsert_wm.execute(rusqlite::params![scope_str, scope_id, key, value])?;
          }
        }

        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn trend_entries(
    &self,
    scope: ScopeKey,
    granularity: Granularity,
  ) -> Result<Vec<TrendCacheEntry>> {
    let scope_str = scope.scope.to_string();
    let scope_id = scope.scope_id.clone();
    let granularity_str = granularity.to_string();

    let rows: Vec<(String, String, i64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT keyword, bucket, count FROM trend_entries
           WHERE scope = ?1 AND scope_id = ?2 AND granularity = ?3
           ORDER BY bucket, keyword",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![scope_str, scope_id, granularity_str], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(keyword, bucket, count)| TrendCacheEntry {
          scope: scope.clone(),
          keyword,
          granularity,
          bucket,
          count: count.max(0) as u64,
        })
        .collect(),
    )
  }

  async fn upsert_emerging(&self, records: Vec<EmergingRecord>) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut upsert = tx.prepare(
            "INSERT INTO emerging_records (
               scope, scope_id, keyword, granularity, growth_rate, recent_count,
               previous_count, first_seen, trend, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (scope, scope_id, keyword) DO UPDATE SET
               granularity    = excluded.granularity,
               growth_rate    = excluded.growth_rate,
               recent_count   = excluded.recent_count,
               previous_count = excluded.previous_count,
               first_seen     = excluded.first_seen,
               trend          = excluded.trend,
               updated_at     = excluded.updated_at",
          )?;
          for rec in &records {
            upsert.execute(rusqlite::params![
              rec.scope.scope.to_string(),
              rec.scope.scope_id,
              rec.keyword,
              rec.granularity.to_string(),
              rec.growth_rate.is_finite().then_some(rec.growth_rate),
              sql_count(rec.recent_count),
              sql_count(rec.previous_count),
              rec.first_seen,
              rec.trend.to_string(),
              encode_dt(rec.updated_at),
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn record_run(&self, run: RunRecord) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!(
            "INSERT INTO run_log ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
          ),
          rusqlite::params![
            encode_uuid(run.run_id),
            encode_dt(run.started_at),
            encode_dt(run.finished_at),
            run.status.to_string(),
            run.degraded,
            sql_count(run.degraded_papers),
            sql_count(run.timestamp_fallbacks),
            sql_count(run.bucket_format_errors),
            sql_count(run.papers_processed),
            run.note,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
