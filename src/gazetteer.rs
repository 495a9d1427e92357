//! Local address reference store (SQLite).
//!
//! Rows come from a one-time reference import and then grow only through
//! learned writes from the resolver. Rows are never updated or deleted, so
//! the same address can appear more than once.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};

use crate::address::{QualityTier, Source};
use crate::error::{PlannerError, Result};
use crate::similarity::token_set_ratio;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS gazetteer (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    street_text     TEXT NOT NULL,
    latitude        REAL NOT NULL,
    longitude       REAL NOT NULL,
    postal4         TEXT NOT NULL,
    municipality    TEXT NOT NULL DEFAULT '',
    quality_tier    INTEGER NOT NULL,
    match_type      TEXT NOT NULL,
    source          TEXT NOT NULL,
    external_id     TEXT,
    last_validated  TEXT
);
CREATE INDEX IF NOT EXISTS idx_gazetteer_postal4 ON gazetteer(postal4);
CREATE INDEX IF NOT EXISTS idx_gazetteer_municipality ON gazetteer(municipality);

CREATE TABLE IF NOT EXISTS resolver_sessions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    processed_at    TEXT NOT NULL,
    total_queries   INTEGER NOT NULL,
    elapsed_secs    REAL NOT NULL,
    learned_count   INTEGER NOT NULL DEFAULT 0,
    precise_count   INTEGER NOT NULL DEFAULT 0,
    failed_count    INTEGER NOT NULL DEFAULT 0
);
"#;

/// Learned rows first (most recently validated first), then reference rows
/// in import order, so the candidate cap never hides learned addresses.
const CANDIDATE_ORDER: &str = "ORDER BY last_validated IS NULL, last_validated DESC, id";

const RECORD_COLUMNS: &str = "id, street_text, latitude, longitude, postal4, municipality, \
     quality_tier, match_type, source, external_id, last_validated";

/// Source label stored on rows from the reference import.
pub const IMPORT_SOURCE: &str = "IMPORT";

/// A row of the reference store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GazetteerRecord {
    pub id: i64,
    pub street_text: String,
    /// (lat, lon)
    pub coordinates: (f64, f64),
    pub postal4: String,
    pub municipality: String,
    pub quality_tier: QualityTier,
    pub match_type: String,
    pub source: String,
    pub external_id: Option<String>,
    pub last_validated: Option<DateTime<Utc>>,
}

/// A row of the initial reference dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRow {
    pub street_text: String,
    pub lat: f64,
    pub lon: f64,
    pub postal4: String,
    pub municipality: String,
}

/// An address/coordinate pair discovered by a non-local tier, queued for
/// persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearnedRecord {
    pub address: String,
    /// (lat, lon)
    pub coordinates: (f64, f64),
    pub quality_tier: QualityTier,
    pub source: Source,
    pub match_type: String,
    pub external_id: Option<String>,
    /// Postal code exactly as the caller supplied it.
    pub postal_code: Option<String>,
    pub municipality: Option<String>,
}

impl LearnedRecord {
    /// Portion of the caller's postal code before the hyphen.
    fn postal4(&self) -> String {
        self.postal_code
            .as_deref()
            .and_then(|code| code.trim().split('-').next())
            .unwrap_or_default()
            .to_string()
    }
}

/// A candidate with its similarity to the query (0..=100).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate<'a> {
    pub record: &'a GazetteerRecord,
    pub score: f64,
}

/// One resolver batch run, as written to `resolver_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionLog {
    pub processed_at: DateTime<Utc>,
    pub total_queries: usize,
    pub elapsed_secs: f64,
    pub learned_count: usize,
    /// Queries resolved at tier 1 or 2.
    pub precise_count: usize,
    /// Queries left at tier 8.
    pub failed_count: usize,
}

/// Aggregates over all recorded sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub sessions: u64,
    pub total_queries: u64,
    pub mean_elapsed_secs: Option<f64>,
    pub total_learned: u64,
    /// Mean share of tier 1-2 results per session, in percent.
    pub mean_precise_rate: Option<f64>,
}

/// SQLite-backed gazetteer.
pub struct GazetteerStore {
    conn: Connection,
}

impl GazetteerStore {
    /// Open (creating if needed) the store at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!(path = %path.display(), "gazetteer opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Release the connection, surfacing any error from the final close.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| PlannerError::Gazetteer(err))
    }

    /// Load reference rows in a single transaction.
    ///
    /// Rows are stored unvalidated (tier 0) with source `IMPORT`.
    pub fn import_reference(&mut self, rows: &[ReferenceRow]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO gazetteer
                    (street_text, latitude, longitude, postal4, municipality,
                     quality_tier, match_type, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'REFERENCE', ?7)",
            )?;
            for row in rows {
                ensure_finite(row.lat, row.lon, &row.street_text)?;
                stmt.execute(params![
                    row.street_text.trim(),
                    row.lat,
                    row.lon,
                    row.postal4.trim(),
                    row.municipality.trim(),
                    i64::from(QualityTier::UNVALIDATED.value()),
                    IMPORT_SOURCE,
                ])?;
            }
        }
        tx.commit()?;
        tracing::info!(rows = rows.len(), "reference rows imported");
        Ok(rows.len())
    }

    /// Candidates sharing a postal prefix, at most `limit` rows, learned
    /// rows ahead of reference rows.
    ///
    /// With a municipality, rows matching it exactly (trimmed, case-folded)
    /// are preferred; if none match, the municipality filter is dropped and
    /// the postal prefix alone is trusted.
    pub fn lookup(
        &self,
        postal4: &str,
        municipality: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GazetteerRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        if let Some(municipality) = municipality.map(str::trim).filter(|m| !m.is_empty()) {
            let strict = self.query_records(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM gazetteer
                     WHERE postal4 = ?1 AND UPPER(TRIM(municipality)) = UPPER(?2)
                     {CANDIDATE_ORDER} LIMIT ?3"
                ),
                params![postal4, municipality, limit],
            )?;
            if !strict.is_empty() {
                return Ok(strict);
            }
            tracing::debug!(postal4, municipality, "strict lookup empty, retrying postal-only");
        }

        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM gazetteer WHERE postal4 = ?1 {CANDIDATE_ORDER} LIMIT ?2"),
            params![postal4, limit],
        )
    }

    /// Rank candidates by token-set similarity to `query`, best first.
    ///
    /// Ties keep candidate order. Only the given candidates are ranked.
    pub fn fuzzy_rank<'a>(candidates: &'a [GazetteerRecord], query: &str) -> Vec<RankedCandidate<'a>> {
        let mut ranked: Vec<RankedCandidate<'a>> = candidates
            .iter()
            .map(|record| RankedCandidate {
                record,
                score: token_set_ratio(query, &record.street_text),
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    /// Insert learned records in one transaction; all or nothing.
    pub fn learn_batch(&mut self, records: &[LearnedRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO gazetteer
                    (street_text, latitude, longitude, postal4, municipality,
                     quality_tier, match_type, source, external_id, last_validated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for record in records {
                let (lat, lon) = record.coordinates;
                ensure_finite(lat, lon, &record.address)?;
                stmt.execute(params![
                    record.address,
                    lat,
                    lon,
                    record.postal4(),
                    record.municipality.as_deref().unwrap_or_default(),
                    i64::from(record.quality_tier.value()),
                    record.match_type,
                    record.source.as_str(),
                    record.external_id,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(count = records.len(), "learned addresses saved");
        Ok(records.len())
    }

    /// Total number of rows, reference and learned.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM gazetteer", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn record_session(&self, log: &SessionLog) -> Result<()> {
        self.conn.execute(
            "INSERT INTO resolver_sessions
                (processed_at, total_queries, elapsed_secs, learned_count, precise_count, failed_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                log.processed_at.to_rfc3339(),
                to_i64(log.total_queries),
                log.elapsed_secs,
                to_i64(log.learned_count),
                to_i64(log.precise_count),
                to_i64(log.failed_count),
            ],
        )?;
        Ok(())
    }

    pub fn session_stats(&self) -> Result<SessionStats> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(total_queries), 0),
                    AVG(elapsed_secs),
                    COALESCE(SUM(learned_count), 0),
                    AVG(CASE WHEN total_queries > 0
                             THEN precise_count * 100.0 / total_queries END)
             FROM resolver_sessions",
            [],
            |row| {
                Ok(SessionStats {
                    sessions: row.get::<_, i64>(0)?.max(0) as u64,
                    total_queries: row.get::<_, i64>(1)?.max(0) as u64,
                    mean_elapsed_secs: row.get(2)?,
                    total_learned: row.get::<_, i64>(3)?.max(0) as u64,
                    mean_precise_rate: row.get(4)?,
                })
            },
        )?;
        Ok(stats)
    }

    fn query_records(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<GazetteerRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, record_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<GazetteerRecord> {
    let tier: i64 = row.get(6)?;
    let last_validated: Option<String> = row.get(10)?;
    Ok(GazetteerRecord {
        id: row.get(0)?,
        street_text: row.get(1)?,
        coordinates: (row.get(2)?, row.get(3)?),
        postal4: row.get(4)?,
        municipality: row.get(5)?,
        quality_tier: u8::try_from(tier)
            .ok()
            .and_then(QualityTier::new)
            .unwrap_or(QualityTier::UNVALIDATED),
        match_type: row.get(7)?,
        source: row.get(8)?,
        external_id: row.get(9)?,
        last_validated: last_validated
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc)),
    })
}

fn ensure_finite(lat: f64, lon: f64, label: &str) -> Result<()> {
    if lat.is_finite() && lon.is_finite() {
        Ok(())
    } else {
        Err(PlannerError::InvalidRecord(format!(
            "non-finite coordinates for '{label}'"
        )))
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
