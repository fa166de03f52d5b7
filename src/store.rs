//! Persistent storage for periods, reviewer submissions, and app rankings
//!
//! Uniqueness lives in the schema: `(period_id, reviewer_name)` for
//! submissions and `(app_id, reviewer_id, period_id)` for rankings. Both
//! upserts are single `INSERT .. ON CONFLICT DO UPDATE` statements, so a
//! reader can never observe a half-written row and the last writer's
//! values win.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::lifecycle::{PaymentDetails, PeriodStatus};

/// Downstream caches of rendered results are flushed after every mutating
/// store call. Fire-and-forget; the store never waits on it.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self);
}

/// Default collaborator for embedders that keep no render cache.
pub struct NoopCache;

impl CacheInvalidator for NoopCache {
    fn invalidate(&self) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingPeriod {
    pub id: i64,
    pub label: String,
    pub status: PeriodStatus,
    pub hold_reason: Option<String>,
    pub purchase_exchange_name: Option<String>,
    pub purchased_at: Option<DateTime<Utc>>,
    pub purchase_conversion_rate: Option<f64>,
    pub payment_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerSubmission {
    pub id: i64,
    pub period_id: i64,
    pub reviewer_name: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRanking {
    pub id: i64,
    pub app_id: i64,
    pub reviewer_id: i64,
    pub period_id: i64,
    pub standard_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct RankingStore {
    conn: Mutex<Connection>,
    cache: Arc<dyn CacheInvalidator>,
}

impl RankingStore {
    pub fn open(path: impl AsRef<Path>, cache: Arc<dyn CacheInvalidator>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            cache,
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_cache(Arc::new(NoopCache))
    }

    pub fn in_memory_with_cache(cache: Arc<dyn CacheInvalidator>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            cache,
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("../migrations/001_schema.sql"))?;
        debug!("Applied schema migrations");
        Ok(())
    }

    // ========================================================================
    // REPORTING PERIODS
    // ========================================================================

    /// Create the period for a calendar cycle. Labels are unique; a
    /// duplicate is a `Conflict`.
    pub fn create_period(&self, label: &str) -> Result<ReportingPeriod> {
        let period = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO reporting_periods (label, status, created_at) VALUES (?1, 'draft', ?2)",
                params![label, Utc::now().to_rfc3339()],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::Conflict(format!("reporting period {label:?} already exists"))
                } else {
                    e.into()
                }
            })?;
            let id = conn.last_insert_rowid();
            fetch_period(&conn, id)?
        };
        info!("Created reporting period {} ({})", period.id, period.label);
        self.cache.invalidate();
        Ok(period)
    }

    pub fn get_period(&self, id: i64) -> Result<ReportingPeriod> {
        let conn = self.conn.lock();
        fetch_period(&conn, id)
    }

    pub fn list_periods(&self) -> Result<Vec<ReportingPeriod>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{PERIOD_SELECT} ORDER BY id"))?;
        let periods = stmt
            .query_map([], map_period)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(periods)
    }

    pub fn update_period_status(
        &self,
        period_id: i64,
        status: PeriodStatus,
        hold_reason: Option<&str>,
    ) -> Result<ReportingPeriod> {
        let period = {
            let conn = self.conn.lock();
            let changed = conn.execute(
                "UPDATE reporting_periods SET status = ?2, hold_reason = ?3 WHERE id = ?1",
                params![period_id, status.as_str(), hold_reason],
            )?;
            if changed == 0 {
                return Err(Error::not_found("reporting period", period_id));
            }
            fetch_period(&conn, period_id)?
        };
        self.cache.invalidate();
        Ok(period)
    }

    /// Set all four payment fields and the `paid` status in one statement.
    pub fn record_period_payment(
        &self,
        period_id: i64,
        details: &PaymentDetails,
    ) -> Result<ReportingPeriod> {
        let period = {
            let conn = self.conn.lock();
            let changed = conn.execute(
                "UPDATE reporting_periods
                 SET status = 'paid',
                     purchase_exchange_name = ?2,
                     purchased_at = ?3,
                     purchase_conversion_rate = ?4,
                     payment_transaction_id = ?5
                 WHERE id = ?1",
                params![
                    period_id,
                    details.exchange_name,
                    details.purchased_at.to_rfc3339(),
                    details.conversion_rate,
                    details.transaction_id,
                ],
            )?;
            if changed == 0 {
                return Err(Error::not_found("reporting period", period_id));
            }
            fetch_period(&conn, period_id)?
        };
        self.cache.invalidate();
        Ok(period)
    }

    // ========================================================================
    // REVIEWER SUBMISSIONS
    // ========================================================================

    /// Find-or-create the `(period, reviewer)` submission and apply the
    /// given summary. The summary is always written, never left stale.
    pub fn upsert_submission(
        &self,
        period_id: i64,
        reviewer_name: &str,
        summary: &str,
    ) -> Result<ReviewerSubmission> {
        let submission = {
            let conn = self.conn.lock();
            fetch_period(&conn, period_id)?;
            conn.execute(
                "INSERT INTO reviewer_submissions (period_id, reviewer_name, summary, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(period_id, reviewer_name)
                 DO UPDATE SET summary = excluded.summary, updated_at = excluded.updated_at",
                params![period_id, reviewer_name, summary, Utc::now().to_rfc3339()],
            )?;
            let mut stmt = conn.prepare(&format!(
                "{SUBMISSION_SELECT} WHERE period_id = ?1 AND reviewer_name = ?2"
            ))?;
            stmt.query_row(params![period_id, reviewer_name], map_submission)
                .map_err(Error::from)?
        };
        debug!(
            "Upserted submission {} by {} for period {}",
            submission.id, reviewer_name, period_id
        );
        self.cache.invalidate();
        Ok(submission)
    }

    pub fn list_submissions(&self, period_id: i64) -> Result<Vec<ReviewerSubmission>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SUBMISSION_SELECT} WHERE period_id = ?1 ORDER BY id"
        ))?;
        let submissions = stmt
            .query_map(params![period_id], map_submission)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(submissions)
    }

    /// Delete a submission and, in the same transaction, every ranking it
    /// owns. Deleting an unknown id is a no-op success so callers can
    /// retry after a lost acknowledgment.
    pub fn delete_submission(&self, id: i64) -> Result<()> {
        let (rankings, submissions) = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let rankings = tx.execute(
                "DELETE FROM app_rankings WHERE reviewer_id = ?1",
                params![id],
            )?;
            let submissions = tx.execute(
                "DELETE FROM reviewer_submissions WHERE id = ?1",
                params![id],
            )?;
            tx.commit()?;
            (rankings, submissions)
        };
        if submissions == 0 {
            debug!("Delete of submission {} was a no-op", id);
        } else {
            info!("Deleted submission {} and {} rankings", id, rankings);
        }
        self.cache.invalidate();
        Ok(())
    }

    // ========================================================================
    // APP RANKINGS
    // ========================================================================

    /// Find-or-create the `(app, reviewer, period)` ranking and overwrite
    /// its score. The owning submission must exist and belong to the same
    /// period; the caller resolves `app_id` against the directory before
    /// calling, so an unknown application never reaches this write.
    pub fn upsert_ranking(
        &self,
        app_id: i64,
        reviewer_id: i64,
        period_id: i64,
        standard_score: f64,
    ) -> Result<AppRanking> {
        let ranking = {
            let conn = self.conn.lock();
            let owner_period: i64 = conn
                .query_row(
                    "SELECT period_id FROM reviewer_submissions WHERE id = ?1",
                    params![reviewer_id],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => {
                        Error::not_found("reviewer submission", reviewer_id)
                    }
                    other => other.into(),
                })?;
            if owner_period != period_id {
                return Err(Error::Conflict(format!(
                    "ranking period {period_id} does not match submission period {owner_period}"
                )));
            }
            conn.execute(
                "INSERT INTO app_rankings (app_id, reviewer_id, period_id, standard_score, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(app_id, reviewer_id, period_id)
                 DO UPDATE SET standard_score = excluded.standard_score, updated_at = excluded.updated_at",
                params![
                    app_id,
                    reviewer_id,
                    period_id,
                    standard_score,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::Conflict(format!(
                        "concurrent write on ranking (app {app_id}, reviewer {reviewer_id}, period {period_id})"
                    ))
                } else {
                    e.into()
                }
            })?;
            let mut stmt = conn.prepare(&format!(
                "{RANKING_SELECT} WHERE app_id = ?1 AND reviewer_id = ?2 AND period_id = ?3"
            ))?;
            stmt.query_row(params![app_id, reviewer_id, period_id], map_ranking)
                .map_err(Error::from)?
        };
        debug!(
            "Upserted ranking {} (app {}, reviewer {}, period {}) = {}",
            ranking.id, app_id, reviewer_id, period_id, standard_score
        );
        self.cache.invalidate();
        Ok(ranking)
    }

    /// All rankings for a period in insertion order. The stable order is
    /// what makes the aggregator's raw-score audit lists reproducible.
    pub fn list_rankings(&self, period_id: i64) -> Result<Vec<AppRanking>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{RANKING_SELECT} WHERE period_id = ?1 ORDER BY id"
        ))?;
        let rankings = stmt
            .query_map(params![period_id], map_ranking)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rankings)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const PERIOD_SELECT: &str = "SELECT id, label, status, hold_reason, purchase_exchange_name, \
     purchased_at, purchase_conversion_rate, payment_transaction_id, created_at \
     FROM reporting_periods";

const SUBMISSION_SELECT: &str =
    "SELECT id, period_id, reviewer_name, summary, created_at, updated_at \
     FROM reviewer_submissions";

const RANKING_SELECT: &str =
    "SELECT id, app_id, reviewer_id, period_id, standard_score, created_at, updated_at \
     FROM app_rankings";

fn fetch_period(conn: &Connection, id: i64) -> Result<ReportingPeriod> {
    let mut stmt = conn.prepare(&format!("{PERIOD_SELECT} WHERE id = ?1"))?;
    stmt.query_row(params![id], map_period).map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found("reporting period", id),
        other => other.into(),
    })
}

fn map_period(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReportingPeriod> {
    let status: String = row.get(2)?;
    let purchased_at: Option<String> = row.get(5)?;
    Ok(ReportingPeriod {
        id: row.get(0)?,
        label: row.get(1)?,
        status: PeriodStatus::parse(&status)
            .ok_or_else(|| bad_text(2, format!("unknown period status {status:?}")))?,
        hold_reason: row.get(3)?,
        purchase_exchange_name: row.get(4)?,
        purchased_at: purchased_at.map(|s| parse_ts(5, &s)).transpose()?,
        purchase_conversion_rate: row.get(6)?,
        payment_transaction_id: row.get(7)?,
        created_at: parse_ts(8, &row.get::<_, String>(8)?)?,
    })
}

fn map_submission(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewerSubmission> {
    Ok(ReviewerSubmission {
        id: row.get(0)?,
        period_id: row.get(1)?,
        reviewer_name: row.get(2)?,
        summary: row.get(3)?,
        created_at: parse_ts(4, &row.get::<_, String>(4)?)?,
        updated_at: parse_ts(5, &row.get::<_, String>(5)?)?,
    })
}

fn map_ranking(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppRanking> {
    Ok(AppRanking {
        id: row.get(0)?,
        app_id: row.get(1)?,
        reviewer_id: row.get(2)?,
        period_id: row.get(3)?,
        standard_score: row.get(4)?,
        created_at: parse_ts(5, &row.get::<_, String>(5)?)?,
        updated_at: parse_ts(6, &row.get::<_, String>(6)?)?,
    })
}

fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn bad_text(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
