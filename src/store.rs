//! Session store: snapshot loading, guarded insertion and the apply path for
//! payment-window transfers.

use crate::db;
use crate::model::{format_lesson_date, parse_lesson_date, LessonSession, SessionStatus};
use crate::rebalance::{self, PaymentTransfer, RebalanceResult};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a session is already scheduled on {0}")]
    DuplicateDate(String),
    #[error("lesson plan not found: {0}")]
    PlanNotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("requested {requested} payments but only {available} unpaid scheduled sessions exist")]
    NoUnpaidSessions { requested: usize, available: usize },
    #[error("payment window changed underneath the update; reload and retry")]
    Conflict,
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateDate(_) => "duplicate_date",
            Self::PlanNotFound(_) | Self::SessionNotFound(_) => "not_found",
            Self::NoUnpaidSessions { .. } => "no_unpaid_sessions",
            Self::Conflict => "conflict",
            Self::Database(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::DuplicateDate(date) => Some(json!({ "lessonDate": date })),
            Self::NoUnpaidSessions {
                requested,
                available,
            } => Some(json!({ "requested": requested, "available": available })),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredSession {
    pub session: LessonSession,
    pub duration_minutes: Option<i64>,
    pub created_at: String,
}

impl StoredSession {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.session.id,
            "lessonDate": format_lesson_date(self.session.lesson_date),
            "status": self.session.status.map(|s| s.as_str()),
            "paymentId": self.session.payment_id,
            "seq": self.session.seq,
            "durationMinutes": self.duration_minutes,
            "createdAt": self.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub session_id: String,
    /// `None` when rebalancing is switched off in setup.
    pub rebalance: Option<RebalanceResult>,
}

#[derive(Debug, Clone, Default)]
pub struct SeriesOutcome {
    pub session_ids: Vec<String>,
    pub skipped_dates: Vec<String>,
    pub transfers: Vec<PaymentTransfer>,
}

#[derive(Debug, Clone)]
pub struct PaymentAssignment {
    pub payment_id: String,
    pub session_id: String,
    pub lesson_date: NaiveDate,
}

fn conversion_err(idx: usize, e: crate::model::ModelError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn map_session_row(r: &Row<'_>) -> rusqlite::Result<StoredSession> {
    let date_raw: String = r.get(1)?;
    let lesson_date = parse_lesson_date(&date_raw).map_err(|e| conversion_err(1, e))?;
    let status_raw: Option<String> = r.get(2)?;
    let status = match status_raw {
        Some(s) if !s.trim().is_empty() => {
            Some(s.parse::<SessionStatus>().map_err(|e| conversion_err(2, e))?)
        }
        _ => None,
    };
    Ok(StoredSession {
        session: LessonSession {
            id: r.get(0)?,
            lesson_date,
            status,
            payment_id: r.get(3)?,
            seq: r.get(4)?,
        },
        duration_minutes: r.get(5)?,
        created_at: r.get(6)?,
    })
}

pub fn plan_exists(conn: &Connection, plan_id: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM lesson_plans WHERE id = ?",
            [plan_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn require_plan(conn: &Connection, plan_id: &str) -> Result<(), StoreError> {
    if plan_exists(conn, plan_id)? {
        Ok(())
    } else {
        Err(StoreError::PlanNotFound(plan_id.to_string()))
    }
}

pub fn load_plan_rows(conn: &Connection, plan_id: &str) -> Result<Vec<StoredSession>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, lesson_date, status, payment_id, seq, duration_minutes, created_at
         FROM lesson_sessions
         WHERE plan_id = ?
         ORDER BY lesson_date, seq",
    )?;
    let rows = stmt
        .query_map([plan_id], map_session_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn load_plan_sessions(conn: &Connection, plan_id: &str) -> Result<Vec<LessonSession>, StoreError> {
    Ok(load_plan_rows(conn, plan_id)?
        .into_iter()
        .map(|row| row.session)
        .collect())
}

/// Duplicate-date guard. Any session on the date blocks insertion, whatever
/// its status.
pub fn date_taken(conn: &Connection, plan_id: &str, date: NaiveDate) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM lesson_sessions WHERE plan_id = ? AND lesson_date = ? LIMIT 1",
            (plan_id, format_lesson_date(date)),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn next_seq(conn: &Connection, plan_id: &str) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(seq), -1) + 1 FROM lesson_sessions WHERE plan_id = ?",
        [plan_id],
        |r| r.get(0),
    )?)
}

pub fn insert_session(
    conn: &Connection,
    plan_id: &str,
    date: NaiveDate,
    duration_minutes: Option<i64>,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    let seq = next_seq(conn, plan_id)?;
    conn.execute(
        "INSERT INTO lesson_sessions(id, plan_id, lesson_date, status, payment_id, seq, duration_minutes, created_at)
         VALUES(?, ?, ?, ?, NULL, ?, ?, ?)",
        (
            &id,
            plan_id,
            format_lesson_date(date),
            SessionStatus::Scheduled.as_str(),
            seq,
            duration_minutes,
            db::now_ts(),
        ),
    )?;
    Ok(id)
}

/// Writes a transfer. The donor is cleared first so an interrupted apply can
/// leave a session unpaid but never reference one payment twice. Both writes
/// are conditional on the state the decision was made from; a miss means
/// another writer got there first.
pub fn apply_transfer(conn: &Connection, transfer: &PaymentTransfer) -> Result<(), StoreError> {
    let cleared = conn.execute(
        "UPDATE lesson_sessions SET payment_id = NULL WHERE id = ? AND payment_id = ?",
        (&transfer.donor_id, &transfer.payment_id),
    )?;
    if cleared != 1 {
        warn!(donor_id = %transfer.donor_id, "donor no longer holds the payment");
        return Err(StoreError::Conflict);
    }
    let assigned = conn.execute(
        "UPDATE lesson_sessions SET payment_id = ? WHERE id = ? AND payment_id IS NULL",
        (&transfer.payment_id, &transfer.session_id),
    )?;
    if assigned != 1 {
        warn!(session_id = %transfer.session_id, "inserted session was paid concurrently");
        return Err(StoreError::Conflict);
    }
    Ok(())
}

/// Picks the transfer, if any, for a freshly inserted session.
type Decide = dyn Fn(&[LessonSession], &str) -> RebalanceResult;

fn decider(rebalance_enabled: bool) -> Option<&'static Decide> {
    if rebalance_enabled {
        let decide: &'static Decide = &rebalance::rebalance_on_insert;
        Some(decide)
    } else {
        None
    }
}

fn insert_and_rebalance(
    conn: &Connection,
    plan_id: &str,
    date: NaiveDate,
    duration_minutes: Option<i64>,
    decide: Option<&Decide>,
) -> Result<AddOutcome, StoreError> {
    let session_id = insert_session(conn, plan_id, date, duration_minutes)?;
    let Some(decide) = decide else {
        return Ok(AddOutcome {
            session_id,
            rebalance: None,
        });
    };
    let snapshot = load_plan_sessions(conn, plan_id)?;
    let result = decide(&snapshot, &session_id);
    match &result {
        RebalanceResult::Transfer(t) => {
            apply_transfer(conn, t)?;
            info!(
                plan_id,
                session_id = %t.session_id,
                donor_id = %t.donor_id,
                payment_id = %t.payment_id,
                "moved payment to earlier session"
            );
        }
        RebalanceResult::NoTransfer(reason) => {
            debug!(plan_id, session_id = %session_id, reason = reason.as_str(), "no payment transfer");
        }
    }
    Ok(AddOutcome {
        session_id,
        rebalance: Some(result),
    })
}

fn add_session_with(
    conn: &Connection,
    plan_id: &str,
    date: NaiveDate,
    duration_minutes: Option<i64>,
    decide: Option<&Decide>,
) -> Result<AddOutcome, StoreError> {
    let tx = conn.unchecked_transaction()?;
    require_plan(&tx, plan_id)?;
    if date_taken(&tx, plan_id, date)? {
        return Err(StoreError::DuplicateDate(format_lesson_date(date)));
    }
    let outcome = insert_and_rebalance(&tx, plan_id, date, duration_minutes, decide)?;
    tx.commit()?;
    Ok(outcome)
}

/// Inserts one session and rebalances in a single transaction. Any error
/// rolls back the insertion along with the transfer.
pub fn add_session_rebalanced(
    conn: &Connection,
    plan_id: &str,
    date: NaiveDate,
    duration_minutes: Option<i64>,
    rebalance_enabled: bool,
) -> Result<AddOutcome, StoreError> {
    add_session_with(conn, plan_id, date, duration_minutes, decider(rebalance_enabled))
}

/// Inserts a run of sessions, skipping dates that are already taken.
pub fn add_series_rebalanced(
    conn: &Connection,
    plan_id: &str,
    dates: &[NaiveDate],
    duration_minutes: Option<i64>,
    rebalance_enabled: bool,
) -> Result<SeriesOutcome, StoreError> {
    let tx = conn.unchecked_transaction()?;
    require_plan(&tx, plan_id)?;
    let decide = decider(rebalance_enabled);
    let mut out = SeriesOutcome::default();
    for date in dates {
        if date_taken(&tx, plan_id, *date)? {
            out.skipped_dates.push(format_lesson_date(*date));
            continue;
        }
        let outcome = insert_and_rebalance(&tx, plan_id, *date, duration_minutes, decide)?;
        if let Some(t) = outcome.rebalance.as_ref().and_then(|r| r.transfer()) {
            out.transfers.push(t.clone());
        }
        out.session_ids.push(outcome.session_id);
    }
    tx.commit()?;
    Ok(out)
}

/// What inserting a session on `date` would do, without writing anything.
/// `None` when rebalancing is switched off, as `add_session_rebalanced` would
/// then leave the session unpaid.
pub fn preview_insert(
    conn: &Connection,
    plan_id: &str,
    date: NaiveDate,
    rebalance_enabled: bool,
) -> Result<Option<RebalanceResult>, StoreError> {
    require_plan(conn, plan_id)?;
    if date_taken(conn, plan_id, date)? {
        return Err(StoreError::DuplicateDate(format_lesson_date(date)));
    }
    if !rebalance_enabled {
        return Ok(None);
    }
    let mut snapshot = load_plan_sessions(conn, plan_id)?;
    let preview_id = format!("preview-{}", Uuid::new_v4());
    let seq = next_seq(conn, plan_id)?;
    snapshot.push(LessonSession::new(preview_id.clone(), date, seq));
    Ok(Some(rebalance::rebalance_on_insert(&snapshot, &preview_id)))
}

pub fn set_status(
    conn: &Connection,
    session_id: &str,
    status: SessionStatus,
) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE lesson_sessions SET status = ? WHERE id = ?",
        (status.as_str(), session_id),
    )?;
    if changed == 0 {
        return Err(StoreError::SessionNotFound(session_id.to_string()));
    }
    Ok(())
}

/// Billing hook: creates `count` payments and attaches each to the earliest
/// unpaid scheduled session, growing the window to the right.
pub fn record_payments(
    conn: &Connection,
    plan_id: &str,
    count: usize,
    amount_cents: Option<i64>,
) -> Result<Vec<PaymentAssignment>, StoreError> {
    let tx = conn.unchecked_transaction()?;
    require_plan(&tx, plan_id)?;
    let snapshot = load_plan_sessions(&tx, plan_id)?;
    let targets: Vec<&LessonSession> = rebalance::scheduled_sorted(&snapshot)
        .into_iter()
        .filter(|s| !s.is_paid())
        .take(count)
        .collect();
    if targets.len() < count {
        return Err(StoreError::NoUnpaidSessions {
            requested: count,
            available: targets.len(),
        });
    }

    let mut out = Vec::with_capacity(count);
    for target in targets {
        let payment_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO payments(id, plan_id, amount_cents, created_at) VALUES(?, ?, ?, ?)",
            (&payment_id, plan_id, amount_cents, db::now_ts()),
        )?;
        let assigned = tx.execute(
            "UPDATE lesson_sessions SET payment_id = ? WHERE id = ? AND payment_id IS NULL",
            (&payment_id, &target.id),
        )?;
        if assigned != 1 {
            return Err(StoreError::Conflict);
        }
        out.push(PaymentAssignment {
            payment_id,
            session_id: target.id.clone(),
            lesson_date: target.lesson_date,
        });
    }
    tx.commit()?;
    info!(plan_id, count, "recorded payments");
    Ok(out)
}
