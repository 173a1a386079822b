use crate::ipc::handlers::setup::load_session_setup;
use crate::ipc::helpers::{
    db_conn, get_optional_i64_range, get_required_date, get_required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{check_lesson_date, format_lesson_date, SessionStatus};
use crate::rebalance::RebalanceResult;
use crate::store;
use chrono::{Duration as ChronoDuration, NaiveDate};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

const MAX_SERIES_COUNT: i64 = 200;

fn rebalance_json(result: Option<&RebalanceResult>) -> Value {
    match result {
        Some(r) => r.to_json(),
        None => json!({ "transferred": false, "reason": "disabled" }),
    }
}

fn setup_or_err(conn: &Connection) -> Result<crate::ipc::handlers::setup::SessionSetup, HandlerErr> {
    load_session_setup(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn sessions_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = get_required_str(params, "planId")?;
    if !store::plan_exists(conn, &plan_id)? {
        return Err(HandlerErr::new("not_found", "lesson plan not found")
            .with_details(json!({ "planId": plan_id })));
    }
    let rows = store::load_plan_rows(conn, &plan_id)?;
    let sessions: Vec<Value> = rows.iter().map(|r| r.to_json()).collect();
    Ok(json!({ "sessions": sessions }))
}

fn sessions_add_additional(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = get_required_str(params, "planId")?;
    let lesson_date = get_required_date(params, "lessonDate")?;
    let setup = setup_or_err(conn)?;
    let duration = get_optional_i64_range(params, "durationMinutes", 15, 240)?
        .unwrap_or(setup.default_duration_minutes);

    let outcome = store::add_session_rebalanced(
        conn,
        &plan_id,
        lesson_date,
        Some(duration),
        setup.rebalance_on_insert,
    )?;
    info!(
        plan_id = %plan_id,
        session_id = %outcome.session_id,
        lesson_date = %lesson_date,
        "additional lesson added"
    );
    Ok(json!({
        "sessionId": outcome.session_id,
        "rebalance": rebalance_json(outcome.rebalance.as_ref())
    }))
}

fn series_dates(
    start: NaiveDate,
    count: i64,
    interval_days: i64,
) -> Result<Vec<NaiveDate>, HandlerErr> {
    (0..count)
        .map(|i| {
            start
                .checked_add_signed(ChronoDuration::days(i * interval_days))
                .ok_or_else(|| HandlerErr::bad_params("series runs past the calendar"))
                .and_then(|d| {
                    check_lesson_date(d).map_err(|e| HandlerErr::bad_params(e.to_string()))
                })
        })
        .collect()
}

fn sessions_schedule_series(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = get_required_str(params, "planId")?;
    let start = get_required_date(params, "startDate")?;
    let Some(count) = get_optional_i64_range(params, "count", 1, MAX_SERIES_COUNT)? else {
        return Err(HandlerErr::bad_params("missing count"));
    };
    let setup = setup_or_err(conn)?;
    let interval = get_optional_i64_range(params, "intervalDays", 1, 31)?
        .unwrap_or(setup.series_interval_days);
    let duration = get_optional_i64_range(params, "durationMinutes", 15, 240)?
        .unwrap_or(setup.default_duration_minutes);

    let dates = series_dates(start, count, interval)?;
    let outcome = store::add_series_rebalanced(
        conn,
        &plan_id,
        &dates,
        Some(duration),
        setup.rebalance_on_insert,
    )?;
    info!(
        plan_id = %plan_id,
        created = outcome.session_ids.len(),
        skipped = outcome.skipped_dates.len(),
        transfers = outcome.transfers.len(),
        "lesson series scheduled"
    );
    Ok(json!({
        "sessionIds": outcome.session_ids,
        "skippedDates": outcome.skipped_dates,
        "transfers": outcome.transfers
    }))
}

fn sessions_rebalance_preview(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = get_required_str(params, "planId")?;
    let lesson_date = get_required_date(params, "lessonDate")?;
    let setup = setup_or_err(conn)?;
    let result = store::preview_insert(conn, &plan_id, lesson_date, setup.rebalance_on_insert)?;
    let mut rebalance = rebalance_json(result.as_ref());
    // The previewed session is never stored, so its id means nothing to callers.
    if let Some(obj) = rebalance.as_object_mut() {
        obj.remove("sessionId");
    }
    Ok(json!({
        "lessonDate": format_lesson_date(lesson_date),
        "rebalance": rebalance
    }))
}

fn sessions_set_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let raw = get_required_str(params, "status")?;
    let status = raw
        .parse::<SessionStatus>()
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    store::set_status(conn, &session_id, status)?;
    info!(session_id = %session_id, status = %status, "session status changed");
    Ok(json!({ "ok": true }))
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> Value {
    let result = db_conn(state).and_then(|conn| sessions_list(conn, &req.params));
    respond(req, result)
}

fn handle_sessions_add_additional(state: &mut AppState, req: &Request) -> Value {
    let result = db_conn(state).and_then(|conn| sessions_add_additional(conn, &req.params));
    respond(req, result)
}

fn handle_sessions_schedule_series(state: &mut AppState, req: &Request) -> Value {
    let result = db_conn(state).and_then(|conn| sessions_schedule_series(conn, &req.params));
    respond(req, result)
}

fn handle_sessions_rebalance_preview(state: &mut AppState, req: &Request) -> Value {
    let result = db_conn(state).and_then(|conn| sessions_rebalance_preview(conn, &req.params));
    respond(req, result)
}

fn handle_sessions_set_status(state: &mut AppState, req: &Request) -> Value {
    let result = db_conn(state).and_then(|conn| sessions_set_status(conn, &req.params));
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.addAdditional" => Some(handle_sessions_add_additional(state, req)),
        "sessions.scheduleSeries" => Some(handle_sessions_schedule_series(state, req)),
        "sessions.rebalancePreview" => Some(handle_sessions_rebalance_preview(state, req)),
        "sessions.setStatus" => Some(handle_sessions_set_status(state, req)),
        _ => None,
    }
}
