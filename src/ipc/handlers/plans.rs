use crate::db;
use crate::ipc::helpers::{db_conn, get_optional_str, get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::rebalance;
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_PLAN_TITLE: &str = "Individual lessons";

fn plans_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let title = get_optional_str(params, "title")?.unwrap_or_else(|| DEFAULT_PLAN_TITLE.to_string());
    if title.chars().count() > 200 {
        return Err(HandlerErr::bad_params("title length must be <= 200"));
    }
    let exists = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ?",
            [&student_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id })));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lesson_plans(id, student_id, title, created_at) VALUES(?, ?, ?, ?)",
        (&id, &student_id, &title, db::now_ts()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "lesson_plans" }))
    })?;
    info!(plan_id = %id, student_id = %student_id, "lesson plan created");
    Ok(json!({ "planId": id }))
}

fn plans_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId")?;
    // Correlated subqueries keep the counts independent of each other.
    let mut stmt = conn.prepare(
        "SELECT
           p.id,
           p.student_id,
           p.title,
           p.created_at,
           (SELECT COUNT(*) FROM lesson_sessions s WHERE s.plan_id = p.id) AS session_count,
           (SELECT COUNT(*) FROM lesson_sessions s
              WHERE s.plan_id = p.id
                AND (s.status IS NULL OR s.status = 'scheduled')
                AND s.payment_id IS NOT NULL) AS paid_scheduled_count
         FROM lesson_plans p
         WHERE (?1 IS NULL OR p.student_id = ?1)
         ORDER BY p.created_at, p.id",
    )?;
    let plans = stmt
        .query_map([student_id.as_deref()], |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let title: String = r.get(2)?;
            let created_at: String = r.get(3)?;
            let session_count: i64 = r.get(4)?;
            let paid_scheduled_count: i64 = r.get(5)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "title": title,
                "createdAt": created_at,
                "sessionCount": session_count,
                "paidScheduledCount": paid_scheduled_count
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "plans": plans }))
}

fn plans_window_check(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let plan_id = get_required_str(params, "planId")?;
    if !store::plan_exists(conn, &plan_id)? {
        return Err(HandlerErr::new("not_found", "lesson plan not found")
            .with_details(json!({ "planId": plan_id })));
    }
    let sessions = store::load_plan_sessions(conn, &plan_id)?;
    let report = rebalance::window_violations(&sessions);
    if !report.holds {
        warn!(
            plan_id = %plan_id,
            paid_outside = report.paid_outside_window.len(),
            unpaid_inside = report.unpaid_inside_window.len(),
            "payment window does not hold"
        );
    }
    serde_json::to_value(&report)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn handle_plans_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| plans_create(conn, &req.params));
    respond(req, result)
}

fn handle_plans_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return respond(req, Ok(json!({ "plans": [] })));
    };
    respond(req, plans_list(conn, &req.params))
}

fn handle_plans_window_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| plans_window_check(conn, &req.params));
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "plans.create" => Some(handle_plans_create(state, req)),
        "plans.list" => Some(handle_plans_list(state, req)),
        "plans.windowCheck" => Some(handle_plans_window_check(state, req)),
        _ => None,
    }
}
