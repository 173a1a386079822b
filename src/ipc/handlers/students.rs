use crate::db;
use crate::ipc::helpers::{db_conn, get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let display_name = get_required_str(params, "displayName")?;
    if display_name.chars().count() > 200 {
        return Err(HandlerErr::bad_params("displayName length must be <= 200"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, display_name, active, created_at) VALUES(?, ?, 1, ?)",
        (&id, &display_name, db::now_ts()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "students" }))
    })?;
    info!(student_id = %id, "student created");
    Ok(json!({ "studentId": id }))
}

fn students_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT
           s.id,
           s.display_name,
           s.active,
           (SELECT COUNT(*) FROM lesson_plans p WHERE p.student_id = s.id) AS plan_count
         FROM students s
         ORDER BY s.display_name, s.id",
    )?;
    let students = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let display_name: String = r.get(1)?;
            let active: i64 = r.get(2)?;
            let plan_count: i64 = r.get(3)?;
            Ok(json!({
                "id": id,
                "displayName": display_name,
                "active": active != 0,
                "planCount": plan_count
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = db_conn(state).and_then(|conn| students_create(conn, &req.params));
    respond(req, result)
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    // No workspace yet means nothing to show, not an error.
    let Some(conn) = state.db.as_ref() else {
        return respond(req, Ok(json!({ "students": [] })));
    };
    respond(req, students_list(conn))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
