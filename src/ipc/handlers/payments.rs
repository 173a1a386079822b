use crate::ipc::handlers::setup::load_billing_setup;
use crate::ipc::helpers::{db_conn, get_optional_i64_range, get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::format_lesson_date;
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};

fn payments_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = get_required_str(params, "planId")?;
    let billing = load_billing_setup(conn)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let count = get_optional_i64_range(params, "count", 1, 50)?.unwrap_or(billing.payments_per_record);
    let amount_cents = get_optional_i64_range(params, "amountCents", 0, 10_000_000)?
        .or(billing.default_amount_cents);

    let assignments = store::record_payments(conn, &plan_id, count as usize, amount_cents)?;
    let assignments: Vec<Value> = assignments
        .iter()
        .map(|a| {
            json!({
                "paymentId": a.payment_id,
                "sessionId": a.session_id,
                "lessonDate": format_lesson_date(a.lesson_date)
            })
        })
        .collect();
    Ok(json!({ "assignments": assignments }))
}

fn handle_payments_record(state: &mut AppState, req: &Request) -> Value {
    let result = db_conn(state).and_then(|conn| payments_record(conn, &req.params));
    respond(req, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "payments.record" => Some(handle_payments_record(state, req)),
        _ => None,
    }
}
