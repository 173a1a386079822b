mod test_support;

use serde_json::json;
use test_support::{
    open_with_plan, request_err_code, request_ok, session_payments, spawn_sidecar, str_field,
    temp_dir,
};

#[test]
fn setup_defaults_and_validation() {
    let workspace = temp_dir("lessond-setup-defaults");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_with_plan(&mut stdin, &mut reader, &workspace);

    let setup = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(
        setup.get("sessions"),
        Some(&json!({
            "rebalanceOnInsert": true,
            "defaultDurationMinutes": 60,
            "seriesIntervalDays": 7
        }))
    );
    assert_eq!(
        setup.get("billing"),
        Some(&json!({ "defaultAmountCents": null, "paymentsPerRecord": 1 }))
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "sessions", "patch": { "defaultDurationMinutes": 5 } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "sessions", "patch": { "colour": "red" } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "chat", "patch": {} }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "billing", "patch": { "defaultAmountCents": 3500, "paymentsPerRecord": 2 } }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "6", "setup.get", json!({}));
    assert_eq!(
        setup.get("billing"),
        Some(&json!({ "defaultAmountCents": 3500, "paymentsPerRecord": 2 }))
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn disabled_rebalancing_leaves_new_session_unpaid() {
    let workspace = temp_dir("lessond-setup-disabled");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let plan_id = open_with_plan(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.scheduleSeries",
        json!({ "planId": plan_id, "startDate": "2026-10-05", "count": 2 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "payments.record",
        json!({ "planId": plan_id, "count": 2 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "sessions", "patch": { "rebalanceOnInsert": false, "defaultDurationMinutes": 90 } }),
    );

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "preview",
        "sessions.rebalancePreview",
        json!({ "planId": plan_id, "lessonDate": "2026-10-01" }),
    );
    let predicted = preview.get("rebalance").cloned().expect("preview rebalance");
    assert_eq!(predicted.get("transferred").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(str_field(&predicted, "reason"), "disabled");

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.addAdditional",
        json!({ "planId": plan_id, "lessonDate": "2026-10-01" }),
    );
    let rebalance = added.get("rebalance").cloned().expect("rebalance");
    assert_eq!(str_field(&rebalance, "reason"), "disabled");
    assert_eq!(rebalance, predicted);

    let rows = session_payments(&mut stdin, &mut reader, "5", &plan_id);
    assert_eq!(rows[0].0, "2026-10-01");
    assert_eq!(rows[0].1, None);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.list",
        json!({ "planId": plan_id }),
    );
    let first = listed
        .get("sessions")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
        .expect("first session");
    assert_eq!(first.get("durationMinutes").and_then(|v| v.as_i64()), Some(90));

    let check = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "plans.windowCheck",
        json!({ "planId": plan_id }),
    );
    assert_eq!(check.get("holds").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        check.get("unpaidInsideWindow").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "far",
        "sessions.scheduleSeries",
        json!({ "planId": plan_id, "startDate": "9999-12-25", "count": 2 }),
    );
    assert_eq!(code, "bad_params");
    let rows = session_payments(&mut stdin, &mut reader, "after-far", &plan_id);
    assert!(rows.iter().all(|(date, _)| date.len() == 10));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn payments_record_uses_billing_defaults_and_refuses_overflow() {
    let workspace = temp_dir("lessond-setup-billing");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let plan_id = open_with_plan(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.scheduleSeries",
        json!({ "planId": plan_id, "startDate": "2026-11-02", "count": 3 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "billing", "patch": { "paymentsPerRecord": 2 } }),
    );
    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "payments.record",
        json!({ "planId": plan_id }),
    );
    let dates: Vec<String> = paid
        .get("assignments")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .iter()
        .map(|a| str_field(a, "lessonDate"))
        .collect();
    assert_eq!(dates, vec!["2026-11-02", "2026-11-09"]);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "payments.record",
        json!({ "planId": plan_id, "count": 2 }),
    );
    assert_eq!(code, "no_unpaid_sessions");

    let plans = request_ok(&mut stdin, &mut reader, "5", "plans.list", json!({}));
    let plan = plans
        .get("plans")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
        .expect("plan");
    assert_eq!(plan.get("sessionCount").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(plan.get("paidScheduledCount").and_then(|v| v.as_i64()), Some(2));

    let _ = std::fs::remove_dir_all(workspace);
}
