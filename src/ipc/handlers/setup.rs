use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Sessions,
    Billing,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sessions" => Some(Self::Sessions),
            "billing" => Some(Self::Billing),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Sessions => "setup.sessions",
            Self::Billing => "setup.billing",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Sessions => json!({
            "rebalanceOnInsert": true,
            "defaultDurationMinutes": 60,
            "seriesIntervalDays": 7
        }),
        SetupSection::Billing => json!({
            "defaultAmountCents": null,
            "paymentsPerRecord": 1
        }),
    }
}

#[derive(Clone, Debug)]
pub struct SessionSetup {
    pub rebalance_on_insert: bool,
    pub default_duration_minutes: i64,
    pub series_interval_days: i64,
}

#[derive(Clone, Debug)]
pub struct BillingSetup {
    pub default_amount_cents: Option<i64>,
    pub payments_per_record: i64,
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Sessions => match k.as_str() {
                "rebalanceOnInsert" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultDurationMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 15, 240)?));
                }
                "seriesIntervalDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 31)?));
                }
                _ => return Err(format!("unknown sessions field: {}", k)),
            },
            SetupSection::Billing => match k.as_str() {
                "defaultAmountCents" => {
                    let next = if v.is_null() {
                        Value::Null
                    } else {
                        Value::from(parse_i64_range(v, k, 0, 10_000_000)?)
                    };
                    obj.insert(k.clone(), next);
                }
                "paymentsPerRecord" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                _ => return Err(format!("unknown billing field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

pub fn load_session_setup(conn: &Connection) -> anyhow::Result<SessionSetup> {
    let v = load_section(conn, SetupSection::Sessions)?;
    Ok(SessionSetup {
        rebalance_on_insert: v
            .get("rebalanceOnInsert")
            .and_then(|x| x.as_bool())
            .unwrap_or(true),
        default_duration_minutes: v
            .get("defaultDurationMinutes")
            .and_then(|x| x.as_i64())
            .unwrap_or(60),
        series_interval_days: v
            .get("seriesIntervalDays")
            .and_then(|x| x.as_i64())
            .unwrap_or(7),
    })
}

pub fn load_billing_setup(conn: &Connection) -> anyhow::Result<BillingSetup> {
    let v = load_section(conn, SetupSection::Billing)?;
    Ok(BillingSetup {
        default_amount_cents: v.get("defaultAmountCents").and_then(|x| x.as_i64()),
        payments_per_record: v
            .get("paymentsPerRecord")
            .and_then(|x| x.as_i64())
            .unwrap_or(1),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let sessions = match load_section(conn, SetupSection::Sessions) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let billing = match load_section(conn, SetupSection::Billing) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "sessions": sessions,
            "billing": billing
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
