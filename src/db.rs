use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "lessons.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_plans(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_plans_student ON lesson_plans(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL,
            amount_cents INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY(plan_id) REFERENCES lesson_plans(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_plan ON payments(plan_id)",
        [],
    )?;

    // status NULL is treated the same as 'scheduled'.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_sessions(
            id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL,
            lesson_date TEXT NOT NULL,
            status TEXT,
            payment_id TEXT,
            seq INTEGER NOT NULL,
            duration_minutes INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY(plan_id) REFERENCES lesson_plans(id),
            FOREIGN KEY(payment_id) REFERENCES payments(id)
        )",
        [],
    )?;
    ensure_sessions_duration(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_sessions_plan_date ON lesson_sessions(plan_id, lesson_date, seq)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_lesson_sessions_payment ON lesson_sessions(payment_id)
         WHERE payment_id IS NOT NULL",
        [],
    )?;

    Ok(conn)
}

// Workspaces created before lesson lengths were tracked lack this column.
fn ensure_sessions_duration(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lesson_sessions", "duration_minutes")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE lesson_sessions ADD COLUMN duration_minutes INTEGER",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, text),
    )?;
    Ok(())
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}
