use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

pub const DB_FILE: &str = "assessments.sqlite3";
pub const UPLOADS_DIR: &str = "uploads";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    std::fs::create_dir_all(workspace.join(UPLOADS_DIR))?;
    let conn = Connection::open(workspace.join(DB_FILE))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS standards(
            id TEXT PRIMARY KEY,
            human_coding_scheme TEXT NOT NULL,
            normalized_code TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_standards_normalized ON standards(normalized_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            district_id INTEGER NOT NULL,
            local_student_id TEXT NOT NULL,
            school_id TEXT,
            inactive INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(district_id, local_student_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_batches(
            batch_id TEXT PRIMARY KEY,
            district_id INTEGER,
            test_id TEXT NOT NULL,
            subject TEXT,
            unit_cycle INTEGER,
            source_file TEXT NOT NULL,
            school_year INTEGER,
            import_source TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_batches_district ON import_batches(district_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessment_results(
            batch_id TEXT NOT NULL,
            local_student_id TEXT NOT NULL,
            test_id TEXT NOT NULL,
            standard_id TEXT,
            human_coding_scheme TEXT NOT NULL,
            points REAL NOT NULL,
            max_points REAL NOT NULL,
            FOREIGN KEY(batch_id) REFERENCES import_batches(batch_id),
            UNIQUE(batch_id, local_student_id, human_coding_scheme)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessment_results_batch ON assessment_results(batch_id)",
        [],
    )?;

    // Workspaces created before content fingerprints were recorded.
    if !table_has_column(conn, "import_batches", "source_sha256")? {
        conn.execute("ALTER TABLE import_batches ADD COLUMN source_sha256 TEXT", [])?;
    }

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Import settings read from the `setup.imports` section, with defaults for
/// anything absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    pub import_source: String,
    pub missing_sample_size: usize,
    pub bulk_timeout_ms: u64,
    pub default_delimiter: String,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            import_source: "assessmentd".to_string(),
            missing_sample_size: 20,
            bulk_timeout_ms: 120_000,
            default_delimiter: "auto".to_string(),
        }
    }
}

pub fn import_settings(conn: &Connection) -> ImportSettings {
    let mut out = ImportSettings::default();
    let Some(section) = settings_get_json(conn, "setup.imports").ok().flatten() else {
        return out;
    };
    if let Some(s) = section.get("importSource").and_then(|v| v.as_str()) {
        if !s.trim().is_empty() {
            out.import_source = s.trim().to_string();
        }
    }
    if let Some(n) = section.get("missingSampleSize").and_then(|v| v.as_u64()) {
        out.missing_sample_size = n as usize;
    }
    if let Some(n) = section.get("bulkTimeoutMs").and_then(|v| v.as_u64()) {
        out.bulk_timeout_ms = n;
    }
    if let Some(s) = section.get("defaultDelimiter").and_then(|v| v.as_str()) {
        out.default_delimiter = s.to_ascii_lowercase();
    }
    out
}

/// School years roll over on July 1: July-December belong to the year that
/// ends next summer.
pub fn school_year_for(date: NaiveDate) -> i32 {
    if date.month() >= 7 {
        date.year() + 1
    } else {
        date.year()
    }
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
