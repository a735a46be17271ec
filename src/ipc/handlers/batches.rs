//! Read-only view of committed batches.

use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional_i64, get_required_str, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

const BATCH_COLUMNS: &str = "b.batch_id, b.district_id, b.test_id, b.subject, b.unit_cycle,
    b.source_file, b.school_year, b.import_source, b.source_sha256, b.created_at,
    (SELECT COUNT(*) FROM assessment_results r WHERE r.batch_id = b.batch_id)";

fn batch_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "batchId": r.get::<_, String>(0)?,
        "districtId": r.get::<_, Option<i64>>(1)?,
        "testId": r.get::<_, String>(2)?,
        "subject": r.get::<_, Option<String>>(3)?,
        "unitCycle": r.get::<_, Option<i64>>(4)?,
        "sourceFile": r.get::<_, String>(5)?,
        "schoolYear": r.get::<_, Option<i64>>(6)?,
        "importSource": r.get::<_, Option<String>>(7)?,
        "sha256": r.get::<_, Option<String>>(8)?,
        "createdAt": r.get::<_, String>(9)?,
        "rowCount": r.get::<_, i64>(10)?,
    }))
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn list_batches(conn: &Connection, district_id: Option<i64>) -> Result<Vec<Value>, HandlerErr> {
    let sql = format!(
        "SELECT {BATCH_COLUMNS} FROM import_batches b
         WHERE (?1 IS NULL OR b.district_id = ?1)
         ORDER BY b.created_at DESC, b.batch_id"
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt.query_map([district_id], batch_json).map_err(db_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

fn get_batch(conn: &Connection, batch_id: &str) -> Result<Value, HandlerErr> {
    let sql = format!("SELECT {BATCH_COLUMNS} FROM import_batches b WHERE b.batch_id = ?");
    let Some(mut batch) = conn
        .query_row(&sql, [batch_id], batch_json)
        .optional()
        .map_err(db_err)?
    else {
        return Err(HandlerErr {
            code: "not_found",
            message: "batch not found".to_string(),
            details: Some(json!({ "batchId": batch_id })),
        });
    };

    let mut stmt = conn
        .prepare(
            "SELECT local_student_id, test_id, standard_id, human_coding_scheme, points, max_points
             FROM assessment_results
             WHERE batch_id = ?
             ORDER BY local_student_id, human_coding_scheme",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([batch_id], |r| {
            Ok(json!({
                "localStudentId": r.get::<_, String>(0)?,
                "testId": r.get::<_, String>(1)?,
                "standardId": r.get::<_, Option<String>>(2)?,
                "humanCodingScheme": r.get::<_, String>(3)?,
                "points": r.get::<_, f64>(4)?,
                "maxPoints": r.get::<_, f64>(5)?,
            }))
        })
        .map_err(db_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err)?;
    batch["rows"] = json!(rows);
    Ok(batch)
}

fn handle_batches_list(state: &mut AppState, req: &Request) -> Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let district_id = match get_optional_i64(&req.params, "districtId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match list_batches(conn, district_id) {
        Ok(batches) => ok(&req.id, json!({ "batches": batches })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_batches_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let batch_id = match get_required_str(&req.params, "batchId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match get_batch(conn, &batch_id) {
        Ok(batch) => ok(&req.id, batch),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "batches.list" => Some(handle_batches_list(state, req)),
        "batches.get" => Some(handle_batches_get(state, req)),
        _ => None,
    }
}
