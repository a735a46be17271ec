//! Transactional batch load. Rows and batch metadata commit together or not
//! at all; on failure every engine error and every informational message
//! collected along the way is handed back.

use crate::aggregate::AggregatedRow;
use crate::error::{ImportError, ImportResult};
use rusqlite::{Connection, Transaction};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LoadRequest<'a> {
    pub district_id: i64,
    pub test_id: &'a str,
    pub subject: Option<&'a str>,
    pub unit_cycle: Option<i64>,
    pub source_file: &'a str,
    pub source_sha256: Option<&'a str>,
    pub school_year: i32,
    pub import_source: &'a str,
    pub bulk_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOutcome {
    pub batch_id: Uuid,
    pub rows_sent: usize,
    pub rows_committed: usize,
    pub messages: Vec<String>,
}

pub fn load(conn: &Connection, req: &LoadRequest<'_>, rows: &[AggregatedRow]) -> ImportResult<LoadOutcome> {
    if rows.is_empty() {
        return Err(ImportError::NoValidRows);
    }

    let previous_timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |r| r.get(0))
        .map_err(storage_failure)?;
    conn.busy_timeout(req.bulk_timeout).map_err(storage_failure)?;
    let result = load_in_transaction(conn, req, rows);
    if let Err(e) = conn.busy_timeout(Duration::from_millis(previous_timeout.max(0) as u64)) {
        warn!(error = %e, "failed to restore busy timeout");
    }
    result
}

fn storage_failure(e: rusqlite::Error) -> ImportError {
    ImportError::StorageFailure {
        errors: vec![e.to_string()],
        messages: Vec::new(),
    }
}

fn load_in_transaction(
    conn: &Connection,
    req: &LoadRequest<'_>,
    rows: &[AggregatedRow],
) -> ImportResult<LoadOutcome> {
    let tx = conn.unchecked_transaction().map_err(storage_failure)?;
    let mut messages = Vec::new();

    let batch_id = match bulk_import(&tx, req, rows, &mut messages) {
        Ok(id) => id,
        Err(mut errors) => {
            roll_back(tx, &mut errors);
            warn!(test_id = req.test_id, errors = errors.len(), "bulk import rolled back");
            return Err(ImportError::StorageFailure { errors, messages });
        }
    };

    if let Err(e) = backfill_batch_metadata(
        &tx,
        batch_id,
        req.district_id,
        req.school_year,
        req.import_source,
    ) {
        let mut errors = vec![e.to_string()];
        roll_back(tx, &mut errors);
        warn!(%batch_id, error = %e, "metadata backfill failed; batch rolled back");
        return Err(ImportError::StorageFailure { errors, messages });
    }

    if let Err(e) = tx.commit() {
        warn!(%batch_id, error = %e, "commit failed");
        return Err(ImportError::StorageFailure {
            errors: vec![e.to_string()],
            messages,
        });
    }

    let rows_committed = committed_rows(conn, batch_id, rows.len(), &mut messages);

    info!(
        %batch_id,
        district_id = req.district_id,
        test_id = req.test_id,
        rows_sent = rows.len(),
        rows_committed,
        "batch committed"
    );
    Ok(LoadOutcome {
        batch_id,
        rows_sent: rows.len(),
        rows_committed,
        messages,
    })
}

fn roll_back(tx: Transaction<'_>, errors: &mut Vec<String>) {
    if let Err(e) = tx.rollback() {
        warn!(error = %e, "rollback failed");
        errors.push(format!("rollback failed: {e}"));
    }
}

/// The batch is already committed here, so a failed count falls back to the
/// number of rows sent instead of reporting the load as failed.
fn committed_rows(
    conn: &Connection,
    batch_id: Uuid,
    rows_sent: usize,
    messages: &mut Vec<String>,
) -> usize {
    let counted = conn.query_row(
        "SELECT COUNT(*) FROM assessment_results WHERE batch_id = ?",
        [batch_id.to_string()],
        |r| r.get::<_, i64>(0),
    );
    match counted {
        Ok(n) => n.max(0) as usize,
        Err(e) => {
            warn!(%batch_id, error = %e, "could not count committed rows");
            messages.push(format!("committed row count unavailable ({e}); reporting rows sent"));
            rows_sent
        }
    }
}

/// Creates the batch row (district left NULL for the backfill) and inserts
/// the whole row set through one prepared statement. Every row is stored
/// under the batch's test id. Row failures are collected rather than
/// stopping at the first one.
pub fn bulk_import(
    conn: &Connection,
    req: &LoadRequest<'_>,
    rows: &[AggregatedRow],
    messages: &mut Vec<String>,
) -> Result<Uuid, Vec<String>> {
    let batch_id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO import_batches(batch_id, test_id, subject, unit_cycle, source_file, source_sha256, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            batch_id.to_string(),
            req.test_id,
            req.subject,
            req.unit_cycle,
            req.source_file,
            req.source_sha256,
            chrono::Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| vec![e.to_string()])?;

    let mut errors = Vec::new();
    {
        let mut insert = conn
            .prepare(
                "INSERT INTO assessment_results(batch_id, local_student_id, test_id, standard_id, human_coding_scheme, points, max_points)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
            )
            .map_err(|e| vec![e.to_string()])?;
        for (i, row) in rows.iter().enumerate() {
            let res = insert.execute((
                batch_id.to_string(),
                &row.local_student_id,
                req.test_id,
                row.standard_id().map(|u| u.to_string()),
                row.human_coding_scheme(),
                row.points,
                row.max_points,
            ));
            if let Err(e) = res {
                errors.push(format!(
                    "row {} ({}, {}): {}",
                    i + 1,
                    row.local_student_id,
                    row.human_coding_scheme(),
                    e
                ));
            }
        }
    }
    messages.push(format!("{} rows inserted", rows.len() - errors.len()));
    if !errors.is_empty() {
        return Err(errors);
    }

    let raw = rows.iter().filter(|r| r.is_raw()).count();
    if raw > 0 {
        messages.push(format!("{raw} rows stored under unmapped standard codes"));
    }
    let off_roster: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT r.local_student_id)
             FROM assessment_results r
             WHERE r.batch_id = ?
               AND NOT EXISTS (
                   SELECT 1 FROM students s
                   WHERE s.district_id = ?
                     AND s.local_student_id = r.local_student_id
                     AND s.inactive = 0
               )",
            (batch_id.to_string(), req.district_id),
            |r| r.get(0),
        )
        .map_err(|e| vec![e.to_string()])?;
    if off_roster > 0 {
        messages.push(format!("{off_roster} students are not on the active roster"));
    }
    Ok(batch_id)
}

/// Set-if-null: values already present on the batch are never overwritten.
pub fn backfill_batch_metadata(
    conn: &Connection,
    batch_id: Uuid,
    district_id: i64,
    school_year: i32,
    import_source: &str,
) -> rusqlite::Result<()> {
    let changed = conn.execute(
        "UPDATE import_batches
         SET district_id = COALESCE(district_id, ?),
             school_year = COALESCE(school_year, ?),
             import_source = COALESCE(import_source, ?)
         WHERE batch_id = ?",
        (district_id, school_year, import_source, batch_id.to_string()),
    )?;
    if changed == 0 {
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }
    Ok(())
}
