//! District roster: loading it from a delimited file and checking uploaded
//! student ids against it. The check is advisory and never blocks an import.

use crate::formats::{find_column, STUDENT_ID_SYNONYMS};
use crate::tabular::{Delimiter, TabularFile};
use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

const SCHOOL_SYNONYMS: &[&str] = &["schoolid", "school", "schoolcode", "schoolnumber"];
const INACTIVE_SYNONYMS: &[&str] = &["inactive", "isinactive", "withdrawn"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentValidation {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub missing_sample: Vec<String>,
}

/// Counts how many of `local_ids` are active students of `district_id` and
/// returns up to `sample` of the ones that are not.
pub fn validate_students(
    conn: &Connection,
    district_id: i64,
    local_ids: &BTreeSet<String>,
    sample: usize,
) -> anyhow::Result<StudentValidation> {
    // Everything below runs in a transaction that is always rolled back, so
    // the candidate table never outlives the call.
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS candidate_ids(local_student_id TEXT PRIMARY KEY);
         DELETE FROM candidate_ids;",
    )?;
    {
        let mut insert =
            tx.prepare("INSERT OR IGNORE INTO candidate_ids(local_student_id) VALUES(?)")?;
        for id in local_ids {
            insert.execute([id])?;
        }
    }

    let matched: i64 = tx.query_row(
        "SELECT COUNT(*)
         FROM candidate_ids c
         JOIN students s
           ON s.local_student_id = c.local_student_id
          AND s.district_id = ?
          AND s.inactive = 0",
        [district_id],
        |r| r.get(0),
    )?;

    let missing_sample = {
        let mut stmt = tx.prepare(
            "SELECT c.local_student_id
             FROM candidate_ids c
             WHERE NOT EXISTS (
                 SELECT 1 FROM students s
                 WHERE s.local_student_id = c.local_student_id
                   AND s.district_id = ?
                   AND s.inactive = 0
             )
             ORDER BY c.local_student_id
             LIMIT ?",
        )?;
        let rows = stmt.query_map((district_id, sample as i64), |r| r.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    tx.rollback()?;

    let matched = matched as usize;
    Ok(StudentValidation {
        total: local_ids.len(),
        matched,
        unmatched: local_ids.len() - matched,
        missing_sample,
    })
}

pub fn upsert_student(
    conn: &Connection,
    district_id: i64,
    local_student_id: &str,
    school_id: Option<&str>,
    inactive: bool,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO students(district_id, local_student_id, school_id, inactive)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(district_id, local_student_id) DO UPDATE SET
            school_id = excluded.school_id,
            inactive = excluded.inactive",
        (
            district_id,
            local_student_id,
            school_id,
            if inactive { 1 } else { 0 },
        ),
    )?;
    Ok(())
}

fn parse_flag(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "x"
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImport {
    pub rows_total: usize,
    pub upserted: usize,
    pub skipped_lines: Vec<u64>,
}

pub fn import_roster_csv(
    conn: &Connection,
    district_id: i64,
    path: &Path,
    delimiter: Option<Delimiter>,
) -> anyhow::Result<ReferenceImport> {
    let delimiter = match delimiter {
        Some(d) => d,
        None => Delimiter::sniff(path).with_context(|| format!("reading {}", path.display()))?,
    };
    let file = TabularFile::new(path, delimiter);
    let mut rows = file
        .rows()
        .with_context(|| format!("opening {}", path.display()))?;
    let header = rows
        .next()
        .ok_or_else(|| anyhow!("roster file is empty"))??;
    let student = find_column(&header, STUDENT_ID_SYNONYMS, None)
        .ok_or_else(|| anyhow!("roster file has no student id column"))?;
    let school = find_column(&header, SCHOOL_SYNONYMS, None);
    let inactive = find_column(&header, INACTIVE_SYNONYMS, None);

    let tx = conn.unchecked_transaction()?;
    let mut out = ReferenceImport::default();
    for row in rows {
        let row = row?;
        if row.is_blank() {
            continue;
        }
        out.rows_total += 1;
        let id = row.trimmed(student);
        if id.is_empty() {
            out.skipped_lines.push(row.line);
            continue;
        }
        let school_id = school.map(|i| row.trimmed(i)).filter(|s| !s.is_empty());
        let is_inactive = inactive.map(|i| parse_flag(row.get(i))).unwrap_or(false);
        upsert_student(&tx, district_id, id, school_id, is_inactive)?;
        out.upserted += 1;
    }
    tx.commit()?;
    info!(district_id, upserted = out.upserted, "roster imported");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use crate::formats::test_files;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn
    }

    fn ids(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn counts_only_active_students_in_scope() {
        let conn = conn();
        upsert_student(&conn, 7, "1001", Some("HS"), false).expect("1001");
        upsert_student(&conn, 7, "1002", None, true).expect("1002");
        upsert_student(&conn, 8, "1003", None, false).expect("1003");

        let v = validate_students(&conn, 7, &ids(&["1001", "1002", "1003", "1004"]), 20)
            .expect("validate");
        assert_eq!(v.total, 4);
        assert_eq!(v.matched, 1);
        assert_eq!(v.unmatched, 3);
        assert_eq!(v.missing_sample, vec!["1002", "1003", "1004"]);
    }

    #[test]
    fn sample_is_bounded_and_leaves_no_trace() {
        let conn = conn();
        let many: BTreeSet<String> = (0..50).map(|i| format!("9{i:03}")).collect();
        let v = validate_students(&conn, 1, &many, 20).expect("validate");
        assert_eq!(v.matched, 0);
        assert_eq!(v.missing_sample.len(), 20);

        let leftover: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_temp_master WHERE name = 'candidate_ids'",
                [],
                |r| r.get(0),
            )
            .expect("temp master");
        assert_eq!(leftover, 0);
    }

    #[test]
    fn roster_file_upserts_and_reports_blank_ids() {
        let conn = conn();
        let p = test_files::write_temp(
            "roster.tsv",
            "Local Student ID\tSchool\tInactive\n1001\tHS\t\n\tHS\t\n1002\tMS\tyes\n1001\tMS\t0\n",
        );
        let out = import_roster_csv(&conn, 3, &p, None).expect("import");
        assert_eq!(out.rows_total, 4);
        assert_eq!(out.upserted, 3);
        assert_eq!(out.skipped_lines, vec![3]);

        let school: String = conn
            .query_row(
                "SELECT school_id FROM students WHERE district_id = 3 AND local_student_id = '1001'",
                [],
                |r| r.get(0),
            )
            .expect("1001");
        assert_eq!(school, "MS");
        let v = validate_students(&conn, 3, &ids(&["1001", "1002"]), 20).expect("validate");
        assert_eq!(v.matched, 1);
    }
}
