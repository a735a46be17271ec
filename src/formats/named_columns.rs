//! One observation per row under a small set of named columns. Rows are a
//! time series of submissions, so the timestamp decides which one counts.

use super::{
    find_column, parse_number, require_column, IntermediateRecord, ReadContext, SkipReason,
    STUDENT_ID_SYNONYMS, TITLE_SYNONYMS,
};
use crate::error::ImportResult;
use crate::tabular::RawRow;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

const STANDARD_SYNONYMS: &[&str] = &[
    "standard",
    "standardcode",
    "standards",
    "humancodingscheme",
    "statementcode",
];
const SCORE_SYNONYMS: &[&str] = &["score", "points", "pointsearned", "earnedpoints", "rawscore"];
const MAX_SYNONYMS: &[&str] = &[
    "maxscore",
    "maxpoints",
    "pointspossible",
    "possiblepoints",
    "outof",
];
const TIMESTAMP_SYNONYMS: &[&str] = &[
    "timestamp",
    "date",
    "datetime",
    "completedat",
    "datecompleted",
    "submitted",
    "submittedat",
    "testdate",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

#[derive(Debug, Clone, PartialEq)]
pub struct Columns {
    pub student: usize,
    pub standard: usize,
    pub score: usize,
    pub max_score: Option<usize>,
    pub test_name: Option<usize>,
    pub timestamp: Option<usize>,
}

pub fn discover(header: &RawRow) -> ImportResult<Columns> {
    Ok(Columns {
        student: require_column(header, "student id", STUDENT_ID_SYNONYMS, None)?,
        standard: require_column(header, "standard code", STANDARD_SYNONYMS, None)?,
        score: require_column(header, "score", SCORE_SYNONYMS, None)?,
        max_score: find_column(header, MAX_SYNONYMS, None),
        test_name: find_column(header, TITLE_SYNONYMS, None),
        timestamp: find_column(header, TIMESTAMP_SYNONYMS, None),
    })
}

pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for f in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, f) {
            return Some(dt);
        }
    }
    for f in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, f) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

pub fn read_row(
    row: &RawRow,
    columns: &Columns,
    ctx: &mut ReadContext,
    out: &mut Vec<IntermediateRecord>,
) {
    let student = row.trimmed(columns.student);
    if student.is_empty() {
        ctx.skips.skip(SkipReason::NoStudentId);
        return;
    }
    let standard = row.trimmed(columns.standard);
    if standard.is_empty() {
        ctx.skips.skip(SkipReason::BadStandard);
        return;
    }
    let Some(earned) = ctx.parse_score_or_skip(row.get(columns.score), "") else {
        return;
    };

    let max = match columns.max_score.map(|i| row.trimmed(i)).filter(|s| !s.is_empty()) {
        None => None,
        Some(text) => match parse_number(text) {
            Some(v) => Some(v),
            None => {
                ctx.skips.skip(SkipReason::BadNumber);
                return;
            }
        },
    };

    let timestamp = match columns.timestamp.map(|i| row.trimmed(i)).filter(|s| !s.is_empty()) {
        None => None,
        Some(text) => match parse_timestamp(text) {
            Some(ts) => Some(ts),
            None => {
                ctx.skips.skip(SkipReason::BadTimestamp);
                return;
            }
        },
    };

    let title = columns.test_name.map(|i| row.trimmed(i));
    let record = ctx.record(
        student,
        standard,
        earned,
        max,
        title,
        columns.score,
        timestamp,
        row.line,
    );
    out.push(record);
}
