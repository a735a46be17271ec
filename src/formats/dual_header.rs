//! Two header rows: row 0 names the leading columns and carries a standard
//! code over each question, row 1 carries the question's max points.
//! Questions occupy two columns each (score, then response).

use super::{
    find_column, parse_number, require_column, IntermediateRecord, ReadContext, SkipReason,
    STUDENT_ID_SYNONYMS, TITLE_SYNONYMS,
};
use crate::error::{ImportError, ImportResult};
use crate::standards::{is_standard_code, normalize};
use crate::tabular::RawRow;
use tracing::debug;

const QUESTION_STRIDE: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub column: usize,
    pub code: String,
    pub max_points: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Columns {
    pub student: usize,
    pub title: Option<usize>,
    pub questions: Vec<Question>,
}

fn question_at(codes: &RawRow, maxes: &RawRow, column: usize) -> Option<Question> {
    let code = codes.trimmed(column);
    if !is_standard_code(&normalize(code)) {
        return None;
    }
    let max_points = parse_number(maxes.get(column))?;
    Some(Question {
        column,
        code: code.to_string(),
        max_points,
    })
}

pub fn discover(codes: &RawRow, maxes: &RawRow) -> ImportResult<Columns> {
    let width = codes.fields.len().max(maxes.fields.len());
    let start = (0..width)
        .find(|&c| question_at(codes, maxes, c).is_some())
        .ok_or_else(|| {
            ImportError::MalformedInput(
                "no question columns: expected a standard code in header row 1 above a max-points value in header row 2"
                    .to_string(),
            )
        })?;

    let student = require_column(codes, "student id", STUDENT_ID_SYNONYMS, Some(start))?;
    let title = find_column(codes, TITLE_SYNONYMS, Some(start));

    let mut questions = Vec::new();
    for column in (start..width).step_by(QUESTION_STRIDE) {
        match question_at(codes, maxes, column) {
            Some(q) => questions.push(q),
            None if !codes.trimmed(column).is_empty() => {
                debug!(column, header = codes.trimmed(column), "not a question column");
            }
            None => {}
        }
    }
    debug!(start, questions = questions.len(), "discovered question block");
    Ok(Columns {
        student,
        title,
        questions,
    })
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
    let title = columns.title.map(|i| row.trimmed(i));
    for q in &columns.questions {
        let Some(earned) = ctx.parse_score_or_skip(row.get(q.column), row.get(q.column + 1)) else {
            continue;
        };
        let record = ctx.record(
            student,
            &q.code,
            earned,
            Some(q.max_points),
            title,
            q.column,
            None,
            row.line,
        );
        out.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{parse_file, test_files, FormatKind};
    use crate::tabular::{Delimiter, TabularFile};

    #[test]
    fn question_blocks_start_at_first_code_over_number() {
        let p = test_files::write_temp(
            "dual.csv",
            "Student ID,Test Title,Period,RI.9-10.3,,MATH.HSA.APR.1,\n\
             ,,3,4,,5,\n\
             1001,ELA Cycle 3,2,3,B,5,C\n\
             1002,ELA Cycle 3,2,,A,,\n",
        );
        let parsed = parse_file(
            FormatKind::DualHeader,
            &TabularFile::new(&p, Delimiter::Comma),
            "fallback",
        )
        .expect("parse");

        let crate::formats::ColumnMap::DualHeader(cols) = &parsed.columns else {
            panic!("wrong column map");
        };
        assert_eq!(cols.student, 0);
        assert_eq!(cols.title, Some(1));
        let starts: Vec<(usize, f64)> = cols.questions.iter().map(|q| (q.column, q.max_points)).collect();
        assert_eq!(starts, vec![(3, 4.0), (5, 5.0)]);

        let maxes: Vec<Option<f64>> = parsed.records.iter().map(|r| r.max_points).collect();
        assert_eq!(maxes, vec![Some(4.0), Some(5.0), Some(4.0)]);
        assert_eq!(parsed.records[0].standard_code_raw, "RI.9-10.3");
        assert_eq!(parsed.records[1].standard_code_raw, "MATH.HSA.APR.1");
        assert_eq!(parsed.records[2].earned_points, 0.0);
        assert_eq!(parsed.records[0].unit_cycle, Some(3));
        assert_eq!(parsed.skips.count(SkipReason::NoAttempt), 1);
    }

    #[test]
    fn unicode_dashes_in_codes_still_validate() {
        let codes = RawRow {
            line: 1,
            fields: vec!["StudentId".into(), "RI.9\u{2013}10.3".into(), "".into()],
        };
        let maxes = RawRow {
            line: 2,
            fields: vec!["".into(), "2".into(), "".into()],
        };
        let cols = discover(&codes, &maxes).expect("discover");
        assert_eq!(cols.questions.len(), 1);
        assert_eq!(cols.questions[0].column, 1);
    }

    #[test]
    fn header_without_codes_is_malformed() {
        let codes = RawRow {
            line: 1,
            fields: vec!["Student ID".into(), "Score".into()],
        };
        let maxes = RawRow {
            line: 2,
            fields: vec!["".into(), "4".into()],
        };
        let err = discover(&codes, &maxes).expect_err("no questions");
        assert_eq!(err.code(), "malformed_input");
    }
}
