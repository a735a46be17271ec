//! One row per student, one column per standard. Scored columns are named
//! `<code> Points`, optionally with the max in parentheses:
//! `CCSS.ELA-Literacy.RI.9-10.3 Points (of 4)`.

use super::{
    find_column, parse_number, IntermediateRecord, ReadContext, SkipReason, STUDENT_ID_SYNONYMS,
    TITLE_SYNONYMS,
};
use crate::error::{ImportError, ImportResult};
use crate::tabular::RawRow;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn points_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:CCSS\.(?:ELA-LITERACY|MATH\.CONTENT)\.)?(?P<code>[A-Z0-9]+(?:[.\-][A-Z0-9]+)+)[\s_]*POINTS(?:\s*\(\s*(?:OF\s*|/\s*)?(?P<max>\d+(?:\.\d+)?)\s*\))?\s*$",
        )
        .expect("valid regex")
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredColumn {
    pub column: usize,
    pub code: String,
    pub max_points: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Columns {
    pub student: usize,
    pub title: Option<usize>,
    pub scored: Vec<ScoredColumn>,
}

pub fn scored_column(column: usize, header: &str) -> Option<ScoredColumn> {
    let caps = points_header_re().captures(header)?;
    Some(ScoredColumn {
        column,
        code: caps["code"].to_string(),
        max_points: caps.name("max").and_then(|m| parse_number(m.as_str())),
    })
}

pub fn discover(header: &RawRow) -> ImportResult<Columns> {
    let scored: Vec<ScoredColumn> = header
        .fields
        .iter()
        .enumerate()
        .filter_map(|(i, h)| scored_column(i, h))
        .collect();
    if scored.is_empty() {
        return Err(ImportError::MalformedInput(
            "no \"<standard> Points\" columns found".to_string(),
        ));
    }
    let student = find_column(header, STUDENT_ID_SYNONYMS, None).unwrap_or(0);
    let title = find_column(header, TITLE_SYNONYMS, None);
    debug!(student, columns = scored.len(), "discovered points columns");
    Ok(Columns {
        student,
        title,
        scored,
    })
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

pub fn read_row(
    row: &RawRow,
    columns: &Columns,
    ctx: &mut ReadContext,
    out: &mut Vec<IntermediateRecord>,
) {
    // Summary and footer rows ("Class Average", blank lines) carry no numeric id.
    let student = row.trimmed(columns.student);
    if !is_numeric_id(student) {
        ctx.skips.skip(SkipReason::NoStudentId);
        return;
    }
    let title = columns.title.map(|i| row.trimmed(i));
    for col in &columns.scored {
        let Some(earned) = ctx.parse_score_or_skip(row.get(col.column), "") else {
            continue;
        };
        let record = ctx.record(
            student,
            &col.code,
            earned,
            col.max_points,
            title,
            col.column,
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
    fn header_suffix_convention() {
        let c = scored_column(3, "CCSS.ELA-Literacy.RI.9-10.3 Points").expect("ela");
        assert_eq!(c.code, "RI.9-10.3");
        assert_eq!(c.max_points, None);

        let c = scored_column(4, "8.EE.1_Points (of 2)").expect("math");
        assert_eq!(c.code, "8.EE.1");
        assert_eq!(c.max_points, Some(2.0));

        assert!(scored_column(0, "Total Points").is_none());
        assert!(scored_column(0, "Points Possible").is_none());
    }

    #[test]
    fn rows_without_numeric_id_are_skipped() {
        let p = test_files::write_temp(
            "wide.tsv",
            "Student\tAssessment\tRI.9-10.3 Points\tLOCAL.READ.1 Points (of 3)\tTotal Points\n\
             1001\tReading Cycle II\t1\t3\t4\n\
             1002\tReading Cycle II\t\t2\t2\n\
             Class Average\t\t0.5\t2.5\t3\n",
        );
        let parsed = parse_file(
            FormatKind::WideNamedColumns,
            &TabularFile::new(&p, Delimiter::Tab),
            "fallback",
        )
        .expect("parse");
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(parsed.records[1].standard_code_raw, "LOCAL.READ.1");
        assert_eq!(parsed.records[1].max_points, Some(3.0));
        assert_eq!(parsed.records[0].unit_cycle, Some(2));
        assert_eq!(parsed.records[0].subject.as_deref(), Some("ELA"));
        assert_eq!(parsed.skips.count(SkipReason::NoStudentId), 1);
        assert_eq!(parsed.skips.count(SkipReason::NoAttempt), 1);
    }
}
