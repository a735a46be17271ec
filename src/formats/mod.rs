//! Vendor export layouts.
//!
//! Every layout goes through the same two steps: `discover` turns the header
//! row(s) into a column map, `read_records` turns data rows into
//! `IntermediateRecord`s. Row-level problems are counted in a `SkipLog` and
//! never abort the file; structural problems come back as `ImportError`.

mod block_triples;
mod dual_header;
pub mod merge;
mod named_columns;
mod wide_columns;

use crate::aggregate::AggregationPolicy;
use crate::detect::{classify_test_name, TestNameHints};
use crate::error::{ImportError, ImportResult};
use crate::tabular::{RawRow, TabularFile};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    BlockTriples,
    DualHeader,
    NamedColumns,
    WideNamedColumns,
}

/// How an adapter names standards in its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardRefKind {
    CatalogId,
    Code,
}

impl FormatKind {
    pub const ALL: [FormatKind; 4] = [
        FormatKind::BlockTriples,
        FormatKind::DualHeader,
        FormatKind::NamedColumns,
        FormatKind::WideNamedColumns,
    ];

    pub fn parse(s: &str) -> Option<FormatKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block_triples" | "a" => Some(FormatKind::BlockTriples),
            "dual_header" | "b" => Some(FormatKind::DualHeader),
            "named_columns" | "c" => Some(FormatKind::NamedColumns),
            "wide_named_columns" | "d" => Some(FormatKind::WideNamedColumns),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormatKind::BlockTriples => "block_triples",
            FormatKind::DualHeader => "dual_header",
            FormatKind::NamedColumns => "named_columns",
            FormatKind::WideNamedColumns => "wide_named_columns",
        }
    }

    pub fn header_rows(self) -> usize {
        match self {
            FormatKind::DualHeader => 2,
            _ => 1,
        }
    }

    pub fn policy(self) -> AggregationPolicy {
        match self {
            FormatKind::NamedColumns => AggregationPolicy::LatestWins,
            _ => AggregationPolicy::SumCapped,
        }
    }

    /// Wide exports may carry local codes the catalog has never seen; those
    /// rows are kept under the raw code and flagged.
    pub fn allows_raw_codes(self) -> bool {
        matches!(self, FormatKind::WideNamedColumns)
    }

    pub fn standard_refs(self) -> StandardRefKind {
        match self {
            FormatKind::BlockTriples => StandardRefKind::CatalogId,
            _ => StandardRefKind::Code,
        }
    }

    pub fn discover(self, headers: &[RawRow]) -> ImportResult<ColumnMap> {
        if headers.len() < self.header_rows() || headers.iter().all(|h| h.is_blank()) {
            return Err(ImportError::MalformedInput(format!(
                "{} files need {} header row(s)",
                self.as_str(),
                self.header_rows()
            )));
        }
        Ok(match self {
            FormatKind::BlockTriples => ColumnMap::BlockTriples(block_triples::discover(&headers[0])?),
            FormatKind::DualHeader => {
                ColumnMap::DualHeader(dual_header::discover(&headers[0], &headers[1])?)
            }
            FormatKind::NamedColumns => ColumnMap::NamedColumns(named_columns::discover(&headers[0])?),
            FormatKind::WideNamedColumns => {
                ColumnMap::WideNamedColumns(wide_columns::discover(&headers[0])?)
            }
        })
    }

    pub fn read_records<I>(
        self,
        rows: I,
        columns: &ColumnMap,
        ctx: &mut ReadContext,
    ) -> ImportResult<Vec<IntermediateRecord>>
    where
        I: IntoIterator<Item = ImportResult<RawRow>>,
    {
        let mut out = Vec::new();
        for row in rows {
            let row = row?;
            if row.is_blank() {
                continue;
            }
            match columns {
                ColumnMap::BlockTriples(c) => block_triples::read_row(&row, c, ctx, &mut out),
                ColumnMap::DualHeader(c) => dual_header::read_row(&row, c, ctx, &mut out),
                ColumnMap::NamedColumns(c) => named_columns::read_row(&row, c, ctx, &mut out),
                ColumnMap::WideNamedColumns(c) => wide_columns::read_row(&row, c, ctx, &mut out),
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnMap {
    BlockTriples(block_triples::Columns),
    DualHeader(dual_header::Columns),
    NamedColumns(named_columns::Columns),
    WideNamedColumns(wide_columns::Columns),
}

impl ColumnMap {
    pub fn title_column(&self) -> Option<usize> {
        match self {
            ColumnMap::BlockTriples(c) => c.title,
            ColumnMap::DualHeader(c) => c.title,
            ColumnMap::NamedColumns(c) => c.test_name,
            ColumnMap::WideNamedColumns(c) => c.title,
        }
    }

    pub fn title_of(&self, row: &RawRow) -> Option<String> {
        self.title_column()
            .map(|i| row.trimmed(i).to_string())
            .filter(|s| !s.is_empty())
    }

    /// Number of scored columns (question blocks, named score column, wide
    /// columns) found during discovery.
    pub fn scored_columns(&self) -> usize {
        match self {
            ColumnMap::BlockTriples(c) => c.blocks.len(),
            ColumnMap::DualHeader(c) => c.questions.len(),
            ColumnMap::NamedColumns(_) => 1,
            ColumnMap::WideNamedColumns(c) => c.scored.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateRecord {
    pub local_student_id: String,
    pub standard_code_raw: String,
    pub earned_points: f64,
    pub max_points: Option<f64>,
    pub test_id: String,
    pub subject: Option<String>,
    pub unit_cycle: Option<i64>,
    pub source_column: usize,
    pub timestamp: Option<NaiveDateTime>,
    pub line: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoStudentId,
    NoAttempt,
    BadNumber,
    BadTimestamp,
    BadStandard,
    DuplicateQuestion,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NoStudentId => "no_student_id",
            SkipReason::NoAttempt => "no_attempt",
            SkipReason::BadNumber => "bad_number",
            SkipReason::BadTimestamp => "bad_timestamp",
            SkipReason::BadStandard => "bad_standard",
            SkipReason::DuplicateQuestion => "duplicate_question",
        }
    }
}

/// Counts of locally recovered row anomalies, keyed by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipLog {
    counts: BTreeMap<SkipReason, usize>,
}

impl SkipLog {
    pub fn skip(&mut self, reason: SkipReason) {
        *self.counts.entry(reason).or_default() += 1;
    }

    pub fn count(&self, reason: SkipReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn merge(&mut self, other: &SkipLog) {
        for (reason, n) in &other.counts {
            *self.counts.entry(*reason).or_default() += n;
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (reason, n) in &self.counts {
            map.insert(reason.as_str().to_string(), serde_json::json!(n));
        }
        serde_json::Value::Object(map)
    }
}

/// Per-pass state shared by the adapters: the fallback test id, the skip
/// counters and a cache of test-name hints.
#[derive(Debug)]
pub struct ReadContext {
    pub fallback_test_id: String,
    pub skips: SkipLog,
    hints: HashMap<String, TestNameHints>,
}

impl ReadContext {
    pub fn new(fallback_test_id: impl Into<String>) -> Self {
        Self {
            fallback_test_id: fallback_test_id.into(),
            skips: SkipLog::default(),
            hints: HashMap::new(),
        }
    }

    pub fn test_id_for(&self, title: Option<&str>) -> String {
        title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.fallback_test_id)
            .to_string()
    }

    pub fn hints_for(&mut self, test_id: &str) -> TestNameHints {
        self.hints
            .entry(test_id.to_string())
            .or_insert_with(|| classify_test_name(test_id))
            .clone()
    }

    /// Shared attempt rule. Blank score and blank response: no attempt.
    /// Blank score with a response: an attempt worth zero. A score that
    /// doesn't parse is skipped, never defaulted.
    pub fn parse_score_or_skip(&mut self, score: &str, response: &str) -> Option<f64> {
        let score = score.trim();
        if score.is_empty() {
            if response.trim().is_empty() {
                self.skips.skip(SkipReason::NoAttempt);
                return None;
            }
            return Some(0.0);
        }
        match parse_number(score) {
            Some(v) => Some(v),
            None => {
                self.skips.skip(SkipReason::BadNumber);
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        student: &str,
        standard: &str,
        earned: f64,
        max: Option<f64>,
        title: Option<&str>,
        source_column: usize,
        timestamp: Option<NaiveDateTime>,
        line: u64,
    ) -> IntermediateRecord {
        let test_id = self.test_id_for(title);
        let hints = self.hints_for(&test_id);
        IntermediateRecord {
            local_student_id: student.trim().to_string(),
            standard_code_raw: standard.trim().to_string(),
            earned_points: earned,
            max_points: max,
            test_id,
            subject: hints.subject,
            unit_cycle: hints.unit_cycle,
            source_column,
            timestamp,
            line,
        }
    }
}

/// Accepts plain decimals plus a trailing percent sign or thousands commas.
pub fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    let v = cleaned.trim().parse::<f64>().ok()?;
    v.is_finite().then_some(v)
}

/// Lowercased, alphanumerics only: "Local Student ID" -> "localstudentid".
pub fn header_key(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// First header before `limit` (or anywhere) whose key is one of `synonyms`.
pub fn find_column(header: &RawRow, synonyms: &[&str], limit: Option<usize>) -> Option<usize> {
    let end = limit.unwrap_or(header.fields.len()).min(header.fields.len());
    (0..end).find(|&i| {
        let key = header_key(&header.fields[i]);
        synonyms.iter().any(|s| *s == key)
    })
}

pub fn require_column(
    header: &RawRow,
    column: &'static str,
    synonyms: &'static [&'static str],
    limit: Option<usize>,
) -> ImportResult<usize> {
    find_column(header, synonyms, limit).ok_or_else(|| ImportError::RequiredColumnMissing {
        column,
        synonyms: synonyms.to_vec(),
    })
}

pub const STUDENT_ID_SYNONYMS: &[&str] = &[
    "studentid",
    "localstudentid",
    "localid",
    "studentnumber",
    "studentno",
    "sisid",
];

pub const TITLE_SYNONYMS: &[&str] = &[
    "testname",
    "testtitle",
    "assessmentname",
    "assessmenttitle",
    "assessment",
    "title",
    "test",
];

/// Output of one full read of a file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub kind: FormatKind,
    pub columns: ColumnMap,
    pub records: Vec<IntermediateRecord>,
    pub skips: SkipLog,
    pub first_title: Option<String>,
}

/// Reads `file` start to finish: header discovery, then every data row.
pub fn parse_file(kind: FormatKind, file: &TabularFile, fallback_test_id: &str) -> ImportResult<ParsedFile> {
    let mut rows = file.rows()?;
    let mut headers = Vec::with_capacity(kind.header_rows());
    while headers.len() < kind.header_rows() {
        match rows.next() {
            Some(row) => headers.push(row?),
            None => break,
        }
    }
    if headers.is_empty() {
        return Err(ImportError::MalformedInput("file is empty".to_string()));
    }
    let columns = kind.discover(&headers)?;

    let mut ctx = ReadContext::new(fallback_test_id);
    let mut first_title = None;
    let data = rows.inspect(|r| {
        if first_title.is_none() {
            if let Ok(row) = r {
                first_title = columns.title_of(row);
            }
        }
    });
    let records = kind.read_records(data, &columns, &mut ctx)?;
    tracing::debug!(
        format = kind.as_str(),
        scored_columns = columns.scored_columns(),
        records = records.len(),
        skipped = ctx.skips.total(),
        "parsed file"
    );
    Ok(ParsedFile {
        kind,
        columns,
        records,
        skips: ctx.skips,
        first_title,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::Delimiter;

    #[test]
    fn attempt_rule_distinguishes_blank_and_bad_scores() {
        let mut ctx = ReadContext::new("t");
        assert_eq!(ctx.parse_score_or_skip("", ""), None);
        assert_eq!(ctx.parse_score_or_skip(" ", "B"), Some(0.0));
        assert_eq!(ctx.parse_score_or_skip("2.5", ""), Some(2.5));
        assert_eq!(ctx.parse_score_or_skip("n/a", "C"), None);
        assert_eq!(ctx.skips.count(SkipReason::NoAttempt), 1);
        assert_eq!(ctx.skips.count(SkipReason::BadNumber), 1);
    }

    #[test]
    fn header_keys_ignore_case_and_punctuation() {
        assert_eq!(header_key("Local Student ID"), "localstudentid");
        assert_eq!(header_key("Student_Id"), "studentid");
        assert_eq!(parse_number("1,250"), Some(1250.0));
        assert_eq!(parse_number("75%"), Some(75.0));
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn parsing_twice_is_stable_for_every_format() {
        let fixtures = [
            (
                FormatKind::BlockTriples,
                "Student ID,Test Name,Item,Score,ItemStandard\n1001,Bio Unit 2,A,1,x|11111111-1111-4111-8111-111111111111\n",
            ),
            (
                FormatKind::DualHeader,
                "Student ID,Test Title,RI.9-10.3,,RL.9-10.1,\n,,4,,2,\n1001,ELA Cycle 1,3,B,2,A\n",
            ),
            (
                FormatKind::NamedColumns,
                "StudentId,Standard,Score,Max Score,Test Name,Timestamp\n1001,RI.9-10.3,2,4,ELA,2024-09-01 10:00:00\n",
            ),
            (
                FormatKind::WideNamedColumns,
                "Student,RI.9-10.3 Points,RL.9-10.1 Points (of 2)\n1001,1,2\n",
            ),
        ];
        for (kind, text) in fixtures {
            let p = test_files::write_temp(&format!("{}.csv", kind.as_str()), text);
            let file = TabularFile::new(&p, Delimiter::Comma);
            let a = parse_file(kind, &file, "label").expect("first pass");
            let b = parse_file(kind, &file, "label").expect("second pass");
            assert!(!a.records.is_empty(), "{kind:?} produced no records");
            assert_eq!(a.records, b.records, "{kind:?}");
        }
    }

    #[test]
    fn empty_file_is_malformed() {
        let p = test_files::write_temp("empty.csv", "");
        let file = TabularFile::new(&p, Delimiter::Comma);
        let err = parse_file(FormatKind::NamedColumns, &file, "x").expect_err("empty");
        assert_eq!(err.code(), "malformed_input");
    }
}
