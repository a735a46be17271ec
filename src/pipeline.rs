//! Read passes over an uploaded file: analysis for the preview, then the
//! final pass that aggregates and loads. Both reopen the file, so nothing
//! read during the preview is trusted at apply time.

use crate::aggregate::{aggregate, Aggregation};
use crate::db::ImportSettings;
use crate::detect::classify_test_name;
use crate::error::{ImportError, ImportResult};
use crate::formats::{parse_file, FormatKind, IntermediateRecord, ParsedFile, StandardRefKind};
use crate::loader::{load, LoadOutcome, LoadRequest};
use crate::roster::{validate_students, StudentValidation};
use crate::standards::{normalize, MatchKind, Resolution, ResolutionMap, SqliteCatalog, StandardResolver};
use crate::tabular::TabularFile;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub struct Analysis {
    pub parsed: ParsedFile,
    pub resolutions: ResolutionMap,
}

pub fn resolve_standards(
    conn: &Connection,
    kind: FormatKind,
    records: &[IntermediateRecord],
) -> ImportResult<ResolutionMap> {
    let catalog = SqliteCatalog::new(conn);
    let resolver = StandardResolver::new(&catalog);
    let map = match kind.standard_refs() {
        StandardRefKind::CatalogId => {
            let ids: BTreeSet<Uuid> = records
                .iter()
                .filter_map(|r| Uuid::parse_str(&r.standard_code_raw).ok())
                .collect();
            resolver.resolve_ids(&ids.into_iter().collect::<Vec<_>>())?
        }
        StandardRefKind::Code => {
            resolver.resolve_all(records.iter().map(|r| r.standard_code_raw.as_str()))?
        }
    };
    Ok(map)
}

pub fn analyze(
    conn: &Connection,
    kind: FormatKind,
    file: &TabularFile,
    fallback_test_id: &str,
) -> ImportResult<Analysis> {
    let parsed = parse_file(kind, file, fallback_test_id)?;
    let resolutions = resolve_standards(conn, kind, &parsed.records)?;
    Ok(Analysis {
        parsed,
        resolutions,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewStandard {
    pub code: String,
    pub exists: bool,
    pub canonical_id: Option<Uuid>,
    pub human_coding_scheme: Option<String>,
    pub matched_by: Option<MatchKind>,
    pub superseded: bool,
    pub students: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub format: FormatKind,
    pub test_id: String,
    pub subject: Option<String>,
    pub unit_cycle: Option<i64>,
    pub records: usize,
    pub standards: Vec<PreviewStandard>,
    pub missing: Vec<String>,
    pub raw_code_fallback: bool,
    pub roster: StudentValidation,
    pub skips: Value,
}

/// Test id, subject and unit cycle taken from the first record, or from the
/// label when the file carries no title.
fn batch_labels(records: &[IntermediateRecord], label: &str) -> (String, Option<String>, Option<i64>) {
    match records.first() {
        Some(r) => (r.test_id.clone(), r.subject.clone(), r.unit_cycle),
        None => {
            let hints = classify_test_name(label);
            (label.to_string(), hints.subject, hints.unit_cycle)
        }
    }
}

pub fn preview(
    conn: &Connection,
    kind: FormatKind,
    file: &TabularFile,
    label: &str,
    district_id: i64,
    settings: &ImportSettings,
) -> ImportResult<Preview> {
    let analysis = analyze(conn, kind, file, label)?;
    let records = &analysis.parsed.records;

    let mut students_by_code: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    for r in records {
        students_by_code
            .entry(normalize(&r.standard_code_raw))
            .or_default()
            .insert(r.local_student_id.as_str());
    }

    let standards = analysis
        .resolutions
        .iter()
        .map(|(key, resolution)| {
            let students = students_by_code.get(key).map(|s| s.len()).unwrap_or(0);
            match resolution {
                Resolution::Resolved(r) => PreviewStandard {
                    code: r.raw_code.clone(),
                    exists: true,
                    canonical_id: Some(r.canonical_id),
                    human_coding_scheme: Some(r.human_coding_scheme.clone()),
                    matched_by: Some(r.matched_by),
                    superseded: r.superseded,
                    students,
                },
                Resolution::Missing { raw_code } => PreviewStandard {
                    code: raw_code.clone(),
                    exists: false,
                    canonical_id: None,
                    human_coding_scheme: None,
                    matched_by: None,
                    superseded: false,
                    students,
                },
            }
        })
        .collect();

    let ids: BTreeSet<String> = records.iter().map(|r| r.local_student_id.clone()).collect();
    let roster = validate_students(conn, district_id, &ids, settings.missing_sample_size)?;
    let (test_id, subject, unit_cycle) = batch_labels(records, label);

    let missing = analysis.resolutions.missing();
    if analysis.parsed.skips.total() > 0 {
        warn!(
            format = kind.as_str(),
            skipped = analysis.parsed.skips.total(),
            "rows skipped during analysis"
        );
    }
    info!(
        format = kind.as_str(),
        records = records.len(),
        standards = analysis.resolutions.len(),
        missing = missing.len(),
        matched_students = roster.matched,
        "preview ready"
    );
    Ok(Preview {
        format: kind,
        test_id,
        subject,
        unit_cycle,
        records: records.len(),
        standards,
        missing,
        raw_code_fallback: kind.allows_raw_codes(),
        roster,
        skips: analysis.parsed.skips.to_json(),
    })
}

/// Operator-supplied values that win over what the file says.
#[derive(Debug, Clone, Default)]
pub struct BatchOverrides {
    pub test_id: Option<String>,
    pub subject: Option<String>,
    pub unit_cycle: Option<i64>,
}

/// Final pass: parse, resolve and aggregate without touching storage.
pub fn build_rows(conn: &Connection, kind: FormatKind, file: &TabularFile, label: &str) -> ImportResult<(Analysis, Aggregation)> {
    let analysis = analyze(conn, kind, file, label)?;
    let mut aggregation = aggregate(
        &analysis.parsed.records,
        kind.policy(),
        &analysis.resolutions,
        kind.allows_raw_codes(),
    );
    aggregation.skips.merge(&analysis.parsed.skips);
    if aggregation.rows.is_empty() {
        return Err(ImportError::NoValidRows);
    }
    Ok((analysis, aggregation))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    #[serde(flatten)]
    pub load: LoadOutcome,
    pub test_id: String,
    pub subject: Option<String>,
    pub unit_cycle: Option<i64>,
    pub school_year: i32,
    pub unmatched: usize,
    pub unresolved_dropped: usize,
    pub raw_rows: usize,
    pub skips: Value,
}

pub struct ApplyRequest<'a> {
    pub label: &'a str,
    pub source_file: &'a str,
    pub source_sha256: Option<&'a str>,
    pub district_id: i64,
    pub overrides: BatchOverrides,
    pub school_year: i32,
}

pub fn aggregate_and_load(
    conn: &Connection,
    req: &ApplyRequest<'_>,
    aggregation: &Aggregation,
    records: &[IntermediateRecord],
    settings: &ImportSettings,
) -> ImportResult<ApplyOutcome> {
    let (file_test_id, file_subject, file_unit) = batch_labels(records, req.label);
    let test_id = req.overrides.test_id.clone().unwrap_or(file_test_id);
    let subject = req.overrides.subject.clone().or(file_subject);
    let unit_cycle = req.overrides.unit_cycle.or(file_unit);

    let ids: BTreeSet<String> = aggregation
        .rows
        .iter()
        .map(|r| r.local_student_id.clone())
        .collect();
    let roster = validate_students(conn, req.district_id, &ids, 0)?;

    let load_req = LoadRequest {
        district_id: req.district_id,
        test_id: &test_id,
        subject: subject.as_deref(),
        unit_cycle,
        source_file: req.source_file,
        source_sha256: req.source_sha256,
        school_year: req.school_year,
        import_source: &settings.import_source,
        bulk_timeout: Duration::from_millis(settings.bulk_timeout_ms),
    };
    let load = load(conn, &load_req, &aggregation.rows)?;
    Ok(ApplyOutcome {
        load,
        test_id,
        subject,
        unit_cycle,
        school_year: req.school_year,
        unmatched: roster.unmatched,
        unresolved_dropped: aggregation.unresolved_dropped,
        raw_rows: aggregation.raw_rows(),
        skips: aggregation.skips.to_json(),
    })
}
