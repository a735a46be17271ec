use crate::formats::{IntermediateRecord, SkipLog, SkipReason};
use crate::standards::{normalize, Resolution, ResolutionMap};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Keep the record with the greatest timestamp; ties keep the first seen.
    LatestWins,
    /// Sum earned points per key, clamped to the accumulated max.
    SumCapped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StandardRef {
    Canonical { id: Uuid, code: String },
    /// Unmapped code kept as-is; only some layouts allow this.
    Raw(String),
}

impl StandardRef {
    fn key(&self) -> String {
        match self {
            StandardRef::Canonical { id, .. } => id.to_string(),
            StandardRef::Raw(code) => format!("raw:{}", normalize(code)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub local_student_id: String,
    pub standard: StandardRef,
    pub points: f64,
    pub max_points: f64,
}

impl AggregatedRow {
    pub fn human_coding_scheme(&self) -> &str {
        match &self.standard {
            StandardRef::Canonical { code, .. } => code,
            StandardRef::Raw(code) => code,
        }
    }

    pub fn standard_id(&self) -> Option<Uuid> {
        match &self.standard {
            StandardRef::Canonical { id, .. } => Some(*id),
            StandardRef::Raw(_) => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.standard, StandardRef::Raw(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub rows: Vec<AggregatedRow>,
    /// Records dropped because their standard has no catalog entry.
    pub unresolved_dropped: usize,
    pub skips: SkipLog,
}

impl Aggregation {
    pub fn raw_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.is_raw()).count()
    }
}

struct Slot {
    row: AggregatedRow,
    timestamp: Option<chrono::NaiveDateTime>,
}

fn clamp(points: f64, max: f64) -> f64 {
    if max > 0.0 {
        points.min(max)
    } else {
        points
    }
}

/// Folds intermediate records into one row per (student, standard), in order
/// of first appearance.
pub fn aggregate(
    records: &[IntermediateRecord],
    policy: AggregationPolicy,
    resolutions: &ResolutionMap,
    allow_raw: bool,
) -> Aggregation {
    let mut out = Aggregation::default();
    let mut slots: Vec<Slot> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut seen_questions: HashSet<(String, String, usize)> = HashSet::new();

    for rec in records {
        let standard = match resolutions.get(&rec.standard_code_raw).and_then(Resolution::resolved) {
            Some(r) => StandardRef::Canonical {
                id: r.canonical_id,
                code: r.human_coding_scheme.clone(),
            },
            None if allow_raw => StandardRef::Raw(rec.standard_code_raw.clone()),
            None => {
                out.unresolved_dropped += 1;
                continue;
            }
        };

        if policy == AggregationPolicy::SumCapped {
            let question = (
                rec.local_student_id.clone(),
                normalize(&rec.standard_code_raw),
                rec.source_column,
            );
            if !seen_questions.insert(question) {
                out.skips.skip(SkipReason::DuplicateQuestion);
                continue;
            }
        }

        let key = (rec.local_student_id.clone(), standard.key());
        match (policy, index.get(&key).copied()) {
            (AggregationPolicy::SumCapped, Some(i)) => {
                let row = &mut slots[i].row;
                row.max_points += rec.max_points.unwrap_or(1.0);
                row.points = clamp(row.points + rec.earned_points, row.max_points);
            }
            (AggregationPolicy::LatestWins, Some(i)) => {
                if rec.timestamp > slots[i].timestamp {
                    slots[i] = latest_slot(rec, standard);
                }
            }
            (AggregationPolicy::SumCapped, None) => {
                let max_points = rec.max_points.unwrap_or(1.0);
                index.insert(key, slots.len());
                slots.push(Slot {
                    row: AggregatedRow {
                        local_student_id: rec.local_student_id.clone(),
                        standard,
                        points: clamp(rec.earned_points, max_points),
                        max_points,
                    },
                    timestamp: rec.timestamp,
                });
            }
            (AggregationPolicy::LatestWins, None) => {
                index.insert(key, slots.len());
                slots.push(latest_slot(rec, standard));
            }
        }
    }

    out.rows = slots.into_iter().map(|s| s.row).collect();
    out
}

fn latest_slot(rec: &IntermediateRecord, standard: StandardRef) -> Slot {
    let max_points = rec.max_points.unwrap_or(1.0);
    Slot {
        row: AggregatedRow {
            local_student_id: rec.local_student_id.clone(),
            standard,
            points: clamp(rec.earned_points, max_points),
            max_points,
        },
        timestamp: rec.timestamp,
    }
}
