//! Single header with repeating `Item` / `Score` / `ItemStandard` blocks.
//! The `Item` column holds the student's response; the standard cell is a
//! pipe-delimited list whose last entry is a catalog id.

use super::{
    find_column, require_column, IntermediateRecord, ReadContext, SkipReason, STUDENT_ID_SYNONYMS,
    TITLE_SYNONYMS,
};
use crate::error::{ImportError, ImportResult};
use crate::tabular::RawRow;
use tracing::debug;
use uuid::Uuid;

/// Columns after the anchor searched for the other two block members.
const BLOCK_SEARCH_WIDTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub response: usize,
    pub score: usize,
    pub standard: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Columns {
    pub student: usize,
    pub title: Option<usize>,
    pub blocks: Vec<Block>,
}

/// Header key with digits removed, so "Item 12 Score" reads as "itemscore".
fn member_key(header: &str) -> String {
    super::header_key(header)
        .chars()
        .filter(|c| !c.is_ascii_digit())
        .collect()
}

fn is_anchor(header: &str) -> bool {
    matches!(member_key(header).as_str(), "item" | "itemresponse")
}

fn is_score(header: &str) -> bool {
    matches!(member_key(header).as_str(), "score" | "itemscore" | "itempoints")
}

fn is_standard(header: &str) -> bool {
    matches!(
        member_key(header).as_str(),
        "itemstandard" | "itemstandards" | "standard" | "standards"
    )
}

pub fn discover(header: &RawRow) -> ImportResult<Columns> {
    let student = require_column(header, "student id", STUDENT_ID_SYNONYMS, None)?;
    let title = find_column(header, TITLE_SYNONYMS, None);

    let width = header.fields.len();
    let mut blocks = Vec::new();
    for anchor in (0..width).filter(|&i| is_anchor(&header.fields[i])) {
        let window = (anchor + 1)..(anchor + 1 + BLOCK_SEARCH_WIDTH).min(width);
        let score = window.clone().find(|&j| is_score(&header.fields[j]));
        let standard = window.clone().find(|&j| is_standard(&header.fields[j]));
        match (score, standard) {
            (Some(score), Some(standard)) => blocks.push(Block {
                response: anchor,
                score,
                standard,
            }),
            _ => debug!(column = anchor, "item column without score/standard partner"),
        }
    }

    if blocks.is_empty() {
        return Err(ImportError::MalformedInput(
            "no Item/Score/ItemStandard column blocks found".to_string(),
        ));
    }
    debug!(blocks = blocks.len(), "discovered item blocks");
    Ok(Columns {
        student,
        title,
        blocks,
    })
}

/// Last `|`-separated token, accepted only when it is a UUID.
pub fn standard_id(cell: &str) -> Option<Uuid> {
    let last = cell.rsplit('|').next()?.trim();
    Uuid::parse_str(last).ok()
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
    for block in &columns.blocks {
        let Some(earned) = ctx.parse_score_or_skip(row.get(block.score), row.get(block.response))
        else {
            continue;
        };
        let Some(id) = standard_id(row.get(block.standard)) else {
            ctx.skips.skip(SkipReason::BadStandard);
            continue;
        };
        let record = ctx.record(
            student,
            &id.to_string(),
            earned,
            None,
            title,
            block.score,
            None,
            row.line,
        );
        out.push(record);
    }
}
