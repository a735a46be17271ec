//! Standard-code normalization and resolution against the catalog.
//!
//! Resolution is exact-first. Only codes with no exact hit go through the
//! shape-specific `LIKE` patterns, and the first pattern that matches wins
//! with the shortest catalog code for that pattern.

use crate::formats::find_column;
use crate::roster::ReferenceImport;
use crate::tabular::{Delimiter, TabularFile};
use anyhow::{anyhow, Context};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Hyphen, non-breaking hyphen, figure dash, en dash, em dash, horizontal
/// bar, minus sign and the small/fullwidth hyphen-minus forms.
const DASH_VARIANTS: &[char] = &[
    '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2015}', '\u{2212}',
    '\u{FE58}', '\u{FE63}', '\u{FF0D}',
];

pub fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if DASH_VARIANTS.contains(&c) { '-' } else { c })
        .flat_map(char::to_uppercase)
        .collect()
}

fn ela_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:CCSS\.)?(?:ELA(?:-LITERACY)?\.)?([A-Z]{1,4})\.(K|\d{1,2})(?:-(\d{1,2}))?\.(\d{1,2})([A-Z]?)$",
        )
        .expect("valid regex")
    })
}

fn math_hs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // F-IF.4, A-APR.B.2, HSA.APR.1, MATH.HSF.IF.B.4
        Regex::new(
            r"^(?:CCSS\.)?(?:MATH\.)?(?:CONTENT\.)?(?:HS([A-Z])[.\-]|([A-Z])-)([A-Z]{2,4})\.(?:([A-Z])\.)?(\d{1,2})([A-Z]?)$",
        )
        .expect("valid regex")
    })
}

fn math_grade_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:CCSS\.)?(?:MATH\.)?(?:CONTENT\.)?(K|\d{1,2})\.([A-Z]{1,4})\.(?:([A-Z])\.)?(\d{1,2})([A-Z]?)$",
        )
        .expect("valid regex")
    })
}

/// Strict shape check used by adapters that must tell standard codes apart
/// from other header text. Expects an already normalized code.
pub fn is_standard_code(normalized: &str) -> bool {
    ela_re().is_match(normalized)
        || math_hs_re().is_match(normalized)
        || math_grade_re().is_match(normalized)
}

fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Ordered `LIKE` patterns for a normalized code that had no exact match.
pub fn fuzzy_patterns(normalized: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |p: String| {
        if !out.contains(&p) {
            out.push(p);
        }
    };

    if let Some(c) = ela_re().captures(normalized) {
        let strand = like_escape(&c[1]);
        let grade = &c[2];
        let hi = c.get(3).map(|m| m.as_str());
        let num = &c[4];
        let sub = c.get(5).map(|m| m.as_str()).unwrap_or("");
        let grades = match hi {
            Some(hi) => format!("{grade}-{hi}"),
            None => grade.to_string(),
        };
        let core = format!("{strand}.{grades}.{num}{sub}");
        push(core.clone());
        push(format!("%.{core}"));
        if hi.is_none() {
            if let Some(band) = grade_band(grade) {
                push(format!("{strand}.{band}.{num}{sub}"));
                push(format!("%.{strand}.{band}.{num}{sub}"));
            }
        }
        if !sub.is_empty() {
            push(format!("{strand}.{grades}.{num}"));
            push(format!("%.{strand}.{grades}.{num}"));
        }
    } else if let Some(c) = math_hs_re().captures(normalized) {
        let letter = c.get(1).or_else(|| c.get(2)).map(|m| m.as_str()).unwrap_or("");
        let domain = format!("HS{letter}");
        let area = &c[3];
        let cluster = c.get(4).map(|m| m.as_str());
        let num = &c[5];
        let sub = c.get(6).map(|m| m.as_str()).unwrap_or("");
        let cluster_pat = cluster.map(like_escape).unwrap_or_else(|| "_".to_string());
        push(format!("{domain}.{area}.{cluster_pat}.{num}{sub}"));
        push(format!("{domain}-{area}.{cluster_pat}.{num}{sub}"));
        push(format!("{domain}.{area}.{num}{sub}"));
        push(format!("{domain}-{area}.{num}{sub}"));
        push(format!("%.{domain}.{area}.{cluster_pat}.{num}{sub}"));
        push(format!("%{domain}%{area}%.{num}{sub}"));
    } else if let Some(c) = math_grade_re().captures(normalized) {
        let grade = &c[1];
        let area = &c[2];
        let cluster = c.get(3).map(|m| m.as_str());
        let num = &c[4];
        let sub = c.get(5).map(|m| m.as_str()).unwrap_or("");
        let cluster_pat = cluster.map(like_escape).unwrap_or_else(|| "_".to_string());
        push(format!("{grade}.{area}.{num}{sub}"));
        push(format!("%.{grade}.{area}.{num}{sub}"));
        push(format!("{grade}.{area}.{cluster_pat}.{num}{sub}"));
        push(format!("%.{grade}.{area}.{cluster_pat}.{num}{sub}"));
    }

    // Only dot-anchored: "L.9-10.1" must never land on "RL.9-10.1".
    push(format!("%.{}", like_escape(normalized)));
    out
}

/// Leading digits of the last dotted segment: "RI.9-10.3A" -> "3".
fn trailing_number(normalized: &str) -> Option<&str> {
    let last = normalized.rsplit('.').next()?;
    let end = last
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(last.len());
    (end > 0).then(|| &last[..end])
}

/// A pattern hit only counts when it keeps the standard's own number, so
/// `.1` never resolves to `.10`.
fn keeps_trailing_number(query: &str, candidate: &str) -> bool {
    match (trailing_number(query), trailing_number(candidate)) {
        (Some(q), Some(c)) => q == c,
        _ => true,
    }
}

fn grade_band(grade: &str) -> Option<&'static str> {
    match grade {
        "9" | "10" => Some("9-10"),
        "11" | "12" => Some("11-12"),
        _ => None,
    }
}

/// `SL.x.y.2` was renumbered to `.3`; returns the sibling code to prefer.
fn superseded_sibling(normalized: &str) -> Option<String> {
    let in_family = normalized.split('.').any(|seg| seg == "SL");
    if !in_family {
        return None;
    }
    normalized
        .strip_suffix(".2")
        .map(|stem| format!("{stem}.3"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: Uuid,
    pub human_coding_scheme: String,
}

/// Read-only access to the canonical standards catalog.
pub trait StandardCatalog {
    /// Exact lookup keyed by normalized code.
    fn lookup_by_codes(&self, normalized: &[String]) -> anyhow::Result<HashMap<String, CatalogEntry>>;

    /// Shortest catalog entry whose normalized code matches `pattern`.
    fn lookup_by_pattern(&self, pattern: &str) -> anyhow::Result<Option<CatalogEntry>>;

    fn lookup_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, CatalogEntry>>;
}

pub struct SqliteCatalog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCatalog<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn entry_from_row(id: String, human: String) -> anyhow::Result<CatalogEntry> {
    let id = Uuid::parse_str(&id).with_context(|| format!("catalog id is not a uuid: {id}"))?;
    Ok(CatalogEntry {
        id,
        human_coding_scheme: human,
    })
}

impl StandardCatalog for SqliteCatalog<'_> {
    fn lookup_by_codes(&self, normalized: &[String]) -> anyhow::Result<HashMap<String, CatalogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, human_coding_scheme FROM standards
             WHERE normalized_code = ?
             ORDER BY LENGTH(human_coding_scheme), human_coding_scheme
             LIMIT 1",
        )?;
        let mut out = HashMap::new();
        for code in normalized {
            let row: Option<(String, String)> = stmt
                .query_row([code], |r| Ok((r.get(0)?, r.get(1)?)))
                .optional()?;
            if let Some((id, human)) = row {
                out.insert(code.clone(), entry_from_row(id, human)?);
            }
        }
        Ok(out)
    }

    fn lookup_by_pattern(&self, pattern: &str) -> anyhow::Result<Option<CatalogEntry>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT id, human_coding_scheme FROM standards
                 WHERE normalized_code LIKE ? ESCAPE '\\'
                 ORDER BY LENGTH(normalized_code), normalized_code
                 LIMIT 1",
                [pattern],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        row.map(|(id, human)| entry_from_row(id, human)).transpose()
    }

    fn lookup_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, CatalogEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, human_coding_scheme FROM standards WHERE id = ?")?;
        let mut out = HashMap::new();
        for id in ids {
            let row: Option<(String, String)> = stmt
                .query_row([id.to_string()], |r| Ok((r.get(0)?, r.get(1)?)))
                .optional()?;
            if let Some((sid, human)) = row {
                out.insert(*id, entry_from_row(sid, human)?);
            }
        }
        Ok(out)
    }
}

pub fn upsert_standard(conn: &Connection, id: Uuid, human_coding_scheme: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO standards(id, human_coding_scheme, normalized_code) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            human_coding_scheme = excluded.human_coding_scheme,
            normalized_code = excluded.normalized_code",
        (
            id.to_string(),
            human_coding_scheme.trim(),
            normalize(human_coding_scheme),
        ),
    )?;
    Ok(())
}

const CATALOG_ID_SYNONYMS: &[&str] = &["id", "standardid", "identifier", "caseidentifier", "guid"];
const CATALOG_CODE_SYNONYMS: &[&str] = &[
    "humancodingscheme",
    "code",
    "standardcode",
    "standard",
    "statementcode",
];

/// Loads `id,human_coding_scheme` rows into the catalog, upserting by id.
/// Rows whose id is not a UUID or whose code is blank are reported by line.
pub fn import_catalog_csv(
    conn: &Connection,
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
        .ok_or_else(|| anyhow!("catalog file is empty"))??;
    let id_col = find_column(&header, CATALOG_ID_SYNONYMS, None)
        .ok_or_else(|| anyhow!("catalog file has no id column"))?;
    let code_col = find_column(&header, CATALOG_CODE_SYNONYMS, None)
        .ok_or_else(|| anyhow!("catalog file has no human_coding_scheme column"))?;

    let tx = conn.unchecked_transaction()?;
    let mut out = ReferenceImport::default();
    for row in rows {
        let row = row?;
        if row.is_blank() {
            continue;
        }
        out.rows_total += 1;
        let code = row.trimmed(code_col);
        match Uuid::parse_str(row.trimmed(id_col)) {
            Ok(id) if !code.is_empty() => {
                upsert_standard(&tx, id, code)?;
                out.upserted += 1;
            }
            _ => out.skipped_lines.push(row.line),
        }
    }
    tx.commit()?;
    info!(upserted = out.upserted, skipped = out.skipped_lines.len(), "catalog imported");
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Pattern,
    Id,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStandard {
    pub raw_code: String,
    pub canonical_id: Uuid,
    pub human_coding_scheme: String,
    pub matched_by: MatchKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub superseded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ResolvedStandard),
    Missing { raw_code: String },
}

impl Resolution {
    pub fn resolved(&self) -> Option<&ResolvedStandard> {
        match self {
            Resolution::Resolved(r) => Some(r),
            Resolution::Missing { .. } => None,
        }
    }
}

/// Per-import resolution results keyed by normalized code. Built once,
/// then only read.
#[derive(Debug, Clone, Default)]
pub struct ResolutionMap {
    by_code: BTreeMap<String, Resolution>,
}

impl ResolutionMap {
    pub fn get(&self, raw_or_normalized: &str) -> Option<&Resolution> {
        self.by_code.get(&normalize(raw_or_normalized))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Resolution)> {
        self.by_code.iter()
    }

    pub fn missing(&self) -> Vec<String> {
        self.by_code
            .values()
            .filter_map(|r| match r {
                Resolution::Missing { raw_code } => Some(raw_code.clone()),
                Resolution::Resolved(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }
}

pub struct StandardResolver<'c> {
    catalog: &'c dyn StandardCatalog,
}

impl<'c> StandardResolver<'c> {
    pub fn new(catalog: &'c dyn StandardCatalog) -> Self {
        Self { catalog }
    }

    pub fn resolve_all<'s, I>(&self, raw_codes: I) -> anyhow::Result<ResolutionMap>
    where
        I: IntoIterator<Item = &'s str>,
    {
        let mut raw_by_norm: BTreeMap<String, String> = BTreeMap::new();
        for raw in raw_codes {
            let n = normalize(raw);
            if n.is_empty() {
                continue;
            }
            raw_by_norm.entry(n).or_insert_with(|| raw.trim().to_string());
        }

        let codes: Vec<String> = raw_by_norm.keys().cloned().collect();
        let exact = self.catalog.lookup_by_codes(&codes)?;

        let mut by_code = BTreeMap::new();
        for (norm, raw) in raw_by_norm {
            let found = match exact.get(&norm) {
                Some(entry) => Some((entry.clone(), MatchKind::Exact, None)),
                None => self
                    .first_pattern_hit(&norm)?
                    .map(|(entry, pattern)| (entry, MatchKind::Pattern, Some(pattern))),
            };
            let resolution = match found {
                Some((entry, matched_by, pattern)) => {
                    let (entry, superseded) = self.apply_superseded(entry)?;
                    Resolution::Resolved(ResolvedStandard {
                        raw_code: raw,
                        canonical_id: entry.id,
                        human_coding_scheme: entry.human_coding_scheme,
                        matched_by,
                        pattern,
                        superseded,
                    })
                }
                None => Resolution::Missing { raw_code: raw },
            };
            by_code.insert(norm, resolution);
        }
        Ok(ResolutionMap { by_code })
    }

    /// Resolves catalog ids carried directly in the source file. Unknown ids
    /// come back as missing under their textual form.
    pub fn resolve_ids(&self, ids: &[Uuid]) -> anyhow::Result<ResolutionMap> {
        let found = self.catalog.lookup_by_ids(ids)?;
        let mut by_code = BTreeMap::new();
        for id in ids {
            let key = normalize(&id.to_string());
            let resolution = match found.get(id) {
                Some(entry) => {
                    let (entry, superseded) = self.apply_superseded(entry.clone())?;
                    Resolution::Resolved(ResolvedStandard {
                        raw_code: id.to_string(),
                        canonical_id: entry.id,
                        human_coding_scheme: entry.human_coding_scheme,
                        matched_by: MatchKind::Id,
                        pattern: None,
                        superseded,
                    })
                }
                None => Resolution::Missing {
                    raw_code: id.to_string(),
                },
            };
            by_code.insert(key, resolution);
        }
        Ok(ResolutionMap { by_code })
    }

    fn first_pattern_hit(&self, normalized: &str) -> anyhow::Result<Option<(CatalogEntry, String)>> {
        for pattern in fuzzy_patterns(normalized) {
            if let Some(entry) = self.catalog.lookup_by_pattern(&pattern)? {
                if !keeps_trailing_number(normalized, &normalize(&entry.human_coding_scheme)) {
                    debug!(code = normalized, pattern = %pattern, hit = %entry.human_coding_scheme, "pattern hit rejected");
                    continue;
                }
                debug!(code = normalized, pattern = %pattern, hit = %entry.human_coding_scheme, "fuzzy standard match");
                return Ok(Some((entry, pattern)));
            }
        }
        Ok(None)
    }

    fn apply_superseded(&self, entry: CatalogEntry) -> anyhow::Result<(CatalogEntry, bool)> {
        let Some(sibling) = superseded_sibling(&normalize(&entry.human_coding_scheme)) else {
            return Ok((entry, false));
        };
        let found = self.catalog.lookup_by_codes(std::slice::from_ref(&sibling))?;
        Ok(match found.get(&sibling) {
            Some(newer) => (newer.clone(), true),
            None => (entry, false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::cell::Cell;

    fn catalog_conn(entries: &[(&str, &str)]) -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        for (id, code) in entries {
            upsert_standard(&conn, Uuid::parse_str(id).expect("uuid"), code).expect("upsert");
        }
        conn
    }

    const RI_ID: &str = "11111111-1111-4111-8111-111111111111";
    const APR_ID: &str = "22222222-2222-4222-8222-222222222222";
    const SL2_ID: &str = "33333333-3333-4333-8333-333333333333";
    const SL3_ID: &str = "44444444-4444-4444-8444-444444444444";
    const IF_ID: &str = "55555555-5555-4555-8555-555555555555";

    struct CountingCatalog<'a> {
        inner: SqliteCatalog<'a>,
        pattern_calls: Cell<usize>,
    }

    impl StandardCatalog for CountingCatalog<'_> {
        fn lookup_by_codes(&self, normalized: &[String]) -> anyhow::Result<HashMap<String, CatalogEntry>> {
            self.inner.lookup_by_codes(normalized)
        }

        fn lookup_by_pattern(&self, pattern: &str) -> anyhow::Result<Option<CatalogEntry>> {
            self.pattern_calls.set(self.pattern_calls.get() + 1);
            self.inner.lookup_by_pattern(pattern)
        }

        fn lookup_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<HashMap<Uuid, CatalogEntry>> {
            self.inner.lookup_by_ids(ids)
        }
    }

    #[test]
    fn every_dash_variant_normalizes_the_same() {
        let variants = ['-', '\u{2010}', '\u{2011}', '\u{2012}', '\u{2013}', '\u{2014}', '\u{2212}'];
        let expected = normalize("RI.9-10.3");
        assert_eq!(expected, "RI.9-10.3");
        for d in variants {
            assert_eq!(normalize(&format!(" ri.9{d}10.3 ")), expected, "dash {d:?}");
        }
        assert_eq!(normalize("f - if . 4"), "F-IF.4");
    }

    #[test]
    fn strict_code_shapes() {
        for ok in ["RI.9-10.3", "MATH.HSA.APR.1", "RL.8.2A", "F-IF.4", "8.EE.1", "HSF.IF.B.4"] {
            assert!(is_standard_code(ok), "{ok} should be a standard code");
        }
        for bad in ["STUDENT ID", "4", "ITEM", "RI", "TOTAL.SCORE"] {
            assert!(!is_standard_code(bad), "{bad} should not be a standard code");
        }
    }

    #[test]
    fn exact_match_skips_fuzzy_patterns() {
        let conn = catalog_conn(&[(RI_ID, "RI.9-10.3")]);
        let catalog = CountingCatalog {
            inner: SqliteCatalog::new(&conn),
            pattern_calls: Cell::new(0),
        };
        let map = StandardResolver::new(&catalog)
            .resolve_all(["ri.9\u{2013}10.3"])
            .expect("resolve");
        let r = map.get("RI.9-10.3").and_then(|r| r.resolved()).expect("resolved");
        assert_eq!(r.canonical_id.to_string(), RI_ID);
        assert_eq!(r.matched_by, MatchKind::Exact);
        assert_eq!(catalog.pattern_calls.get(), 0);
    }

    #[test]
    fn math_dash_codes_map_to_hs_domains() {
        let conn = catalog_conn(&[(IF_ID, "HSF.IF.B.4"), (APR_ID, "HSA.APR.A.1")]);
        let catalog = SqliteCatalog::new(&conn);
        let map = StandardResolver::new(&catalog)
            .resolve_all(["F-IF.4", "MATH.HSA.APR.1"])
            .expect("resolve");
        let f = map.get("F-IF.4").and_then(|r| r.resolved()).expect("F-IF.4");
        assert_eq!(f.canonical_id.to_string(), IF_ID);
        assert_eq!(f.matched_by, MatchKind::Pattern);
        let a = map.get("MATH.HSA.APR.1").and_then(|r| r.resolved()).expect("APR");
        assert_eq!(a.canonical_id.to_string(), APR_ID);
    }

    #[test]
    fn first_pattern_prefers_the_shorter_entry() {
        let conn = catalog_conn(&[
            ("66666666-6666-4666-8666-666666666666", "CCSS.ELA-LITERACY.RI.9-10.3"),
            ("77777777-7777-4777-8777-777777777777", "ELA.RI.9-10.3"),
        ]);
        let catalog = SqliteCatalog::new(&conn);
        let map = StandardResolver::new(&catalog)
            .resolve_all(["RI.9.3"])
            .expect("resolve");
        let r = map.get("RI.9.3").and_then(|r| r.resolved()).expect("resolved");
        assert_eq!(r.human_coding_scheme, "ELA.RI.9-10.3");
    }

    #[test]
    fn sl_point_two_is_rewritten_to_point_three() {
        let conn = catalog_conn(&[(SL2_ID, "SL.9-10.2"), (SL3_ID, "SL.9-10.3")]);
        let catalog = SqliteCatalog::new(&conn);
        let map = StandardResolver::new(&catalog)
            .resolve_all(["SL.9-10.2"])
            .expect("resolve");
        let r = map.get("SL.9-10.2").and_then(|r| r.resolved()).expect("resolved");
        assert_eq!(r.canonical_id.to_string(), SL3_ID);
        assert!(r.superseded);
    }

    #[test]
    fn unknown_codes_are_reported_missing() {
        let conn = catalog_conn(&[(RI_ID, "RI.9-10.3")]);
        let catalog = SqliteCatalog::new(&conn);
        let map = StandardResolver::new(&catalog)
            .resolve_all(["W.11-12.9", "RI.9-10.3"])
            .expect("resolve");
        assert_eq!(map.missing(), vec!["W.11-12.9".to_string()]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn near_codes_do_not_resolve_to_neighbours() {
        let conn = catalog_conn(&[
            ("88888888-8888-4888-8888-888888888888", "RL.9-10.1"),
            ("99999999-9999-4999-8999-999999999999", "W.9-10.10"),
        ]);
        let catalog = SqliteCatalog::new(&conn);
        let map = StandardResolver::new(&catalog)
            .resolve_all(["L.9-10.1", "W.9-10.1"])
            .expect("resolve");
        assert_eq!(
            map.missing(),
            vec!["L.9-10.1".to_string(), "W.9-10.1".to_string()]
        );
    }

    #[test]
    fn trailing_number_guards_pattern_hits() {
        assert_eq!(trailing_number("RI.9-10.3A"), Some("3"));
        assert_eq!(trailing_number("HSA.APR.A.1"), Some("1"));
        assert!(keeps_trailing_number("F-IF.4", "HSF.IF.B.4"));
        assert!(!keeps_trailing_number("W.9-10.1", "W.9-10.10"));
        assert!(fuzzy_patterns("L.9-10.1").iter().all(|p| !p.ends_with('%')));
    }

    #[test]
    fn ids_resolve_only_when_in_catalog() {
        let conn = catalog_conn(&[(RI_ID, "RI.9-10.3")]);
        let catalog = SqliteCatalog::new(&conn);
        let known = Uuid::parse_str(RI_ID).expect("uuid");
        let unknown = Uuid::parse_str(APR_ID).expect("uuid");
        let map = StandardResolver::new(&catalog)
            .resolve_ids(&[known, unknown])
            .expect("resolve");
        assert!(map.get(RI_ID).and_then(|r| r.resolved()).is_some());
        assert_eq!(map.missing(), vec![APR_ID.to_string()]);
    }

    #[test]
    fn catalog_file_upserts_valid_rows() {
        let conn = catalog_conn(&[]);
        let p = crate::formats::test_files::write_temp(
            "catalog.csv",
            &format!(
                "id,human_coding_scheme\n{RI_ID},RI.9-10.3\nnot-a-uuid,RL.9-10.1\n{APR_ID},\n{RI_ID},RI.9\u{2013}10.3\n"
            ),
        );
        let out = import_catalog_csv(&conn, &p, None).expect("import");
        assert_eq!(out.rows_total, 4);
        assert_eq!(out.upserted, 2);
        assert_eq!(out.skipped_lines, vec![3, 4]);
        let normalized: String = conn
            .query_row("SELECT normalized_code FROM standards WHERE id = ?", [RI_ID], |r| r.get(0))
            .expect("row");
        assert_eq!(normalized, "RI.9-10.3");
    }
}
