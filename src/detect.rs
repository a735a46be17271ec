use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Best-effort guesses read off a test name. A field that can't be inferred
/// stays `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNameHints {
    pub subject: Option<String>,
    pub unit_cycle: Option<i64>,
}

const SUBJECT_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "ELA",
        &["ela", "english", "reading", "literacy", "writing", "language arts"],
    ),
    (
        "Math",
        &[
            "math", "algebra", "geometry", "im1", "im2", "im3", "integrated math", "precalc",
            "calculus",
        ],
    ),
    ("Science", &["science", "biology", "chemistry", "physics"]),
    ("Social Studies", &["social studies", "history", "civics", "government"]),
];

fn unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:cycle|unit)\s*[-#:]?\s*(\d{1,2}|[ivx]{1,5})\b").expect("valid regex")
    })
}

fn im_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bim\s*([123])\b").expect("valid regex"))
}

pub fn classify_test_name(name: &str) -> TestNameHints {
    let lower = name.to_ascii_lowercase();
    let words = tokens(&lower);

    let mut subject = None;
    'outer: for (label, keywords) in SUBJECT_KEYWORDS {
        for kw in *keywords {
            let hit = if kw.contains(' ') {
                lower.contains(kw)
            } else {
                words.iter().any(|w| w == kw)
            };
            if hit {
                subject = Some(label.to_string());
                break 'outer;
            }
        }
    }
    if subject.is_none() && im_re().is_match(name) {
        subject = Some("Math".to_string());
    }

    let unit_cycle = unit_re()
        .captures(name)
        .and_then(|c| parse_unit_number(&c[1]));

    TestNameHints {
        subject,
        unit_cycle,
    }
}

fn tokens(lower: &str) -> Vec<String> {
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

fn parse_unit_number(s: &str) -> Option<i64> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    roman_to_int(s)
}

fn roman_to_int(s: &str) -> Option<i64> {
    let mut total = 0i64;
    let mut prev = 0i64;
    for c in s.to_ascii_uppercase().chars().rev() {
        let v = match c {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            _ => return None,
        };
        if v < prev {
            total -= v;
        } else {
            total += v;
            prev = v;
        }
    }
    (total > 0).then_some(total)
}
