use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::model::Subject;

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^0-9])(20\d{2})(?:[^0-9]|$)").unwrap());

/// Origin substrings, checked in order. First hit wins.
const ORIGIN_HINTS: &[(&str, Subject)] = &[
    ("physics", Subject::Physics),
    ("chemistry", Subject::Chemistry),
    ("chem", Subject::Chemistry),
    ("biology", Subject::Biology),
    ("bio", Subject::Biology),
];

const PHYSICS: &[&str] = &[
    "force", "velocity", "acceleration", "energy", "momentum", "electric", "magnetic", "wave",
    "frequency", "mass", "newton",
];
const CHEMISTRY: &[&str] = &[
    "molecule", "atom", "bond", "reaction", "element", "compound", "acid", "base", "oxidation",
    "reduction",
];
const BIOLOGY: &[&str] = &[
    "cell", "organism", "gene", "protein", "enzyme", "tissue", "organ", "species", "evolution",
    "dna", "rna",
];

/// Lowercase keyword vocabulary per subject.
#[derive(Debug, Clone)]
pub struct SubjectKeywords {
    tables: HashMap<Subject, Vec<String>>,
}

impl SubjectKeywords {
    pub fn new(tables: HashMap<Subject, Vec<String>>) -> Self {
        let tables = tables
            .into_iter()
            .map(|(subject, words)| {
                (
                    subject,
                    words.into_iter().map(|w| w.trim().to_lowercase()).collect(),
                )
            })
            .collect();
        SubjectKeywords { tables }
    }

    /// Case-insensitive keyword occurrences per subject. Keywords match inside
    /// longer words, so "unicellular" counts for "cell".
    pub fn score(&self, text: &str) -> Vec<(Subject, usize)> {
        let lower = text.to_lowercase();
        Subject::KNOWN
            .iter()
            .map(|subject| {
                let hits = self.tables.get(subject).map_or(0, |keywords| {
                    keywords
                        .iter()
                        .filter(|k| !k.is_empty())
                        .map(|k| lower.matches(k.as_str()).count())
                        .sum()
                });
                (*subject, hits)
            })
            .collect()
    }
}

impl Default for SubjectKeywords {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        SubjectKeywords::new(HashMap::from([
            (Subject::Physics, owned(PHYSICS)),
            (Subject::Chemistry, owned(CHEMISTRY)),
            (Subject::Biology, owned(BIOLOGY)),
        ]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub subject: Subject,
    pub year: i32,
    /// Keyword scoring tied or found nothing.
    pub ambiguous: bool,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    keywords: SubjectKeywords,
    fallback_year: i32,
}

impl Classifier {
    pub fn new(keywords: SubjectKeywords, fallback_year: i32) -> Self {
        Classifier {
            keywords,
            fallback_year,
        }
    }

    pub fn classify(&self, origin: &str, question_text: &str) -> Classification {
        let year = year_from_origin(origin).unwrap_or(self.fallback_year);

        if let Some(subject) = subject_from_origin(origin) {
            return Classification {
                subject,
                year,
                ambiguous: false,
            };
        }

        let subject = self.subject_from_text(question_text);
        if subject == Subject::Unknown {
            debug!(origin, "subject ambiguous, falling back to Unknown");
        }
        Classification {
            subject,
            year,
            ambiguous: subject == Subject::Unknown,
        }
    }

    /// Strictly highest score wins; ties and all-zero give `Unknown`.
    pub fn subject_from_text(&self, text: &str) -> Subject {
        let scores = self.keywords.score(text);
        let best = scores.iter().map(|(_, n)| *n).max().unwrap_or(0);
        if best == 0 {
            return Subject::Unknown;
        }
        let mut leaders = scores.iter().filter(|(_, n)| *n == best);
        match (leaders.next(), leaders.next()) {
            (Some((subject, _)), None) => *subject,
            _ => Subject::Unknown,
        }
    }
}

pub fn subject_from_origin(origin: &str) -> Option<Subject> {
    let lower = origin.to_lowercase();
    ORIGIN_HINTS
        .iter()
        .find(|(hint, _)| lower.contains(hint))
        .map(|(_, subject)| *subject)
}

pub fn year_from_origin(origin: &str) -> Option<i32> {
    YEAR_RE
        .captures(origin)
        .and_then(|caps| caps[1].parse().ok())
}
