use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::classify::Classification;
use crate::model::{
    Difficulty, ParsedFields, Question, SourceTag, Subject, ValidationError, DEFAULT_TOPIC,
    OPTION_COUNT,
};

/// How question ids are minted. `ContentHash` is the default; the per-second
/// `Timestamp` scheme is kept for stores built with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// `<SOURCE>_<SUBJECT>_<hash of stem + options>`; equal content, equal id.
    #[default]
    ContentHash,
    /// `<SOURCE>_<SUBJECT>_<YYYYmmddHHMMSS>`; collides within one second.
    Timestamp,
}

const HASH_HEX_LEN: usize = 16;

pub fn question_id(
    strategy: IdStrategy,
    source: SourceTag,
    subject: Subject,
    question_text: &str,
    options: &[String; OPTION_COUNT],
    now: DateTime<Utc>,
) -> String {
    let suffix = match strategy {
        IdStrategy::ContentHash => content_hash(question_text, options),
        IdStrategy::Timestamp => now.format("%Y%m%d%H%M%S").to_string(),
    };
    format!(
        "{}_{}_{}",
        source.as_str().to_uppercase(),
        subject.as_str().to_uppercase(),
        suffix
    )
}

fn content_hash(question_text: &str, options: &[String; OPTION_COUNT]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_hash(question_text));
    for option in options {
        hasher.update([0x1f]);
        hasher.update(normalize_for_hash(option));
    }
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(HASH_HEX_LEN);
    hex
}

fn normalize_for_hash(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Turns parsed + classified blocks into canonical scraped records.
#[derive(Debug, Clone)]
pub struct Normalizer {
    pub ids: IdStrategy,
    pub source: SourceTag,
}

impl Normalizer {
    pub fn new(ids: IdStrategy) -> Self {
        Normalizer {
            ids,
            source: SourceTag::Scraped,
        }
    }

    pub fn normalize(
        &self,
        fields: ParsedFields,
        class: &Classification,
        now: DateTime<Utc>,
    ) -> Result<Question, ValidationError> {
        let question_text = fields.question_text.trim().to_string();
        let options = fields.options.map(|o| o.trim().to_string());
        let question = Question {
            id: question_id(self.ids, self.source, class.subject, &question_text, &options, now),
            subject: class.subject,
            topic: DEFAULT_TOPIC.to_string(),
            question_text,
            options,
            correct_answer: fields.correct,
            explanation: String::new(),
            year: class.year,
            difficulty: Difficulty::Medium,
            is_pyq: self.source == SourceTag::Scraped,
            source: self.source,
        };
        question.validate()?;
        Ok(question)
    }
}
