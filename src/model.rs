use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::{question_id, IdStrategy};

pub const OPTION_COUNT: usize = 4;
pub const DEFAULT_TOPIC: &str = "General";
const LETTERS: [char; OPTION_COUNT] = ['A', 'B', 'C', 'D'];

// ── Labels ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    Physics,
    Chemistry,
    Biology,
    Unknown,
}

impl Subject {
    pub const KNOWN: [Subject; 3] = [Subject::Physics, Subject::Chemistry, Subject::Biology];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Physics => "Physics",
            Subject::Chemistry => "Chemistry",
            Subject::Biology => "Biology",
            Subject::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subject {
    type Err = String;

    /// Case-insensitive; accepts the short forms used in file names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "physics" | "phy" => Ok(Subject::Physics),
            "chemistry" | "chem" => Ok(Subject::Chemistry),
            "biology" | "bio" => Ok(Subject::Biology),
            "unknown" => Ok(Subject::Unknown),
            other => Err(format!("unknown subject: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Custom,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
            Difficulty::Custom => "Custom",
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "custom" => Ok(Difficulty::Custom),
            other => Err(format!("unknown difficulty: {}", other)),
        }
    }
}

/// Where a question record came from. Drives the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Scraped,
    Ai,
    Custom,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Scraped => "scraped",
            SourceTag::Ai => "ai",
            SourceTag::Custom => "custom",
        }
    }
}

impl FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scraped" => Ok(SourceTag::Scraped),
            "ai" => Ok(SourceTag::Ai),
            "custom" => Ok(SourceTag::Custom),
            other => Err(format!("unknown source tag: {}", other)),
        }
    }
}

/// Whether the source material itself told us which option is correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectAnswer {
    Resolved(u8),
    Unresolved,
}

impl CorrectAnswer {
    pub fn index(&self) -> Option<usize> {
        match self {
            CorrectAnswer::Resolved(i) => Some(*i as usize),
            CorrectAnswer::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, CorrectAnswer::Resolved(_))
    }
}

pub fn option_letter(index: usize) -> Option<char> {
    LETTERS.get(index).copied()
}

pub fn letter_index(letter: char) -> Option<usize> {
    LETTERS
        .iter()
        .position(|l| *l == letter.to_ascii_uppercase())
}

// ── Transient pipeline values ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Html,
    Pdf,
}

#[derive(Debug, Clone)]
pub enum RawContent {
    Html(String),
    /// One entry per page, in page order.
    Pages(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct RawDocument {
    pub origin: String,
    pub content: RawContent,
}

impl RawDocument {
    pub fn html(origin: impl Into<String>, markup: impl Into<String>) -> Self {
        RawDocument {
            origin: origin.into(),
            content: RawContent::Html(markup.into()),
        }
    }

    pub fn pages(origin: impl Into<String>, pages: Vec<String>) -> Self {
        RawDocument {
            origin: origin.into(),
            content: RawContent::Pages(pages),
        }
    }

    pub fn kind(&self) -> DocumentKind {
        match self.content {
            RawContent::Html(_) => DocumentKind::Html,
            RawContent::Pages(_) => DocumentKind::Pdf,
        }
    }
}

/// A descendant element of a matched HTML block, flattened in document order.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub tag: String,
    /// Nesting level below the block element (direct children are 1).
    pub depth: usize,
    /// Lowercased class, id and attribute names, space separated.
    pub hints: String,
    /// Attribute values, kept for answer markers like `data-answer="B"`.
    pub attr_values: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum BlockHint {
    Html {
        tag: String,
        class: String,
        own_text: String,
        /// Fragments emitted before the first direct text node holding a `?`.
        own_question_at: Option<usize>,
        fragments: Vec<Fragment>,
    },
    Numbered {
        item: u32,
    },
}

#[derive(Debug, Clone)]
pub struct CandidateBlock {
    pub origin: String,
    pub raw_text: String,
    pub hint: BlockHint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFields {
    pub question_text: String,
    pub options: [String; OPTION_COUNT],
    pub correct: CorrectAnswer,
}

// ── Canonical record ──

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("expected 4 options, found {0}")]
    OptionCount(usize),
    #[error("question text is empty")]
    EmptyQuestionText,
    #[error("option {0} is empty")]
    EmptyOption(usize),
    #[error("correct answer index {0} is out of range")]
    AnswerOutOfRange(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub subject: Subject,
    pub topic: String,
    pub question_text: String,
    pub options: [String; OPTION_COUNT],
    pub correct_answer: CorrectAnswer,
    pub explanation: String,
    pub year: i32,
    pub difficulty: Difficulty,
    pub is_pyq: bool,
    pub source: SourceTag,
}

impl Question {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.question_text.trim().is_empty() {
            return Err(ValidationError::EmptyQuestionText);
        }
        if let Some(i) = self.options.iter().position(|o| o.trim().is_empty()) {
            return Err(ValidationError::EmptyOption(i));
        }
        if let CorrectAnswer::Resolved(i) = self.correct_answer {
            if i as usize >= OPTION_COUNT {
                return Err(ValidationError::AnswerOutOfRange(i64::from(i)));
            }
        }
        Ok(())
    }

    /// A question typed in by hand. Never a past-exam question.
    #[allow(clippy::too_many_arguments)]
    pub fn custom(
        subject: Subject,
        topic: &str,
        question_text: &str,
        options: Vec<String>,
        correct_index: usize,
        explanation: &str,
        ids: IdStrategy,
        now: DateTime<Utc>,
    ) -> Result<Question, ValidationError> {
        let options = into_options(options)?;
        let correct = answer_from_index(correct_index as i64)?;
        build_authored(
            SourceTag::Custom,
            subject,
            topic,
            question_text,
            options,
            correct,
            explanation,
            Difficulty::Custom,
            ids,
            now,
        )
    }

    /// Wrap a reply from the external question-generation service.
    pub fn generated(
        subject: Subject,
        topic: &str,
        difficulty: Difficulty,
        reply: GeneratedQuestion,
        ids: IdStrategy,
        now: DateTime<Utc>,
    ) -> Result<Question, ValidationError> {
        let options = into_options(reply.options)?;
        let correct = answer_from_index(reply.correct_answer)?;
        build_authored(
            SourceTag::Ai,
            subject,
            topic,
            &reply.question_text,
            options,
            correct,
            &reply.explanation,
            difficulty,
            ids,
            now,
        )
    }
}

/// JSON contract returned by the question-generation service.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedQuestion {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer: i64,
    #[serde(default)]
    pub explanation: String,
}

fn into_options(options: Vec<String>) -> Result<[String; OPTION_COUNT], ValidationError> {
    let found = options.len();
    let trimmed: Vec<String> = options.into_iter().map(|o| o.trim().to_string()).collect();
    trimmed
        .try_into()
        .map_err(|_| ValidationError::OptionCount(found))
}

fn answer_from_index(index: i64) -> Result<CorrectAnswer, ValidationError> {
    u8::try_from(index)
        .ok()
        .filter(|i| (*i as usize) < OPTION_COUNT)
        .map(CorrectAnswer::Resolved)
        .ok_or(ValidationError::AnswerOutOfRange(index))
}

#[allow(clippy::too_many_arguments)]
fn build_authored(
    source: SourceTag,
    subject: Subject,
    topic: &str,
    question_text: &str,
    options: [String; OPTION_COUNT],
    correct: CorrectAnswer,
    explanation: &str,
    difficulty: Difficulty,
    ids: IdStrategy,
    now: DateTime<Utc>,
) -> Result<Question, ValidationError> {
    let question_text = question_text.trim().to_string();
    let topic = match topic.trim() {
        "" => DEFAULT_TOPIC.to_string(),
        t => t.to_string(),
    };
    let question = Question {
        id: question_id(ids, source, subject, &question_text, &options, now),
        subject,
        topic,
        question_text,
        options,
        correct_answer: correct,
        explanation: explanation.trim().to_string(),
        year: now.year(),
        difficulty,
        is_pyq: false,
        source,
    };
    question.validate()?;
    Ok(question)
}
