use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::blocks::ITEM_RE;
use super::clean_text;
use crate::model::{
    letter_index, BlockHint, CandidateBlock, CorrectAnswer, Fragment, ParsedFields, OPTION_COUNT,
};

/// `A. text` / `B) text` at the start of an element's text.
static HTML_OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-D])[.)]\s*(\S.*)$").unwrap());
/// `(A)` at line start or after whitespace.
static PDF_OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(?:^|\s)\(([A-E])\)").unwrap());
/// A standalone capital letter, so the "A" in "Answer" is not a hit.
static ANSWER_LETTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-D])\b").unwrap());

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("block has no content")]
    EmptyBlock,
    #[error("no question text found")]
    MissingQuestionText,
    #[error("expected 4 options, found {found}")]
    OptionCount { found: usize },
}

pub fn parse_block(block: &CandidateBlock) -> Result<ParsedFields, ParseFailure> {
    if block.raw_text.trim().is_empty() {
        return Err(ParseFailure::EmptyBlock);
    }
    match &block.hint {
        BlockHint::Html {
            own_text,
            own_question_at,
            fragments,
            ..
        } => parse_html(own_text, *own_question_at, fragments),
        BlockHint::Numbered { .. } => parse_numbered(&block.raw_text),
    }
}

fn into_options(found: Vec<String>) -> Result<[String; OPTION_COUNT], ParseFailure> {
    let count = found.len();
    found
        .try_into()
        .map_err(|_| ParseFailure::OptionCount { found: count })
}

// ── HTML ──

/// Fragments nested under `fragments[i]`.
fn subtree(fragments: &[Fragment], i: usize) -> Range<usize> {
    let depth = fragments[i].depth;
    let end = fragments[i + 1..]
        .iter()
        .position(|f| f.depth <= depth)
        .map_or(fragments.len(), |p| i + 1 + p);
    i + 1..end
}

fn is_answer_marker(f: &Fragment) -> bool {
    (f.hints.contains("correct") && !f.hints.contains("incorrect")) || f.hints.contains("answer")
}

fn parse_html(
    own_text: &str,
    own_question_at: Option<usize>,
    fragments: &[Fragment],
) -> Result<ParsedFields, ParseFailure> {
    let option_text: Vec<Option<String>> = fragments
        .iter()
        .map(|f| HTML_OPTION_RE.captures(&f.text).map(|c| c[2].trim().to_string()))
        .collect();

    // Innermost element wins when option markup is nested.
    let option_idx: Vec<usize> = (0..fragments.len())
        .filter(|&i| option_text[i].is_some())
        .filter(|&i| !subtree(fragments, i).any(|j| option_text[j].is_some()))
        .collect();
    let options: Vec<String> = option_idx
        .iter()
        .take(OPTION_COUNT)
        .filter_map(|&i| option_text[i].clone())
        .collect();
    let options = into_options(options)?;

    let nested_stem = (0..fragments.len())
        .filter(|&i| option_text[i].is_none() && !is_answer_marker(&fragments[i]))
        .filter(|&i| fragments[i].text.contains('?'))
        .find(|&i| !subtree(fragments, i).any(|j| fragments[j].text.contains('?')));

    // The block's own text wins when its question comes first in the document.
    let stem = match (own_question_at, nested_stem) {
        (Some(at), Some(i)) if at <= i => own_text.to_string(),
        (_, Some(i)) => fragments[i].text.clone(),
        (Some(_), None) => own_text.to_string(),
        (None, None) => return Err(ParseFailure::MissingQuestionText),
    };

    Ok(ParsedFields {
        question_text: stem,
        options,
        correct: html_answer(fragments, &option_idx),
    })
}

/// Elements flagged "correct" are checked before generic "answer" elements;
/// an option element only counts when it is itself flagged "correct". An
/// element wrapping option elements is never an answer marker.
fn html_answer(fragments: &[Fragment], option_idx: &[usize]) -> CorrectAnswer {
    let wraps_options = |i: usize| subtree(fragments, i).any(|j| option_idx.contains(&j));
    let flagged_correct = fragments
        .iter()
        .enumerate()
        .filter(|(_, f)| f.hints.contains("correct") && !f.hints.contains("incorrect"))
        .filter(|(i, _)| option_idx.contains(i) || !wraps_options(*i))
        .map(|(_, f)| f);
    let answer_boxes = fragments
        .iter()
        .enumerate()
        .filter(|(i, f)| f.hints.contains("answer") && !option_idx.contains(i))
        .filter(|(i, _)| !wraps_options(*i))
        .map(|(_, f)| f);

    flagged_correct
        .chain(answer_boxes)
        .find_map(answer_letter)
        .and_then(letter_index)
        .map(|i| CorrectAnswer::Resolved(i as u8))
        .unwrap_or(CorrectAnswer::Unresolved)
}

fn answer_letter(f: &Fragment) -> Option<char> {
    std::iter::once(f.text.as_str())
        .chain(f.attr_values.iter().map(String::as_str))
        .find_map(|text| ANSWER_LETTER_RE.captures(text))
        .and_then(|c| c[1].chars().next())
}

// ── Numbered items from PDF text ──

/// Stem is everything before `(A)`; options must appear as A, B, C, D in
/// order, so "(C)" inside option A's text is not a marker. Option D ends at
/// the next marker of any kind, item numbers included.
fn parse_numbered(raw: &str) -> Result<ParsedFields, ParseFailure> {
    let all: Vec<(char, usize, usize)> = PDF_OPTION_RE
        .captures_iter(raw)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let letter = c[1].chars().next()?;
            Some((letter, whole.start(), whole.end()))
        })
        .collect();

    let mut markers: Vec<(usize, usize)> = Vec::new();
    let mut next_after_last = raw.len();
    for (letter, start, end) in &all {
        if markers.len() == OPTION_COUNT {
            next_after_last = *start;
            break;
        }
        if letter_index(*letter) == Some(markers.len()) {
            markers.push((*start, *end));
        }
    }
    if let Some((_, last_body)) = markers.last().filter(|_| markers.len() == OPTION_COUNT) {
        if let Some(num) = ITEM_RE
            .captures(&raw[*last_body..next_after_last])
            .and_then(|c| c.get(1))
        {
            next_after_last = last_body + num.start();
        }
    }

    let options: Vec<String> = markers
        .iter()
        .enumerate()
        .map(|(i, (_, body_start))| {
            let body_end = markers
                .get(i + 1)
                .map_or(next_after_last, |(start, _)| *start);
            clean_text(&raw[*body_start..body_end])
        })
        .collect();
    let options = into_options(options)?;

    let stem = clean_text(&raw[..markers[0].0]);
    if stem.is_empty() {
        return Err(ParseFailure::MissingQuestionText);
    }

    Ok(ParsedFields {
        question_text: stem,
        options,
        correct: CorrectAnswer::Unresolved,
    })
}
