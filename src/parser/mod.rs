pub mod blocks;
pub mod fields;

use crate::model::{CandidateBlock, ParsedFields, RawDocument};
use fields::ParseFailure;

/// Two-pass pipeline: raw document → candidate blocks → parsed fields.
pub fn parse_document(
    doc: &RawDocument,
) -> Vec<(CandidateBlock, Result<ParsedFields, ParseFailure>)> {
    blocks::segment(doc)
        .into_iter()
        .map(|block| {
            let parsed = fields::parse_block(&block);
            (block, parsed)
        })
        .collect()
}

/// Collapse whitespace runs (non-breaking spaces included) into single spaces.
pub(crate) fn clean_text(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
