use std::ops::AddAssign;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::classify::{Classifier, SubjectKeywords};
use crate::config::Settings;
use crate::db::Store;
use crate::model::{BlockHint, CandidateBlock, Question, RawDocument};
use crate::normalize::Normalizer;
use crate::parser;
use crate::source::{fetch_all, Fetcher, SourceError};

/// Per-run counters. Advisory only; every stage keeps going past failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub origins: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    pub unsupported: usize,
    pub blocks: usize,
    pub parsed: usize,
    pub parse_failed: usize,
    pub classified_unknown: usize,
    pub rejected: usize,
    pub accepted: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

impl AddAssign for IngestSummary {
    fn add_assign(&mut self, other: Self) {
        self.origins += other.origins;
        self.fetched += other.fetched;
        self.fetch_failed += other.fetch_failed;
        self.unsupported += other.unsupported;
        self.blocks += other.blocks;
        self.parsed += other.parsed;
        self.parse_failed += other.parse_failed;
        self.classified_unknown += other.classified_unknown;
        self.rejected += other.rejected;
        self.accepted += other.accepted;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
    }
}

impl IngestSummary {
    pub fn print(&self) {
        println!(
            "Origins: {} ({} fetched, {} failed, {} unsupported)",
            self.origins, self.fetched, self.fetch_failed, self.unsupported
        );
        println!(
            "Blocks:  {} found, {} parsed, {} unparseable",
            self.blocks, self.parsed, self.parse_failed
        );
        println!(
            "Records: {} accepted, {} rejected, {} with unknown subject",
            self.accepted, self.rejected, self.classified_unknown
        );
        println!(
            "Saved {} new questions ({} already stored).",
            self.inserted, self.duplicates
        );
    }

    fn log(&self) {
        info!(
            origins = self.origins,
            fetched = self.fetched,
            blocks = self.blocks,
            parsed = self.parsed,
            accepted = self.accepted,
            inserted = self.inserted,
            "ingestion finished"
        );
    }
}

/// Questions accepted from one or more documents, with their counters.
#[derive(Debug, Default)]
pub struct Processed {
    pub questions: Vec<Question>,
    pub summary: IngestSummary,
}

/// The pure part of ingestion: segment, parse, classify, normalize.
#[derive(Debug, Clone)]
pub struct Pipeline {
    classifier: Classifier,
    normalizer: Normalizer,
}

impl Pipeline {
    pub fn new(settings: &Settings) -> Self {
        Pipeline::with_parts(
            Classifier::new(SubjectKeywords::default(), settings.fallback_year),
            Normalizer::new(settings.id_strategy),
        )
    }

    pub fn with_parts(classifier: Classifier, normalizer: Normalizer) -> Self {
        Pipeline {
            classifier,
            normalizer,
        }
    }

    pub fn process_document(&self, doc: &RawDocument, now: DateTime<Utc>) -> Processed {
        let mut out = Processed::default();

        for (block, parsed) in parser::parse_document(doc) {
            out.summary.blocks += 1;
            let fields = match parsed {
                Ok(fields) => fields,
                Err(e) => {
                    out.summary.parse_failed += 1;
                    debug!(origin = %doc.origin, block = %block_label(&block), "skipped: {}", e);
                    continue;
                }
            };
            out.summary.parsed += 1;

            let class = self.classifier.classify(&doc.origin, &fields.question_text);
            if class.ambiguous {
                out.summary.classified_unknown += 1;
            }

            match self.normalizer.normalize(fields, &class, now) {
                Ok(question) => {
                    out.summary.accepted += 1;
                    out.questions.push(question);
                }
                Err(e) => {
                    out.summary.rejected += 1;
                    debug!(origin = %doc.origin, block = %block_label(&block), "rejected: {}", e);
                }
            }
        }
        out
    }

    /// Documents are processed in parallel; questions keep document order.
    pub fn process_documents(&self, docs: &[RawDocument], now: DateTime<Utc>) -> Processed {
        let results: Vec<Processed> = docs
            .par_iter()
            .map(|doc| self.process_document(doc, now))
            .collect();

        let mut out = Processed::default();
        for r in results {
            out.questions.extend(r.questions);
            out.summary += r.summary;
        }
        out
    }
}

fn block_label(block: &CandidateBlock) -> String {
    match &block.hint {
        BlockHint::Html { tag, class, .. } if class.is_empty() => format!("<{}>", tag),
        BlockHint::Html { tag, class, .. } => format!("<{} class=\"{}\">", tag, class),
        BlockHint::Numbered { item } => format!("item {}", item),
    }
}

/// Fetch every origin, run the pipeline over what arrived, and store the
/// accepted questions. Only store failures abort the run.
pub async fn run(
    settings: &Settings,
    store: &Store,
    origins: Vec<String>,
    pb: &ProgressBar,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary {
        origins: origins.len(),
        ..Default::default()
    };

    let fetcher = Arc::new(Fetcher::new(settings).context("Failed to build HTTP client")?);
    let outcomes = fetch_all(fetcher, origins, settings.fetch_concurrency, pb).await;

    let mut docs = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome.result {
            Ok(doc) => {
                summary.fetched += 1;
                docs.push(doc);
            }
            Err(SourceError::UnsupportedKind { .. }) => summary.unsupported += 1,
            Err(SourceError::Fetch { .. }) => summary.fetch_failed += 1,
        }
    }

    let processed = Pipeline::new(settings).process_documents(&docs, Utc::now());
    summary += processed.summary;

    summary.inserted = store
        .put_many(&processed.questions)
        .context("Failed to store questions")?;
    summary.duplicates = summary.accepted - summary.inserted;
    summary.log();
    Ok(summary)
}
