use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::model::RawDocument;

/// Form feed separates pages in pre-extracted page text.
const PAGE_BREAK: char = '\u{c}';

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("fetch failed for {origin}: {reason}")]
    Fetch { origin: String, reason: String },
    #[error("unsupported document kind for {origin}: {kind}")]
    UnsupportedKind { origin: String, kind: String },
}

impl SourceError {
    fn fetch(origin: &str, reason: impl ToString) -> Self {
        SourceError::Fetch {
            origin: origin.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Html,
    Pdf,
    /// Page text already extracted, pages split by form feed.
    PageText,
}

pub fn is_url(origin: &str) -> bool {
    let lower = origin.to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn kind_from_extension(origin: &str) -> Option<SourceKind> {
    let path = origin.split(['?', '#']).next().unwrap_or(origin);
    let ext = Path::new(path).extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "html" | "htm" | "xhtml" => Some(SourceKind::Html),
        "pdf" => Some(SourceKind::Pdf),
        "txt" => Some(SourceKind::PageText),
        _ => None,
    }
}

fn kind_from_content_type(content_type: &str) -> Option<SourceKind> {
    let mime = content_type.split(';').next()?.trim().to_lowercase();
    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => Some(SourceKind::Html),
        "application/pdf" => Some(SourceKind::Pdf),
        "text/plain" => Some(SourceKind::PageText),
        _ => None,
    }
}

fn decode(origin: &str, kind: SourceKind, bytes: &[u8]) -> Result<RawDocument, SourceError> {
    match kind {
        SourceKind::Html => Ok(RawDocument::html(
            origin,
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        SourceKind::Pdf => {
            let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
                .map_err(|e| SourceError::fetch(origin, format!("PDF extraction failed: {}", e)))?;
            Ok(RawDocument::pages(origin, pages))
        }
        SourceKind::PageText => {
            let text = String::from_utf8_lossy(bytes);
            let pages = text.split(PAGE_BREAK).map(str::to_string).collect();
            Ok(RawDocument::pages(origin, pages))
        }
    }
}

/// Single-attempt document fetcher for URLs and local paths.
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(settings: &Settings) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()?;
        Ok(Fetcher { client })
    }

    pub async fn fetch(&self, origin: &str) -> Result<RawDocument, SourceError> {
        if is_url(origin) {
            self.fetch_url(origin).await
        } else {
            self.fetch_file(origin).await
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<RawDocument, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::fetch(url, format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let kind = content_type
            .as_deref()
            .and_then(kind_from_content_type)
            .or_else(|| kind_from_extension(url))
            .ok_or_else(|| SourceError::UnsupportedKind {
                origin: url.to_string(),
                kind: content_type.clone().unwrap_or_else(|| "unknown".into()),
            })?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::fetch(url, e))?;
        decode_off_thread(url, kind, bytes.to_vec()).await
    }

    async fn fetch_file(&self, path: &str) -> Result<RawDocument, SourceError> {
        let kind = kind_from_extension(path).ok_or_else(|| SourceError::UnsupportedKind {
            origin: path.to_string(),
            kind: Path::new(path)
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "no extension".into()),
        })?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SourceError::fetch(path, e))?;
        decode_off_thread(path, kind, bytes).await
    }
}

/// PDF text extraction is CPU-bound; keep it off the async workers.
async fn decode_off_thread(
    origin: &str,
    kind: SourceKind,
    bytes: Vec<u8>,
) -> Result<RawDocument, SourceError> {
    let owned = origin.to_string();
    tokio::task::spawn_blocking(move || decode(&owned, kind, &bytes))
        .await
        .map_err(|e| SourceError::fetch(origin, e))?
}

pub struct FetchOutcome {
    pub origin: String,
    pub result: Result<RawDocument, SourceError>,
    pub latency_ms: u64,
}

/// Fetch every origin concurrently. One attempt each; a failure only affects
/// its own origin. Outcomes come back in input order.
pub async fn fetch_all(
    fetcher: Arc<Fetcher>,
    origins: Vec<String>,
    concurrency: usize,
    pb: &ProgressBar,
) -> Vec<FetchOutcome> {
    let total = origins.len();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(usize, FetchOutcome)>(concurrency.max(1) * 2);

    for (idx, origin) in origins.into_iter().enumerate() {
        let fetcher = Arc::clone(&fetcher);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let start = Instant::now();
            let result = fetcher.fetch(&origin).await;
            let latency_ms = start.elapsed().as_millis() as u64;
            let _ = tx
                .send((
                    idx,
                    FetchOutcome {
                        origin,
                        result,
                        latency_ms,
                    },
                ))
                .await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut outcomes = Vec::with_capacity(total);
    let mut failed = 0usize;
    while let Some((idx, outcome)) = rx.recv().await {
        match &outcome.result {
            Ok(doc) => debug!(
                origin = %outcome.origin,
                latency_ms = outcome.latency_ms,
                kind = ?doc.kind(),
                "fetched"
            ),
            Err(e) => {
                failed += 1;
                warn!("{}", e);
            }
        }
        outcomes.push((idx, outcome));
        pb.inc(1);
    }

    info!("Fetched {} origins ({} ok, {} failed)", total, total - failed, failed);
    outcomes.sort_by_key(|(idx, _)| *idx);
    outcomes.into_iter().map(|(_, o)| o).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentKind, RawContent};

    fn fetcher() -> Arc<Fetcher> {
        Arc::new(Fetcher::new(&Settings::default()).unwrap())
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.org/q.html"));
        assert!(is_url("HTTP://example.org"));
        assert!(!is_url("papers/bio_2021.pdf"));
    }

    #[test]
    fn kind_detection() {
        assert_eq!(kind_from_extension("a/b/Bio_2021.PDF"), Some(SourceKind::Pdf));
        assert_eq!(kind_from_extension("https://x.org/quiz.htm?page=2"), Some(SourceKind::Html));
        assert_eq!(kind_from_extension("notes.docx"), None);
        assert_eq!(kind_from_extension("https://x.org/quiz"), None);
        assert_eq!(kind_from_content_type("text/html; charset=utf-8"), Some(SourceKind::Html));
        assert_eq!(kind_from_content_type("application/pdf"), Some(SourceKind::Pdf));
        assert_eq!(kind_from_content_type("image/png"), None);
    }

    #[test]
    fn page_text_splits_on_form_feed() {
        let doc = decode("p.txt", SourceKind::PageText, b"page one\x0cpage two").unwrap();
        assert_eq!(doc.kind(), DocumentKind::Pdf);
        match doc.content {
            RawContent::Pages(pages) => assert_eq!(pages, vec!["page one", "page two"]),
            RawContent::Html(_) => panic!("expected pages"),
        }
    }

    #[tokio::test]
    async fn broken_pdf_is_a_fetch_error() {
        let err = decode_off_thread("bad.pdf", SourceKind::Pdf, b"not a pdf".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Fetch { .. }));
    }

    #[tokio::test]
    async fn reads_local_html() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quiz.html");
        std::fs::write(&path, "<div class=\"question\">Q?</div>").unwrap();
        let doc = fetcher().fetch(path.to_str().unwrap()).await.unwrap();
        assert_eq!(doc.kind(), DocumentKind::Html);
    }

    #[tokio::test]
    async fn unsupported_extension() {
        let err = fetcher().fetch("slides.pptx").await.unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedKind { kind, .. } if kind == "pptx"));
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("chem_2020.txt");
        std::fs::write(&good, "1. Q? (A) a (B) b (C) c (D) d").unwrap();
        let origins = vec![
            dir.path().join("missing.html").to_string_lossy().into_owned(),
            "deck.pptx".to_string(),
            good.to_string_lossy().into_owned(),
        ];
        let outcomes = fetch_all(fetcher(), origins.clone(), 2, &ProgressBar::hidden()).await;
        assert_eq!(outcomes.len(), 3);
        for (outcome, origin) in outcomes.iter().zip(&origins) {
            assert_eq!(&outcome.origin, origin);
        }
        assert!(matches!(outcomes[0].result, Err(SourceError::Fetch { .. })));
        assert!(matches!(outcomes[1].result, Err(SourceError::UnsupportedKind { .. })));
        assert!(outcomes[2].result.is_ok());
    }
}
