use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

use super::clean_text;
use crate::model::{BlockHint, CandidateBlock, Fragment, RawContent, RawDocument};

/// Numbered item marker: `12.` at line start or after whitespace, not followed
/// by a digit or another dot. `1.Which` matches; decimals like `2.5` never do.
pub(super) static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(?:^|\s)(\d{1,3})\.(?:[^\d.]|$)").unwrap());

const BLOCK_KEYWORDS: &[&str] = &["question", "quiz", "mcq"];
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

pub fn segment(doc: &RawDocument) -> Vec<CandidateBlock> {
    let blocks = match &doc.content {
        RawContent::Html(markup) => segment_html(&doc.origin, markup),
        RawContent::Pages(pages) => segment_pages(&doc.origin, pages),
    };
    blocks
        .into_iter()
        .filter(|b| !b.raw_text.trim().is_empty())
        .collect()
}

// ── HTML ──

/// Every element whose tag name or class attribute mentions a quiz keyword
/// becomes one block. Nested matches each yield their own block.
pub fn segment_html(origin: &str, markup: &str) -> Vec<CandidateBlock> {
    let html = Html::parse_document(markup);
    html.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| is_block_element(el))
        .map(|el| html_block(origin, el))
        .collect()
}

fn is_block_element(el: &ElementRef) -> bool {
    let name = el.value().name().to_lowercase();
    if SKIPPED_TAGS.contains(&name.as_str()) {
        return false;
    }
    let class = el.value().attr("class").unwrap_or("").to_lowercase();
    BLOCK_KEYWORDS
        .iter()
        .any(|kw| name.contains(kw) || class.contains(kw))
}

fn html_block(origin: &str, block: ElementRef) -> CandidateBlock {
    let own_text = clean_text(
        &block
            .children()
            .filter_map(|n| n.value().as_text().map(|t| String::from(&**t)))
            .collect::<String>(),
    );

    let mut fragments = Vec::new();
    let mut own_question_at = None;
    for node in block.descendants().skip(1) {
        if let Some(text) = node.value().as_text() {
            let direct = node.parent().is_some_and(|p| p.id() == block.id());
            if direct && own_question_at.is_none() && text.contains('?') {
                own_question_at = Some(fragments.len());
            }
            continue;
        }
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let tag = el.value().name().to_lowercase();
        if SKIPPED_TAGS.contains(&tag.as_str()) {
            continue;
        }
        // Markup inside script/style is not content.
        if el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| SKIPPED_TAGS.contains(&a.value().name()))
        {
            continue;
        }
        let depth = 1 + el
            .ancestors()
            .take_while(|a| a.id() != block.id())
            .count();
        let mut hints = Vec::new();
        let mut attr_values = Vec::new();
        for (name, value) in el.value().attrs() {
            hints.push(name.to_lowercase());
            if name == "class" || name == "id" {
                hints.push(value.to_lowercase());
            } else {
                attr_values.push(value.trim().to_string());
            }
        }
        fragments.push(Fragment {
            tag,
            depth,
            hints: hints.join(" "),
            attr_values,
            text: element_text(&el),
        });
    }

    CandidateBlock {
        origin: origin.to_string(),
        raw_text: element_text(&block),
        hint: BlockHint::Html {
            tag: block.value().name().to_lowercase(),
            class: block.value().attr("class").unwrap_or("").to_string(),
            own_text,
            own_question_at,
            fragments,
        },
    }
}

fn element_text(el: &ElementRef) -> String {
    clean_text(&el.text().collect::<String>())
}

// ── PDF page text ──

struct ItemMarker {
    item: u32,
    start: usize,
    body_start: usize,
}

/// Markers on one page. A number must exceed the previous item unless it
/// opens a line, so a stray "5." inside a question does not split it while a
/// restarted "1." under a new section heading does.
fn item_markers(page: &str, mut last: Option<u32>) -> Vec<ItemMarker> {
    let mut markers = Vec::new();
    for caps in ITEM_RE.captures_iter(page) {
        let Some(num) = caps.get(1) else {
            continue;
        };
        let Ok(item) = num.as_str().parse::<u32>() else {
            continue;
        };
        let opens_line = page[..num.start()]
            .rsplit('\n')
            .next()
            .is_some_and(|line| line.trim().is_empty());
        if !opens_line && last.is_some_and(|prev| item <= prev) {
            continue;
        }
        markers.push(ItemMarker {
            item,
            start: num.start(),
            // skip the dot
            body_start: num.end() + 1,
        });
        last = Some(item);
    }
    markers
}

/// An item is complete once its last option marker has been seen.
fn has_last_option(text: &str) -> bool {
    text.contains("(D)")
}

/// Pages are segmented one at a time. Text ahead of a page's first marker is
/// carried onto the previous item only while that item still lacks option D;
/// otherwise it is a page header and is dropped.
pub fn segment_pages(origin: &str, pages: &[String]) -> Vec<CandidateBlock> {
    let mut items: Vec<(u32, String)> = Vec::new();

    for page in pages {
        let markers = item_markers(page, items.last().map(|(item, _)| *item));

        let lead = page[..markers.first().map_or(page.len(), |m| m.start)].trim();
        if let Some((_, text)) = items.last_mut() {
            if !lead.is_empty() && !has_last_option(text) {
                text.push('\n');
                text.push_str(lead);
            }
        }

        for (i, marker) in markers.iter().enumerate() {
            let body_end = markers.get(i + 1).map_or(page.len(), |next| next.start);
            items.push((marker.item, page[marker.body_start..body_end].trim().to_string()));
        }
    }

    items
        .into_iter()
        .map(|(item, raw_text)| CandidateBlock {
            origin: origin.to_string(),
            raw_text,
            hint: BlockHint::Numbered { item },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(blocks: &[CandidateBlock]) -> Vec<u32> {
        blocks
            .iter()
            .map(|b| match b.hint {
                BlockHint::Numbered { item } => item,
                _ => panic!("not a numbered block"),
            })
            .collect()
    }

    #[test]
    fn html_matches_class_and_tag() {
        let markup = r#"<html><body>
            <div class="QuizItem">Q one?</div>
            <section class="mcq-card">Q two?</section>
            <question>Q three?</question>
            <div class="article">not a question</div>
        </body></html>"#;
        let blocks = segment_html("page.html", markup);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].raw_text, "Q one?");
        assert!(matches!(&blocks[2].hint, BlockHint::Html { tag, .. } if tag == "question"));
    }

    #[test]
    fn html_nested_matches_are_not_merged() {
        let markup = r#"<div class="quiz"><div class="question">Q?</div></div>"#;
        assert_eq!(segment_html("p.html", markup).len(), 2);
    }

    #[test]
    fn html_fragments_keep_depth_and_hints() {
        let markup = r#"<div class="question">Intro
            <p>What is 2+2?</p>
            <ul><li data-key="x">A. 3</li></ul>
            <span class="answer" id="Ans">B</span>
        </div>"#;
        let blocks = segment_html("p.html", markup);
        let BlockHint::Html { own_text, fragments, .. } = &blocks[0].hint else {
            panic!("expected html block");
        };
        assert_eq!(own_text, "Intro");
        let li = fragments.iter().find(|f| f.tag == "li").unwrap();
        assert_eq!(li.depth, 2);
        assert_eq!(li.attr_values, vec!["x".to_string()]);
        let span = fragments.iter().find(|f| f.tag == "span").unwrap();
        assert!(span.hints.contains("answer") && span.hints.contains("ans"));
        assert_eq!(span.text, "B");
    }

    #[test]
    fn empty_blocks_are_dropped() {
        let doc = RawDocument::html("p.html", r#"<div class="question">   </div>"#);
        assert!(segment(&doc).is_empty());
    }

    #[test]
    fn pdf_numbered_items() {
        let pages = vec![
            "NEET 2021 Biology\n1. First question?\n(A) a (B) b (C) c (D) d\n2. Second".to_string(),
            "question continues\n(A) e\n(B) f\n(C) g\n(D) h".to_string(),
        ];
        let blocks = segment_pages("bio_2021.pdf", &pages);
        assert_eq!(items(&blocks), vec![1, 2]);
        assert!(blocks[0].raw_text.starts_with("First question?"));
        assert!(blocks[1].raw_text.contains("question continues"));
    }

    #[test]
    fn pdf_ignores_decimals_and_backwards_numbers() {
        let pages = vec!["3. Mass is 2.5 kg and 1. unit\n(A) x\n4. Next".to_string()];
        let blocks = segment_pages("p.pdf", &pages);
        assert_eq!(items(&blocks), vec![3, 4]);
        assert!(blocks[0].raw_text.contains("2.5 kg and 1. unit"));
    }

    #[test]
    fn pdf_restarted_numbering_starts_new_items() {
        let pages = vec![
            "Section A\n1. Which organelle respires? (A) Nucleus (B) Mitochondria (C) Ribosome \
             (D) ER"
                .to_string(),
            "Section B\n1. Which is a connective tissue? (A) Blood (B) Neuron (C) Skin (D) Enamel"
                .to_string(),
        ];
        let blocks = segment_pages("bio_2021.pdf", &pages);
        assert_eq!(items(&blocks), vec![1, 1]);
        assert!(blocks[0].raw_text.ends_with("(D) ER"));
        assert!(blocks[1].raw_text.starts_with("Which is a connective tissue?"));
    }

    #[test]
    fn pdf_restart_on_same_page_needs_line_start() {
        let pages = vec!["1. First? (A) a (B) b (C) c (D) d\nPart 2\n1. Again? (A) e".to_string()];
        let blocks = segment_pages("p.pdf", &pages);
        assert_eq!(items(&blocks), vec![1, 1]);
        assert_eq!(blocks[1].raw_text, "Again? (A) e");
    }

    #[test]
    fn pdf_marker_without_space() {
        let pages = vec!["1.Which organelle respires? (A) Nucleus\n2.(A) x".to_string()];
        let blocks = segment_pages("p.pdf", &pages);
        assert_eq!(items(&blocks), vec![1, 2]);
        assert_eq!(blocks[0].raw_text, "Which organelle respires? (A) Nucleus");
        assert_eq!(blocks[1].raw_text, "(A) x");
    }

    #[test]
    fn pdf_header_after_complete_item_is_dropped() {
        let pages = vec![
            "1. Q? (A) a (B) b (C) c (D) d".to_string(),
            "Page 2 of 10\n2. Next? (A) e".to_string(),
        ];
        let blocks = segment_pages("p.pdf", &pages);
        assert_eq!(blocks[0].raw_text, "Q? (A) a (B) b (C) c (D) d");
        assert_eq!(items(&blocks), vec![1, 2]);
    }

    #[test]
    fn html_own_question_position() {
        let markup = r#"<div class="question"><p>Intro</p>Which is largest?<p>Why?</p></div>"#;
        let blocks = segment_html("p.html", markup);
        let BlockHint::Html { own_question_at, .. } = &blocks[0].hint else {
            panic!("expected html block");
        };
        assert_eq!(*own_question_at, Some(1));
    }

    #[test]
    fn pdf_page_without_markers_yields_nothing() {
        let pages = vec!["Instructions only. Read carefully".to_string()];
        let doc = RawDocument::pages("p.pdf", pages);
        assert!(segment(&doc).is_empty());
    }
}
