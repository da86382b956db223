//! HTML to plain-text extraction for fetched pages.

use scraper::{Html, Selector};
use std::borrow::Cow;

/// Elements that never carry retrievable content.
pub const BOILERPLATE_SELECTOR: &str = "script, style, nav, footer, header, noscript, svg";

/// Minimum body length, in characters, for a page to be indexed.
pub const DEFAULT_MIN_BODY_CHARS: usize = 200;

/// Raw page bytes plus crawl metadata awaiting extraction.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Normalized URL the page was fetched from.
    pub url: String,
    /// Crawl depth when the page was scheduled.
    pub depth: u8,
    /// HTTP response status code.
    pub status: u16,
    /// Content-Type header, lowercased, if any.
    pub content_type: Option<String>,
    /// Raw response body bytes.
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Builds a new fetched page payload.
    pub fn new(
        url: impl Into<String>,
        depth: u8,
        status: u16,
        content_type: Option<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            url: url.into(),
            depth,
            status,
            content_type,
            body,
        }
    }

    /// Body decoded as UTF-8, lossily when needed.
    pub fn text(&self) -> Cow<'_, str> {
        let (text, lossy) = decode_body(&self.body);
        if lossy {
            tracing::debug!(url = %self.url, "body required lossy utf-8 decoding");
        }
        text
    }
}

/// Title and cleaned body of one HTML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Trimmed `<title>` text; empty when absent.
    pub title: String,
    /// Visible body text with whitespace runs collapsed.
    pub body: String,
}

/// A content-qualifying page, ready for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Source URL.
    pub url: String,
    /// Extracted title.
    pub title: String,
    /// Cleaned body text.
    pub body: String,
}

/// Stateless extraction service.
#[derive(Clone)]
pub struct Normalizer {
    min_body_chars: usize,
    selectors: Selectors,
}

impl Normalizer {
    /// Builds a normalizer that discards bodies shorter than `min_body_chars`.
    pub fn new(min_body_chars: usize) -> Self {
        Self {
            min_body_chars,
            selectors: Selectors::new(),
        }
    }

    /// Minimum body length in characters.
    pub fn min_body_chars(&self) -> usize {
        self.min_body_chars
    }

    /// Strips boilerplate elements and returns the trimmed title plus collapsed body text.
    pub fn extract(&self, html: &str) -> Extraction {
        let mut document = Html::parse_document(html);

        let doomed: Vec<_> = document
            .select(&self.selectors.boilerplate)
            .map(|element| element.id())
            .collect();
        for id in doomed {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }

        let title = document
            .select(&self.selectors.title)
            .next()
            .map(|title| title.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        let root = document
            .select(&self.selectors.body)
            .next()
            .unwrap_or_else(|| document.root_element());
        let body = collapse_whitespace(&root.text().collect::<String>());

        Extraction { title, body }
    }

    /// Extracts `page` and keeps it only if the body clears the length threshold.
    pub fn document(&self, page: &FetchedPage) -> Option<Document> {
        let extraction = self.extract(&page.text());
        if extraction.body.chars().count() < self.min_body_chars {
            return None;
        }
        Some(Document {
            url: page.url.clone(),
            title: extraction.title,
            body: extraction.body,
        })
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BODY_CHARS)
    }
}

#[derive(Clone)]
struct Selectors {
    boilerplate: Selector,
    title: Selector,
    body: Selector,
}

impl Selectors {
    fn new() -> Self {
        Self {
            boilerplate: Selector::parse(BOILERPLATE_SELECTOR).expect("boilerplate selector"),
            title: Selector::parse("title").expect("title selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }
}

fn decode_body(bytes: &[u8]) -> (Cow<'_, str>, bool) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (Cow::Borrowed(text), false),
        Err(_) => (
            Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
            true,
        ),
    }
}

/// Collapses every whitespace run to a single space and trims both ends.
pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}
