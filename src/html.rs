//! Outbound link discovery built on `lol_html`.

use lol_html::{element, HtmlRewriter, OutputSink, Settings};
use std::cell::RefCell;
use thiserror::Error;
use url::Url;

use crate::frontier::normalize_url;

/// Streams anchor tags out of `html`, transforming matching `href` values with `transform`.
///
/// The `transform` closure runs for every `href`; returning `Some(T)` keeps the value, `None`
/// skips it.
pub fn scan_links<T, F>(html: &[u8], mut transform: F) -> Result<Vec<T>, LinkScanError>
where
    F: FnMut(&str) -> Option<T>,
{
    let values = RefCell::new(Vec::new());

    let handler = element!("a[href]", |el| {
        if let Some(href) = el.get_attribute("href") {
            if let Some(mapped) = transform(&href) {
                values.borrow_mut().push(mapped);
            }
        }
        Ok(())
    });

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![handler],
            ..Settings::default()
        },
        NoopSink,
    );
    rewriter.write(html)?;
    rewriter.end()?;

    Ok(values.into_inner())
}

/// Resolves every `href` in `html` against `base` and returns the distinct,
/// normalized absolute `http(s)` URLs in document order.
pub fn outbound_links(html: &[u8], base: &Url) -> Result<Vec<String>, LinkScanError> {
    let mut links = scan_links(html, |href| {
        let href = html_escape::decode_html_entities(href.trim());
        let resolved = base.join(&href).ok()?;
        matches!(resolved.scheme(), "http" | "https").then(|| normalize_url(resolved.as_str()))
    })?;

    let mut seen = std::collections::HashSet::new();
    links.retain(|link| seen.insert(link.clone()));
    Ok(links)
}

/// Errors surfaced while scanning HTML for links.
#[derive(Debug, Error)]
pub enum LinkScanError {
    /// The HTML rewriter encountered malformed markup.
    #[error("html rewrite error: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),
}

struct NoopSink;

impl OutputSink for NoopSink {
    fn handle_chunk(&mut self, _chunk: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://site.test/dept/index.html").unwrap()
    }

    #[test]
    fn resolves_relative_links() {
        let html = br#"
            <a href="/about/">About</a>
            <a href="staff.html#top">Staff</a>
            <a href="https://other.test/x">Other</a>
        "#;
        let links = outbound_links(html, &base()).expect("links");
        assert_eq!(
            links,
            vec![
                "https://site.test/about",
                "https://site.test/dept/staff.html",
                "https://other.test/x",
            ]
        );
    }

    #[test]
    fn skips_non_http_schemes_and_duplicates() {
        let html = br#"
            <a href="mailto:office@site.test">Mail</a>
            <a href="javascript:void(0)">JS</a>
            <a href="/news">News</a>
            <a href="/news/#latest">News again</a>
            <a>no href</a>
        "#;
        let links = outbound_links(html, &base()).expect("links");
        assert_eq!(links, vec!["https://site.test/news"]);
    }

    #[test]
    fn entities_in_hrefs_are_decoded() {
        let html = br#"<a href="/search?a=1&amp;b=2&#38;c=3&#x26;d=4">Search</a>"#;
        let links = outbound_links(html, &base()).expect("links");
        assert_eq!(links, vec!["https://site.test/search?a=1&b=2&c=3&d=4"]);
    }

    #[test]
    fn transform_can_filter() {
        let html = br#"<a href="a">a</a><a href="b">b</a>"#;
        let hrefs = scan_links(html, |href| (href == "b").then(|| href.to_string())).unwrap();
        assert_eq!(hrefs, vec!["b"]);
    }
}
