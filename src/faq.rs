//! Curated question/answer entries and the token-overlap matcher that consults them
//! before retrieval.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::tokenizer::token_set;

/// Answer language. Anything other than `en` is treated as Ukrainian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Language {
    /// Ukrainian.
    #[default]
    Uk,
    /// English.
    En,
}

impl Language {
    /// Case-insensitive: `en` maps to English, every other value to Ukrainian.
    pub fn normalize(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("en") {
            Language::En
        } else {
            Language::Uk
        }
    }

    /// Two-letter code.
    pub fn code(self) -> &'static str {
        match self {
            Language::Uk => "uk",
            Language::En => "en",
        }
    }
}

impl From<String> for Language {
    fn from(value: String) -> Self {
        Language::normalize(&value)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One administrator-authored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    /// Entry identifier.
    #[serde(default)]
    pub id: u64,
    /// Question text matched against incoming queries.
    pub question: String,
    /// Answer returned verbatim on a match.
    pub answer: String,
    /// Language the entry answers in.
    #[serde(default)]
    pub lang: Language,
    /// Disabled entries never match.
    #[serde(default = "enabled_by_default", deserialize_with = "flag")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

/// Accepts `true`/`false` as well as the `1`/`0` written by older editors.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Number(value) => value != 0,
    })
}

#[derive(Deserialize)]
struct FaqFile {
    #[serde(default)]
    qas: Vec<FaqEntry>,
}

/// The curated entry set, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaqBook {
    entries: Vec<FaqEntry>,
}

impl FaqBook {
    /// Wraps already-loaded entries.
    pub fn new(entries: Vec<FaqEntry>) -> Self {
        Self { entries }
    }

    /// Reads `{ "qas": [...] }` from `path`; a missing or malformed file yields an empty book.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no curated answers file");
                return Self::default();
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "cannot read curated answers");
                return Self::default();
            }
        };
        match serde_json::from_str::<FaqFile>(&raw) {
            Ok(file) => Self::new(file.qas),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "malformed curated answers");
                Self::default()
            }
        }
    }

    /// All entries, enabled or not.
    pub fn entries(&self) -> &[FaqEntry] {
        &self.entries
    }
}

/// Fraction of `query_tokens` found among the tokens of `text`; 0 when either side is empty.
pub fn overlap_ratio(query_tokens: &HashSet<String>, text: &str) -> f64 {
    let text_tokens = token_set(text);
    if query_tokens.is_empty() || text_tokens.is_empty() {
        return 0.0;
    }
    let overlap = query_tokens
        .iter()
        .filter(|token| text_tokens.contains(*token))
        .count();
    overlap as f64 / query_tokens.len() as f64
}

/// A curated entry that cleared the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaqMatch<'a> {
    /// Winning entry.
    pub entry: &'a FaqEntry,
    /// Its overlap ratio.
    pub ratio: f64,
}

/// Picks the best enabled entry for a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaqMatcher {
    min_ratio: f64,
}

impl Default for FaqMatcher {
    fn default() -> Self {
        Self { min_ratio: 0.5 }
    }
}

impl FaqMatcher {
    /// Matcher accepting ratios of at least `min_ratio`.
    pub fn new(min_ratio: f64) -> Self {
        Self { min_ratio }
    }

    /// Highest-ratio enabled entry in `lang`; on equal ratios the earlier entry wins.
    pub fn best_match<'a>(
        &self,
        book: &'a FaqBook,
        query: &str,
        lang: Language,
    ) -> Option<FaqMatch<'a>> {
        let query_tokens = token_set(query);
        if query_tokens.is_empty() {
            return None;
        }

        let mut best: Option<FaqMatch<'a>> = None;
        for entry in book
            .entries()
            .iter()
            .filter(|entry| entry.enabled && entry.lang == lang)
        {
            let ratio = overlap_ratio(&query_tokens, &entry.question);
            if ratio < self.min_ratio {
                continue;
            }
            if best.map_or(true, |current| ratio > current.ratio) {
                best = Some(FaqMatch { entry, ratio });
            }
        }
        best
    }
}
