//! Free-text tokenization shared by the lexical index and the FAQ matcher.

use std::collections::HashSet;
use std::sync::OnceLock;

use tantivy::tokenizer::{
    LowerCaser, RemoveLongFilter, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream,
};

/// Name the analyzer is registered under in every index this crate opens.
pub const ANALYZER_NAME: &str = "groundcrawl";

/// Tokens of this many UTF-8 bytes or more are dropped.
const MAX_TOKEN_BYTES: usize = 64;

/// Function words dropped from every token stream.
///
/// Ukrainian conjunctions and prepositions first, then the English question
/// words that would otherwise dominate short queries.
pub const STOP_WORDS: &[&str] = &[
    "і", "й", "та", "або", "що", "це", "як", "де", "коли", "чи", "для", "про", "у", "в", "на",
    "до", "з", "із", "є", // uk
    "a", "an", "the", "is", "are", "was", "what", "which", "who", "how", "where", "when", "do",
    "does", "of", "to", "in", "on", "for", "and", "or", "can", "i", // en
];

static SHARED: OnceLock<TextAnalyzer> = OnceLock::new();

/// Returns `true` when `token` is in the fixed stop-word set.
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Splits on every non-alphanumeric character, lower-cases, and drops
/// [`STOP_WORDS`]. Indexing and querying both go through this chain.
pub fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_BYTES))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(
            STOP_WORDS.iter().map(|word| word.to_string()),
        ))
        .build()
}

/// Runs `text` through [`analyzer`] and returns the surviving tokens in order.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = SHARED.get_or_init(analyzer).clone();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while stream.advance() {
        tokens.push(stream.token().text.clone());
    }
    tokens
}

/// Distinct tokens of `text`.
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_stop_words() {
        assert_eq!(tokenize("Це тестовий, запит!"), vec!["тестовий", "запит"]);
    }

    #[test]
    fn punctuation_never_merges_words() {
        assert_eq!(tokenize("e-mail/phone"), vec!["e", "mail", "phone"]);
    }

    #[test]
    fn lowercases_and_keeps_digits() {
        assert_eq!(tokenize("Room 204 OPEN"), vec!["room", "204", "open"]);
    }

    #[test]
    fn empty_and_symbol_only_inputs_yield_nothing() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  ?!  --  ").is_empty());
    }

    #[test]
    fn english_question_words_are_stop_words() {
        for word in ["what", "is", "the"] {
            assert!(is_stop_word(word), "{word} should be a stop word");
        }
        assert!(!is_stop_word("contact"));
        assert_eq!(tokenize("what is the contact"), vec!["contact"]);
    }

    #[test]
    fn oversized_tokens_are_dropped() {
        let long = "x".repeat(MAX_TOKEN_BYTES + 1);
        assert_eq!(tokenize(&format!("fees {long} grants")), vec!["fees", "grants"]);
    }

    #[test]
    fn token_set_deduplicates() {
        let set = token_set("вступ вступ ВСТУП");
        assert_eq!(set.len(), 1);
        assert!(set.contains("вступ"));
    }
}
