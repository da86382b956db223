//! Grounding prompt assembly for the answer generator.

use std::fmt::Write;

use crate::corpus::Chunk;
use crate::faq::Language;

/// Phrases the templates ask the model to use when sources fall short.
const INSUFFICIENT_MARKERS: &[&str] = &[
    "не маю даних",
    "інформації недостатньо",
    "звернутися до адміністрації",
    "don't have enough data",
    "do not have enough data",
    "insufficient information",
    "contact administration",
];

/// Returns `true` when `answer` declares that the sources were not enough.
pub fn declares_insufficient(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    INSUFFICIENT_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Renders retrieved chunks and a question into one instruction text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptComposer {
    institution_uk: String,
    institution_en: String,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new("Острозької академії", "Ostroh Academy")
    }
}

impl PromptComposer {
    /// `institution_uk` is inserted after "помічник", so it should be in the genitive case.
    pub fn new(institution_uk: impl Into<String>, institution_en: impl Into<String>) -> Self {
        Self {
            institution_uk: institution_uk.into(),
            institution_en: institution_en.into(),
        }
    }

    /// Fixed persona and grounding rules, numbered source blocks, then the question.
    pub fn compose(&self, chunks: &[Chunk], question: &str, lang: Language) -> String {
        let sources = render_sources(chunks, lang);
        match lang {
            Language::En => format!(
                "You are the official assistant of {institution}.\n\n\
                 Answer in English, clearly and briefly.\n\n\
                 Use ONLY the source context below. If data is not enough, explicitly say you do \
                 not have enough data and suggest contacting administration or clarifying the \
                 request.\n\n\
                 Context:\n{sources}\n\nQuestion: {question}",
                institution = self.institution_en,
            ),
            Language::Uk => format!(
                "Ти — офіційний помічник {institution}.\n\n\
                 Відповідай українською, ввічливо, чітко та по суті.\n\n\
                 Використовуй ТІЛЬКИ контекст з джерел нижче. Якщо інформації недостатньо — \
                 скажи, що не маєш даних, і порадь звернутися до адміністрації або уточнити \
                 запит.\n\n\
                 Контекст:\n{sources}\n\nПитання: {question}",
                institution = self.institution_uk,
            ),
        }
    }
}

fn render_sources(chunks: &[Chunk], lang: Language) -> String {
    let (label, untitled, text) = match lang {
        Language::En => ("Source", "Untitled", "Text"),
        Language::Uk => ("Джерело", "Без назви", "Текст"),
    };
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let title = if chunk.title.trim().is_empty() {
            untitled
        } else {
            chunk.title.as_str()
        };
        // writing into a String cannot fail
        let _ = write!(
            out,
            "{label} {}: {title}\nURL: {}\n{text}: {}",
            i + 1,
            chunk.url,
            chunk.text
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(title: &str, text: &str) -> Chunk {
        Chunk {
            id: 1,
            url: "https://site.test/admission".into(),
            title: title.into(),
            text: text.into(),
        }
    }

    #[test]
    fn english_prompt_numbers_sources() {
        let prompt = PromptComposer::default().compose(
            &[chunk("Admission", "deadline is June"), chunk("", "fees")],
            "When is the deadline?",
            Language::En,
        );
        assert!(prompt.starts_with("You are the official assistant of Ostroh Academy."));
        assert!(prompt.contains("Use ONLY the source context below"));
        assert!(prompt.contains(
            "Source 1: Admission\nURL: https://site.test/admission\nText: deadline is June"
        ));
        assert!(prompt.contains("Source 2: Untitled"));
        assert!(prompt.ends_with("Question: When is the deadline?"));
    }

    #[test]
    fn ukrainian_prompt_uses_its_own_template() {
        let prompt = PromptComposer::new("Тестового університету", "Test University").compose(
            &[chunk("", "вступ триває")],
            "Коли вступ?",
            Language::Uk,
        );
        assert!(prompt.starts_with("Ти — офіційний помічник Тестового університету."));
        assert!(prompt.contains("Джерело 1: Без назви"));
        assert!(prompt.contains("Текст: вступ триває"));
        assert!(prompt.ends_with("Питання: Коли вступ?"));
    }

    #[test]
    fn empty_context_still_carries_the_rules() {
        let prompt = PromptComposer::default().compose(&[], "hi", Language::En);
        assert!(prompt.contains("Context:\n\n\nQuestion: hi"));
        assert!(prompt.contains("not have enough data"));
    }

    #[test]
    fn detects_insufficient_answers() {
        assert!(declares_insufficient("Вибачте, я не маю даних про це."));
        assert!(declares_insufficient("I don't have enough data to answer."));
        assert!(declares_insufficient("Please CONTACT ADMINISTRATION."));
        assert!(!declares_insufficient("The deadline is June 30."));
    }
}
