//! Lightweight language detection for inbound messages.
//!
//! The assistant answers in Arabic, French, or English. Detection is a
//! heuristic over script and stopwords; anything ambiguous falls back to
//! English. Detection never fails.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    Fr,
    Ar,
}

impl Lang {
    pub fn code(self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Fr => "fr",
            Lang::Ar => "ar",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Lang::En => "English",
            Lang::Fr => "French",
            Lang::Ar => "Arabic",
        }
    }
}

const FRENCH_STOPWORDS: &[&str] = &[
    "le", "la", "les", "un", "une", "des", "du", "je", "tu", "il", "elle", "nous", "vous", "ils",
    "est", "sont", "et", "ou", "mais", "pour", "avec", "dans", "sur", "pas", "que", "qui", "quoi",
    "bonjour", "merci", "oui", "non", "comment", "combien", "quand", "quel", "quelle", "voudrais",
    "veux", "peux", "suis", "avez", "votre", "vos", "mon", "ma", "mes", "ce", "cette", "ces",
];

const ENGLISH_STOPWORDS: &[&str] = &[
    "the", "a", "an", "i", "you", "he", "she", "we", "they", "is", "are", "and", "or", "but",
    "for", "with", "in", "on", "not", "that", "what", "who", "hello", "hi", "thanks", "yes", "no",
    "how", "much", "when", "which", "would", "want", "can", "am", "have", "your", "my", "this",
];

/// Detect the language of a message, defaulting to English.
pub fn detect(text: &str) -> Lang {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Lang::En;
    }

    // Script check first: any meaningful amount of Arabic script wins.
    let total_alpha = trimmed.chars().filter(|c| c.is_alphabetic()).count();
    if total_alpha == 0 {
        return Lang::En;
    }
    let arabic = trimmed
        .chars()
        .filter(|c| ('\u{0600}'..='\u{06FF}').contains(c) || ('\u{0750}'..='\u{077F}').contains(c))
        .count();
    if arabic * 3 >= total_alpha {
        return Lang::Ar;
    }

    // Latin text: score stopwords, with French diacritics as a tiebreaker.
    let lower = trimmed.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphabetic() && c != '\'')
        .filter(|w| !w.is_empty())
        .collect();

    let fr_hits = words
        .iter()
        .filter(|w| FRENCH_STOPWORDS.contains(&w.trim_start_matches(|c| c == '\'')))
        .count();
    let en_hits = words.iter().filter(|w| ENGLISH_STOPWORDS.contains(w)).count();
    let diacritics = lower
        .chars()
        .filter(|c| "àâçéèêëîïôùûüÿœ".contains(*c))
        .count();

    if fr_hits > en_hits || (fr_hits == en_hits && diacritics > 0 && fr_hits > 0) {
        Lang::Fr
    } else if en_hits == 0 && fr_hits == 0 && diacritics >= 2 {
        Lang::Fr
    } else {
        Lang::En
    }
}
