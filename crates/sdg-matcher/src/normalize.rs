//! Text normalization for keyword matching
//!
//! Performs:
//! - Lowercase conversion
//! - German umlaut and sharp-s transliteration (`ä → ae`, `ö → oe`, `ü → ue`, `ß → ss`)
//!
//! Normalization is idempotent: the output contains none of the
//! transliterated characters, and lower-casing is stable.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Unicode word runs, the token unit for keyword matching
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

/// A single word character, same class as `WORD_RE`
static WORD_CHAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w$").unwrap());

/// One rule per character, applied after lower-casing
const TRANSLITERATIONS: &[(char, &str)] = &[('ä', "ae"), ('ö', "oe"), ('ü', "ue"), ('ß', "ss")];

/// Normalize text for lexical comparison.
///
/// Empty input yields an empty string.
///
/// # Examples
///
/// ```
/// use sdg_matcher::normalize::normalize;
///
/// assert_eq!(normalize("Wasserqualität"), "wasserqualitaet");
/// assert_eq!(normalize("STRAẞE"), "strasse");
/// ```
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut out = String::with_capacity(lowered.len());

    for c in lowered.chars() {
        match TRANSLITERATIONS.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => out.push_str(to),
            None => out.push(c),
        }
    }

    out
}

/// Iterate word tokens of already-normalized text, in order
pub(crate) fn words(normalized: &str) -> impl Iterator<Item = &str> {
    WORD_RE.find_iter(normalized).map(|m| m.as_str())
}

/// True if the tokenizer treats `c` as part of a word
///
/// Covers combining marks and connector punctuation, not just alphanumerics.
pub(crate) fn is_word_char(c: char) -> bool {
    let mut buf = [0u8; 4];
    WORD_CHAR_RE.is_match(c.encode_utf8(&mut buf))
}

/// Set of normalized word tokens in `text`.
///
/// Duplicates collapse: presence matters, not frequency.
pub fn tokenize(text: &str) -> HashSet<String> {
    let normalized = normalize(text);
    words(&normalized).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_case_and_diacritic_insensitive() {
        let expected = "wasserqualitaet";
        assert_eq!(normalize("Wasserqualität"), expected);
        assert_eq!(normalize("WASSERQUALITÄT"), expected);
        assert_eq!(normalize("wasserqualitaet"), expected);
    }

    #[test]
    fn test_all_rules() {
        assert_eq!(normalize("Ärger Öl Übung Straße"), "aerger oel uebung strasse");
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize(""), "");
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_other_characters_untouched() {
        assert_eq!(normalize("Société Générale"), "société générale");
        assert_eq!(normalize("women's rights"), "women's rights");
    }

    #[test]
    fn test_tokenize_collapses_duplicates() {
        let tokens = tokenize("Klima, klima und KLIMA!");
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains("klima"));
        assert!(tokens.contains("und"));
    }

    #[test]
    fn test_tokenize_splits_on_punctuation() {
        let tokens = tokenize("well-being (Gesundheit); women's");
        for t in ["well", "being", "gesundheit", "women", "s"] {
            assert!(tokens.contains(t), "missing {}", t);
        }
    }

    #[test]
    fn test_word_chars_match_tokenizer() {
        for c in ['a', 'ß', '7', '_', '\u{301}', '\u{203F}'] {
            assert!(is_word_char(c), "{:?}", c);
        }
        for c in [' ', '\'', '-', '.'] {
            assert!(!is_word_char(c), "{:?}", c);
        }
        // A decomposed accent stays inside its token
        let tokens = tokenize("cafe\u{301} au lait");
        assert!(tokens.contains("cafe\u{301}"));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(text in "\\PC{0,64}") {
            let once = normalize(&text);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn normalize_ignores_case_of_umlaut_words(word in "[a-zäöüß]{1,16}") {
            prop_assert_eq!(normalize(&word.to_uppercase()), normalize(&word));
        }
    }
}
