//! Lexical keyword matcher
//!
//! Detects taxonomy keywords in free text. Two matching modes:
//!
//! - **Token**: a single-word keyword matches iff it equals one of the text's
//!   word tokens. `"art"` never matches inside `"party"`.
//! - **Phrase**: a keyword spanning several tokens (spaces, apostrophes,
//!   hyphens) matches iff its normalized form occurs contiguously in the
//!   normalized text, starting and ending on word boundaries.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::normalize::{is_word_char, normalize, words};
use crate::taxonomy::Taxonomy;
use crate::types::{GoalId, LexicalMatches};

/// How a keyword is compared against text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordMode {
    /// Exact membership in the text's token set
    Token,
    /// Contiguous, boundary-aligned substring of the normalized text
    Phrase,
}

impl KeywordMode {
    /// Classify an already-normalized keyword
    fn of(normalized: &str) -> Self {
        let mut tokens = words(normalized);
        match (tokens.next(), tokens.next()) {
            (Some(only), None) if only == normalized => KeywordMode::Token,
            _ => KeywordMode::Phrase,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledKeyword {
    /// As written in the taxonomy, reported as evidence
    original: String,
    normalized: String,
    mode: KeywordMode,
}

#[derive(Debug, Clone)]
struct CompiledGoal {
    id: GoalId,
    keywords: Vec<CompiledKeyword>,
}

/// Keyword matcher over a shared taxonomy
///
/// Keywords are normalized and classified once at construction.
#[derive(Debug, Clone)]
pub struct LexicalMatcher {
    taxonomy: Arc<Taxonomy>,
    goals: Vec<CompiledGoal>,
}

impl LexicalMatcher {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        let goals = taxonomy
            .entries()
            .iter()
            .map(|entry| CompiledGoal {
                id: entry.id,
                keywords: entry
                    .keywords
                    .iter()
                    .filter_map(|keyword| {
                        let normalized = normalize(keyword.trim());
                        if normalized.is_empty() {
                            return None;
                        }
                        let mode = KeywordMode::of(&normalized);
                        Some(CompiledKeyword {
                            original: keyword.clone(),
                            normalized,
                            mode,
                        })
                    })
                    .collect(),
            })
            .collect();

        Self { taxonomy, goals }
    }

    /// Find goals whose keywords appear in `text`.
    ///
    /// Each goal's evidence is exactly its matched keywords. Goals with no
    /// match are absent; an empty result means no detected relevance.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub fn find_matches(&self, text: &str) -> LexicalMatches {
        let mut findings = LexicalMatches::new();

        let normalized = normalize(text);
        if normalized.trim().is_empty() {
            return findings;
        }
        let tokens: HashSet<&str> = words(&normalized).collect();

        for goal in &self.goals {
            let found: BTreeSet<String> = goal
                .keywords
                .iter()
                .filter(|kw| match kw.mode {
                    KeywordMode::Token => tokens.contains(kw.normalized.as_str()),
                    KeywordMode::Phrase => contains_phrase(&normalized, &kw.normalized),
                })
                .map(|kw| kw.original.clone())
                .collect();

            if !found.is_empty() {
                findings.insert(goal.id, found);
            }
        }

        debug!("Lexical matches for {} goals", findings.len());
        findings
    }

    /// Goals with at least one keyword match, in id order
    pub fn matched_goals(&self, text: &str) -> Vec<GoalId> {
        self.find_matches(text).into_keys().collect()
    }

    /// Matching mode chosen for a keyword of a goal, if the goal has it
    pub fn keyword_mode(&self, goal: GoalId, keyword: &str) -> Option<KeywordMode> {
        self.goals
            .iter()
            .find(|g| g.id == goal)?
            .keywords
            .iter()
            .find(|kw| kw.original == keyword)
            .map(|kw| kw.mode)
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }
}

/// Boundary-aligned substring containment
///
/// An occurrence counts only if it is not glued to a word character on a
/// side where the phrase itself begins or ends with one. Overlapping
/// occurrences are all considered.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let needs_left = phrase.chars().next().is_some_and(is_word_char);
    let needs_right = phrase.chars().next_back().is_some_and(is_word_char);

    let mut from = 0;
    while let Some(offset) = text[from..].find(phrase) {
        let start = from + offset;
        let end = start + phrase.len();
        let left_ok = !needs_left || !text[..start].chars().next_back().is_some_and(is_word_char);
        let right_ok = !needs_right || !text[end..].chars().next().is_some_and(is_word_char);
        if left_ok && right_ok {
            return true;
        }
        // Resume one character past this candidate's start
        from = start + text[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}
