//! Shared types for SDG classification
//!
//! Goal identifiers, match evidence, matcher configuration and the error
//! type surfaced at the crate boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Default embedding model (German BERT, large)
pub const DEFAULT_MODEL: &str = "deepset/gbert-large";

/// Identifier of a taxonomy entry (goal index, 1-17 for the SDGs)
///
/// Displayed and serialized as `"SDG 13"`. Parses from either `"SDG 13"`
/// or a bare `"13"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GoalId(pub u8);

impl GoalId {
    pub fn index(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SDG {}", self.0)
    }
}

impl FromStr for GoalId {
    type Err = MatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("SDG")
            .map(str::trim_start)
            .unwrap_or(trimmed);
        digits
            .parse::<u8>()
            .map(GoalId)
            .map_err(|_| MatcherError::Taxonomy(format!("invalid goal identifier: '{}'", s)))
    }
}

impl Serialize for GoalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GoalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(u8),
            Label(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Index(n) => Ok(GoalId(n)),
            Raw::Label(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Lexical evidence: goal -> keywords (as written in the taxonomy) found in the text
///
/// Goals without a matched keyword are absent.
pub type LexicalMatches = BTreeMap<GoalId, BTreeSet<String>>;

/// Semantic evidence: goal -> similarity and confidence tier
///
/// Goals below the active threshold are absent.
pub type SemanticMatches = BTreeMap<GoalId, SemanticMatch>;

/// Confidence tier of an accepted semantic match
///
/// There is no low tier: scores below the active threshold are excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    High,
    Medium,
}

impl MatchConfidence {
    /// Tier for a similarity that already passed the active threshold
    pub fn from_similarity(similarity: f32, high_confidence: f32) -> Self {
        if similarity >= high_confidence {
            MatchConfidence::High
        } else {
            MatchConfidence::Medium
        }
    }
}

impl fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchConfidence::High => write!(f, "high"),
            MatchConfidence::Medium => write!(f, "medium"),
        }
    }
}

/// A single accepted semantic match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatch {
    /// `1 - cosine_distance`, not clamped
    pub similarity: f32,
    pub confidence: MatchConfidence,
}

/// Project semantic matches down to similarity scores only
pub fn similarities(matches: &SemanticMatches) -> BTreeMap<GoalId, f32> {
    matches
        .iter()
        .map(|(goal, m)| (*goal, m.similarity))
        .collect()
}

/// Configuration for the semantic matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatcherConfig {
    /// Similarity floor for inclusion
    pub base_threshold: f32,
    /// Floor for the `high` confidence tier
    pub high_confidence: f32,
    /// Texts shorter than this get a proportionally lowered threshold
    pub min_word_count: usize,
    /// HuggingFace model repository
    pub model_name: String,
    /// Tokenizer truncation length
    pub max_tokens: usize,
    /// Maximum entries kept by the embedding cache
    pub embedding_cache_size: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.70,
            high_confidence: 0.85,
            min_word_count: 50,
            model_name: DEFAULT_MODEL.to_string(),
            max_tokens: 512,
            embedding_cache_size: 10_000,
        }
    }
}

impl MatcherConfig {
    /// Load from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self, MatcherError> {
        let content = std::fs::read_to_string(path).map_err(|e| MatcherError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::load_from_str(&content)
    }

    /// Load from a YAML string, validating the result
    pub fn load_from_str(yaml: &str) -> Result<Self, MatcherError> {
        let config: MatcherConfig =
            serde_yaml::from_str(yaml).map_err(|e| MatcherError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject thresholds outside [-1, 1] and non-positive counts
    pub fn validate(&self) -> Result<(), MatcherError> {
        check_threshold("base_threshold", self.base_threshold)?;
        check_threshold("high_confidence", self.high_confidence)?;

        if self.min_word_count == 0 {
            return Err(MatcherError::InvalidConfig(
                "min_word_count must be positive".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(MatcherError::InvalidConfig(
                "max_tokens must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Threshold portion of the config, for run metadata
    pub fn thresholds(&self) -> ThresholdConfig {
        ThresholdConfig {
            base_threshold: self.base_threshold,
            high_confidence: self.high_confidence,
            min_word_count: self.min_word_count,
        }
    }
}

fn check_threshold(name: &str, value: f32) -> Result<(), MatcherError> {
    if !is_valid_threshold(value) {
        return Err(MatcherError::InvalidConfig(format!(
            "{} must be within [-1, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

/// Similarity thresholds live in the cosine range
pub(crate) fn is_valid_threshold(value: f32) -> bool {
    value.is_finite() && (-1.0..=1.0).contains(&value)
}

/// Threshold settings reported alongside results
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub base_threshold: f32,
    pub high_confidence: f32,
    pub min_word_count: usize,
}

/// Errors that can occur during classification
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Threshold {0} outside [-1, 1]")]
    InvalidThreshold(f32),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Failed to embed reference description for {goal}: {reason}")]
    ReferenceEmbedding { goal: GoalId, reason: String },

    #[error("Invalid taxonomy: {0}")]
    Taxonomy(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
