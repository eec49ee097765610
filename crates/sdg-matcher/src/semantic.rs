//! Semantic matcher
//!
//! Scores text against every goal by cosine similarity between the text's
//! embedding and a precomputed reference embedding of the goal description.
//!
//! Threshold pipeline, applied per call:
//!
//! ```text
//! override or base_threshold
//!         │
//!         ▼
//! word_count(raw text) ──► scaled_threshold ──► similarity >= active ?
//!                                                   │
//!                                                   ▼
//!                                   high_confidence ? High : Medium
//! ```
//!
//! Texts shorter than `min_word_count` words get a proportionally lower
//! threshold: short inputs produce noisier similarity scores.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::embedder::{cosine_similarity, Embedding, SharedEmbedder};
use crate::taxonomy::Taxonomy;
use crate::types::{
    is_valid_threshold, GoalId, MatchConfidence, MatcherConfig, MatcherError, SemanticMatch,
    SemanticMatches,
};

/// Whitespace-delimited word count of the raw, untruncated text
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Scale `threshold` linearly by `word_count / min_word_count` below the floor
///
/// At or above the floor the threshold is returned unchanged.
pub fn scaled_threshold(threshold: f32, word_count: usize, min_word_count: usize) -> f32 {
    if min_word_count == 0 || word_count >= min_word_count {
        threshold
    } else {
        threshold * (word_count as f32 / min_word_count as f32)
    }
}

/// Reference embedding cache plus threshold policy
///
/// Built once; scoring never mutates it, so one instance can be shared
/// across threads.
pub struct SemanticMatcher {
    taxonomy: Arc<Taxonomy>,
    embedder: SharedEmbedder,
    config: MatcherConfig,
    references: BTreeMap<GoalId, Embedding>,
}

impl SemanticMatcher {
    /// Embed every goal description and retain the vectors
    ///
    /// Fails outright if any reference vector cannot be produced; there is
    /// no partially initialized matcher.
    pub fn new(
        taxonomy: Arc<Taxonomy>,
        embedder: SharedEmbedder,
        config: MatcherConfig,
    ) -> Result<Self, MatcherError> {
        config.validate()?;

        info!(
            "Building reference embeddings for {} goals with {}",
            taxonomy.len(),
            embedder.model_name()
        );

        let descriptions: Vec<&str> = taxonomy
            .entries()
            .iter()
            .map(|e| e.description.as_str())
            .collect();

        let vectors = embedder
            .embed_batch(&descriptions)
            .map_err(|e| MatcherError::ModelLoad(format!("{:#}", e)))?;

        if vectors.len() != descriptions.len() {
            return Err(MatcherError::ModelLoad(format!(
                "expected {} reference embeddings, got {}",
                descriptions.len(),
                vectors.len()
            )));
        }

        let mut dimension = None;
        let mut references = BTreeMap::new();
        for (entry, vector) in taxonomy.entries().iter().zip(vectors) {
            if vector.is_empty() {
                return Err(MatcherError::ReferenceEmbedding {
                    goal: entry.id,
                    reason: "empty vector".to_string(),
                });
            }
            let expected = *dimension.get_or_insert(vector.len());
            if vector.len() != expected {
                return Err(MatcherError::ReferenceEmbedding {
                    goal: entry.id,
                    reason: format!("dimension {} differs from {}", vector.len(), expected),
                });
            }
            references.insert(entry.id, vector);
        }

        info!(
            "Reference embeddings ready ({} goals, dimension {})",
            references.len(),
            dimension.unwrap_or(0)
        );

        Ok(Self {
            taxonomy,
            embedder,
            config,
            references,
        })
    }

    /// Threshold in effect for `text`
    ///
    /// A caller-supplied override replaces `base_threshold` but is still
    /// scaled by text length.
    pub fn active_threshold(&self, text: &str, threshold: Option<f32>) -> Result<f32, MatcherError> {
        let base = self.resolve_threshold(threshold)?;
        Ok(scaled_threshold(
            base,
            word_count(text),
            self.config.min_word_count,
        ))
    }

    /// Goals whose similarity meets the active threshold, with confidence tier
    ///
    /// Empty or whitespace-only text yields an empty result without invoking
    /// the embedder.
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    pub fn analyze(
        &self,
        text: &str,
        threshold: Option<f32>,
    ) -> Result<SemanticMatches, MatcherError> {
        let base = self.resolve_threshold(threshold)?;
        if text.trim().is_empty() {
            return Ok(SemanticMatches::new());
        }

        let words = word_count(text);
        let active = scaled_threshold(base, words, self.config.min_word_count);
        debug!(words, active, "Resolved semantic threshold");

        let matches: SemanticMatches = self
            .score(text)?
            .into_iter()
            .filter(|(_, similarity)| *similarity >= active)
            .map(|(goal, similarity)| {
                (
                    goal,
                    SemanticMatch {
                        similarity,
                        confidence: MatchConfidence::from_similarity(
                            similarity,
                            self.config.high_confidence,
                        ),
                    },
                )
            })
            .collect();

        debug!("Semantic matches for {} goals", matches.len());
        Ok(matches)
    }

    /// Unthresholded similarity to every goal
    pub fn similarities(&self, text: &str) -> Result<BTreeMap<GoalId, f32>, MatcherError> {
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        self.score(text)
    }

    pub fn reference_embeddings(&self) -> &BTreeMap<GoalId, Embedding> {
        &self.references
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        &self.taxonomy
    }

    fn resolve_threshold(&self, threshold: Option<f32>) -> Result<f32, MatcherError> {
        match threshold {
            Some(t) if !is_valid_threshold(t) => Err(MatcherError::InvalidThreshold(t)),
            Some(t) => Ok(t),
            None => Ok(self.config.base_threshold),
        }
    }

    fn score(&self, text: &str) -> Result<BTreeMap<GoalId, f32>, MatcherError> {
        let vector = self
            .embedder
            .embed(text)
            .map_err(|e| MatcherError::Embedding(format!("{:#}", e)))?;

        if let Some(reference) = self.references.values().next() {
            if reference.len() != vector.len() {
                return Err(MatcherError::Embedding(format!(
                    "text embedding has dimension {}, references have {}",
                    vector.len(),
                    reference.len()
                )));
            }
        }

        Ok(self
            .references
            .iter()
            .map(|(goal, reference)| (*goal, cosine_similarity(&vector, reference)))
            .collect())
    }
}

impl std::fmt::Debug for SemanticMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticMatcher")
            .field("model_name", &self.embedder.model_name())
            .field("goals", &self.references.len())
            .field("config", &self.config)
            .finish()
    }
}
