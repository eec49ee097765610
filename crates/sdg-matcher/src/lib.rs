//! SDG Relevance Classifier
//!
//! Classifies academic course descriptions against the 17 UN Sustainable
//! Development Goals. Two independent strategies: keyword matching over
//! normalized text, and embedding similarity against a reference description
//! of each goal (Candle BERT, `deepset/gbert-large` by default).
//!
//! # Architecture
//!
//! ```text
//! CourseRecord { title, subtitle, objectives_and_content, .. }
//!       │
//!       ▼  course_text: fixed-order single-space join
//! ┌─────────────────────────────────────────┐
//! │  LexicalMatcher                         │
//! │  normalize → tokens → Token / Phrase    │
//! │  → { "SDG 13": ["klimaschutz"] }        │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  SemanticMatcher                        │
//! │  embed(text) vs 17 reference vectors    │
//! │  threshold scaled by word count         │
//! │  → { "SDG 13": {0.91, high} }           │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! AnnotatedCourse (record is never mutated)
//! ```
//!
//! The embedding model sits behind the [`Embedder`] trait; matchers are
//! explicitly constructed values, not process-wide singletons.

pub mod analyzer;
pub mod embedder;
pub mod lexical;
pub mod normalize;
pub mod semantic;
pub mod taxonomy;
pub mod types;

pub use analyzer::{course_text, AnalysisMode, AnnotatedCourse, CourseAnalyzer, CourseRecord, RunInfo};
pub use embedder::{cosine_similarity, BertEmbedder, CachedEmbedder, Embedder, Embedding};
pub use lexical::{KeywordMode, LexicalMatcher};
pub use normalize::{normalize, tokenize};
pub use semantic::{scaled_threshold, word_count, SemanticMatcher};
pub use taxonomy::{Taxonomy, TaxonomyEntry};
pub use types::*;
