//! Course analysis
//!
//! Joins the classifiable text fields of a course record and runs the
//! configured matchers over it. Records are borrowed, never mutated; each
//! analysis returns a new [`AnnotatedCourse`].

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

use crate::lexical::LexicalMatcher;
use crate::semantic::SemanticMatcher;
use crate::types::{
    is_valid_threshold, similarities, GoalId, LexicalMatches, MatcherError, SemanticMatches,
    ThresholdConfig,
};

/// A crawled course
///
/// Only the three text fields are read. Everything else (url, type, ects, ...)
/// lands in `metadata` and is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives_and_content: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// Identifying fields of a course plus the findings of each strategy that ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedCourse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexical_matches: Option<LexicalMatches>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_matches: Option<SemanticMatches>,
}

impl AnnotatedCourse {
    /// True if no strategy found any goal
    pub fn has_no_relevance(&self) -> bool {
        self.lexical_matches.as_ref().map_or(true, |m| m.is_empty())
            && self.semantic_matches.as_ref().map_or(true, |m| m.is_empty())
    }

    /// Semantic findings reduced to `goal -> similarity`
    pub fn semantic_similarities(&self) -> Option<BTreeMap<GoalId, f32>> {
        self.semantic_matches.as_ref().map(similarities)
    }
}

/// Which strategies to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Lexical,
    Semantic,
    Both,
}

impl AnalysisMode {
    pub fn runs_lexical(&self) -> bool {
        matches!(self, AnalysisMode::Lexical | AnalysisMode::Both)
    }

    pub fn runs_semantic(&self) -> bool {
        matches!(self, AnalysisMode::Semantic | AnalysisMode::Both)
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Lexical => write!(f, "lexical"),
            AnalysisMode::Semantic => write!(f, "semantic"),
            AnalysisMode::Both => write!(f, "both"),
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = MatcherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lexical" => Ok(AnalysisMode::Lexical),
            "semantic" => Ok(AnalysisMode::Semantic),
            "both" => Ok(AnalysisMode::Both),
            other => Err(MatcherError::InvalidConfig(format!(
                "unknown analysis mode: '{}'",
                other
            ))),
        }
    }
}

/// Audit record for a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Embedding model, if the semantic strategy ran
    pub model_name: Option<String>,
    pub thresholds: Option<ThresholdConfig>,
    /// Per-run override of `base_threshold`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_override: Option<f32>,
    pub mode: AnalysisMode,
    pub goal_count: usize,
    /// `version` of the taxonomy file, if it declared one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxonomy_version: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

/// Text the matchers see: title, subtitle and content joined by single spaces
///
/// Missing fields count as empty strings.
pub fn course_text(course: &CourseRecord) -> String {
    [
        course.title.as_deref(),
        course.subtitle.as_deref(),
        course.objectives_and_content.as_deref(),
    ]
    .into_iter()
    .map(|field| field.unwrap_or(""))
    .collect::<Vec<_>>()
    .join(" ")
}

/// Runs the configured strategies over course records
#[derive(Debug)]
pub struct CourseAnalyzer {
    lexical: LexicalMatcher,
    semantic: Option<SemanticMatcher>,
    mode: AnalysisMode,
    threshold: Option<f32>,
}

impl CourseAnalyzer {
    /// Keyword matching only
    pub fn lexical_only(lexical: LexicalMatcher) -> Self {
        Self {
            lexical,
            semantic: None,
            mode: AnalysisMode::Lexical,
            threshold: None,
        }
    }

    /// Analyzer able to run either strategy
    pub fn with_semantic(
        lexical: LexicalMatcher,
        semantic: SemanticMatcher,
        mode: AnalysisMode,
    ) -> Self {
        Self {
            lexical,
            semantic: Some(semantic),
            mode,
            threshold: None,
        }
    }

    /// Assemble from optional parts
    ///
    /// Fails if `mode` needs the semantic matcher and none is given.
    pub fn new(
        lexical: LexicalMatcher,
        semantic: Option<SemanticMatcher>,
        mode: AnalysisMode,
    ) -> Result<Self, MatcherError> {
        if mode.runs_semantic() && semantic.is_none() {
            return Err(MatcherError::InvalidConfig(format!(
                "mode '{}' requires a semantic matcher",
                mode
            )));
        }

        Ok(Self {
            lexical,
            semantic,
            mode,
            threshold: None,
        })
    }

    /// Override the semantic base threshold for every analysis
    pub fn with_threshold(mut self, threshold: Option<f32>) -> Result<Self, MatcherError> {
        if let Some(t) = threshold {
            if !is_valid_threshold(t) {
                return Err(MatcherError::InvalidThreshold(t));
            }
        }
        self.threshold = threshold;
        Ok(self)
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    /// Analyze one course
    #[instrument(skip(self, course), fields(title = course.title.as_deref().unwrap_or("")))]
    pub fn analyze(&self, course: &CourseRecord) -> Result<AnnotatedCourse, MatcherError> {
        let text = course_text(course);

        let lexical_matches = self
            .mode
            .runs_lexical()
            .then(|| self.lexical.find_matches(&text));

        let semantic_matches = match (self.mode.runs_semantic(), &self.semantic) {
            (true, Some(semantic)) => Some(semantic.analyze(&text, self.threshold)?),
            (true, None) => {
                return Err(MatcherError::InvalidConfig(
                    "semantic analysis requested without a semantic matcher".to_string(),
                ))
            }
            (false, _) => None,
        };

        let annotated = AnnotatedCourse {
            title: course.title.clone(),
            subtitle: course.subtitle.clone(),
            metadata: course.metadata.clone(),
            lexical_matches,
            semantic_matches,
        };

        if annotated.has_no_relevance() {
            debug!("No goal relevance detected");
        }

        Ok(annotated)
    }

    /// Analyze courses in parallel
    ///
    /// Results are in input order. One failed course does not affect the
    /// others.
    pub fn analyze_batch(&self, courses: &[CourseRecord]) -> Vec<Result<AnnotatedCourse, MatcherError>> {
        info!("Analyzing {} courses ({} mode)", courses.len(), self.mode);

        let results: Vec<_> = courses.par_iter().map(|c| self.analyze(c)).collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!("{} of {} courses failed analysis", failed, courses.len());
        }

        results
    }

    /// Model and thresholds used, for reproducing a run
    pub fn run_info(&self) -> RunInfo {
        let semantic = self
            .semantic
            .as_ref()
            .filter(|_| self.mode.runs_semantic());

        RunInfo {
            model_name: semantic.map(|s| s.model_name().to_string()),
            thresholds: semantic.map(|s| s.config().thresholds()),
            threshold_override: semantic.and(self.threshold),
            mode: self.mode,
            goal_count: self.lexical.taxonomy().len(),
            taxonomy_version: self.lexical.taxonomy().version().map(str::to_string),
            analyzed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{Embedder, Embedding};
    use crate::taxonomy::Taxonomy;
    use crate::types::MatcherConfig;
    use anyhow::{anyhow, Result};
    use std::sync::Arc;

    /// Embeds every text to the same vector; fails on a marker word
    struct ConstantEmbedder;

    impl Embedder for ConstantEmbedder {
        fn embed(&self, text: &str) -> Result<Embedding> {
            if text.contains("FAIL") {
                return Err(anyhow!("inference failed"));
            }
            Ok(vec![1.0, 1.0])
        }

        fn model_name(&self) -> &str {
            "constant"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn course(title: Option<&str>, subtitle: Option<&str>, content: Option<&str>) -> CourseRecord {
        CourseRecord {
            title: title.map(String::from),
            subtitle: subtitle.map(String::from),
            objectives_and_content: content.map(String::from),
            metadata: Map::new(),
        }
    }

    fn taxonomy() -> Arc<Taxonomy> {
        Arc::new(Taxonomy::sdg().unwrap())
    }

    fn semantic() -> SemanticMatcher {
        SemanticMatcher::new(taxonomy(), Arc::new(ConstantEmbedder), MatcherConfig::default())
            .unwrap()
    }

    #[test]
    fn test_course_text_field_order() {
        let c = course(Some("A"), Some("B"), Some("C"));
        assert_eq!(course_text(&c), "A B C");
    }

    #[test]
    fn test_course_text_missing_fields() {
        let c = course(Some("Titel"), None, Some("Inhalt"));
        assert_eq!(course_text(&c), "Titel  Inhalt");
        assert_eq!(course_text(&CourseRecord::default()), "  ");
    }

    #[test]
    fn test_metadata_preserved() {
        let json = r#"{
            "title": "Wasserwirtschaft",
            "url": "https://example.org/kurs/42",
            "ects": 5
        }"#;
        let record: CourseRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.metadata["url"], "https://example.org/kurs/42");

        let analyzer = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy()));
        let annotated = analyzer.analyze(&record).unwrap();
        assert_eq!(annotated.metadata["ects"], 5);
        assert_eq!(annotated.title.as_deref(), Some("Wasserwirtschaft"));
        assert!(annotated.semantic_matches.is_none());
    }

    #[test]
    fn test_empty_course_yields_empty_result() {
        let analyzer = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy()));
        let annotated = analyzer.analyze(&CourseRecord::default()).unwrap();
        assert_eq!(annotated.lexical_matches, Some(LexicalMatches::new()));
        assert!(annotated.has_no_relevance());
    }

    #[test]
    fn test_semantic_mode_requires_matcher() {
        let err = CourseAnalyzer::new(
            LexicalMatcher::new(taxonomy()),
            None,
            AnalysisMode::Both,
        )
        .unwrap_err();
        assert!(matches!(err, MatcherError::InvalidConfig(_)));
    }

    #[test]
    fn test_both_mode_runs_both() {
        let analyzer = CourseAnalyzer::with_semantic(
            LexicalMatcher::new(taxonomy()),
            semantic(),
            AnalysisMode::Both,
        );
        let annotated = analyzer
            .analyze(&course(Some("Klimaschutz"), None, None))
            .unwrap();

        assert!(annotated.lexical_matches.unwrap().contains_key(&GoalId(13)));
        // Constant vectors: every goal at similarity 1.0
        let semantic = annotated.semantic_matches.unwrap();
        assert_eq!(semantic.len(), 17);
    }

    #[test]
    fn test_batch_preserves_order_and_isolates_failures() {
        let analyzer = CourseAnalyzer::with_semantic(
            LexicalMatcher::new(taxonomy()),
            semantic(),
            AnalysisMode::Semantic,
        );
        let courses = vec![
            course(Some("Erster"), None, None),
            course(Some("FAIL"), None, None),
            course(Some("Dritter"), None, None),
        ];

        let results = analyzer.analyze_batch(&courses);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().title.as_deref(), Some("Erster"));
        assert!(matches!(results[1], Err(MatcherError::Embedding(_))));
        assert_eq!(results[2].as_ref().unwrap().title.as_deref(), Some("Dritter"));
    }

    #[test]
    fn test_run_info() {
        let analyzer = CourseAnalyzer::with_semantic(
            LexicalMatcher::new(taxonomy()),
            semantic(),
            AnalysisMode::Both,
        )
        .with_threshold(Some(0.6))
        .unwrap();
        let info = analyzer.run_info();
        assert_eq!(info.model_name.as_deref(), Some("constant"));
        assert_eq!(info.thresholds.unwrap().base_threshold, 0.70);
        assert_eq!(info.threshold_override, Some(0.6));
        assert_eq!(info.goal_count, 17);
        assert_eq!(info.taxonomy_version.as_deref(), Some("1.0"));

        let lexical = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy())).run_info();
        assert!(lexical.model_name.is_none());
        assert!(lexical.thresholds.is_none());
    }

    #[test]
    fn test_semantic_similarities_projection() {
        let analyzer = CourseAnalyzer::with_semantic(
            LexicalMatcher::new(taxonomy()),
            semantic(),
            AnalysisMode::Both,
        );
        let annotated = analyzer
            .analyze(&course(Some("Klimaschutz"), None, None))
            .unwrap();

        let scores = annotated.semantic_similarities().unwrap();
        assert_eq!(scores.len(), 17);
        assert!((scores[&GoalId(13)] - 1.0).abs() < 1e-6);

        let json = serde_json::to_value(&scores).unwrap();
        assert!(json["SDG 13"].is_number());

        let lexical = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy()));
        let annotated = lexical
            .analyze(&course(Some("Klimaschutz"), None, None))
            .unwrap();
        assert!(annotated.semantic_similarities().is_none());
    }

    #[test]
    fn test_threshold_override_validated() {
        let analyzer = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy()));
        let err = analyzer.with_threshold(Some(2.0)).unwrap_err();
        assert!(matches!(err, MatcherError::InvalidThreshold(_)));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Both".parse::<AnalysisMode>().unwrap(), AnalysisMode::Both);
        assert!("fuzzy".parse::<AnalysisMode>().is_err());
    }

    #[test]
    fn test_annotated_course_json_shape() {
        let analyzer = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy()));
        let annotated = analyzer
            .analyze(&course(Some("Armut und Hunger"), None, None))
            .unwrap();
        let json = serde_json::to_value(&annotated).unwrap();
        assert_eq!(json["lexical_matches"]["SDG 1"][0], "armut");
        assert!(json.get("semantic_matches").is_none());
    }
}
