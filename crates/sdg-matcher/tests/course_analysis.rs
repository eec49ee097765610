//! End-to-end course classification tests.
//!
//! Runs the full pipeline (taxonomy → matchers → analyzer) with a
//! deterministic bag-of-words embedder, so no model download is needed.
//!
//! Run with: cargo test --test course_analysis

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use sdg_matcher::{
    normalize, tokenize, AnalysisMode, CachedEmbedder, CourseAnalyzer, CourseRecord, Embedder,
    Embedding, GoalId, LexicalMatcher, MatchConfidence, MatcherConfig, SemanticMatcher, Taxonomy,
};

// =============================================================================
// STUB EMBEDDER
// =============================================================================

const DIM: usize = 512;

/// Hashed bag of normalized tokens, counting calls
struct BagOfWordsEmbedder {
    calls: AtomicUsize,
}

impl BagOfWordsEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for BagOfWordsEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut v = vec![0.0; DIM];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            v[(hasher.finish() % DIM as u64) as usize] += 1.0;
        }
        Ok(v)
    }

    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

fn taxonomy() -> Arc<Taxonomy> {
    Arc::new(Taxonomy::sdg().expect("bundled taxonomy"))
}

fn klimawandel_course() -> CourseRecord {
    CourseRecord {
        title: Some("Klimawandel und Energiepolitik".to_string()),
        subtitle: None,
        objectives_and_content: Some("Diskussion erneuerbare Energien und Klimaschutz".to_string()),
        ..Default::default()
    }
}

fn keywords(words: &[&str]) -> BTreeSet<String> {
    words.iter().map(|w| w.to_string()).collect()
}

// =============================================================================
// LEXICAL PATH
// =============================================================================

#[test]
fn test_klimawandel_course_lexical() {
    let analyzer = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy()));
    let annotated = analyzer.analyze(&klimawandel_course()).unwrap();
    let matches = annotated.lexical_matches.unwrap();

    assert_eq!(
        matches[&GoalId(13)],
        keywords(&["klimaschutz", "klimawandel"])
    );
    assert_eq!(matches[&GoalId(7)], keywords(&["erneuerbare"]));
    assert!(!matches.contains_key(&GoalId(1)));
}

#[test]
fn test_keyword_not_matched_inside_longer_token() {
    // "arten" is a goal 15 keyword; "Gartenbau" contains it only as an infix
    let matcher = LexicalMatcher::new(taxonomy());
    let matches = matcher.find_matches("Gartenbau im Hochschulgarten");
    assert!(!matches.contains_key(&GoalId(15)));
}

#[test]
fn test_phrase_keyword_needs_contiguous_text() {
    let matcher = LexicalMatcher::new(taxonomy());

    let scattered = matcher.find_matches("women are underrepresented in rights discussions");
    assert!(scattered
        .get(&GoalId(5))
        .map_or(true, |found| !found.contains("women's rights")));

    let contiguous = matcher.find_matches("History of women's rights movements");
    assert!(contiguous[&GoalId(5)].contains("women's rights"));
}

#[test]
fn test_normalization_makes_matching_case_and_umlaut_insensitive() {
    assert_eq!(normalize("Wasserqualität"), normalize("WASSERQUALITÄT"));
    assert_eq!(normalize("Wasserqualität"), normalize("wasserqualitaet"));

    let matcher = LexicalMatcher::new(taxonomy());
    for text in ["Wasserqualität", "WASSERQUALITÄT", "wasserqualitaet"] {
        let matches = matcher.find_matches(text);
        assert!(matches[&GoalId(6)].contains("wasserqualität"), "{}", text);
    }
}

#[test]
fn test_course_without_relevance() {
    let analyzer = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy()));
    let course = CourseRecord {
        title: Some("Einführung in die Logik".to_string()),
        ..Default::default()
    };
    let annotated = analyzer.analyze(&course).unwrap();
    assert!(annotated.has_no_relevance());
    assert_eq!(annotated.title.as_deref(), Some("Einführung in die Logik"));
}

// =============================================================================
// SEMANTIC PATH
// =============================================================================

#[test]
fn test_reference_description_scores_highest() {
    let taxonomy = taxonomy();
    let matcher = SemanticMatcher::new(
        taxonomy.clone(),
        BagOfWordsEmbedder::new(),
        MatcherConfig::default(),
    )
    .unwrap();

    for entry in taxonomy.entries() {
        let scores = matcher.similarities(&entry.description).unwrap();
        let own = scores[&entry.id];
        assert!(own >= 0.85, "{} scored {}", entry.id, own);
        for (goal, score) in &scores {
            assert!(*score <= own, "{} outscored {}", goal, entry.id);
        }

        let matches = matcher.analyze(&entry.description, None).unwrap();
        assert_eq!(matches[&entry.id].confidence, MatchConfidence::High);
    }
}

#[test]
fn test_short_text_threshold_scaling() {
    let matcher = SemanticMatcher::new(
        taxonomy(),
        BagOfWordsEmbedder::new(),
        MatcherConfig::default(),
    )
    .unwrap();

    let ten_words = "Wir untersuchen Energie und Klima in einem kurzen Seminar heute";
    let active = matcher.active_threshold(ten_words, None).unwrap();
    assert!((active - 0.14).abs() < 1e-6);
}

#[test]
fn test_blank_course_never_reaches_embedder() {
    let embedder = BagOfWordsEmbedder::new();
    let matcher =
        SemanticMatcher::new(taxonomy(), embedder.clone(), MatcherConfig::default()).unwrap();
    let after_build = embedder.calls();

    let analyzer = CourseAnalyzer::with_semantic(
        LexicalMatcher::new(taxonomy()),
        matcher,
        AnalysisMode::Both,
    );
    let annotated = analyzer.analyze(&CourseRecord::default()).unwrap();

    assert_eq!(annotated.lexical_matches.map(|m| m.len()), Some(0));
    assert_eq!(annotated.semantic_matches.map(|m| m.len()), Some(0));
    assert_eq!(embedder.calls(), after_build);
}

#[test]
fn test_cached_embedder_reuses_course_vectors() {
    let inner = BagOfWordsEmbedder::new();
    let cached = Arc::new(CachedEmbedder::new(inner.clone()));
    let matcher = SemanticMatcher::new(taxonomy(), cached, MatcherConfig::default()).unwrap();
    let after_build = inner.calls();

    let analyzer = CourseAnalyzer::with_semantic(
        LexicalMatcher::new(taxonomy()),
        matcher,
        AnalysisMode::Semantic,
    );
    let courses = vec![klimawandel_course(), klimawandel_course()];
    for result in analyzer.analyze_batch(&courses) {
        result.unwrap();
    }

    // Races between the two workers may embed twice, never more
    assert!(inner.calls() - after_build <= 2);
    assert!(inner.calls() > after_build);
}

// =============================================================================
// BATCH & OUTPUT
// =============================================================================

#[test]
fn test_batch_results_follow_input_order() {
    let analyzer = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy()));
    let titles = ["Armut", "Logik", "Meeresbiologie", "Klimaschutz", "Wasser"];
    let courses: Vec<CourseRecord> = titles
        .iter()
        .map(|t| CourseRecord {
            title: Some(t.to_string()),
            ..Default::default()
        })
        .collect();

    let results = analyzer.analyze_batch(&courses);
    let got: Vec<String> = results
        .into_iter()
        .map(|r| r.unwrap().title.unwrap())
        .collect();
    assert_eq!(got, titles);
}

#[test]
fn test_crawler_json_round_trip_keeps_metadata() {
    let json = r#"{
        "title": "Klimawandel und Energiepolitik",
        "objectives_and_content": "Diskussion erneuerbare Energien und Klimaschutz",
        "url": "https://example.org/kurs/7",
        "type": "Seminar"
    }"#;
    let record: CourseRecord = serde_json::from_str(json).unwrap();

    let analyzer = CourseAnalyzer::lexical_only(LexicalMatcher::new(taxonomy()));
    let annotated = analyzer.analyze(&record).unwrap();
    let out = serde_json::to_value(&annotated).unwrap();

    assert_eq!(out["url"], "https://example.org/kurs/7");
    assert_eq!(out["type"], "Seminar");
    assert!(out["lexical_matches"]["SDG 13"].is_array());
    assert!(out.get("objectives_and_content").is_none());
}
