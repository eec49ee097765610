//! Classify crawled courses against the SDG taxonomy
//!
//! Reads a course JSON file (a bare array, or an object with a `courses`
//! array as written by the crawler) and prints annotated courses plus run
//! metadata as JSON on stdout. Logs go to stderr.
//!
//! Usage:
//!   cargo run --release --bin classify_courses -- --input courses.json
//!
//! Examples:
//!   # Keyword matching only (no model download)
//!   cargo run --release --bin classify_courses -- -i courses.json
//!
//!   # Both strategies with a stricter threshold
//!   cargo run --release --bin classify_courses -- \
//!     -i courses.json --mode both --threshold 0.75
//!
//!   # Semantic scores without confidence tiers
//!   cargo run --release --bin classify_courses -- \
//!     -i courses.json --mode semantic --scores-only
//!
//!   # Custom thresholds and a different model
//!   SDG_MATCHER_MODEL=bert-base-german-cased \
//!   cargo run --release --bin classify_courses -- -i courses.json \
//!     --mode semantic --config config/matcher.yaml

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sdg_matcher::{
    AnalysisMode, AnnotatedCourse, BertEmbedder, CachedEmbedder, CourseAnalyzer, CourseRecord,
    LexicalMatcher, MatcherConfig, RunInfo, SemanticMatcher, Taxonomy,
};

/// SDG relevance classifier for course descriptions
#[derive(Parser, Debug)]
#[command(name = "classify_courses")]
#[command(about = "Classify course descriptions against the UN Sustainable Development Goals")]
struct Args {
    /// Course JSON file
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Strategies to run: lexical, semantic or both
    #[arg(long, short = 'm', default_value = "lexical")]
    mode: AnalysisMode,

    /// Override the semantic base threshold (within [-1, 1])
    #[arg(long, short = 't', allow_negative_numbers = true)]
    threshold: Option<f32>,

    /// Matcher configuration YAML
    #[arg(long, short = 'c', env = "SDG_MATCHER_CONFIG")]
    config: Option<PathBuf>,

    /// Taxonomy YAML (default: bundled SDG taxonomy)
    #[arg(long)]
    taxonomy: Option<PathBuf>,

    /// HuggingFace model repository, overrides the configured model
    #[arg(long, env = "SDG_MATCHER_MODEL")]
    model: Option<String>,

    /// Worker threads for batch analysis (default: one per core)
    #[arg(long)]
    threads: Option<usize>,

    /// Report semantic findings as `goal -> similarity` without confidence tiers
    #[arg(long)]
    scores_only: bool,
}

/// Accepted input shapes
#[derive(Deserialize)]
#[serde(untagged)]
enum CourseFile {
    List(Vec<CourseRecord>),
    Batch { courses: Vec<CourseRecord> },
}

#[derive(Serialize)]
struct Report {
    run_info: RunInfo,
    total_courses: usize,
    courses: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<CourseFailure>,
}

#[derive(Serialize)]
struct CourseFailure {
    index: usize,
    title: Option<String>,
    error: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure worker pool")?;
    }

    let mut config = match &args.config {
        Some(path) => MatcherConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MatcherConfig::default(),
    };
    if let Some(model) = &args.model {
        config.model_name = model.clone();
    }

    let taxonomy = Arc::new(match &args.taxonomy {
        Some(path) => Taxonomy::load_from_file(path)
            .with_context(|| format!("Failed to load taxonomy {}", path.display()))?,
        None => Taxonomy::sdg().context("Bundled taxonomy is invalid")?,
    });
    info!("Loaded taxonomy with {} goals", taxonomy.len());

    let courses = read_courses(&args.input)?;
    info!("Read {} courses from {}", courses.len(), args.input.display());

    let semantic = if args.mode.runs_semantic() {
        info!("Loading embedding model (this may download ~1.3GB on first run)...");
        let bert = BertEmbedder::from_config(&config).context("Failed to load embedder")?;
        let embedder = Arc::new(CachedEmbedder::with_max_cache(
            Arc::new(bert),
            config.embedding_cache_size,
        ));
        Some(
            SemanticMatcher::new(taxonomy.clone(), embedder, config)
                .context("Failed to build reference embeddings")?,
        )
    } else {
        if args.threshold.is_some() {
            warn!("--threshold has no effect in lexical mode");
        }
        None
    };

    let analyzer = CourseAnalyzer::new(LexicalMatcher::new(taxonomy), semantic, args.mode)?
        .with_threshold(args.threshold)?;

    let mut annotated = Vec::with_capacity(courses.len());
    let mut errors = Vec::new();
    for (index, result) in analyzer.analyze_batch(&courses).into_iter().enumerate() {
        match result {
            Ok(course) => annotated.push(course),
            Err(e) => errors.push(CourseFailure {
                index,
                title: courses[index].title.clone(),
                error: e.to_string(),
            }),
        }
    }

    let without_relevance = annotated.iter().filter(|c| c.has_no_relevance()).count();
    info!(
        "Classified {} courses, {} without detected relevance, {} failed",
        annotated.len(),
        without_relevance,
        errors.len()
    );

    let report = Report {
        run_info: analyzer.run_info(),
        total_courses: courses.len(),
        courses: annotated
            .iter()
            .map(|course| course_json(course, args.scores_only))
            .collect::<Result<_>>()?,
        errors,
    };

    let stdout = std::io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), &report).context("Failed to write report")?;
    println!();

    Ok(())
}

/// Serialize one course, optionally with semantic findings as scores only
fn course_json(course: &AnnotatedCourse, scores_only: bool) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(course).context("Failed to serialize course")?;

    if scores_only {
        if let (Some(scores), Some(fields)) = (course.semantic_similarities(), value.as_object_mut()) {
            fields.insert("semantic_matches".to_string(), serde_json::to_value(scores)?);
        }
    }

    Ok(value)
}

fn read_courses(path: &Path) -> Result<Vec<CourseRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: CourseFile = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a course list", path.display()))?;

    Ok(match file {
        CourseFile::List(courses) => courses,
        CourseFile::Batch { courses } => courses,
    })
}
