//! Text embedding using Candle and a pretrained BERT model
//!
//! The default model is `deepset/gbert-large`, a German BERT. Course
//! descriptions are mostly German, so a German vocabulary matters more than
//! a retrieval-tuned English model here.
//!
//! Key properties:
//! - CLS token pooling (position 0 of the last hidden state)
//! - Input whitespace collapsed before tokenization
//! - Truncation at `max_tokens` (512 by default). Longer input is silently
//!   cut; this is lossy but not an error
//! - Deterministic for a fixed model and text (no dropout at inference)
//!
//! [`Embedder`] is the seam used by the semantic matcher, so tests can
//! substitute a deterministic stub for the real model.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info, warn};

use crate::types::{MatcherConfig, DEFAULT_MODEL};

/// Embedding vector
pub type Embedding = Vec<f32>;

/// Shared embedder handle
pub type SharedEmbedder = Arc<dyn Embedder>;

/// Default tokenizer truncation length (BERT position embeddings)
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Texts per forward pass; gbert-large at 512 tokens is memory hungry
const BATCH_SIZE: usize = 16;

/// Maps text to a fixed-length vector
pub trait Embedder: Send + Sync {
    /// Generate embedding for text
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Batch embed multiple texts, preserving order
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Model identifier, reported with results
    fn model_name(&self) -> &str;

    /// Embedding dimension
    fn dimension(&self) -> usize;
}

/// Collapse runs of whitespace to single spaces and trim the ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// L2 norm of a vector
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity, i.e. `1 - cosine_distance`
///
/// Returns 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// Sentence embedder backed by a Candle `BertModel`
///
/// Model files are fetched from the HuggingFace Hub and cached in
/// `~/.cache/huggingface`. Loading happens once, in the constructor.
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_name: String,
    dimension: usize,
}

impl BertEmbedder {
    /// Load the default model
    pub fn new() -> Result<Self> {
        Self::with_model(DEFAULT_MODEL, DEFAULT_MAX_TOKENS)
    }

    /// Load the model named in the matcher configuration
    pub fn from_config(config: &MatcherConfig) -> Result<Self> {
        Self::with_model(&config.model_name, config.max_tokens)
    }

    /// Load a specific model repository
    pub fn with_model(model_name: &str, max_tokens: usize) -> Result<Self> {
        info!("Loading embedding model: {}", model_name);

        let device = Device::Cpu;

        let api = Api::new().context("Failed to create HuggingFace API client")?;
        let repo = api.repo(Repo::new(model_name.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .context("Failed to download config.json")?;
        let config: Config = serde_json::from_str(
            &std::fs::read_to_string(&config_path).context("Failed to read config.json")?,
        )
        .context("Failed to parse config.json")?;

        debug!("Model config: hidden_size={}", config.hidden_size);

        let mut tokenizer = load_tokenizer(&repo)?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_tokens,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
        tokenizer.with_padding(None);

        let vb = load_weights(&repo, &device)?;
        let model = BertModel::load(vb, &config).context("Failed to build BERT model")?;

        info!("Embedding model loaded successfully ({})", model_name);

        Ok(Self {
            model,
            tokenizer,
            device,
            model_name: model_name.to_string(),
            dimension: config.hidden_size,
        })
    }

    /// Batch forward pass with CLS extraction
    fn forward_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut all_input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut all_attention_mask = Vec::with_capacity(texts.len() * max_len);
        let mut all_token_type_ids = Vec::with_capacity(texts.len() * max_len);

        for encoding in &encodings {
            let mut ids = encoding.get_ids().to_vec();
            let mut attention = encoding.get_attention_mask().to_vec();
            let mut type_ids = encoding.get_type_ids().to_vec();

            ids.resize(max_len, 0);
            attention.resize(max_len, 0);
            type_ids.resize(max_len, 0);

            all_input_ids.extend(ids);
            all_attention_mask.extend(attention);
            all_token_type_ids.extend(type_ids);
        }

        let batch_size = texts.len();

        let input_ids = Tensor::from_vec(all_input_ids, (batch_size, max_len), &self.device)?
            .to_dtype(DType::U32)?;
        let attention_mask =
            Tensor::from_vec(all_attention_mask, (batch_size, max_len), &self.device)?;
        let token_type_ids =
            Tensor::from_vec(all_token_type_ids, (batch_size, max_len), &self.device)?
                .to_dtype(DType::U32)?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // output shape: (batch_size, seq_len, hidden_size); take [:, 0, :]
        let cls_embeddings = output.narrow(1, 0, 1)?.squeeze(1)?;
        let normalized = Self::l2_normalize(&cls_embeddings)?;

        Ok(normalized.to_vec2::<f32>()?)
    }

    fn l2_normalize(tensor: &Tensor) -> Result<Tensor> {
        let norm = tensor
            .sqr()?
            .sum_keepdim(1)?
            .sqrt()?
            .clamp(1e-12, f64::MAX)?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

impl Embedder for BertEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        self.forward_batch(&[collapse_whitespace(text)])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Model returned no embedding"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let collapsed: Vec<String> = chunk.iter().map(|t| collapse_whitespace(t)).collect();
            embeddings.extend(self.forward_batch(&collapsed)?);
        }
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Load `tokenizer.json`, or build a WordPiece tokenizer from `vocab.txt`
///
/// Older BERT repositories (gbert included) only publish the vocabulary.
fn load_tokenizer(repo: &ApiRepo) -> Result<Tokenizer> {
    if let Ok(path) = repo.get("tokenizer.json") {
        debug!("Using tokenizer.json");
        return Tokenizer::from_file(&path).map_err(|e| anyhow!("Failed to load tokenizer: {}", e));
    }

    warn!("tokenizer.json not published, building WordPiece tokenizer from vocab.txt");

    let vocab_path = repo
        .get("vocab.txt")
        .context("Failed to download vocab.txt")?;
    let vocab_text = std::fs::read_to_string(&vocab_path).context("Failed to read vocab.txt")?;

    let lowercase = repo
        .get("tokenizer_config.json")
        .ok()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| serde_json::from_str::<TokenizerConfig>(&content).ok())
        .and_then(|c| c.do_lower_case)
        .unwrap_or(true);

    let tokenizer_json = wordpiece_tokenizer_json(&vocab_text, lowercase)?;
    Tokenizer::from_bytes(tokenizer_json.to_string().as_bytes())
        .map_err(|e| anyhow!("Failed to build tokenizer from vocab.txt: {}", e))
}

#[derive(Debug, Deserialize)]
struct TokenizerConfig {
    do_lower_case: Option<bool>,
}

/// Serialized form of a standard BERT WordPiece tokenizer
fn wordpiece_tokenizer_json(vocab_text: &str, lowercase: bool) -> Result<serde_json::Value> {
    let vocab: HashMap<&str, u32> = vocab_text
        .lines()
        .enumerate()
        .filter(|(_, token)| !token.is_empty())
        .map(|(idx, token)| (token, idx as u32))
        .collect();

    let special = |token: &str| {
        vocab
            .get(token)
            .copied()
            .ok_or_else(|| anyhow!("vocab.txt is missing {}", token))
    };
    let cls_id = special("[CLS]")?;
    let sep_id = special("[SEP]")?;
    special("[UNK]")?;

    Ok(serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": {
            "type": "BertNormalizer",
            "clean_text": true,
            "handle_chinese_chars": true,
            "strip_accents": null,
            "lowercase": lowercase
        },
        "pre_tokenizer": { "type": "BertPreTokenizer" },
        "post_processor": {
            "type": "BertProcessing",
            "sep": ["[SEP]", sep_id],
            "cls": ["[CLS]", cls_id]
        },
        "decoder": { "type": "WordPiece", "prefix": "##", "cleanup": true },
        "model": {
            "type": "WordPiece",
            "unk_token": "[UNK]",
            "continuing_subword_prefix": "##",
            "max_input_chars_per_word": 100,
            "vocab": vocab
        }
    }))
}

/// Prefer safetensors; fall back to PyTorch weights
fn load_weights(repo: &ApiRepo, device: &Device) -> Result<VarBuilder<'static>> {
    match repo.get("model.safetensors") {
        Ok(weights_path) => {
            debug!("Loading safetensors weights");
            // SAFETY: the file is a read-only HuggingFace cache entry
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, device)
                    .context("Failed to load model weights")
            }
        }
        Err(e) => {
            warn!("model.safetensors unavailable ({}), trying pytorch_model.bin", e);
            let weights_path = repo
                .get("pytorch_model.bin")
                .context("Failed to download model weights")?;
            VarBuilder::from_pth(&weights_path, DTYPE, device)
                .context("Failed to load PyTorch model weights")
        }
    }
}

/// Memoizing wrapper around any embedder
///
/// Keys are whitespace-collapsed text, so formatting variants share an entry.
/// Once `max_cache_size` entries are stored, new texts are embedded but not
/// cached.
pub struct CachedEmbedder {
    inner: SharedEmbedder,
    cache: RwLock<HashMap<String, Embedding>>,
    max_cache_size: usize,
}

impl CachedEmbedder {
    pub fn new(inner: SharedEmbedder) -> Self {
        Self::with_max_cache(inner, 10_000)
    }

    pub fn with_max_cache(inner: SharedEmbedder, max_size: usize) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            max_cache_size: max_size,
        }
    }

    /// Number of cached embeddings
    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, key: String, embedding: &Embedding) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.len() < self.max_cache_size {
            cache.insert(key, embedding.clone());
        }
    }
}

impl Embedder for CachedEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let key = collapse_whitespace(text);

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(emb) = cache.get(&key) {
                return Ok(emb.clone());
            }
        }

        let embedding = self.inner.embed(&key)?;
        self.store(key, &embedding);
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let keys: Vec<String> = texts.iter().map(|t| collapse_whitespace(t)).collect();
        let mut results: Vec<Option<Embedding>> = vec![None; keys.len()];
        let mut uncached_indices = Vec::new();

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            for (i, key) in keys.iter().enumerate() {
                match cache.get(key) {
                    Some(emb) => results[i] = Some(emb.clone()),
                    None => uncached_indices.push(i),
                }
            }
        }

        if !uncached_indices.is_empty() {
            let uncached: Vec<&str> = uncached_indices.iter().map(|&i| keys[i].as_str()).collect();
            let fresh = self.inner.embed_batch(&uncached)?;
            if fresh.len() != uncached.len() {
                return Err(anyhow!(
                    "Embedder returned {} vectors for {} texts",
                    fresh.len(),
                    uncached.len()
                ));
            }

            for (idx, embedding) in uncached_indices.into_iter().zip(fresh) {
                self.store(keys[idx].clone(), &embedding);
                results[idx] = Some(embedding);
            }
        }

        results
            .into_iter()
            .enumerate()
            .map(|(i, opt)| opt.ok_or_else(|| anyhow!("Missing embedding for index {}", i)))
            .collect()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
