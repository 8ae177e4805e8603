//! Embedding collaborators.
//!
//! `SentenceEmbedder` runs a BERT-family sentence-transformer (the
//! all-MiniLM-L6-v2 layout) locally with candle. `HashEmbedder` is a
//! deterministic stand-in used by tests and by `APP_USE_FAKE_EMBEDDINGS=1`.
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use twox_hash::XxHash64;

use studydb_core::config::{expand_path, EmbeddingSettings};
use studydb_core::traits::Embedder;

pub mod device;
pub mod pool;
pub mod tokenize;

pub use device::select_device;
pub use pool::masked_mean_l2;
pub use tokenize::tokenize_batch;

pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";

pub struct SentenceEmbedder {
    id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    pad_id: u32,
}

impl SentenceEmbedder {
    /// Load `config.json`, `tokenizer.json` and `model.safetensors`
    /// (or `pytorch_model.bin`) from `model_dir`.
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = select_device();
        tracing::info!(dir = %model_dir.display(), "loading sentence embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let pad_id = tokenizer.get_padding().map_or(0, |p| p.pad_id);

        let config_path = model_dir.join("config.json");
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let dim = raw
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| anyhow!("{} has no hidden_size", config_path.display()))? as usize;
        let config: BertConfig = serde_json::from_value(raw)?;

        let safetensors = model_dir.join("model.safetensors");
        let vb = if safetensors.exists() {
            // SAFETY: the weights file is not modified while the model is alive.
            unsafe { VarBuilder::from_mmaped_safetensors(&[safetensors], DType::F32, &device)? }
        } else {
            let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
            let weights_map: HashMap<String, Tensor> = weights.into_iter().collect();
            VarBuilder::from_tensors(weights_map, DType::F32, &device)
        };
        let model = BertModel::load(vb, &config)?;

        let name = model_dir.file_name().map_or_else(|| DEFAULT_MODEL_NAME.to_string(), |n| n.to_string_lossy().to_string());
        tracing::info!(model = %name, dim, "sentence embedding model loaded");
        Ok(Self { id: format!("sentence:{name}"), model, tokenizer, device, dim, max_len, pad_id })
    }
}

impl Embedder for SentenceEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, self.pad_id, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        Ok(vectors)
    }
}

/// Token-hash embedding: each whitespace token bumps one bucket chosen by
/// its xxhash. Deterministic, L2-normalised, and sharing tokens means being close.
pub struct HashEmbedder {
    id: String,
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { id: format!("hash:{dim}"), dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Pick the embedder for this process: the hashing stand-in when requested
/// by settings or `APP_USE_FAKE_EMBEDDINGS`, otherwise the local model.
pub fn default_embedder(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>> {
    let env_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if settings.use_fake || env_fake {
        tracing::info!(dim = settings.fake_dim, "using hash embedder");
        return Ok(Box::new(HashEmbedder::new(settings.fake_dim)));
    }
    let dir = resolve_model_dir(settings.model_dir.as_deref())?;
    Ok(Box::new(SentenceEmbedder::load(&dir, settings.max_len)?))
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = configured {
        candidates.push(expand_path(dir));
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            candidates.push(expand_path(dir));
        }
    }
    candidates.push(Path::new("models").join(DEFAULT_MODEL_NAME));
    candidates.push(Path::new("../models").join(DEFAULT_MODEL_NAME));
    candidates
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("Could not locate the {} model directory", DEFAULT_MODEL_NAME))
}
