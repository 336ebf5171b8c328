//! Sentence embedders and the async [`EmbeddingClient`] used by ingestion
//! and retrieval.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use candle_core::{Device, Tensor, DType};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{XLMRobertaModel, Config as XLMRobertaConfig};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use medrag_core::config::{expand_path, EmbedderKind, RagSettings};
use medrag_core::traits::Embedder;

pub mod client;
pub mod device;
pub mod pool;
pub mod tokenize;

pub use client::EmbeddingClient;

/// Token window fed to the encoder; longer chunks are truncated.
pub const DEFAULT_MAX_LEN: usize = 256;

/// XLM-RoBERTa sentence encoder (BGE-M3 weights) with masked mean pooling.
pub struct CandleEmbedder { model: XLMRobertaModel, tokenizer: Tokenizer, device: Device, dim: usize, max_len: usize, model_id: String }

impl CandleEmbedder {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = device::select_device();
        info!(dir = %model_dir.display(), "loading embedding model");
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let weights: HashMap<String, Tensor> = {
            let safetensors = model_dir.join("model.safetensors");
            if safetensors.exists() {
                candle_core::safetensors::load(&safetensors, &device)?
            } else {
                candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?.into_iter().collect()
            }
        };
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        let model_id = model_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "xlm-roberta".into());
        info!(model = %model_id, dim = config.hidden_size, "embedding model loaded");
        Ok(Self { model, tokenizer, device, dim: config.hidden_size, max_len: DEFAULT_MAX_LEN, model_id })
    }
}

impl Embedder for CandleEmbedder {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize::tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = Tensor::zeros((texts.len(), self.max_len), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = pool::masked_mean(&hidden, &attention_mask, true)?;
        let rows: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_vec2()?;
        debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "embedded batch");
        Ok(rows)
    }
}

/// Deterministic bag-of-words hashing embedder. No model files; used in
/// tests and when `APP_USE_FAKE_EMBEDDINGS` is set.
#[derive(Debug, Clone)]
pub struct HashEmbedder { dim: usize, model_id: String }

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim, model_id: format!("hash:d{}", dim) } }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher}; use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if token.is_empty() { continue; }
            let mut hasher = XxHash64::with_seed(0); token.hash(&mut hasher); let h = hasher.finish();
            let idx = (h as usize) % self.dim; let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += val + (i as f32 % 3.0) * 0.01;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6); for x in &mut v { *x /= norm; } v
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { Ok(texts.iter().map(|t| self.embed_one(t)).collect()) }
}

fn use_fake_embeddings() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// Build the embedder selected by `settings.embedder`.
pub fn embedder_from_settings(settings: &RagSettings) -> Result<Arc<dyn Embedder>> {
    if use_fake_embeddings() || settings.embedder == EmbedderKind::Hash {
        info!(dim = settings.embedding_dim, "using hashing embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.embedding_dim)));
    }
    let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
    Ok(Arc::new(CandleEmbedder::load(&model_dir)?))
}

/// Model directory lookup: explicit setting, `APP_MODEL_DIR`, `MODEL_DIR`,
/// then the conventional `models/bge-m3` locations.
pub fn resolve_model_dir(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(dir) = explicit { let p = expand_path(dir); if p.exists() { return Ok(p); } warn!(dir = %p.display(), "configured model_dir does not exist"); }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) { let p = PathBuf::from(&dir); if p.exists() { debug!(var, dir = %p.display(), "model dir from env"); return Ok(p); } }
    }
    for candidate in ["../models/bge-m3", "models/bge-m3"] { let p = Path::new(candidate); if p.exists() { return Ok(p.to_path_buf()); } }
    Err(anyhow!("Could not locate BGE-M3 model directory"))
}
