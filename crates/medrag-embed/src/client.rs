//! Async front for a synchronous [`Embedder`].
//!
//! Model construction and forward passes are CPU/GPU bound, so both run on
//! the blocking pool. The model is built at most once per client.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use medrag_core::config::RagSettings;
use medrag_core::error::{Error, Result};
use medrag_core::traits::Embedder;

type Loader = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Embedder>> + Send + Sync>;

pub struct EmbeddingClient {
    loader: Loader,
    embedder: OnceCell<Arc<dyn Embedder>>,
}

impl EmbeddingClient {
    /// Client around an already constructed embedder; `load` is a no-op.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let for_loader = embedder.clone();
        Self { loader: Arc::new(move || Ok(for_loader.clone())), embedder: OnceCell::new_with(Some(embedder)) }
    }

    /// Client that builds its embedder on first `load` (or first use).
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Embedder>> + Send + Sync + 'static,
    {
        Self { loader: Arc::new(loader), embedder: OnceCell::new() }
    }

    pub fn from_settings(settings: &RagSettings) -> Self {
        let settings = settings.clone();
        Self::lazy(move || crate::embedder_from_settings(&settings))
    }

    /// Idempotent one-time initialization. Concurrent callers share the same
    /// in-flight load; a failed load leaves the client unloaded so a later
    /// call can retry.
    pub async fn load(&self) -> Result<Arc<dyn Embedder>> {
        let embedder = self
            .embedder
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                let embedder = tokio::task::spawn_blocking(move || (*loader)())
                    .await
                    .map_err(Error::embedding)?
                    .map_err(Error::embedding)?;
                info!(model = embedder.model_id(), dim = embedder.dim(), "embedder ready");
                Ok::<_, Error>(embedder)
            })
            .await?;
        Ok(embedder.clone())
    }

    pub fn is_loaded(&self) -> bool { self.embedder.initialized() }

    pub async fn dimension(&self) -> Result<usize> { Ok(self.load().await?.dim()) }

    pub async fn model_id(&self) -> Result<String> { Ok(self.load().await?.model_id().to_string()) }

    /// One vector per text, in input order. Any failure fails the whole batch.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embedder = self.load().await?;
        if texts.is_empty() { return Ok(Vec::new()); }
        let dim = embedder.dim();
        let owned = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&owned))
            .await
            .map_err(Error::embedding)?
            .map_err(Error::embedding)?;
        if vectors.len() != texts.len() {
            return Err(Error::Embedding(format!("expected {} vectors, got {}", texts.len(), vectors.len())));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, actual: bad.len() });
        }
        Ok(vectors)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| Error::Embedding("empty embedding result".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn load_runs_loader_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let client = EmbeddingClient::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(HashEmbedder::new(16)) as Arc<dyn Embedder>)
        });
        assert!(!client.is_loaded());
        client.load().await.unwrap();
        client.load().await.unwrap();
        client.embed_batch(&["a".to_string()]).await.unwrap();
        assert!(client.is_loaded());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_can_retry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let client = EmbeddingClient::lazy(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 { anyhow::bail!("model still warming up"); }
            Ok(Arc::new(HashEmbedder::new(8)) as Arc<dyn Embedder>)
        });
        let err = client.load().await.err().unwrap();
        assert!(err.is_transient());
        assert_eq!(client.dimension().await.unwrap(), 8);
    }

    struct ShortEmbedder;
    impl Embedder for ShortEmbedder {
        fn model_id(&self) -> &str { "short" }
        fn dim(&self) -> usize { 4 }
        fn max_len(&self) -> usize { 16 }
        fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().enumerate().map(|(i, _)| vec![1.0; if i == 1 { 3 } else { 4 }]).collect())
        }
    }

    #[tokio::test]
    async fn batch_fails_as_a_unit() {
        let client = EmbeddingClient::new(Arc::new(ShortEmbedder));
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let err = client.embed_batch(&texts).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 3 }));
        assert!(client.embed_batch(&texts[..1]).await.is_ok());
    }
}
