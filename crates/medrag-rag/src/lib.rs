//! Retrieval-augmented context for the medical education assistant:
//! ingestion, retrieval, population and the chat bridge.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use medrag_core::config::RagSettings;
use medrag_core::error::{Error, Result};
use medrag_core::traits::VectorStore;
use medrag_embed::EmbeddingClient;
use medrag_vector::store_from_settings;

pub mod chat;
pub mod context;
pub mod ingest;
pub mod lookup;
pub mod population;
pub mod retrieval;

pub use chat::{ChatMessage, ChatRequest, Generator, RagChat, RagChatResponse, RagOptions};
pub use context::{Citation, RagContextStats, RetrievedChunk, RetrievedContext};
pub use ingest::{IngestOptions, IngestReport, IngestionPipeline};
pub use lookup::Lookup;
pub use population::{BaselineCorpus, DirectoryCorpus, InMemoryCorpus, PopulationCache, PopulationState};
pub use retrieval::{RetrievalEngine, RetrievalOptions};

/// Everything wired from one `[rag]` settings block. The store handle is
/// owned here for the runtime's lifetime.
pub struct RagRuntime {
    pub settings: RagSettings,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<EmbeddingClient>,
    pub pipeline: Arc<IngestionPipeline>,
    pub engine: Arc<RetrievalEngine>,
    pub cache: PopulationCache,
}

impl RagRuntime {
    /// Relative `store_dir` and `corpus_dir` resolve against `base`.
    pub fn from_settings(settings: RagSettings, base: &Path) -> Result<Self> {
        settings.validate()?;
        let store = store_from_settings(&settings, base);
        let embedder = Arc::new(EmbeddingClient::from_settings(&settings));
        let pipeline = Arc::new(IngestionPipeline::new(embedder.clone(), store.clone()));
        let engine = Arc::new(RetrievalEngine::from_settings(embedder.clone(), store.clone(), &settings)?);
        let corpus = Arc::new(DirectoryCorpus::new(settings.corpus_path(base)));
        let cache = PopulationCache::new(pipeline.clone(), corpus, settings.collection_names()?, IngestOptions::from_settings(&settings));
        Ok(Self { settings, store, embedder, pipeline, engine, cache })
    }

    pub async fn connect(&self) -> Result<()> {
        self.store.connect().await
    }

    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    /// Connect, run `work`, then close whether or not connecting or the work
    /// succeeded. `work` is not polled when the connect fails.
    pub async fn scoped<T, E>(&self, work: impl Future<Output = std::result::Result<T, E>>) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        let result = match self.connect().await {
            Ok(()) => work.await,
            Err(e) => Err(e.into()),
        };
        let closed = self.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }
}
