//! Chunk → embed → store pipeline.
//!
//! Chunks are embedded and committed batch by batch, so a failed or
//! cancelled run keeps every batch committed before it. Re-running the same
//! ingestion upserts the same document ids.

use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use medrag_core::chunker::{chunk_text, estimate_tokens, ChunkingConfig};
use medrag_core::config::RagSettings;
use medrag_core::data_processor::DataProcessor;
use medrag_core::error::{Error, Result};
use medrag_core::progress::{IngestProgress, IngestStage};
use medrag_core::traits::VectorStore;
use medrag_core::types::{document_id, CollectionName, DocumentId, DocumentMetadata, SourceContent, SourceMetadata, VectorDocument};
use medrag_embed::EmbeddingClient;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Chunks per embedding call and per store commit.
    pub batch_size: usize,
    pub chunking: ChunkingConfig,
    pub progress: Option<UnboundedSender<IngestProgress>>,
    pub cancel: Option<CancellationToken>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self { batch_size: 32, chunking: ChunkingConfig::default(), progress: None, cancel: None }
    }
}

impl IngestOptions {
    pub fn from_settings(settings: &RagSettings) -> Self {
        Self { batch_size: settings.batch_size, chunking: settings.chunking(), ..Self::default() }
    }

    pub fn with_progress(mut self, tx: UnboundedSender<IngestProgress>) -> Self { self.progress = Some(tx); self }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self { self.cancel = Some(token); self }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        self.chunking.validate()
    }

    fn report(&self, stage: IngestStage, current: usize, total: usize, message: impl Into<String>) {
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(IngestProgress::new(stage, current, total, message));
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Distinct documents upserted.
    pub documents_ingested: usize,
    pub chunks_created: usize,
    pub estimated_tokens: usize,
    pub elapsed: Duration,
}

/// A chunk ready for embedding, with the index of the source it came from.
#[derive(Debug, Clone)]
pub struct PlannedChunk {
    pub id: DocumentId,
    pub text: String,
    pub source_index: usize,
}

/// Chunk every source and drop repeated ids (first occurrence wins).
/// Returns the distinct chunks and the raw number of chunks produced.
pub fn plan_chunks(sources: &[SourceContent], chunking: &ChunkingConfig) -> Result<(Vec<PlannedChunk>, usize)> {
    let mut seen = HashSet::new();
    let mut planned = Vec::new();
    let mut produced = 0usize;
    for (source_index, source) in sources.iter().enumerate() {
        for text in chunk_text(&source.text, chunking)? {
            produced += 1;
            let id = document_id(&source.metadata.source, &text);
            if seen.insert(id.clone()) {
                planned.push(PlannedChunk { id, text, source_index });
            }
        }
    }
    Ok((planned, produced))
}

pub struct IngestionPipeline {
    embedder: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    processor: DataProcessor,
}

impl IngestionPipeline {
    pub fn new(embedder: Arc<EmbeddingClient>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store, processor: DataProcessor::new() }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> { &self.store }

    pub async fn ingest(&self, collection: &CollectionName, sources: Vec<SourceContent>, options: &IngestOptions) -> Result<IngestReport> {
        options.validate()?;
        let start = Instant::now();
        options.check_cancelled()?;

        let total_sources = sources.len();
        options.report(IngestStage::Chunking, 0, total_sources, format!("chunking {} sources", total_sources));
        let (planned, chunks_created) = plan_chunks(&sources, &options.chunking)?;
        let estimated_tokens: usize = planned.iter().map(|c| estimate_tokens(&c.text)).sum();
        options.report(IngestStage::Chunking, total_sources, total_sources, format!("{} chunks", chunks_created));
        info!(collection = %collection, sources = total_sources, chunks = chunks_created, distinct = planned.len(), "chunked sources");

        let total = planned.len();
        let now = Utc::now();
        let mut committed = 0usize;
        for batch in planned.chunks(options.batch_size) {
            options.check_cancelled()?;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match &options.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    v = self.embedder.embed_batch(&texts) => v?,
                },
                None => self.embedder.embed_batch(&texts).await?,
            };
            options.report(IngestStage::Embedding, committed + batch.len(), total, format!("embedded {} chunks", batch.len()));

            let documents: Vec<VectorDocument> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, embedding)| VectorDocument {
                    id: chunk.id.clone(),
                    text: chunk.text.clone(),
                    embedding,
                    metadata: DocumentMetadata::from_source(&sources[chunk.source_index].metadata, now),
                })
                .collect();
            committed += self.store.add_documents(collection, documents).await?;
            options.report(IngestStage::Storing, committed, total, format!("stored {}/{}", committed, total));
            debug!(collection = %collection, committed, total, "batch committed");
        }

        let report = IngestReport { documents_ingested: committed, chunks_created, estimated_tokens, elapsed: start.elapsed() };
        options.report(IngestStage::Complete, committed, total, format!("ingested {} documents", committed));
        info!(collection = %collection, documents = committed, tokens = estimated_tokens, elapsed_ms = report.elapsed.as_millis() as u64, "ingestion complete");
        Ok(report)
    }

    /// Ingest one `.txt`/`.md`/`.html` file. An empty `metadata.source`
    /// defaults to the file stem.
    pub async fn ingest_file(&self, collection: &CollectionName, path: &Path, mut metadata: SourceMetadata, options: &IngestOptions) -> Result<IngestReport> {
        if metadata.source.is_empty() {
            metadata.source = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        }
        let processor = self.processor;
        let path = path.to_path_buf();
        let source = tokio::task::spawn_blocking(move || processor.process_file(&path, metadata))
            .await
            .map_err(Error::storage)??;
        self.ingest(collection, vec![source], options).await
    }

    pub async fn ingest_directory(&self, collection: &CollectionName, dir: &Path, template: &SourceMetadata, options: &IngestOptions) -> Result<IngestReport> {
        let processor = self.processor;
        let dir = dir.to_path_buf();
        let template = template.clone();
        let sources = tokio::task::spawn_blocking(move || processor.process_directory(&dir, &template))
            .await
            .map_err(Error::storage)??;
        self.ingest(collection, sources, options).await
    }
}
