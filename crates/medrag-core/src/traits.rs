use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CollectionName, DocumentId, MetadataFilter, SearchHit, VectorDocument};

/// A text embedding model. Calls are CPU/GPU bound and synchronous; async
/// callers go through `medrag_embed::EmbeddingClient`.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `hash:d384`).
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    /// One vector per input, in input order. Fails as a unit.
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Storage of vector documents grouped into named collections.
///
/// `connect` is idempotent and `close` is safe to call at any point, including
/// after a failed `connect`. Collections are created on first write; reading a
/// collection that does not exist yields empty results.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;

    /// Upsert by id. Returns how many documents were written.
    async fn add_documents(&self, collection: &CollectionName, documents: Vec<VectorDocument>) -> Result<usize>;

    /// The `top_k` best cosine matches among documents passing `filter`,
    /// ordered by score descending with ties in insertion order.
    async fn query(
        &self,
        collection: &CollectionName,
        query_vector: &[f32],
        filter: &MetadataFilter,
        top_k: usize,
    ) -> Result<Vec<SearchHit>>;

    async fn count(&self, collection: &CollectionName) -> Result<usize>;

    /// How many of `ids` are stored in `collection`. Repeated ids count once.
    async fn count_ids(&self, collection: &CollectionName, ids: &[DocumentId]) -> Result<usize>;

    async fn collections(&self) -> Result<Vec<CollectionName>>;
}
