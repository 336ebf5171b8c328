//! Embedded vector store with exact cosine scan and optional JSON snapshots.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use medrag_core::error::{Error, Result};
use medrag_core::similarity::cosine_similarity;
use medrag_core::traits::VectorStore;
use medrag_core::types::{CollectionName, DocumentId, MetadataFilter, SearchHit, VectorDocument};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CollectionData {
    dim: Option<usize>,
    documents: Vec<VectorDocument>,
    #[serde(skip)]
    index: HashMap<DocumentId, usize>,
}

impl CollectionData {
    fn reindex(&mut self) {
        self.index = self.documents.iter().enumerate().map(|(i, d)| (d.id.clone(), i)).collect();
    }

    /// Insert or overwrite in place. Overwrites keep the original position
    /// (the insertion-order tie-break) and creation time.
    fn upsert(&mut self, mut doc: VectorDocument) {
        match self.index.get(&doc.id) {
            Some(&i) => {
                doc.metadata.created_at = self.documents[i].metadata.created_at;
                self.documents[i] = doc;
            }
            None => {
                self.index.insert(doc.id.clone(), self.documents.len());
                self.documents.push(doc);
            }
        }
    }
}

type Shared = Arc<RwLock<CollectionData>>;

pub struct MemoryVectorStore {
    collections: Mutex<BTreeMap<CollectionName, Shared>>,
    snapshot_dir: Option<PathBuf>,
    connected: Mutex<bool>,
}

impl Default for MemoryVectorStore {
    fn default() -> Self { Self::new() }
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self { collections: Mutex::new(BTreeMap::new()), snapshot_dir: None, connected: Mutex::new(false) }
    }

    /// Persist each collection as `<dir>/<collection>.json`.
    pub fn with_snapshot_dir(dir: impl Into<PathBuf>) -> Self {
        Self { snapshot_dir: Some(dir.into()), ..Self::new() }
    }

    async fn ensure_connected(&self) -> Result<()> {
        if *self.connected.lock().await { Ok(()) } else { Err(Error::Storage("vector store is not connected".into())) }
    }

    async fn existing(&self, collection: &CollectionName) -> Option<Shared> {
        self.collections.lock().await.get(collection).cloned()
    }

    async fn load_snapshots(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut map = self.collections.lock().await;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") { continue; }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).and_then(|s| CollectionName::new(s).ok()) else { continue };
            if map.contains_key(&name) { continue; }
            let bytes = tokio::fs::read(&path).await?;
            let mut data: CollectionData = serde_json::from_slice(&bytes).map_err(Error::storage)?;
            data.reindex();
            debug!(collection = %name, documents = data.documents.len(), "loaded snapshot");
            map.insert(name, Arc::new(RwLock::new(data)));
        }
        Ok(())
    }

    async fn write_snapshot(&self, collection: &CollectionName, data: &CollectionData) -> Result<()> {
        let Some(dir) = self.snapshot_dir.clone() else { return Ok(()) };
        let bytes = serde_json::to_vec(data).map_err(Error::storage)?;
        let target = dir.join(format!("{}.json", collection));
        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|e| Error::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(Error::storage)?
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn connect(&self) -> Result<()> {
        let mut connected = self.connected.lock().await;
        if *connected { return Ok(()); }
        if let Some(dir) = &self.snapshot_dir { self.load_snapshots(dir).await?; }
        *connected = true;
        info!(snapshots = ?self.snapshot_dir, "memory vector store connected");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock().await = false;
        Ok(())
    }

    async fn add_documents(&self, collection: &CollectionName, documents: Vec<VectorDocument>) -> Result<usize> {
        self.ensure_connected().await?;
        if documents.is_empty() { return Ok(0); }
        let shared = {
            let mut map = self.collections.lock().await;
            map.entry(collection.clone()).or_insert_with(|| {
                info!(collection = %collection, "creating collection");
                Arc::new(RwLock::new(CollectionData::default()))
            }).clone()
        };
        let mut data = shared.write().await;
        let dim = data.dim.unwrap_or(documents[0].embedding.len());
        if let Some(bad) = documents.iter().find(|d| d.embedding.len() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, actual: bad.embedding.len() });
        }
        let written = documents.len();
        // Staged on a copy so a failed snapshot leaves the collection untouched.
        let mut next = data.clone();
        next.dim = Some(dim);
        for doc in documents { next.upsert(doc); }
        self.write_snapshot(collection, &next).await?;
        *data = next;
        debug!(collection = %collection, written, total = data.documents.len(), "upserted documents");
        Ok(written)
    }

    async fn query(&self, collection: &CollectionName, query_vector: &[f32], filter: &MetadataFilter, top_k: usize) -> Result<Vec<SearchHit>> {
        self.ensure_connected().await?;
        let Some(shared) = self.existing(collection).await else { return Ok(Vec::new()) };
        let data = shared.read().await;
        if let Some(dim) = data.dim {
            if dim != query_vector.len() { return Err(Error::DimensionMismatch { expected: dim, actual: query_vector.len() }); }
        }
        let mut scored: Vec<(f32, &VectorDocument)> = data
            .documents
            .iter()
            .filter(|d| filter.matches(&d.metadata))
            .map(|d| (cosine_similarity(query_vector, &d.embedding), d))
            .filter(|(score, _)| !score.is_nan())
            .collect();
        // Stable: equal scores stay in insertion order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, d)| SearchHit { id: d.id.clone(), text: d.text.clone(), metadata: d.metadata.clone(), score })
            .collect())
    }

    async fn count(&self, collection: &CollectionName) -> Result<usize> {
        self.ensure_connected().await?;
        match self.existing(collection).await {
            Some(shared) => Ok(shared.read().await.documents.len()),
            None => Ok(0),
        }
    }

    async fn count_ids(&self, collection: &CollectionName, ids: &[DocumentId]) -> Result<usize> {
        self.ensure_connected().await?;
        let Some(shared) = self.existing(collection).await else { return Ok(0) };
        let data = shared.read().await;
        let wanted: HashSet<&DocumentId> = ids.iter().collect();
        Ok(wanted.into_iter().filter(|id| data.index.contains_key(*id)).count())
    }

    async fn collections(&self) -> Result<Vec<CollectionName>> {
        self.ensure_connected().await?;
        Ok(self.collections.lock().await.keys().cloned().collect())
    }
}
