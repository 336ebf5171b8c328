//! Process-wide guarantee that each tracked collection holds its baseline
//! corpus before first retrieval.
//!
//! Every collection is driven through an explicit state machine guarded by a
//! mutex. The first caller to find a collection `Unpopulated` (or `Failed`)
//! flips it to `Populating` and spawns the run; everyone arriving while it is
//! in flight waits on the same outcome.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

use medrag_core::data_processor::DataProcessor;
use medrag_core::error::{Error, Result};
use medrag_core::traits::VectorStore;
use medrag_core::types::{CollectionName, DocumentId, SourceContent, SourceMetadata};

use crate::ingest::{plan_chunks, IngestOptions, IngestionPipeline};

/// Where a collection's baseline content comes from.
#[async_trait]
pub trait BaselineCorpus: Send + Sync {
    async fn load(&self, collection: &CollectionName) -> Result<Vec<SourceContent>>;
}

/// Baseline content supplied directly by the caller.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    sources: HashMap<CollectionName, Vec<SourceContent>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self { Self::default() }

    pub fn with_collection(mut self, collection: CollectionName, sources: Vec<SourceContent>) -> Self {
        self.sources.insert(collection, sources);
        self
    }
}

#[async_trait]
impl BaselineCorpus for InMemoryCorpus {
    async fn load(&self, collection: &CollectionName) -> Result<Vec<SourceContent>> {
        Ok(self.sources.get(collection).cloned().unwrap_or_default())
    }
}

/// `<root>/<collection>/` directories of text, markdown and HTML files. A
/// missing directory is an empty baseline.
#[derive(Debug, Clone)]
pub struct DirectoryCorpus {
    root: PathBuf,
    template: SourceMetadata,
}

impl DirectoryCorpus {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into(), template: SourceMetadata::default() } }

    pub fn with_template(mut self, template: SourceMetadata) -> Self { self.template = template; self }
}

#[async_trait]
impl BaselineCorpus for DirectoryCorpus {
    async fn load(&self, collection: &CollectionName) -> Result<Vec<SourceContent>> {
        let dir = self.root.join(collection.as_str());
        if !dir.is_dir() {
            warn!(dir = %dir.display(), "no baseline corpus directory");
            return Ok(Vec::new());
        }
        let template = self.template.clone();
        tokio::task::spawn_blocking(move || DataProcessor::new().process_directory(&dir, &template))
            .await
            .map_err(Error::storage)?
    }
}

#[derive(Debug, Clone)]
pub enum PopulationState {
    Unpopulated,
    Populating,
    Populated { documents: usize },
    Failed { error: Arc<Error> },
}

type Outcome = std::result::Result<usize, Arc<Error>>;

enum Entry {
    Populating(watch::Receiver<Option<Outcome>>),
    Populated(usize),
    Failed(Arc<Error>),
}

struct Inner {
    pipeline: Arc<IngestionPipeline>,
    corpus: Arc<dyn BaselineCorpus>,
    options: IngestOptions,
    entries: Mutex<HashMap<CollectionName, Entry>>,
}

#[derive(Clone)]
pub struct PopulationCache {
    inner: Arc<Inner>,
    collections: Vec<CollectionName>,
}

impl PopulationCache {
    pub fn new(pipeline: Arc<IngestionPipeline>, corpus: Arc<dyn BaselineCorpus>, collections: Vec<CollectionName>, options: IngestOptions) -> Self {
        let inner = Inner { pipeline, corpus, options, entries: Mutex::new(HashMap::new()) };
        Self { inner: Arc::new(inner), collections }
    }

    pub fn collections(&self) -> &[CollectionName] { &self.collections }

    pub fn state(&self, collection: &CollectionName) -> PopulationState {
        match self.inner.lock_entries().get(collection) {
            None => PopulationState::Unpopulated,
            Some(Entry::Populating(_)) => PopulationState::Populating,
            Some(Entry::Populated(n)) => PopulationState::Populated { documents: *n },
            Some(Entry::Failed(e)) => PopulationState::Failed { error: e.clone() },
        }
    }

    /// Resolves once every tracked collection is populated. Ingestion runs at
    /// most once per collection no matter how many callers race here.
    pub async fn ensure_populated(&self) -> Result<()> {
        try_join_all(self.collections.iter().map(|c| self.ensure_collection(c))).await.map(|_| ())
    }

    /// Populate one collection, returning its verified document count.
    pub async fn ensure_collection(&self, collection: &CollectionName) -> Result<usize> {
        let mut rx = {
            let mut entries = self.inner.lock_entries();
            let in_flight = match entries.get(collection) {
                Some(Entry::Populated(n)) => return Ok(*n),
                Some(Entry::Populating(rx)) => Some(rx.clone()),
                Some(Entry::Failed(_)) | None => None,
            };
            match in_flight {
                Some(rx) => rx,
                None => {
                    let (tx, rx) = watch::channel(None);
                    entries.insert(collection.clone(), Entry::Populating(rx.clone()));
                    info!(collection = %collection, "population started");
                    let inner = self.inner.clone();
                    let collection = collection.clone();
                    tokio::spawn(async move {
                        let outcome = inner.populate(&collection).await.map_err(Arc::new);
                        inner.finish(&collection, &outcome);
                        let _ = tx.send(Some(outcome));
                    });
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(|o| o.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => {
                // The run ended without reporting, i.e. the task panicked.
                let err = Arc::new(Error::Storage("population task ended without an outcome".into()));
                let failed: Outcome = Err(err);
                self.inner.finish(collection, &failed);
                Some(failed)
            }
        };
        match outcome {
            Some(Ok(n)) => Ok(n),
            Some(Err(source)) => Err(Error::Population { collection: collection.to_string(), source }),
            None => Err(Error::Storage("population outcome missing".into())),
        }
    }
}

impl Inner {
    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<CollectionName, Entry>> {
        // Entries are plain values; a poisoned guard still holds a usable map.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, collection: &CollectionName, outcome: &Outcome) {
        let entry = match outcome {
            Ok(n) => {
                info!(collection = %collection, documents = n, "population complete");
                Entry::Populated(*n)
            }
            Err(e) => {
                warn!(collection = %collection, error = %e, "population failed");
                Entry::Failed(e.clone())
            }
        };
        self.lock_entries().insert(collection.clone(), entry);
    }

    /// Ingest the baseline unless every one of its chunk ids is already
    /// stored. Unrelated documents in the collection do not count.
    async fn populate(&self, collection: &CollectionName) -> Result<usize> {
        let store: &Arc<dyn VectorStore> = self.pipeline.store();
        let sources = self.corpus.load(collection).await?;
        let (planned, _) = plan_chunks(&sources, &self.options.chunking)?;
        let ids: Vec<DocumentId> = planned.into_iter().map(|c| c.id).collect();
        let expected = ids.len();
        let present = store.count_ids(collection, &ids).await?;
        if present == expected {
            info!(collection = %collection, expected, "baseline already stored");
            return store.count(collection).await;
        }
        info!(collection = %collection, present, expected, "baseline incomplete, ingesting");
        self.pipeline.ingest(collection, sources, &self.options).await?;
        let present = store.count_ids(collection, &ids).await?;
        if present < expected {
            return Err(Error::Storage(format!(
                "collection '{}' holds {} of {} baseline chunks after population",
                collection, present, expected
            )));
        }
        store.count(collection).await
    }
}
