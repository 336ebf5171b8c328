//! Query embedding, multi-collection search and token-budgeted assembly.

use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use medrag_core::chunker::estimate_tokens;
use medrag_core::config::RagSettings;
use medrag_core::error::{Error, Result};
use medrag_core::traits::VectorStore;
use medrag_core::types::{CollectionName, MetadataFilter, SearchHit};
use medrag_embed::EmbeddingClient;

use crate::context::{assign_citations, RetrievedChunk, RetrievedContext};
use crate::lookup::Lookup;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalOptions {
    /// Token budget; the engine default when unset.
    pub max_tokens: Option<usize>,
    pub filter: MetadataFilter,
    /// Collections to search, in merge order. Must be configured on the engine.
    pub collections: Option<Vec<CollectionName>>,
    /// Candidates scoring below this are dropped before budgeting.
    pub min_score: Option<f32>,
}

impl RetrievalOptions {
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self { self.max_tokens = Some(max_tokens); self }
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self { self.filter = filter; self }
    pub fn with_collections(mut self, collections: Vec<CollectionName>) -> Self { self.collections = Some(collections); self }
}

pub struct RetrievalEngine {
    embedder: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    collections: Vec<CollectionName>,
    chunk_size: usize,
    overfetch_factor: usize,
    default_max_tokens: usize,
}

impl RetrievalEngine {
    pub fn new(embedder: Arc<EmbeddingClient>, store: Arc<dyn VectorStore>, collections: Vec<CollectionName>) -> Self {
        Self { embedder, store, collections, chunk_size: 500, overfetch_factor: 4, default_max_tokens: 4000 }
    }

    pub fn from_settings(embedder: Arc<EmbeddingClient>, store: Arc<dyn VectorStore>, settings: &RagSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self::new(embedder, store, settings.collection_names()?)
            .with_chunk_size(settings.chunk_size)
            .with_overfetch_factor(settings.overfetch_factor)
            .with_default_max_tokens(settings.max_tokens))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self { self.chunk_size = chunk_size.max(1); self }
    pub fn with_overfetch_factor(mut self, factor: usize) -> Self { self.overfetch_factor = factor.max(1); self }
    pub fn with_default_max_tokens(mut self, max_tokens: usize) -> Self { self.default_max_tokens = max_tokens; self }

    pub fn collections(&self) -> &[CollectionName] { &self.collections }

    /// Candidates requested per collection: enough full-size chunks to fill
    /// the budget, times the over-fetch factor.
    pub fn candidate_limit(&self, max_tokens: usize) -> usize {
        max_tokens.div_ceil(self.chunk_size).max(1) * self.overfetch_factor
    }

    pub async fn retrieve(&self, query: &str, options: &RetrievalOptions) -> Result<RetrievedContext> {
        self.lookup(&Lookup::FreeText(query.to_string()), options, None).await
    }

    pub async fn retrieve_with_cancel(&self, query: &str, options: &RetrievalOptions, cancel: &CancellationToken) -> Result<RetrievedContext> {
        self.lookup(&Lookup::FreeText(query.to_string()), options, Some(cancel)).await
    }

    pub async fn by_structure(&self, name: &str, options: &RetrievalOptions) -> Result<RetrievedContext> {
        self.lookup(&Lookup::Structure(name.to_string()), options, None).await
    }

    pub async fn by_symptom(&self, symptom: &str, options: &RetrievalOptions) -> Result<RetrievedContext> {
        self.lookup(&Lookup::Symptom(symptom.to_string()), options, None).await
    }

    pub async fn by_lab(&self, name: &str, value: Option<&str>, options: &RetrievalOptions) -> Result<RetrievedContext> {
        self.lookup(&Lookup::Lab { name: name.to_string(), value: value.map(str::to_string) }, options, None).await
    }

    fn resolve_collections(&self, lookup: &Lookup, options: &RetrievalOptions) -> Result<Vec<CollectionName>> {
        if let Some(requested) = &options.collections {
            if let Some(unknown) = requested.iter().find(|c| !self.collections.contains(c)) {
                return Err(Error::UnknownCollection(unknown.to_string()));
            }
            return Ok(requested.clone());
        }
        let preferred: Vec<CollectionName> = lookup
            .preferred_collections()
            .iter()
            .filter_map(|name| self.collections.iter().find(|c| c.as_str() == *name).cloned())
            .collect();
        Ok(if preferred.is_empty() { self.collections.clone() } else { preferred })
    }

    /// Shared algorithm behind every entry point.
    pub async fn lookup(&self, lookup: &Lookup, options: &RetrievalOptions, cancel: Option<&CancellationToken>) -> Result<RetrievedContext> {
        let start = Instant::now();
        let max_tokens = options.max_tokens.unwrap_or(self.default_max_tokens);
        let collections = self.resolve_collections(lookup, options)?;
        let filter = &options.filter;
        let query = lookup.query_text();
        if query.is_empty() || max_tokens == 0 {
            return Ok(RetrievedContext::empty(query, start.elapsed()));
        }

        let query_vector = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                v = self.embedder.embed_query(&query) => v?,
            },
            None => self.embedder.embed_query(&query).await?,
        };

        let limit = self.candidate_limit(max_tokens);
        let searches = collections.iter().map(|c| self.store.query(c, &query_vector, filter, limit));
        let per_collection: Vec<Vec<SearchHit>> = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                r = try_join_all(searches) => r?,
            },
            None => try_join_all(searches).await?,
        };

        // Collection order, then store rank; the stable sort keeps that order for ties.
        let mut candidates: Vec<(CollectionName, SearchHit)> = collections
            .iter()
            .zip(per_collection)
            .flat_map(|(c, hits)| hits.into_iter().map(move |h| (c.clone(), h)))
            .filter(|(_, h)| !h.score.is_nan() && options.min_score.map_or(true, |min| h.score >= min))
            .collect();
        let candidate_count = candidates.len();
        candidates.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));

        let mut seen = HashSet::new();
        let mut total_tokens = 0usize;
        let mut chunks = Vec::new();
        for (collection, hit) in candidates {
            if !seen.insert(hit.id.clone()) { continue; }
            let tokens = estimate_tokens(&hit.text);
            if total_tokens + tokens > max_tokens {
                debug!(id = %hit.id, tokens, "candidate exceeds remaining budget; skipped");
                continue;
            }
            total_tokens += tokens;
            chunks.push(RetrievedChunk { collection, id: hit.id, text: hit.text, metadata: hit.metadata, score: hit.score, tokens, citation: 0 });
        }
        let citations = assign_citations(&mut chunks);
        let context = RetrievedContext { query, chunks, total_tokens, citations, elapsed: start.elapsed() };
        info!(
            candidates = candidate_count,
            accepted = context.chunks.len(),
            tokens = total_tokens,
            budget = max_tokens,
            elapsed_ms = context.elapsed.as_millis() as u64,
            "retrieval complete"
        );
        Ok(context)
    }
}
