//! Retrieved context and the artifacts handed to a generation backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use medrag_core::types::{CollectionName, DocumentId, DocumentMetadata};

/// One accepted chunk, tagged with the citation it contributes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub collection: CollectionName,
    pub id: DocumentId,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub score: f32,
    pub tokens: usize,
    pub citation: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub index: usize,
    pub source: String,
    pub section: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagContextStats {
    pub chunks_used: usize,
    pub total_tokens: usize,
    pub processing_time_ms: u64,
}

/// Token-budgeted result of a retrieval call. An empty context means
/// nothing matched, not that retrieval failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedContext {
    pub query: String,
    pub chunks: Vec<RetrievedChunk>,
    pub total_tokens: usize,
    pub citations: Vec<Citation>,
    pub elapsed: Duration,
}

impl RetrievedContext {
    pub fn empty(query: impl Into<String>, elapsed: Duration) -> Self {
        Self { query: query.into(), chunks: Vec::new(), total_tokens: 0, citations: Vec::new(), elapsed }
    }

    pub fn is_empty(&self) -> bool { self.chunks.is_empty() }

    pub fn stats(&self) -> RagContextStats {
        RagContextStats {
            chunks_used: self.chunks.len(),
            total_tokens: self.total_tokens,
            processing_time_ms: self.elapsed.as_millis() as u64,
        }
    }

    /// Numbered excerpts for insertion into a prompt, keyed by citation index.
    pub fn to_prompt_block(&self) -> String {
        let mut out = String::new();
        for chunk in &self.chunks {
            if !out.is_empty() { out.push_str("\n\n"); }
            out.push_str(&format!("[{}] {}", chunk.citation, chunk.metadata.source));
            if let Some(section) = &chunk.metadata.section { out.push_str(&format!(" ({})", section)); }
            out.push('\n');
            out.push_str(chunk.text.trim());
        }
        out
    }
}

/// Assign one citation per distinct source, numbered from 1 by first
/// appearance, and stamp each chunk with its citation index.
pub fn assign_citations(chunks: &mut [RetrievedChunk]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for chunk in chunks.iter_mut() {
        let index = match citations.iter().find(|c| c.source == chunk.metadata.source) {
            Some(existing) => existing.index,
            None => {
                let index = citations.len() + 1;
                citations.push(Citation {
                    index,
                    source: chunk.metadata.source.clone(),
                    section: chunk.metadata.section.clone(),
                    url: chunk.metadata.url.clone(),
                });
                index
            }
        };
        chunk.citation = index;
    }
    citations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use medrag_core::types::SourceMetadata;

    fn chunk(source: &str, section: Option<&str>, text: &str) -> RetrievedChunk {
        let mut meta = SourceMetadata::new(source);
        meta.section = section.map(str::to_string);
        RetrievedChunk {
            collection: CollectionName::new("anatomy").unwrap(),
            id: text.to_string(),
            text: text.to_string(),
            metadata: DocumentMetadata::from_source(&meta, Utc::now()),
            score: 0.5,
            tokens: 1,
            citation: 0,
        }
    }

    #[test]
    fn citations_follow_first_appearance() {
        let mut chunks = vec![chunk("b", None, "one"), chunk("a", Some("s"), "two"), chunk("b", None, "three")];
        let citations = assign_citations(&mut chunks);
        assert_eq!(citations.iter().map(|c| (c.index, c.source.as_str())).collect::<Vec<_>>(), vec![(1, "b"), (2, "a")]);
        assert_eq!(chunks.iter().map(|c| c.citation).collect::<Vec<_>>(), vec![1, 2, 1]);

        let ctx = RetrievedContext { query: "q".into(), chunks, total_tokens: 3, citations, elapsed: Duration::from_millis(12) };
        assert_eq!(ctx.to_prompt_block(), "[1] b\none\n\n[2] a (s)\ntwo\n\n[1] b\nthree");
        assert_eq!(ctx.stats(), RagContextStats { chunks_used: 3, total_tokens: 3, processing_time_ms: 12 });
    }

    #[test]
    fn citation_serializes_camel_case() {
        let stats = RagContextStats { chunks_used: 1, total_tokens: 2, processing_time_ms: 3 };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["chunksUsed"], 1);
        assert_eq!(json["processingTimeMs"], 3);
    }
}
