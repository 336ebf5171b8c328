//! Domain types shared by the chunker, the stores and the RAG engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub type DocumentId = String;

/// Number of leading characters of a chunk that feed its identifier.
pub const ID_PREFIX_CHARS: usize = 256;

/// Name of an independently queryable partition of the store.
///
/// Names double as table names and snapshot file stems, so they are limited
/// to lowercase ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionName(String);

impl CollectionName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidConfig(format!("invalid collection name '{}'", name)));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl FromStr for CollectionName {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> { Self::new(s) }
}

impl TryFrom<String> for CollectionName {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> { Self::new(s) }
}

impl From<CollectionName> for String {
    fn from(c: CollectionName) -> Self { c.0 }
}

/// Organ-system classification attached to educational content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodySystem {
    Cardiovascular,
    Respiratory,
    Nervous,
    Digestive,
    Skeletal,
    Muscular,
    Endocrine,
    Integumentary,
    Reproductive,
    Urinary,
    Lymphatic,
    Immune,
}

impl BodySystem {
    pub const ALL: [BodySystem; 12] = [
        BodySystem::Cardiovascular,
        BodySystem::Respiratory,
        BodySystem::Nervous,
        BodySystem::Digestive,
        BodySystem::Skeletal,
        BodySystem::Muscular,
        BodySystem::Endocrine,
        BodySystem::Integumentary,
        BodySystem::Reproductive,
        BodySystem::Urinary,
        BodySystem::Lymphatic,
        BodySystem::Immune,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BodySystem::Cardiovascular => "cardiovascular",
            BodySystem::Respiratory => "respiratory",
            BodySystem::Nervous => "nervous",
            BodySystem::Digestive => "digestive",
            BodySystem::Skeletal => "skeletal",
            BodySystem::Muscular => "muscular",
            BodySystem::Endocrine => "endocrine",
            BodySystem::Integumentary => "integumentary",
            BodySystem::Reproductive => "reproductive",
            BodySystem::Urinary => "urinary",
            BodySystem::Lymphatic => "lymphatic",
            BodySystem::Immune => "immune",
        }
    }
}

impl fmt::Display for BodySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for BodySystem {
    type Err = Error;

    /// Accepts "cardiovascular", "Cardiovascular System", "renal" etc.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let key = lower.strip_suffix(" system").unwrap_or(lower.as_str()).trim();
        let system = match key {
            "cardiovascular" | "circulatory" => BodySystem::Cardiovascular,
            "respiratory" | "pulmonary" => BodySystem::Respiratory,
            "nervous" | "neurological" => BodySystem::Nervous,
            "digestive" | "gastrointestinal" => BodySystem::Digestive,
            "skeletal" => BodySystem::Skeletal,
            "muscular" | "musculoskeletal" => BodySystem::Muscular,
            "endocrine" => BodySystem::Endocrine,
            "integumentary" => BodySystem::Integumentary,
            "reproductive" => BodySystem::Reproductive,
            "urinary" | "renal" => BodySystem::Urinary,
            "lymphatic" => BodySystem::Lymphatic,
            "immune" => BodySystem::Immune,
            _ => return Err(Error::InvalidConfig(format!("unknown body system '{}'", s))),
        };
        Ok(system)
    }
}

/// Explanation depth, from everyday language (1) to clinician level (5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ComplexityLevel(u8);

impl ComplexityLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(level: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&level) {
            Ok(Self(level))
        } else {
            Err(Error::InvalidConfig(format!("complexity level {} outside {}..={}", level, Self::MIN, Self::MAX)))
        }
    }

    pub fn get(&self) -> u8 { self.0 }
}

impl TryFrom<u8> for ComplexityLevel {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> { Self::new(v) }
}

impl From<ComplexityLevel> for u8 {
    fn from(c: ComplexityLevel) -> Self { c.0 }
}

/// Caller-supplied metadata for a piece of source content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source: String,
    pub section: Option<String>,
    pub topic: Option<String>,
    pub body_system: Option<BodySystem>,
    pub complexity: Option<ComplexityLevel>,
    pub url: Option<String>,
}

impl SourceMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), ..Self::default() }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self { self.section = Some(section.into()); self }
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self { self.topic = Some(topic.into()); self }
    pub fn with_body_system(mut self, system: BodySystem) -> Self { self.body_system = Some(system); self }
    pub fn with_complexity(mut self, level: ComplexityLevel) -> Self { self.complexity = Some(level); self }
    pub fn with_url(mut self, url: impl Into<String>) -> Self { self.url = Some(url.into()); self }
}

/// Raw text plus partial metadata, consumed by ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContent {
    pub text: String,
    pub metadata: SourceMetadata,
}

impl SourceContent {
    pub fn new(text: impl Into<String>, metadata: SourceMetadata) -> Self {
        Self { text: text.into(), metadata }
    }
}

/// Metadata persisted with every vector document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub section: Option<String>,
    pub topic: Option<String>,
    pub body_system: Option<BodySystem>,
    pub complexity: Option<ComplexityLevel>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentMetadata {
    pub fn from_source(meta: &SourceMetadata, now: DateTime<Utc>) -> Self {
        Self {
            source: meta.source.clone(),
            section: meta.section.clone(),
            topic: meta.topic.clone(),
            body_system: meta.body_system,
            complexity: meta.complexity,
            url: meta.url.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The persisted unit: chunk text, its embedding and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: DocumentId,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: DocumentMetadata,
}

/// Stable identifier derived from the source name and the chunk's leading text.
///
/// Re-ingesting identical content therefore upserts instead of duplicating.
pub fn document_id(source: &str, chunk_text: &str) -> DocumentId {
    let prefix: String = chunk_text.chars().take(ID_PREFIX_CHARS).collect();
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(prefix.as_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

/// A stored document returned by a similarity query. Higher `score` is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: DocumentId,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub score: f32,
}

/// Exact-match metadata predicates; every field left as `None` matches all.
///
/// Documents carrying no complexity level pass any `max_complexity` bound.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub body_system: Option<BodySystem>,
    pub max_complexity: Option<ComplexityLevel>,
    pub source: Option<String>,
    pub topic: Option<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.body_system.is_none() && self.max_complexity.is_none() && self.source.is_none() && self.topic.is_none()
    }

    pub fn matches(&self, meta: &DocumentMetadata) -> bool {
        let MetadataFilter { body_system, max_complexity, source, topic } = self;
        if let Some(system) = body_system {
            if meta.body_system != Some(*system) { return false; }
        }
        if let (Some(max), Some(level)) = (max_complexity, meta.complexity) {
            if level > *max { return false; }
        }
        if let Some(source) = source {
            if &meta.source != source { return false; }
        }
        if let Some(topic) = topic {
            if meta.topic.as_ref() != Some(topic) { return false; }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(system: Option<BodySystem>, level: Option<u8>) -> DocumentMetadata {
        let mut src = SourceMetadata::new("Gray's Anatomy");
        src.body_system = system;
        src.complexity = level.map(|l| ComplexityLevel::new(l).unwrap());
        DocumentMetadata::from_source(&src, Utc::now())
    }

    #[test]
    fn collection_names_are_validated() {
        assert!(CollectionName::new("anatomy").is_ok());
        assert!(CollectionName::new("lab_tests-2").is_ok());
        assert!(CollectionName::new("").is_err());
        assert!(CollectionName::new("Anatomy").is_err());
        assert!(CollectionName::new("../etc").is_err());
    }

    #[test]
    fn body_system_parsing_accepts_aliases() {
        assert_eq!("Cardiovascular System".parse::<BodySystem>().unwrap(), BodySystem::Cardiovascular);
        assert_eq!("renal".parse::<BodySystem>().unwrap(), BodySystem::Urinary);
        assert!("heart".parse::<BodySystem>().is_err());
        for system in BodySystem::ALL {
            assert_eq!(system.as_str().parse::<BodySystem>().unwrap(), system);
        }
    }

    #[test]
    fn complexity_bounds() {
        assert!(ComplexityLevel::new(0).is_err());
        assert!(ComplexityLevel::new(6).is_err());
        assert_eq!(ComplexityLevel::new(3).unwrap().get(), 3);
    }

    #[test]
    fn document_id_is_deterministic_and_source_scoped() {
        let a = document_id("src-a", "The heart has four chambers.");
        assert_eq!(a, document_id("src-a", "The heart has four chambers."));
        assert_ne!(a, document_id("src-b", "The heart has four chambers."));
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn filter_matching() {
        let level2 = ComplexityLevel::new(2).unwrap();
        let filter = MetadataFilter { body_system: Some(BodySystem::Cardiovascular), max_complexity: Some(level2), ..Default::default() };
        assert!(filter.matches(&meta(Some(BodySystem::Cardiovascular), Some(1))));
        assert!(filter.matches(&meta(Some(BodySystem::Cardiovascular), None)));
        assert!(!filter.matches(&meta(Some(BodySystem::Cardiovascular), Some(4))));
        assert!(!filter.matches(&meta(Some(BodySystem::Nervous), Some(1))));
        assert!(!filter.matches(&meta(None, Some(1))));
        assert!(MetadataFilter::default().matches(&meta(None, None)));
    }
}
