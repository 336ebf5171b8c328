//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory. The `[rag]` table deserializes into
//! [`RagSettings`].

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::CollectionName;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new()
            .merge(Serialized::default("rag", RagSettings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    /// Build from an explicit figment, bypassing file discovery.
    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// The validated `[rag]` section.
    pub fn rag(&self) -> anyhow::Result<RagSettings> {
        let settings: RagSettings = self.get("rag")?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Lance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    Hash,
    Candle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub store_dir: String,
    pub backend: StoreBackend,
    pub corpus_dir: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub max_tokens: usize,
    pub overfetch_factor: usize,
    pub collections: Vec<String>,
    pub embedder: EmbedderKind,
    pub embedding_dim: usize,
    pub model_dir: Option<String>,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            store_dir: "./data/vector_store".to_string(),
            backend: StoreBackend::Memory,
            corpus_dir: "./data/corpus".to_string(),
            chunk_size: 500,
            chunk_overlap: 50,
            batch_size: 32,
            max_tokens: 4000,
            overfetch_factor: 4,
            collections: vec!["anatomy".into(), "physiology".into(), "pathology".into()],
            embedder: EmbedderKind::Hash,
            embedding_dim: 384,
            model_dir: None,
        }
    }
}

impl RagSettings {
    pub fn validate(&self) -> Result<()> {
        self.chunking().validate()?;
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidConfig("max_tokens must be positive".into()));
        }
        if self.overfetch_factor == 0 {
            return Err(Error::InvalidConfig("overfetch_factor must be positive".into()));
        }
        if self.embedding_dim == 0 {
            return Err(Error::InvalidConfig("embedding_dim must be positive".into()));
        }
        if self.collections.is_empty() {
            return Err(Error::InvalidConfig("at least one collection is required".into()));
        }
        self.collection_names().map(|_| ())
    }

    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig { chunk_size: self.chunk_size, overlap: self.chunk_overlap }
    }

    pub fn collection_names(&self) -> Result<Vec<CollectionName>> {
        self.collections.iter().map(|c| CollectionName::new(c.as_str())).collect()
    }

    pub fn store_path(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.store_dir)
    }

    pub fn corpus_path(&self, base: &Path) -> PathBuf {
        resolve_with_base(base, &self.corpus_dir)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = RagSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.collection_names().unwrap().len(), 3);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let settings = RagSettings { chunk_size: 100, chunk_overlap: 100, ..RagSettings::default() };
        assert!(settings.validate().unwrap_err().is_config());
    }

    #[test]
    fn bad_collection_name_is_rejected() {
        let settings = RagSettings { collections: vec!["Anatomy Notes".into()], ..RagSettings::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn figment_overrides_defaults() {
        let figment = Figment::new()
            .merge(Serialized::default("rag", RagSettings::default()))
            .merge(Toml::string("[rag]\nmax_tokens = 900\nbackend = \"lance\"\n"));
        let config = Config::from_figment(figment);
        let rag = config.rag().unwrap();
        assert_eq!(rag.max_tokens, 900);
        assert_eq!(rag.backend, StoreBackend::Lance);
        assert_eq!(rag.chunk_size, 500);
    }

    #[test]
    fn resolve_relative_against_base() {
        let p = resolve_with_base(Path::new("/srv/app"), "data/store");
        assert_eq!(p, PathBuf::from("/srv/app/data/store"));
        assert_eq!(resolve_with_base(Path::new("/srv"), "/abs"), PathBuf::from("/abs"));
    }
}
