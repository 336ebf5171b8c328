use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding backend failed: {0}")]
    Embedding(String),

    #[error("Storage backend failed: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Population of collection '{collection}' failed: {source}")]
    Population {
        collection: String,
        #[source]
        source: Arc<Error>,
    },
}

impl Error {
    /// Backend failures a caller may retry; configuration errors never are.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Embedding(_) | Error::Storage(_) | Error::Io(_) => true,
            Error::Population { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::UnknownCollection(_) | Error::DimensionMismatch { .. }
        )
    }

    pub fn embedding(e: impl std::fmt::Display) -> Self {
        Error::Embedding(e.to_string())
    }

    pub fn storage(e: impl std::fmt::Display) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_flags() {
        assert!(Error::Storage("disk".into()).is_transient());
        assert!(!Error::InvalidConfig("overlap".into()).is_transient());
        assert!(Error::UnknownCollection("x".into()).is_config());
        let wrapped = Error::Population { collection: "anatomy".into(), source: Arc::new(Error::Embedding("cold".into())) };
        assert!(wrapped.is_transient());
        assert!(wrapped.to_string().contains("anatomy"));
    }
}
