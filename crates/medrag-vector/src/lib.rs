//! Vector store backends.
//!
//! [`MemoryVectorStore`] keeps collections in process (optionally snapshotted
//! to JSON files); [`LanceVectorStore`] keeps one LanceDB table per collection.

use std::path::Path;
use std::sync::Arc;

use medrag_core::config::{RagSettings, StoreBackend};
use medrag_core::traits::VectorStore;

pub mod lance_store;
pub mod memory;
pub mod schema;
pub mod table;

pub use lance_store::{filter_to_sql, LanceVectorStore};
pub use memory::MemoryVectorStore;

/// Store selected by `settings.backend`, rooted at `store_dir` resolved
/// against `base`. The store still has to be connected.
pub fn store_from_settings(settings: &RagSettings, base: &Path) -> Arc<dyn VectorStore> {
	let dir = settings.store_path(base);
	match settings.backend {
		StoreBackend::Memory => Arc::new(MemoryVectorStore::with_snapshot_dir(dir)),
		StoreBackend::Lance => Arc::new(LanceVectorStore::new(dir.to_string_lossy().into_owned())),
	}
}
