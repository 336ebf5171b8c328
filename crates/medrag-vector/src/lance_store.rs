//! LanceDB-backed vector store: one table per collection.

use arrow_array::{RecordBatchIterator, RecordBatchReader};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use medrag_core::error::{Error, Result};
use medrag_core::traits::VectorStore;
use medrag_core::types::{CollectionName, DocumentId, MetadataFilter, SearchHit, VectorDocument};

use crate::schema::vector_dim;
use crate::table::{open_db, record_batch_to_hits, record_batch_to_rows, rows_to_record_batch, table_exists, StoredRow};

/// SQL prefilter for a metadata filter; `None` when every field is unset.
pub fn filter_to_sql(filter: &MetadataFilter) -> Option<String> {
	let quote = |s: &str| format!("'{}'", s.replace('\'', "''"));
	let mut clauses = Vec::new();
	if let Some(system) = filter.body_system { clauses.push(format!("body_system = {}", quote(system.as_str()))); }
	if let Some(max) = filter.max_complexity { clauses.push(format!("(complexity IS NULL OR complexity <= {})", max.get())); }
	if let Some(source) = &filter.source { clauses.push(format!("source = {}", quote(source))); }
	if let Some(topic) = &filter.topic { clauses.push(format!("topic = {}", quote(topic))); }
	if clauses.is_empty() { None } else { Some(clauses.join(" AND ")) }
}

fn id_in_sql<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
	let list = ids.into_iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect::<Vec<_>>().join(", ");
	format!("id IN ({})", list)
}

pub struct LanceVectorStore {
	uri: String,
	conn: RwLock<Option<Connection>>,
	write_locks: Mutex<HashMap<CollectionName, Arc<Mutex<()>>>>,
}

impl LanceVectorStore {
	pub fn new(uri: impl Into<String>) -> Self {
		Self { uri: uri.into(), conn: RwLock::new(None), write_locks: Mutex::new(HashMap::new()) }
	}

	async fn connection(&self) -> Result<Connection> {
		self.conn.read().await.clone().ok_or_else(|| Error::Storage("vector store is not connected".into()))
	}

	async fn open(&self, conn: &Connection, collection: &CollectionName) -> Result<Option<Table>> {
		if !table_exists(conn, collection.as_str()).await? { return Ok(None); }
		Ok(Some(conn.open_table(collection.as_str()).execute().await.map_err(Error::storage)?))
	}

	async fn write_lock(&self, collection: &CollectionName) -> Arc<Mutex<()>> {
		self.write_locks.lock().await.entry(collection.clone()).or_default().clone()
	}

	/// Sequence numbers and creation times of rows already stored under `ids`.
	async fn existing_rows(&self, table: &Table, ids: &[&str]) -> Result<HashMap<String, StoredRow>> {
		let mut stream = table.query().only_if(id_in_sql(ids.iter().copied())).execute().await.map_err(Error::storage)?;
		let mut out = HashMap::new();
		while let Some(batch) = stream.try_next().await.map_err(Error::storage)? {
			for row in record_batch_to_rows(&batch)? { out.insert(row.document.id.clone(), row); }
		}
		Ok(out)
	}
}

#[async_trait]
impl VectorStore for LanceVectorStore {
	async fn connect(&self) -> Result<()> {
		let mut conn = self.conn.write().await;
		if conn.is_some() { return Ok(()); }
		if !self.uri.contains("://") { tokio::fs::create_dir_all(&self.uri).await?; }
		*conn = Some(open_db(&self.uri).await?);
		info!(uri = %self.uri, "lancedb vector store connected");
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		if self.conn.write().await.take().is_some() { debug!(uri = %self.uri, "lancedb connection released"); }
		Ok(())
	}

	async fn add_documents(&self, collection: &CollectionName, documents: Vec<VectorDocument>) -> Result<usize> {
		let conn = self.connection().await?;
		if documents.is_empty() { return Ok(0); }
		let lock = self.write_lock(collection).await;
		let _guard = lock.lock().await;

		// Later duplicates within one call win.
		let mut unique: Vec<VectorDocument> = Vec::with_capacity(documents.len());
		let mut position: HashMap<String, usize> = HashMap::new();
		for doc in documents {
			match position.get(&doc.id) {
				Some(&i) => unique[i] = doc,
				None => { position.insert(doc.id.clone(), unique.len()); unique.push(doc); }
			}
		}

		let table = self.open(&conn, collection).await?;
		let dim = match &table {
			Some(t) => vector_dim(&t.schema().await.map_err(Error::storage)?).ok_or_else(|| Error::Storage("table has no vector column".into()))?,
			None => unique[0].embedding.len(),
		};
		if let Some(bad) = unique.iter().find(|d| d.embedding.len() != dim) {
			return Err(Error::DimensionMismatch { expected: dim, actual: bad.embedding.len() });
		}

		let (existing, mut next_seq) = match &table {
			Some(t) => {
				let ids: Vec<&str> = unique.iter().map(|d| d.id.as_str()).collect();
				(self.existing_rows(t, &ids).await?, t.count_rows(None).await.map_err(Error::storage)? as i64)
			}
			None => (HashMap::new(), 0),
		};
		let rows: Vec<StoredRow> = unique
			.into_iter()
			.map(|mut document| match existing.get(&document.id) {
				Some(prev) => {
					document.metadata.created_at = prev.document.metadata.created_at;
					StoredRow { seq: prev.seq, document }
				}
				None => { let seq = next_seq; next_seq += 1; StoredRow { seq, document } }
			})
			.collect();
		let written = rows.len();

		let batch = rows_to_record_batch(&rows, dim)?;
		let schema = batch.schema();
		let reader: Box<dyn RecordBatchReader + Send> = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
		match table {
			Some(t) => {
				let mut mi = t.merge_insert(&["id"]);
				mi.when_matched_update_all(None).when_not_matched_insert_all();
				mi.execute(reader).await.map_err(Error::storage)?;
			}
			None => {
				info!(collection = %collection, dim, "creating collection table");
				conn.create_table(collection.as_str(), reader).execute().await.map_err(Error::storage)?;
			}
		}
		debug!(collection = %collection, written, "upserted documents");
		Ok(written)
	}

	async fn query(&self, collection: &CollectionName, query_vector: &[f32], filter: &MetadataFilter, top_k: usize) -> Result<Vec<SearchHit>> {
		let conn = self.connection().await?;
		let Some(table) = self.open(&conn, collection).await? else { return Ok(Vec::new()) };
		if top_k == 0 { return Ok(Vec::new()); }
		if let Some(dim) = vector_dim(&table.schema().await.map_err(Error::storage)?) {
			if dim != query_vector.len() { return Err(Error::DimensionMismatch { expected: dim, actual: query_vector.len() }); }
		}
		// Extra rows so ties at the cut are resolved by `seq`, not by scan order.
		let mut search = table
			.vector_search(query_vector.to_vec())
			.map_err(Error::storage)?
			.distance_type(DistanceType::Cosine)
			.limit(top_k * 2);
		if let Some(sql) = filter_to_sql(filter) { search = search.only_if(sql); }
		let mut stream = search.execute().await.map_err(Error::storage)?;
		let mut hits = Vec::new();
		while let Some(batch) = stream.try_next().await.map_err(Error::storage)? { hits.extend(record_batch_to_hits(&batch)?); }
		hits.sort_by(|a, b| b.1.score.total_cmp(&a.1.score).then(a.0.cmp(&b.0)));
		Ok(hits.into_iter().take(top_k).map(|(_, hit)| hit).collect())
	}

	async fn count(&self, collection: &CollectionName) -> Result<usize> {
		let conn = self.connection().await?;
		match self.open(&conn, collection).await? {
			Some(t) => t.count_rows(None).await.map_err(Error::storage),
			None => Ok(0),
		}
	}

	async fn count_ids(&self, collection: &CollectionName, ids: &[DocumentId]) -> Result<usize> {
		let conn = self.connection().await?;
		let wanted: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
		if wanted.is_empty() { return Ok(0); }
		match self.open(&conn, collection).await? {
			Some(t) => t.count_rows(Some(id_in_sql(wanted))).await.map_err(Error::storage),
			None => Ok(0),
		}
	}

	async fn collections(&self) -> Result<Vec<CollectionName>> {
		let conn = self.connection().await?;
		let names = conn.table_names().execute().await.map_err(Error::storage)?;
		let mut out: Vec<CollectionName> = names.into_iter().filter_map(|n| CollectionName::new(n).ok()).collect();
		out.sort();
		Ok(out)
	}
}
