//! LanceDB connection helpers and Arrow conversion for collection tables.

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{
	Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch, StringArray, TimestampMillisecondArray,
};
use chrono::{DateTime, Utc};
use lancedb::{connect, Connection};
use std::sync::Arc;

use medrag_core::error::{Error, Result};
use medrag_core::types::{BodySystem, ComplexityLevel, DocumentMetadata, SearchHit, VectorDocument};

use crate::schema::build_documents_schema;

pub async fn open_db(uri: &str) -> Result<Connection> {
	connect(uri).execute().await.map_err(Error::storage)
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
	let names = conn.table_names().execute().await.map_err(Error::storage)?;
	Ok(names.iter().any(|n| n == name))
}

/// A document together with its first-insertion sequence number.
#[derive(Debug, Clone)]
pub struct StoredRow {
	pub seq: i64,
	pub document: VectorDocument,
}

pub fn rows_to_record_batch(rows: &[StoredRow], dim: usize) -> Result<RecordBatch> {
	let schema = build_documents_schema(dim as i32);
	let mut ids = Vec::new(); let mut seqs = Vec::new(); let mut texts = Vec::new(); let mut sources = Vec::new();
	let mut sections = Vec::new(); let mut topics = Vec::new(); let mut systems = Vec::new(); let mut levels = Vec::new(); let mut urls = Vec::new();
	let mut created = Vec::new(); let mut updated = Vec::new(); let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::new();
	for row in rows {
		let doc = &row.document; let meta = &doc.metadata;
		ids.push(doc.id.clone()); seqs.push(row.seq); texts.push(doc.text.clone()); sources.push(meta.source.clone());
		sections.push(meta.section.clone()); topics.push(meta.topic.clone()); systems.push(meta.body_system.map(|s| s.as_str().to_string()));
		levels.push(meta.complexity.map(|c| c.get() as i32)); urls.push(meta.url.clone());
		created.push(meta.created_at.timestamp_millis()); updated.push(meta.updated_at.timestamp_millis());
		vectors.push(Some(doc.embedding.iter().map(|&x| Some(x)).collect()));
	}
	RecordBatch::try_new(schema, vec![
		Arc::new(StringArray::from(ids)),
		Arc::new(Int64Array::from(seqs)),
		Arc::new(StringArray::from(texts)),
		Arc::new(StringArray::from(sources)),
		Arc::new(StringArray::from(sections)),
		Arc::new(StringArray::from(topics)),
		Arc::new(StringArray::from(systems)),
		Arc::new(Int32Array::from(levels)),
		Arc::new(StringArray::from(urls)),
		Arc::new(TimestampMillisecondArray::from(created)),
		Arc::new(TimestampMillisecondArray::from(updated)),
		Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors.into_iter(), dim as i32)),
	])
	.map_err(Error::storage)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
	batch
		.column_by_name(name)
		.and_then(|c| c.as_any().downcast_ref::<T>())
		.ok_or_else(|| Error::Storage(format!("column '{}' missing or mistyped", name)))
}

fn opt_string(col: &StringArray, i: usize) -> Option<String> {
	if col.is_null(i) { None } else { Some(col.value(i).to_string()) }
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
	DateTime::from_timestamp_millis(millis).ok_or_else(|| Error::Storage(format!("timestamp {} out of range", millis)))
}

/// Decode every row of a batch; the `vector` column is optional so that
/// projections without it still decode.
pub fn record_batch_to_rows(batch: &RecordBatch) -> Result<Vec<StoredRow>> {
	let ids = column::<StringArray>(batch, "id")?; let seqs = column::<Int64Array>(batch, "seq")?;
	let texts = column::<StringArray>(batch, "text")?; let sources = column::<StringArray>(batch, "source")?;
	let sections = column::<StringArray>(batch, "section")?; let topics = column::<StringArray>(batch, "topic")?;
	let systems = column::<StringArray>(batch, "body_system")?; let levels = column::<Int32Array>(batch, "complexity")?;
	let urls = column::<StringArray>(batch, "url")?;
	let created = column::<TimestampMillisecondArray>(batch, "created_at")?; let updated = column::<TimestampMillisecondArray>(batch, "updated_at")?;
	let vectors = batch.column_by_name("vector").and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

	let mut rows = Vec::with_capacity(batch.num_rows());
	for i in 0..batch.num_rows() {
		let body_system = match opt_string(systems, i) {
			Some(s) => Some(s.parse::<BodySystem>().map_err(|e| Error::Storage(e.to_string()))?),
			None => None,
		};
		let complexity = if levels.is_null(i) { None } else {
			let level = u8::try_from(levels.value(i)).map_err(Error::storage)?;
			Some(ComplexityLevel::new(level).map_err(|e| Error::Storage(e.to_string()))?)
		};
		let embedding = match vectors {
			Some(v) if !v.is_null(i) => v.value(i).as_primitive::<Float32Type>().values().to_vec(),
			_ => Vec::new(),
		};
		let metadata = DocumentMetadata {
			source: sources.value(i).to_string(),
			section: opt_string(sections, i),
			topic: opt_string(topics, i),
			body_system,
			complexity,
			url: opt_string(urls, i),
			created_at: timestamp(created.value(i))?,
			updated_at: timestamp(updated.value(i))?,
		};
		rows.push(StoredRow { seq: seqs.value(i), document: VectorDocument { id: ids.value(i).to_string(), text: texts.value(i).to_string(), embedding, metadata } });
	}
	Ok(rows)
}

/// Decode a vector search result batch into hits plus their sequence numbers.
/// Cosine distance is turned back into similarity.
pub fn record_batch_to_hits(batch: &RecordBatch) -> Result<Vec<(i64, SearchHit)>> {
	let distances = column::<Float32Array>(batch, "_distance")?;
	let rows = record_batch_to_rows(batch)?;
	Ok(rows
		.into_iter()
		.enumerate()
		.map(|(i, row)| {
			let doc = row.document;
			(row.seq, SearchHit { id: doc.id, text: doc.text, metadata: doc.metadata, score: 1.0 - distances.value(i) })
		})
		.collect())
}

#[cfg(test)]
mod tests {
	use super::*;
	use medrag_core::types::{document_id, SourceMetadata};

	#[test]
	fn rows_survive_arrow_conversion() {
		let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
		let meta = SourceMetadata::new("heart")
			.with_section("cardio")
			.with_body_system(BodySystem::Cardiovascular)
			.with_complexity(ComplexityLevel::new(2).unwrap());
		let doc = VectorDocument {
			id: document_id("heart", "The heart pumps."),
			text: "The heart pumps.".into(),
			embedding: vec![0.5, 0.5, 0.0],
			metadata: DocumentMetadata::from_source(&meta, now),
		};
		let batch = rows_to_record_batch(&[StoredRow { seq: 7, document: doc.clone() }], 3).unwrap();
		let rows = record_batch_to_rows(&batch).unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].seq, 7);
		assert_eq!(rows[0].document, doc);
	}
}
