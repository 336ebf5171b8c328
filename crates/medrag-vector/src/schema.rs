use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// Arrow schema of a collection table whose embeddings have `dim` components.
pub fn build_documents_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("seq", DataType::Int64, false),
		Field::new("text", DataType::Utf8, false),
		Field::new("source", DataType::Utf8, false),
		Field::new("section", DataType::Utf8, true),
		Field::new("topic", DataType::Utf8, true),
		Field::new("body_system", DataType::Utf8, true),
		Field::new("complexity", DataType::Int32, true),
		Field::new("url", DataType::Utf8, true),
		Field::new("created_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
		Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}

/// Embedding width recorded in a documents schema.
pub fn vector_dim(schema: &Schema) -> Option<usize> {
	match schema.field_with_name("vector").ok()?.data_type() {
		DataType::FixedSizeList(_, n) => Some(*n as usize),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dim_round_trips_through_schema() {
		assert_eq!(vector_dim(&build_documents_schema(384)), Some(384));
		assert_eq!(vector_dim(&Schema::empty()), None);
	}
}
