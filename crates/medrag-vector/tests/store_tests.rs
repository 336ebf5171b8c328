use chrono::Utc;
use medrag_core::error::Error;
use medrag_core::traits::VectorStore;
use medrag_core::types::{
    document_id, BodySystem, CollectionName, ComplexityLevel, DocumentMetadata, MetadataFilter, SourceMetadata, VectorDocument,
};
use medrag_vector::{LanceVectorStore, MemoryVectorStore};

fn doc(source: &str, text: &str, embedding: Vec<f32>, meta: SourceMetadata) -> VectorDocument {
    let meta = SourceMetadata { source: source.to_string(), ..meta };
    VectorDocument { id: document_id(source, text), text: text.to_string(), embedding, metadata: DocumentMetadata::from_source(&meta, Utc::now()) }
}

fn corpus() -> Vec<VectorDocument> {
    let cardio = SourceMetadata::default().with_body_system(BodySystem::Cardiovascular);
    vec![
        doc("heart", "first tie", vec![1.0, 0.0, 0.0], cardio.clone().with_complexity(ComplexityLevel::new(1).unwrap())),
        doc("heart", "second tie", vec![1.0, 0.0, 0.0], cardio.clone().with_complexity(ComplexityLevel::new(4).unwrap())),
        doc("lungs", "lungs", vec![0.6, 0.8, 0.0], SourceMetadata::default().with_body_system(BodySystem::Respiratory)),
        doc("brain", "no level", vec![0.0, 0.0, 1.0], cardio),
    ]
}

/// Behaviour shared by every backend.
async fn exercise_store(store: &dyn VectorStore) {
    let anatomy = CollectionName::new("anatomy").unwrap();
    let missing = CollectionName::new("missing").unwrap();
    store.connect().await.unwrap();
    store.connect().await.unwrap();

    assert!(store.query(&missing, &[1.0, 0.0, 0.0], &MetadataFilter::default(), 5).await.unwrap().is_empty());
    assert_eq!(store.count(&missing).await.unwrap(), 0);

    assert_eq!(store.add_documents(&anatomy, corpus()).await.unwrap(), 4);
    assert_eq!(store.add_documents(&anatomy, corpus()).await.unwrap(), 4);
    assert_eq!(store.count(&anatomy).await.unwrap(), 4, "upsert by id does not duplicate");

    let stored = corpus();
    let mut ids: Vec<String> = stored.iter().map(|d| d.id.clone()).collect();
    ids.push(ids[0].clone());
    ids.push(document_id("kidney", "never stored"));
    assert_eq!(store.count_ids(&anatomy, &ids).await.unwrap(), 4);
    assert_eq!(store.count_ids(&anatomy, &[]).await.unwrap(), 0);
    assert_eq!(store.count_ids(&missing, &ids).await.unwrap(), 0);
    assert_eq!(store.collections().await.unwrap(), vec![anatomy.clone()]);

    // Magnitude does not matter and equal scores keep insertion order.
    let hits = store.query(&anatomy, &[3.0, 0.0, 0.0], &MetadataFilter::default(), 3).await.unwrap();
    let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    assert_eq!(texts, vec!["first tie", "second tie", "lungs"]);
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert!(hits[1].score >= hits[2].score);

    let filter = MetadataFilter {
        body_system: Some(BodySystem::Cardiovascular),
        max_complexity: Some(ComplexityLevel::new(2).unwrap()),
        ..MetadataFilter::default()
    };
    let hits = store.query(&anatomy, &[1.0, 0.0, 0.0], &filter, 10).await.unwrap();
    let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    assert_eq!(texts, vec!["first tie", "no level"]);

    let nothing = MetadataFilter { source: Some("kidney".into()), ..MetadataFilter::default() };
    assert!(store.query(&anatomy, &[1.0, 0.0, 0.0], &nothing, 10).await.unwrap().is_empty());

    let err = store.query(&anatomy, &[1.0, 0.0], &MetadataFilter::default(), 1).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
    let bad = vec![doc("x", "short", vec![1.0], SourceMetadata::default())];
    assert!(matches!(store.add_documents(&anatomy, bad).await.unwrap_err(), Error::DimensionMismatch { .. }));
    assert_eq!(store.count(&anatomy).await.unwrap(), 4);

    store.close().await.unwrap();
    store.close().await.unwrap();
}

#[tokio::test]
async fn memory_store_contract() {
    exercise_store(&MemoryVectorStore::new()).await;
}

#[tokio::test]
async fn lance_store_contract() {
    let tmp = tempfile::tempdir().unwrap();
    let store = LanceVectorStore::new(tmp.path().join("lance").to_string_lossy().into_owned());
    exercise_store(&store).await;
}

#[tokio::test]
async fn closed_store_refuses_reads() {
    let store = MemoryVectorStore::new();
    let anatomy = CollectionName::new("anatomy").unwrap();
    assert!(store.count(&anatomy).await.unwrap_err().is_transient());
    store.close().await.unwrap();
}

#[tokio::test]
async fn overwrite_keeps_creation_time() {
    let store = MemoryVectorStore::new();
    let physiology = CollectionName::new("physiology").unwrap();
    store.connect().await.unwrap();
    let first = corpus();
    let created = first[0].metadata.created_at;
    store.add_documents(&physiology, first).await.unwrap();
    store.add_documents(&physiology, corpus()).await.unwrap();
    let hits = store.query(&physiology, &[1.0, 0.0, 0.0], &MetadataFilter::default(), 1).await.unwrap();
    assert_eq!(hits[0].metadata.created_at, created);
    assert!(hits[0].metadata.updated_at >= created);
}

#[tokio::test]
async fn memory_snapshots_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let pathology = CollectionName::new("pathology").unwrap();
    {
        let store = MemoryVectorStore::with_snapshot_dir(tmp.path());
        store.connect().await.unwrap();
        store.add_documents(&pathology, corpus()).await.unwrap();
        store.close().await.unwrap();
    }
    assert!(tmp.path().join("pathology.json").exists());

    let reopened = MemoryVectorStore::with_snapshot_dir(tmp.path());
    reopened.connect().await.unwrap();
    assert_eq!(reopened.count(&pathology).await.unwrap(), 4);
    let hits = reopened.query(&pathology, &[1.0, 0.0, 0.0], &MetadataFilter::default(), 2).await.unwrap();
    assert_eq!(hits[0].text, "first tie");
    reopened.add_documents(&pathology, corpus()).await.unwrap();
    assert_eq!(reopened.count(&pathology).await.unwrap(), 4);
}

#[tokio::test]
async fn failed_snapshot_write_leaves_collection_unchanged() {
    let tmp = tempfile::tempdir().unwrap();
    let anatomy = CollectionName::new("anatomy").unwrap();
    let store = MemoryVectorStore::with_snapshot_dir(tmp.path());
    store.connect().await.unwrap();
    let mut docs = corpus();
    let late = docs.split_off(2);
    store.add_documents(&anatomy, docs).await.unwrap();

    // A directory in place of the snapshot file makes the rename fail.
    let target = tmp.path().join("anatomy.json");
    std::fs::remove_file(&target).unwrap();
    std::fs::create_dir(&target).unwrap();
    std::fs::write(target.join("occupied"), b"x").unwrap();

    let err = store.add_documents(&anatomy, late).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(store.count(&anatomy).await.unwrap(), 2);
    let hits = store.query(&anatomy, &[0.0, 0.0, 1.0], &MetadataFilter::default(), 10).await.unwrap();
    let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    assert_eq!(texts, vec!["first tie", "second tie"]);
}

#[tokio::test]
async fn unscorable_documents_are_not_ranked() {
    let store = MemoryVectorStore::new();
    let anatomy = CollectionName::new("anatomy").unwrap();
    store.connect().await.unwrap();
    let mut docs = corpus();
    docs.insert(0, doc("corrupt", "nan vector", vec![f32::NAN, 0.0, 0.0], SourceMetadata::default()));
    store.add_documents(&anatomy, docs).await.unwrap();

    let hits = store.query(&anatomy, &[1.0, 0.0, 0.0], &MetadataFilter::default(), 10).await.unwrap();
    let texts: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
    assert_eq!(texts[..3], ["first tie", "second tie", "lungs"]);
    assert!(hits.iter().all(|h| !h.score.is_nan()));
    assert!(!texts.contains(&"nan vector"));
}
