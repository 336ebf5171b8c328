use std::sync::Arc;

use medrag_core::config::RagSettings;
use medrag_core::similarity::{cosine_similarity, magnitude};
use medrag_core::traits::Embedder;
use medrag_embed::{embedder_from_settings, EmbeddingClient, HashEmbedder};

#[test]
fn hash_embedder_shapes_and_determinism() {
    let embedder = HashEmbedder::new(384);
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 384);
    assert_eq!(embedder.model_id(), "hash:d384");
    assert!((magnitude(v1) - 1.0).abs() <= 1e-3, "vector is L2-normalized");
    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn hash_embedder_ranks_overlapping_text_higher() {
    let embedder = HashEmbedder::new(256);
    let texts = vec![
        "the heart pumps blood through the arteries".to_string(),
        "heart pumps blood".to_string(),
        "kidneys filter plasma into urine".to_string(),
    ];
    let v = embedder.embed_batch(&texts).unwrap();
    assert!(cosine_similarity(&v[0], &v[1]) > cosine_similarity(&v[0], &v[2]));
}

#[test]
fn settings_select_hash_embedder() {
    let settings = RagSettings { embedding_dim: 64, ..RagSettings::default() };
    let embedder = embedder_from_settings(&settings).unwrap();
    assert_eq!(embedder.dim(), 64);
}

#[tokio::test]
async fn client_preserves_input_order() {
    let client = EmbeddingClient::new(Arc::new(HashEmbedder::new(32)));
    let texts: Vec<String> = ["alpha", "beta", "gamma"].iter().map(|s| s.to_string()).collect();
    let batched = client.embed_batch(&texts).await.unwrap();
    for (text, vector) in texts.iter().zip(batched.iter()) {
        assert_eq!(&client.embed_query(text).await.unwrap(), vector);
    }
    assert!(client.embed_batch(&[]).await.unwrap().is_empty());
}

#[test]
#[ignore]
fn candle_embedder_loads_local_model() {
    let dir = medrag_embed::resolve_model_dir(None).expect("model dir");
    let model = medrag_embed::CandleEmbedder::load(&dir).expect("load");
    let v = model.embed_batch(&["The heart has four chambers.".to_string()]).unwrap();
    assert_eq!(v[0].len(), model.dim());
}
