//! Live-endpoint embedding tests. Not part of the default suite: run with
//! `--features live_providers` and real credentials in the environment.

#![cfg(feature = "live_providers")]

use cardwright::config::EmbeddingConfig;
use cardwright::{Embedder, cosine_similarity, create_embedder};

#[tokio::test]
async fn live_embed_returns_configured_dimensions() {
    let mut cfg = EmbeddingConfig::default();
    cfg.provider = "openai".into();
    let embedder = create_embedder(&cfg).expect("live_providers runs need credentials");
    let vector = embedder.embed("checkout service blueprint card").await.unwrap();
    assert_eq!(vector.len(), embedder.dimensions());
    let self_sim = cosine_similarity(&vector, &vector).unwrap();
    assert!((self_sim - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn live_embed_batch_matches_input_order() {
    let mut cfg = EmbeddingConfig::default();
    cfg.provider = "openai".into();
    let embedder = create_embedder(&cfg).expect("live_providers runs need credentials");
    let texts: Vec<String> = vec![
        "payment gateway integration".into(),
        "frontend cart panel".into(),
        "data pipeline freshness".into(),
    ];
    let vectors = embedder.embed_batch(&texts).await.unwrap();
    assert_eq!(vectors.len(), texts.len());
    for v in &vectors {
        assert_eq!(v.len(), embedder.dimensions());
    }
    // Each batch entry must embed the text at its own position.
    for (text, batched) in texts.iter().zip(&vectors) {
        let single = embedder.embed(text).await.unwrap();
        let sim = cosine_similarity(&single, batched).unwrap();
        assert!(sim > 0.99, "batch order drifted: similarity {}", sim);
    }
}
