//! Embedding and similarity utilities backing retrieval ranking elsewhere in
//! the system. The HTTP embedder talks to an OpenAI-compatible endpoint; the
//! fake embedder is deterministic and local for tests and development.

use crate::config::EmbeddingConfig;
use crate::error::CardwrightError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Contract cap on batch size, enforced before any network call.
pub const MAX_BATCH: usize = 100;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text. Rejects empty input; the returned vector always has
    /// exactly `dimensions()` entries.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed up to [`MAX_BATCH`] texts, output order matching input order
    /// regardless of how the underlying service orders its response.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;
}

impl std::fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("dimensions", &self.dimensions())
            .finish()
    }
}

/// Cosine similarity between two vectors. Errors on mismatched lengths and
/// returns 0.0 whenever either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        anyhow::bail!(
            "cosine_similarity length mismatch: {} vs {}",
            a.len(),
            b.len()
        );
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a * norm_b))
}

fn check_input(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("cannot embed empty text");
    }
    Ok(())
}

fn check_batch(texts: &[String]) -> Result<()> {
    if texts.len() > MAX_BATCH {
        anyhow::bail!("batch size {} exceeds the {} item cap", texts.len(), MAX_BATCH);
    }
    for (i, t) in texts.iter().enumerate() {
        if t.trim().is_empty() {
            anyhow::bail!("cannot embed empty text (batch index {})", i);
        }
    }
    Ok(())
}

/// Everything applied to a raw batch response before it leaves the embedder:
/// re-sort by reported index, verify completeness, check dimensionality.
fn assemble_batch(
    items: Vec<(usize, Vec<f32>)>,
    expected: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>> {
    let vectors = order_by_index(items, expected)?;
    for v in &vectors {
        if v.len() != dims {
            anyhow::bail!(
                "embedding dimensionality mismatch: service returned {} values, expected {}",
                v.len(),
                dims
            );
        }
    }
    Ok(vectors)
}

/// Re-sort service results by their reported index so output order always
/// matches input order, and verify nothing is missing or duplicated.
fn order_by_index(mut items: Vec<(usize, Vec<f32>)>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        anyhow::bail!(
            "embedding service returned {} vectors for {} inputs",
            items.len(),
            expected
        );
    }
    items.sort_by_key(|(idx, _)| *idx);
    for (pos, (idx, _)) in items.iter().enumerate() {
        if *idx != pos {
            anyhow::bail!("embedding service returned bad index {} at position {}", idx, pos);
        }
    }
    Ok(items.into_iter().map(|(_, v)| v).collect())
}

// OpenAI-compatible HTTP implementation
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    retries: u32,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponseData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedResponseData>,
}

impl HttpEmbedder {
    pub fn new(cfg: &EmbeddingConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .context("Failed to build reqwest client with timeout")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.clone(),
            api_key,
            model: cfg.model.clone(),
            dims: cfg.dimensions,
            retries: cfg.retries.clamp(1, 10),
        })
    }

    /// One request with bounded exponential-backoff retries.
    async fn request(&self, input: &[String]) -> Result<Vec<(usize, Vec<f32>)>> {
        let body = EmbedRequest {
            model: &self.model,
            input,
        };
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let mut last_err: Option<anyhow::Error> = None;
        for i in 0..self.retries {
            let send_res = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .context("Failed to send request to embedding service");
            let response = match send_res {
                Ok(resp) => resp,
                Err(e) => {
                    last_err = Some(e);
                    backoff(i).await;
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                last_err = Some(anyhow::anyhow!(
                    "embedding service error {}: {}",
                    status,
                    error_text
                ));
                backoff(i).await;
                continue;
            }

            let parse_res: Result<EmbedResponse> = response
                .json()
                .await
                .context("Failed to parse embedding response");
            match parse_res {
                Ok(result) => {
                    return Ok(result
                        .data
                        .into_iter()
                        .map(|d| (d.index, d.embedding))
                        .collect());
                }
                Err(e) => {
                    last_err = Some(e);
                    backoff(i).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Unknown embedding service error")))
    }

    fn check_dims(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            anyhow::bail!(
                "embedding dimensionality mismatch: service returned {} values, model '{}' is configured for {}",
                vector.len(),
                self.model,
                self.dims
            );
        }
        Ok(())
    }
}

async fn backoff(attempt: u32) {
    let delay_ms = 200u64 * (1u64 << attempt);
    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text)?;
        debug!(
            "Generating embedding (model={}, chars={})",
            self.model,
            text.len()
        );
        let input = [text.to_string()];
        let mut items = self.request(&input).await?;
        let vector = items
            .pop()
            .map(|(_, v)| v)
            .context("No embedding returned from service")?;
        self.check_dims(&vector)?;
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_batch(texts)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Generating batch embeddings (n={})", texts.len());
        let items = self.request(texts).await?;
        assemble_batch(items, texts.len(), self.dims)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

// Deterministic, local FakeEmbedder for testing/dev (no network)
pub struct FakeEmbedder {
    dims: usize,
}

impl FakeEmbedder {
    pub fn new(dims: Option<usize>) -> Self {
        Self {
            dims: dims.unwrap_or(768).max(1),
        }
    }

    // Stable pseudo-random unit vector from a blake3 extendable output stream.
    fn generate(&self, text: &str) -> Vec<f32> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut out = Vec::with_capacity(self.dims);
        let mut chunk = [0u8; 4];
        while out.len() < self.dims {
            reader.fill(&mut chunk);
            let val = u32::from_le_bytes(chunk);
            let v01 = (val as f32) / (u32::MAX as f32 + 1.0);
            out.push(v01 * 2.0 - 1.0);
        }
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut out {
                *v /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text)?;
        Ok(self.generate(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_batch(texts)?;
        Ok(texts.iter().map(|t| self.generate(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Create an embedder from configuration.
///
/// Provider selection: honor an explicit provider, else auto-detect from
/// credentials, else fall back to the deterministic fake unless strict mode
/// forbids it. Placeholder keys count as absent.
pub fn create_embedder(cfg: &EmbeddingConfig) -> crate::error::Result<Arc<dyn Embedder>> {
    let is_placeholder = |s: &str| {
        let t = s.trim();
        t.is_empty()
            || t.contains("${")
            || t.eq_ignore_ascii_case("your-api-key-here")
            || t.eq_ignore_ascii_case("changeme")
    };
    let build_http = |key: String| -> crate::error::Result<Arc<dyn Embedder>> {
        let embedder = HttpEmbedder::new(cfg, key).map_err(|e| CardwrightError::Embedding {
            message: e.to_string(),
        })?;
        Ok(Arc::new(embedder))
    };
    let key = std::env::var(&cfg.api_key_env).unwrap_or_default();

    match cfg.provider.as_str() {
        "openai" | "http" => {
            if is_placeholder(&key) {
                return Err(CardwrightError::Embedding {
                    message: format!(
                        "embedding provider '{}' selected but {} is not set",
                        cfg.provider, cfg.api_key_env
                    ),
                });
            }
            info!("Using HTTP embeddings (model={})", cfg.model);
            return build_http(key);
        }
        "fake" => {
            if cfg.strict {
                return Err(CardwrightError::Embedding {
                    message: "strict mode refuses the fake embedder".to_string(),
                });
            }
            info!("Using FakeEmbedder ({} dimensions)", cfg.dimensions);
            return Ok(Arc::new(FakeEmbedder::new(Some(cfg.dimensions))));
        }
        _ => {}
    }

    // Auto-detect
    if !is_placeholder(&key) {
        info!("Using HTTP embeddings (model={})", cfg.model);
        return build_http(key);
    }
    if cfg.strict {
        return Err(CardwrightError::Embedding {
            message: format!(
                "No embedding provider configured; set {} or embedding.provider",
                cfg.api_key_env
            ),
        });
    }
    let fake = FakeEmbedder::new(Some(cfg.dimensions));
    info!(
        "Using FakeEmbedder (deterministic) with {} dimensions",
        fake.dimensions()
    );
    Ok(Arc::new(fake))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_embedder_is_deterministic() {
        let fe = FakeEmbedder::new(Some(128));
        let a1 = fe.embed("hello world").await.unwrap();
        let a2 = fe.embed("hello world").await.unwrap();
        assert_eq!(a1.len(), 128);
        assert!(a1.iter().zip(&a2).all(|(x, y)| (x - y).abs() < 1e-8));
    }

    #[tokio::test]
    async fn fake_embedder_varies_with_input() {
        let fe = FakeEmbedder::new(None);
        let a = fe.embed("foo").await.unwrap();
        let b = fe.embed("bar").await.unwrap();
        assert_eq!(a.len(), 768);
        assert!(a.iter().zip(&b).any(|(x, y)| (x - y).abs() > 1e-6));
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let fe = FakeEmbedder::new(Some(16));
        assert!(fe.embed("").await.is_err());
        assert!(fe.embed("   ").await.is_err());
        assert!(fe.embed_batch(&["ok".into(), " ".into()]).await.is_err());
    }

    #[tokio::test]
    async fn batch_cap_is_enforced() {
        let fe = FakeEmbedder::new(Some(8));
        let too_many: Vec<String> = (0..=MAX_BATCH).map(|i| format!("t{}", i)).collect();
        assert!(fe.embed_batch(&too_many).await.is_err());
        let ok: Vec<String> = (0..MAX_BATCH).map(|i| format!("t{}", i)).collect();
        assert_eq!(fe.embed_batch(&ok).await.unwrap().len(), MAX_BATCH);
    }

    #[test]
    fn order_by_index_restores_input_order() {
        let shuffled = vec![
            (2usize, vec![2.0f32]),
            (0, vec![0.0]),
            (1, vec![1.0]),
        ];
        let ordered = order_by_index(shuffled, 3).unwrap();
        assert_eq!(ordered, vec![vec![0.0], vec![1.0], vec![2.0]]);

        assert!(order_by_index(vec![(0, vec![0.0])], 2).is_err());
        assert!(order_by_index(vec![(0, vec![0.0]), (2, vec![2.0])], 2).is_err());
    }

    #[test]
    fn batch_assembly_reorders_and_checks_dimensions() {
        // Service answered out of order; assembly restores input order.
        let shuffled = vec![
            (1usize, vec![1.0f32, 1.0]),
            (0, vec![0.0, 0.0]),
            (2, vec![2.0, 2.0]),
        ];
        let vectors = assemble_batch(shuffled, 3, 2).unwrap();
        assert_eq!(vectors, vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]]);

        // A vector of the wrong width is rejected even when ordering is fine.
        let narrow = vec![(0usize, vec![0.0f32, 0.0]), (1, vec![1.0])];
        assert!(assemble_batch(narrow, 2, 2).is_err());
    }

    #[test]
    fn cosine_bounds() {
        let a = vec![0.5f32, -0.25, 0.75];
        let sim = cosine_similarity(&a, &a).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);

        let zero = vec![0.0f32; 3];
        assert_eq!(cosine_similarity(&a, &zero).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero).unwrap(), 0.0);

        assert!(cosine_similarity(&a, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn create_embedder_strict_requires_credentials() {
        let mut cfg = EmbeddingConfig::default();
        cfg.api_key_env = "CARDWRIGHT_TEST_MISSING_KEY".to_string();
        cfg.strict = true;
        let err = create_embedder(&cfg).unwrap_err();
        assert!(matches!(err, CardwrightError::Embedding { .. }));

        cfg.strict = false;
        let embedder = create_embedder(&cfg).unwrap();
        assert_eq!(embedder.dimensions(), cfg.dimensions);
    }
}
