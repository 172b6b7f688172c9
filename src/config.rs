//! Layered configuration: `cardwright.toml` (path override via
//! `CARDWRIGHT_CONFIG`) with `CARD_*` environment variables taking
//! precedence, `.env` loaded first via dotenvy.

use crate::error::{CardwrightError, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the composition engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub drafting: DraftingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
}

/// Generative drafting service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DraftingConfig {
    /// OpenAI-compatible base URL; `/chat/completions` is appended.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_ms: u64,
    /// How many characters of each reference section go into the prompt.
    pub reference_excerpt_chars: usize,
}

impl Default for DraftingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 12_000,
            reference_excerpt_chars: 220,
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "openai" or "fake"; empty means auto-detect from credentials.
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub retries: u32,
    pub base_url: String,
    pub api_key_env: String,
    /// When true, refuse to fall back to the deterministic fake embedder.
    pub strict: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            retries: 3,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            strict: false,
        }
    }
}

/// Retrieval-side knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// How many top-ranked documents contribute sections.
    pub top_documents: usize,
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_documents: 3,
            timeout_ms: 8_000,
        }
    }
}

impl Config {
    /// Load configuration from file + environment, then validate.
    pub fn load() -> Result<Self> {
        // Load .env first so CARD_* overrides can live there too.
        dotenvy::dotenv().ok();

        let path = std::env::var("CARDWRIGHT_CONFIG")
            .unwrap_or_else(|_| "cardwright.toml".to_string());
        let mut config = if std::path::Path::new(&path).exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| CardwrightError::Config {
                message: format!("failed to read {}: {}", path, e),
            })?;
            toml::from_str(&raw).map_err(|e| CardwrightError::Config {
                message: format!("failed to parse {}: {}", path, e),
            })?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let is_true = |s: &str| s == "1" || s.eq_ignore_ascii_case("true");

        if let Ok(v) = std::env::var("CARD_DRAFT_BASE_URL") {
            self.drafting.base_url = v;
        }
        if let Ok(v) = std::env::var("CARD_DRAFT_MODEL") {
            self.drafting.model = v;
        }
        if let Ok(v) = std::env::var("CARD_DRAFT_API_KEY_ENV") {
            self.drafting.api_key_env = v;
        }
        if let Some(v) = std::env::var("CARD_DRAFT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.drafting.timeout_ms = v;
        }
        if let Some(v) = std::env::var("CARD_DRAFT_EXCERPT_CHARS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.drafting.reference_excerpt_chars = v;
        }

        if let Ok(v) = std::env::var("CARD_EMBED_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Ok(v) = std::env::var("CARD_EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = std::env::var("CARD_EMBED_DIM")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.embedding.dimensions = v;
        }
        if let Some(v) = std::env::var("CARD_EMBED_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
        {
            self.embedding.retries = v;
        }
        if let Ok(v) = std::env::var("CARD_EMBED_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("CARD_EMBED_STRICT") {
            self.embedding.strict = is_true(&v);
        }

        if let Some(v) = std::env::var("CARD_RETRIEVAL_TOP_DOCS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.retrieval.top_documents = v;
        }
        if let Some(v) = std::env::var("CARD_RETRIEVAL_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.retrieval.timeout_ms = v;
        }
    }

    /// Clamp out-of-range values and warn on incoherent model/dimension pairs.
    pub fn validate(&mut self) -> Result<()> {
        if self.drafting.timeout_ms == 0 {
            return Err(CardwrightError::Config {
                message: "drafting.timeout_ms must be > 0".to_string(),
            });
        }
        if self.retrieval.timeout_ms == 0 {
            return Err(CardwrightError::Config {
                message: "retrieval.timeout_ms must be > 0".to_string(),
            });
        }
        if self.retrieval.top_documents == 0 {
            self.retrieval.top_documents = 1;
        }

        if self.embedding.retries == 0 {
            self.embedding.retries = 1;
        } else if self.embedding.retries > 10 {
            tracing::warn!(
                "embedding.retries {} exceeds max 10, clamping to 10",
                self.embedding.retries
            );
            self.embedding.retries = 10;
        }

        match self.embedding.model.as_str() {
            "text-embedding-3-small" => {
                if self.embedding.dimensions != 1536 {
                    if self.embedding.strict {
                        return Err(CardwrightError::Config {
                            message: format!(
                                "text-embedding-3-small requires 1536 dimensions, got {}",
                                self.embedding.dimensions
                            ),
                        });
                    }
                    tracing::warn!(
                        "text-embedding-3-small should use 1536 dimensions, got {}",
                        self.embedding.dimensions
                    );
                }
            }
            "text-embedding-3-large" => {
                if self.embedding.dimensions != 3072 {
                    if self.embedding.strict {
                        return Err(CardwrightError::Config {
                            message: format!(
                                "text-embedding-3-large requires 3072 dimensions, got {}",
                                self.embedding.dimensions
                            ),
                        });
                    }
                    tracing::warn!(
                        "text-embedding-3-large should use 3072 dimensions, got {}",
                        self.embedding.dimensions
                    );
                }
            }
            _ => tracing::warn!(
                "unknown embedding model '{}', dimension validation skipped",
                self.embedding.model
            ),
        }

        Ok(())
    }
}
