//! Embedding provider with model-priority initialisation and a deterministic
//! local fallback.
//!
//! At start-up the provider walks `EMBED_MODEL_PRIORITY` and keeps the first
//! sentence-embedding model that initialises. If none do, it installs a
//! hashed bag-of-words fallback so the service stays functional offline. The
//! chosen dimension is fixed for the process lifetime.

use anyhow::{Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::AppError;

/// Dimension of the hashed bag-of-words fallback.
pub const FALLBACK_DIMENSION: usize = 100;

/// Buckets each token is spread over in the fallback embedding.
const FALLBACK_SPREAD: usize = 5;

enum Backend {
    Model {
        model: Mutex<Option<TextEmbedding>>,
        name: String,
    },
    LocalHash,
}

pub struct EmbeddingProvider {
    backend: Backend,
    dimension: usize,
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match &self.backend {
            Backend::Model { name, .. } => name.as_str(),
            Backend::LocalHash => "local-hash",
        };
        f.debug_struct("EmbeddingProvider")
            .field("backend", &name)
            .field("dimension", &self.dimension)
            .finish()
    }
}

/// Resolve a priority-list name to a model and its embedding dimension.
fn resolve_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    match name.trim().to_lowercase().as_str() {
        "multilingual-e5-small" | "intfloat/multilingual-e5-small" => {
            Some((EmbeddingModel::MultilingualE5Small, 384))
        }
        "multilingual-e5-base" | "intfloat/multilingual-e5-base" => {
            Some((EmbeddingModel::MultilingualE5Base, 768))
        }
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => {
            Some((EmbeddingModel::BGESmallENV15, 384))
        }
        "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
            Some((EmbeddingModel::AllMiniLML6V2, 384))
        }
        "paraphrase-multilingual-minilm-l12-v2" => {
            Some((EmbeddingModel::ParaphraseMLMiniLML12V2, 384))
        }
        _ => None,
    }
}

impl EmbeddingProvider {
    /// Try the prioritised model list; fall back to the local hash embedder.
    pub async fn initialize(priority: &[String]) -> Self {
        for name in priority {
            let Some((model_id, dimension)) = resolve_model(name) else {
                warn!(model = %name, "unknown embedding model name, skipping");
                continue;
            };

            let attempt = tokio::task::spawn_blocking(move || {
                TextEmbedding::try_new(InitOptions::new(model_id))
            })
            .await;

            match attempt {
                Ok(Ok(model)) => {
                    info!(model = %name, dimension, "embedding model initialised");
                    return Self {
                        backend: Backend::Model {
                            model: Mutex::new(Some(model)),
                            name: name.clone(),
                        },
                        dimension,
                    };
                }
                Ok(Err(err)) => {
                    warn!(model = %name, error = %err, "embedding model failed to initialise");
                }
                Err(err) => {
                    warn!(model = %name, error = %err, "embedding model init task failed");
                }
            }
        }

        info!(
            dimension = FALLBACK_DIMENSION,
            "no embedding model available, using local hash fallback"
        );
        Self::local_fallback()
    }

    /// Construct the deterministic fallback directly (used by tests and by
    /// deployments that opt out of model downloads).
    #[must_use]
    pub fn local_fallback() -> Self {
        Self {
            backend: Backend::LocalHash,
            dimension: FALLBACK_DIMENSION,
        }
    }

    /// The embedding dimension, fixed for the process lifetime.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| AppError::EmbeddingUnavailable("empty embedding batch".to_string()))
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        match &self.backend {
            Backend::LocalHash => Ok(texts.iter().map(|t| hash_embedding(t)).collect()),
            Backend::Model { model, .. } => self
                .embed_with_model(model, texts.to_vec())
                .await
                .map_err(|err| AppError::EmbeddingUnavailable(err.to_string())),
        }
    }

    async fn embed_with_model(
        &self,
        slot: &Mutex<Option<TextEmbedding>>,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>> {
        let mut guard = slot.lock().await;
        let mut owned = guard
            .take()
            .context("embedding model unexpectedly absent")?;

        // fastembed inference is CPU-bound; move the model into a blocking
        // task and hand it back afterwards.
        let (result, returned) = tokio::task::spawn_blocking(move || {
            let res = owned.embed(texts, None);
            (res, owned)
        })
        .await?;

        *guard = Some(returned);
        result.map_err(|err| anyhow::anyhow!(err))
    }
}

/// Hashed bag-of-words embedding: lowercase, split on non-word characters,
/// spread each token over a handful of buckets, L2-normalise.
#[must_use]
pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; FALLBACK_DIMENSION];
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();

    if words.is_empty() {
        return vector;
    }

    let weight = 1.0 / words.len() as f32;
    for word in &words {
        let hash = fnv1a(word.as_bytes());
        for i in 0..FALLBACK_SPREAD.min(FALLBACK_DIMENSION) {
            let bucket = ((hash.wrapping_add(i as u64)) % FALLBACK_DIMENSION as u64) as usize;
            vector[bucket] += weight;
        }
    }

    let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for v in &mut vector {
            *v /= magnitude;
        }
    }
    vector
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

/// Cosine similarity between two vectors of equal dimension.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
