//! Embedding models
//!
//! A model turns payloads into vectors and ranks a candidate list against a
//! query. Documents never do similarity math themselves; they hand the
//! candidate vectors to the model and get back positions into that list.

use ordered_float::OrderedFloat;
use seahash::hash;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{Embedding, Payload, DEFAULT_VECTOR_DIM};
use crate::vector::Metric;

/// Encoder plus similarity ranker
pub trait EmbeddingModel: Send + Sync {
    /// Identifier recorded in the registry of every document it writes to
    fn name(&self) -> &str;

    fn encode(&self, data: &Payload) -> Result<Embedding>;

    /// Rank `dataset` against `query`.
    ///
    /// Returns at most `top_n` positions into `dataset`, best match first.
    fn search(
        &self,
        query: &Payload,
        dataset: &[Embedding],
        top_n: usize,
        metric: Metric,
    ) -> Result<Vec<usize>>;
}

/// Feature-hashing bag-of-words encoder
///
/// Tokens are lowercase alphanumeric runs of the payload's text form. Each
/// token lands in one bucket with a sign taken from its hash; the result is
/// L2-normalised so dot product and cosine agree.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidArgument("embedding dimension must be > 0".into()));
        }
        Ok(Self {
            dim,
            name: format!("hashing-{dim}"),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn embed_text(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let h = hash(token.as_bytes());
            let bucket = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dim: DEFAULT_VECTOR_DIM,
            name: format!("hashing-{DEFAULT_VECTOR_DIM}"),
        }
    }
}

impl EmbeddingModel for HashingEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, data: &Payload) -> Result<Embedding> {
        Ok(self.embed_text(&data.to_text()))
    }

    fn search(
        &self,
        query: &Payload,
        dataset: &[Embedding],
        top_n: usize,
        metric: Metric,
    ) -> Result<Vec<usize>> {
        let query = self.encode(query)?;

        let mut scored: Vec<(OrderedFloat<f32>, usize)> = Vec::with_capacity(dataset.len());
        for (pos, candidate) in dataset.iter().enumerate() {
            if candidate.len() != query.len() {
                warn!(
                    position = pos,
                    expected = query.len(),
                    got = candidate.len(),
                    "Skipping vector with mismatched dimension"
                );
                continue;
            }
            scored.push((OrderedFloat(metric.distance(&query, candidate)), pos));
        }

        // Stable: ties keep dataset order
        scored.sort_by_key(|(dist, _)| *dist);
        Ok(scored.into_iter().take(top_n).map(|(_, pos)| pos).collect())
    }
}
