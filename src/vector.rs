use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Similarity metric used to rank candidate vectors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    DotProduct,
    Euclidean,
    Cosine,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::DotProduct => "dot_product",
            Metric::Euclidean => "euclidean",
            Metric::Cosine => "cosine",
        }
    }

    /// Calculate distance. LOWER is ALWAYS closer/better.
    ///
    /// Euclidean returns the SQUARED distance, dot product its negation.
    /// Slices must have equal length.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::DotProduct => -dot(a, b),
            Metric::Euclidean => {
                let mut sum = 0.0;
                // 8 lanes lets LLVM vectorize to a single AVX2 register
                for (ac, bc) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
                    for i in 0..8 {
                        let d = ac[i] - bc[i];
                        sum += d * d;
                    }
                }
                let tail = a.len() - a.len() % 8;
                for i in tail..a.len() {
                    let d = a[i] - b[i];
                    sum += d * d;
                }
                sum
            }
            Metric::Cosine => {
                let norm_a = dot(a, a);
                let norm_b = dot(b, b);
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot(a, b) / (norm_a.sqrt() * norm_b.sqrt())
            }
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 8];
    for (ac, bc) in a.chunks_exact(8).zip(b.chunks_exact(8)) {
        for i in 0..8 {
            acc[i] += ac[i] * bc[i];
        }
    }
    let tail = a.len() - a.len() % 8;
    let mut sum: f32 = acc.iter().sum();
    for i in tail..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dot" | "dp" | "dot_product" => Ok(Metric::DotProduct),
            "euclidean" | "ed" | "l2" => Ok(Metric::Euclidean),
            "cosine" | "cs" => Ok(Metric::Cosine),
            other => Err(Error::InvalidArgument(format!(
                "metric should be one of dot, euclidean, cosine, not '{other}'"
            ))),
        }
    }
}
