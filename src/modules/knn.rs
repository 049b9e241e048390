use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::core::errors::PredictError;
use crate::data::Example;

/// Turns text into a vector. The concrete embedder (API-backed or local)
/// is an external collaborator; tests inject a deterministic fake.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    /// Higher is closer.
    #[default]
    Cosine,
    /// Lower is closer.
    Euclidean,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// K-nearest-neighbor demo selection.
///
/// Training examples are embedded once at construction — an embedder
/// failure there is fatal. Queries are embedded per call and ranked by the
/// configured metric.
pub struct KNN {
    k: usize,
    metric: DistanceMetric,
    examples: Vec<Example>,
    vectors: Vec<Vec<f32>>,
    embedder: Arc<dyn Embedder>,
}

impl KNN {
    pub async fn new(
        k: usize,
        trainset: Vec<Example>,
        embedder: Arc<dyn Embedder>,
        metric: DistanceMetric,
    ) -> Result<Self> {
        let mut vectors = Vec::with_capacity(trainset.len());
        for (i, example) in trainset.iter().enumerate() {
            let vector = embedder
                .embed(&example_text(example))
                .await
                .with_context(|| format!("embedding trainset example #{i}"))?;
            vectors.push(vector);
        }
        Ok(Self {
            k: k.max(1),
            metric,
            examples: trainset,
            vectors,
            embedder,
        })
    }

    /// The K nearest training examples to `query`, closest first.
    pub async fn nearest(&self, query: &Example) -> Result<Vec<Example>, PredictError> {
        let query_vector = self
            .embedder
            .embed(&example_text(query))
            .await
            .map_err(|err| PredictError::InvalidInput {
                field: "query".to_string(),
                reason: format!("vectorizer failed: {err}"),
            })?;

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, vector)| {
                let score = match self.metric {
                    DistanceMetric::Cosine => cosine_similarity(&query_vector, vector),
                    DistanceMetric::Euclidean => -euclidean_distance(&query_vector, vector),
                };
                (score, i)
            })
            .collect();
        // Descending: both metrics are oriented so larger is closer.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(self.k)
            .map(|(_, i)| self.examples[i].clone())
            .collect())
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

/// Text rendering used for embedding: input fields as `name: value` lines.
fn example_text(example: &Example) -> String {
    example
        .inputs
        .keys()
        .map(|name| format!("{name}: {}", example.get_text(name)))
        .collect::<Vec<_>>()
        .join("\n")
}
