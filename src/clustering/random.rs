//! Random-center clustering over a posting list.
//!
//! Draws `ceil(n * cluster_ratio)` distinct documents as centers, then
//! assigns every posting entry to the center maximizing the dense inner
//! product with its full vector. A ratio of zero short-circuits into a
//! single unprunable cluster, which disables pruning for postings too
//! small to benefit.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clustering::summary::summarize;
use crate::clustering::Clustering;
use crate::error::Result;
use crate::index::SparseVectorReader;
use crate::posting::{DocWeight, DocumentCluster};
use crate::vector::SparseVector;

/// Random clustering with pruned upper-envelope summaries.
pub struct RandomClustering {
    summary_prune_ratio: f32,
    cluster_ratio: f32,
    reader: Arc<dyn SparseVectorReader>,
    seed: Option<u64>,
}

impl RandomClustering {
    pub fn new(
        summary_prune_ratio: f32,
        cluster_ratio: f32,
        reader: Arc<dyn SparseVectorReader>,
    ) -> Self {
        Self {
            summary_prune_ratio,
            cluster_ratio,
            reader,
            seed: None,
        }
    }

    /// Configure a deterministic seed for center selection.
    ///
    /// When set, repeated `cluster(...)` calls on the same posting
    /// produce identical output; merges derive the seed from the output
    /// segment identity so re-runs are reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of centers for a posting of length `n`.
    fn center_count(&self, n: usize) -> usize {
        n.min(((n as f64 * self.cluster_ratio as f64).ceil() as usize).max(1))
    }
}

impl Clustering for RandomClustering {
    fn cluster(&self, docs: &[DocWeight]) -> Result<Vec<DocumentCluster>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        if self.cluster_ratio == 0.0 {
            return Ok(vec![DocumentCluster::new(None, docs.to_vec(), true)]);
        }

        let n = docs.len();
        let k = self.center_count(n);
        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);

        let center_indices = rand::seq::index::sample(&mut rng, n, k);
        let mut centers: Vec<Option<Arc<SparseVector>>> = Vec::with_capacity(k);
        for idx in center_indices.iter() {
            centers.push(self.reader.read(docs[idx].doc_id)?);
        }

        // Assign each doc to the best-scoring center; ties go to the
        // lowest index. Docs with no stored vector are dropped.
        let mut buckets: Vec<Vec<(DocWeight, Arc<SparseVector>)>> = vec![Vec::new(); k];
        for &doc in docs {
            let Some(vector) = self.reader.read(doc.doc_id)? else {
                continue;
            };
            let dense = match vector.max_token() {
                Some(max_token) => vector.to_dense(max_token),
                None => Vec::new(),
            };
            let mut best_idx = 0usize;
            let mut best_score = i32::MIN;
            for (idx, center) in centers.iter().enumerate() {
                if let Some(center) = center {
                    let score = center.dot_dense(&dense);
                    if score > best_score {
                        best_score = score;
                        best_idx = idx;
                    }
                }
            }
            buckets[best_idx].push((doc, vector));
        }

        let mut clusters = Vec::new();
        for bucket in buckets {
            if bucket.is_empty() {
                continue;
            }
            let members: Vec<Arc<SparseVector>> =
                bucket.iter().map(|(_, vector)| Arc::clone(vector)).collect();
            let summary = summarize(&members, self.summary_prune_ratio);
            let docs: Vec<DocWeight> = bucket.into_iter().map(|(doc, _)| doc).collect();
            clusters.push(DocumentCluster::new(Some(summary), docs, false));
        }
        Ok(clusters)
    }
}
