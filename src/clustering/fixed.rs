//! Fixed-count clustering over a posting list.
//!
//! Unlike [`RandomClustering`](crate::clustering::RandomClustering),
//! which scales the number of centers with the posting length, this
//! algorithm targets a fixed number of clusters. Undersized clusters are
//! dissolved and their documents reassigned to the surviving centers, so
//! the output avoids clusters too small to be worth a summary.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clustering::summary::summarize;
use crate::clustering::Clustering;
use crate::error::Result;
use crate::index::SparseVectorReader;
use crate::posting::{DocWeight, DocumentCluster};
use crate::vector::SparseVector;

/// Clusters at or below this size are dissolved and reassigned.
pub const MIN_CLUSTER_SIZE: usize = 2;

/// Clustering into a fixed number of randomly seeded centers.
pub struct FixedCountClustering {
    summary_prune_ratio: f32,
    cluster_count: usize,
    reader: Arc<dyn SparseVectorReader>,
    seed: Option<u64>,
}

impl FixedCountClustering {
    pub fn new(
        summary_prune_ratio: f32,
        cluster_count: usize,
        reader: Arc<dyn SparseVectorReader>,
    ) -> Self {
        Self {
            summary_prune_ratio,
            cluster_count,
            reader,
            seed: None,
        }
    }

    /// Configure a deterministic seed for center selection.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Best center for `doc` among `candidates`, or `None` when the doc
    /// has no stored vector.
    fn assign(
        &self,
        doc: DocWeight,
        centers: &[Option<Vec<u8>>],
        candidates: &[usize],
    ) -> Result<Option<usize>> {
        let Some(vector) = self.reader.read(doc.doc_id)? else {
            return Ok(None);
        };
        let mut best = None;
        let mut best_score = i32::MIN;
        for &idx in candidates {
            if let Some(dense) = &centers[idx] {
                let score = vector.dot_dense(dense);
                if score > best_score {
                    best_score = score;
                    best = Some(idx);
                }
            }
        }
        Ok(best)
    }
}

impl Clustering for FixedCountClustering {
    fn cluster(&self, docs: &[DocWeight]) -> Result<Vec<DocumentCluster>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        if self.cluster_count <= 1 {
            return Ok(vec![DocumentCluster::new(None, docs.to_vec(), true)]);
        }

        let n = docs.len();
        let k = self.cluster_count.min(n).max(1);
        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);

        // Densified center vectors; a center whose doc has no vector
        // never attracts assignments.
        let center_indices = rand::seq::index::sample(&mut rng, n, k);
        let mut centers: Vec<Option<Vec<u8>>> = Vec::with_capacity(k);
        for idx in center_indices.iter() {
            let dense = match self.reader.read(docs[idx].doc_id)? {
                Some(vector) => vector
                    .max_token()
                    .map(|max_token| vector.to_dense(max_token)),
                None => None,
            };
            centers.push(dense);
        }

        let all_candidates: Vec<usize> = (0..k).collect();
        let mut buckets: Vec<Vec<DocWeight>> = vec![Vec::new(); k];
        for &doc in docs {
            if let Some(best) = self.assign(doc, &centers, &all_candidates)? {
                buckets[best].push(doc);
            }
        }

        // Dissolve undersized clusters and reassign their docs among the
        // survivors.
        let mut orphans = Vec::new();
        let mut survivors = Vec::new();
        for (idx, bucket) in buckets.iter_mut().enumerate() {
            if bucket.len() <= MIN_CLUSTER_SIZE {
                orphans.append(bucket);
            } else {
                survivors.push(idx);
            }
        }
        if !orphans.is_empty() {
            if survivors.is_empty() {
                // Nothing left to absorb the orphans; fall back to one
                // unprunable cluster instead of dropping the posting.
                return Ok(vec![DocumentCluster::new(None, orphans, true)]);
            }
            for doc in orphans {
                if let Some(best) = self.assign(doc, &centers, &survivors)? {
                    buckets[best].push(doc);
                }
            }
        }

        let mut clusters = Vec::new();
        for bucket in buckets {
            if bucket.is_empty() {
                continue;
            }
            let mut members: Vec<Arc<SparseVector>> = Vec::with_capacity(bucket.len());
            for doc in &bucket {
                if let Some(vector) = self.reader.read(doc.doc_id)? {
                    members.push(vector);
                }
            }
            let summary = summarize(&members, self.summary_prune_ratio);
            clusters.push(DocumentCluster::new(Some(summary), bucket, false));
        }
        Ok(clusters)
    }
}
