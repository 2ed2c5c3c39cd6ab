//! Posting clustering: partition a term's posting list into clusters and
//! summarize each one for query-time pruning.
//!
//! Clustering is pluggable behind the [`Clustering`] trait;
//! [`RandomClustering`] is the default algorithm. [`PostingClustering`]
//! wraps an algorithm with the posting-length cap applied before
//! clustering. The executor submodule provides the bounded worker pool
//! merge uses to fan clustering out.

mod executor;
mod fixed;
mod random;
mod summary;
mod tasks;

pub use executor::{ClusterWorkerPool, TaskHandle};
pub use fixed::{FixedCountClustering, MIN_CLUSTER_SIZE};
pub use random::RandomClustering;
pub use summary::summarize;
pub use tasks::{BatchClusteringTask, ClusteringTask};

use std::sync::Arc;

use crate::error::Result;
use crate::index::SparseVectorReader;
use crate::posting::{DocWeight, DocumentCluster};
use crate::settings::SparseFieldConfig;

/// A clustering algorithm over one posting list.
pub trait Clustering: Send + Sync {
    fn cluster(&self, docs: &[DocWeight]) -> Result<Vec<DocumentCluster>>;
}

/// Effective clustering parameters for one segment build.
///
/// Derived once from the field config and the segment's doc count, then
/// shared by every per-term task of that build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    pub n_postings: usize,
    pub summary_prune_ratio: f32,
    pub cluster_ratio: f32,
}

impl ClusterParams {
    pub fn from_config(config: &SparseFieldConfig, doc_count: usize) -> Self {
        Self {
            n_postings: config.effective_n_postings(doc_count),
            summary_prune_ratio: config.summary_prune_ratio,
            cluster_ratio: config.effective_cluster_ratio(doc_count),
        }
    }
}

/// Posting-length cap composed with a clustering algorithm: a posting
/// longer than `n_postings` keeps only its highest-weight entries.
pub struct PostingClustering {
    n_postings: usize,
    algorithm: Box<dyn Clustering>,
}

impl PostingClustering {
    pub fn new(n_postings: usize, algorithm: Box<dyn Clustering>) -> Self {
        Self {
            n_postings,
            algorithm,
        }
    }

    /// Build with the default algorithm from effective parameters.
    pub fn random(params: ClusterParams, reader: Arc<dyn SparseVectorReader>, seed: Option<u64>) -> Self {
        let mut algorithm =
            RandomClustering::new(params.summary_prune_ratio, params.cluster_ratio, reader);
        if let Some(seed) = seed {
            algorithm = algorithm.with_seed(seed);
        }
        Self::new(params.n_postings, Box::new(algorithm))
    }

    pub fn cluster(&self, docs: &[DocWeight]) -> Result<Vec<DocumentCluster>> {
        if docs.len() <= self.n_postings {
            return self.algorithm.cluster(docs);
        }
        let mut pruned = docs.to_vec();
        pruned.sort_unstable_by(|a, b| b.weight.cmp(&a.weight).then(a.doc_id.cmp(&b.doc_id)));
        pruned.truncate(self.n_postings);
        self.algorithm.cluster(&pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PassThrough;

    impl Clustering for PassThrough {
        fn cluster(&self, docs: &[DocWeight]) -> Result<Vec<DocumentCluster>> {
            Ok(vec![DocumentCluster::new(None, docs.to_vec(), true)])
        }
    }

    #[test]
    fn long_posting_keeps_highest_weights() {
        let clustering = PostingClustering::new(2, Box::new(PassThrough));
        let docs = vec![
            DocWeight::new(1, 10),
            DocWeight::new(2, 200),
            DocWeight::new(3, 50),
        ];
        let clusters = clustering.cluster(&docs).unwrap();
        assert_eq!(clusters[0].doc_ids(), &[2, 3]);
    }

    #[test]
    fn short_posting_is_untouched() {
        let clustering = PostingClustering::new(10, Box::new(PassThrough));
        let docs = vec![DocWeight::new(1, 1), DocWeight::new(2, 2)];
        let clusters = clustering.cluster(&docs).unwrap();
        assert_eq!(clusters[0].len(), 2);
    }
}
