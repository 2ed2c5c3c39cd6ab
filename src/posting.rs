//! Posting-entry types: doc/weight records, document clusters, and the
//! per-term cluster sequence.
//!
//! A posting is the list of `(doc id, quantized weight)` entries for one
//! term. Clustering groups a posting into [`DocumentCluster`]s, each
//! carrying an optional summary vector the scorer uses as an upper bound
//! to skip the whole cluster. Cluster order is the order produced by
//! clustering and is preserved across persistence; it defines the
//! scorer's skipping order.

use std::sync::Arc;

use crate::vector::SparseVector;

/// Document identifier local to one segment.
pub type DocId = u32;

/// Term key: arbitrary byte string. Integer-like tokens are stored as
/// their decimal byte form at the ingest/query boundary.
pub type Term = Vec<u8>;

/// One posting entry: a document and its quantized weight for the term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocWeight {
    pub doc_id: DocId,
    pub weight: u8,
}

impl DocWeight {
    pub fn new(doc_id: DocId, weight: u8) -> Self {
        Self { doc_id, weight }
    }
}

/// A group of posting entries sharing one summary vector.
///
/// Immutable after construction. `doc_ids` and `weights` are parallel
/// arrays sorted ascending by doc id. A cluster without a summary is
/// unprunable: `should_not_skip` forces the scorer to examine every
/// member.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentCluster {
    summary: Option<SparseVector>,
    doc_ids: Vec<DocId>,
    weights: Vec<u8>,
    should_not_skip: bool,
}

impl DocumentCluster {
    /// Build a cluster from unordered entries; entries are sorted
    /// ascending by doc id.
    pub fn new(summary: Option<SparseVector>, docs: Vec<DocWeight>, should_not_skip: bool) -> Self {
        let mut docs = docs;
        docs.sort_unstable_by_key(|d| d.doc_id);
        let doc_ids = docs.iter().map(|d| d.doc_id).collect();
        let weights = docs.iter().map(|d| d.weight).collect();
        Self {
            summary,
            doc_ids,
            weights,
            should_not_skip,
        }
    }

    /// Number of documents in the cluster.
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    /// Ascending member doc ids.
    pub fn doc_ids(&self) -> &[DocId] {
        &self.doc_ids
    }

    /// Weights parallel to [`DocumentCluster::doc_ids`].
    pub fn weights(&self) -> &[u8] {
        &self.weights
    }

    /// The pruned upper-envelope summary, absent for unprunable clusters.
    pub fn summary(&self) -> Option<&SparseVector> {
        self.summary.as_ref()
    }

    /// When true the scorer must enter the cluster unconditionally.
    pub fn should_not_skip(&self) -> bool {
        self.should_not_skip
    }

    /// Iterate entries ascending by doc id.
    pub fn iter(&self) -> impl Iterator<Item = DocWeight> + '_ {
        self.doc_ids
            .iter()
            .zip(self.weights.iter())
            .map(|(&doc_id, &weight)| DocWeight { doc_id, weight })
    }

    /// Best-effort heap footprint estimate.
    pub fn ram_bytes_used(&self) -> u64 {
        let mut bytes = std::mem::size_of::<Self>() as u64;
        bytes += (self.doc_ids.capacity() * std::mem::size_of::<DocId>()) as u64;
        bytes += self.weights.capacity() as u64;
        if let Some(summary) = &self.summary {
            bytes += summary.ram_bytes_used();
        }
        bytes
    }
}

/// Ordered cluster sequence for one term.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingClusters {
    clusters: Vec<DocumentCluster>,
}

impl PostingClusters {
    pub fn new(clusters: Vec<DocumentCluster>) -> Self {
        Self { clusters }
    }

    /// Clusters in stored (scoring) order.
    pub fn clusters(&self) -> &[DocumentCluster] {
        &self.clusters
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Total posting length: the sum of cluster sizes.
    pub fn doc_count(&self) -> usize {
        self.clusters.iter().map(DocumentCluster::len).sum()
    }

    /// Iterate every posting entry, cluster by cluster.
    pub fn doc_weights(&self) -> impl Iterator<Item = DocWeight> + '_ {
        self.clusters.iter().flat_map(DocumentCluster::iter)
    }

    pub fn ram_bytes_used(&self) -> u64 {
        std::mem::size_of::<Self>() as u64
            + self
                .clusters
                .iter()
                .map(DocumentCluster::ram_bytes_used)
                .sum::<u64>()
    }
}

/// Shared handle type stored in caches and handed to scorers.
pub type SharedPostingClusters = Arc<PostingClusters>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::SparseVector;

    #[test]
    fn cluster_sorts_entries_by_doc_id() {
        let cluster = DocumentCluster::new(
            None,
            vec![
                DocWeight::new(7, 3),
                DocWeight::new(2, 9),
                DocWeight::new(5, 1),
            ],
            true,
        );
        assert_eq!(cluster.doc_ids(), &[2, 5, 7]);
        assert_eq!(cluster.weights(), &[9, 1, 3]);
    }

    #[test]
    fn posting_doc_count_sums_cluster_sizes() {
        let summary = SparseVector::from_pairs([(1, 5)]).unwrap();
        let clusters = PostingClusters::new(vec![
            DocumentCluster::new(Some(summary), vec![DocWeight::new(1, 1)], false),
            DocumentCluster::new(None, vec![DocWeight::new(2, 2), DocWeight::new(3, 3)], true),
        ]);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters.doc_count(), 3);
        let ids: Vec<DocId> = clusters.doc_weights().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
