//! Top-K scorer with cluster-summary pruning.
//!
//! Per segment: iterate the pruned query's terms, walk each term's
//! clusters in stored order, and skip a whole cluster when its summary's
//! dot product against the dense query (scaled by the heap factor) falls
//! below the current top-K threshold. Documents of entered clusters are
//! scored once against the forward index, deduplicated across terms with
//! a visited bitset.

use std::sync::atomic::{AtomicBool, Ordering};

use bitvec::prelude::*;
use roaring::RoaringBitmap;
use tracing::trace;

use crate::error::Result;
use crate::index::{ClusteredPostingReader, SparseVectorReader};
use crate::posting::DocId;
use crate::query::{ScoreHeap, SparseQueryContext};

/// Capacity of the threshold heap. The pruning threshold tracks the
/// N-th best score seen so far; keeping N small makes the threshold
/// rise quickly even when the caller asks for a large k.
const THRESHOLD_HEAP_SIZE: usize = 10;

/// One search hit: segment-local doc id and its integer dot-product
/// score over quantized weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: i32,
}

/// Scorer over one sealed segment field.
pub struct SeismicScorer<'a> {
    postings: &'a dyn ClusteredPostingReader,
    forward: &'a dyn SparseVectorReader,
    max_doc: usize,
    filter: Option<&'a RoaringBitmap>,
    cancelled: Option<&'a AtomicBool>,
}

impl<'a> SeismicScorer<'a> {
    pub fn new(
        postings: &'a dyn ClusteredPostingReader,
        forward: &'a dyn SparseVectorReader,
        max_doc: usize,
    ) -> Self {
        Self {
            postings,
            forward,
            max_doc,
            filter: None,
            cancelled: None,
        }
    }

    /// Restrict hits to documents present in the bitmap.
    #[must_use]
    pub fn with_filter(mut self, filter: &'a RoaringBitmap) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Cooperative cancellation flag, checked between clusters. When it
    /// flips, the scorer returns its best-effort partial results.
    #[must_use]
    pub fn with_cancellation(mut self, flag: &'a AtomicBool) -> Self {
        self.cancelled = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Search the segment, returning up to `k` hits ordered ascending by
    /// doc id.
    pub fn search(&self, ctx: &SparseQueryContext) -> Result<Vec<ScoredDoc>> {
        let query = ctx.query();
        let query_dense = match query.max_token() {
            Some(max_token) => query.to_dense(max_token),
            None => Vec::new(),
        };
        let heap_factor = ctx.heap_factor();

        // The score heap drives the skip threshold and stays small even
        // for large k; the result heap collects this query's hits.
        let mut score_heap = ScoreHeap::new(ctx.k().min(THRESHOLD_HEAP_SIZE));
        let mut result_heap = ScoreHeap::new(ctx.k());
        let mut visited = bitvec![0; self.max_doc];
        let mut cancelled = false;

        'terms: for term in ctx.terms() {
            let Some(clusters) = self.postings.read(term)? else {
                continue;
            };
            for cluster in clusters.clusters() {
                if self.is_cancelled() {
                    trace!("search cancelled between clusters");
                    cancelled = true;
                    break 'terms;
                }

                if !cluster.should_not_skip() {
                    if let Some(summary) = cluster.summary() {
                        let upper = summary.dot_dense(&query_dense);
                        if score_heap.is_full()
                            && (upper as f64 * heap_factor as f64)
                                < score_heap.threshold() as f64
                        {
                            continue;
                        }
                    }
                }

                for entry in cluster.iter() {
                    let doc_id = entry.doc_id;
                    if self.filter.is_some_and(|filter| !filter.contains(doc_id)) {
                        continue;
                    }
                    if doc_id as usize >= self.max_doc || visited[doc_id as usize] {
                        continue;
                    }
                    visited.set(doc_id as usize, true);

                    let Some(vector) = self.forward.read(doc_id)? else {
                        continue;
                    };
                    let score = vector.dot_dense(&query_dense);
                    score_heap.push(doc_id, score);
                    result_heap.push(doc_id, score);
                }
            }
        }

        if cancelled {
            trace!("returning partial results after cancellation");
        }
        Ok(result_heap.into_sorted_by_doc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::index::{ClusteredPostingReader, SparseVectorReader};
    use crate::posting::{DocWeight, DocumentCluster, PostingClusters, SharedPostingClusters, Term};
    use crate::vector::SparseVector;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct MapForward(HashMap<DocId, Arc<SparseVector>>);

    impl SparseVectorReader for MapForward {
        fn read(&self, doc_id: DocId) -> Result<Option<Arc<SparseVector>>> {
            Ok(self.0.get(&doc_id).cloned())
        }
    }

    struct MapPostings(HashMap<Term, SharedPostingClusters>);

    impl ClusteredPostingReader for MapPostings {
        fn read(&self, term: &[u8]) -> Result<Option<SharedPostingClusters>> {
            Ok(self.0.get(term).cloned())
        }

        fn terms(&self) -> Result<Vec<Term>> {
            Ok(self.0.keys().cloned().collect())
        }

        fn term_count(&self) -> usize {
            self.0.len()
        }
    }

    /// Two docs under token 5: doc 0 scores high, doc 1 low. The second
    /// cluster's summary is too weak to beat the threshold once doc 0 is
    /// in a size-1 heap.
    fn fixture() -> (MapForward, MapPostings) {
        let strong = Arc::new(SparseVector::from_pairs([(5, 200)]).unwrap());
        let weak = Arc::new(SparseVector::from_pairs([(5, 1)]).unwrap());
        let forward = MapForward(HashMap::from([(0, strong), (1, weak)]));

        let clusters = PostingClusters::new(vec![
            DocumentCluster::new(
                Some(SparseVector::from_pairs([(5, 200)]).unwrap()),
                vec![DocWeight::new(0, 200)],
                false,
            ),
            DocumentCluster::new(
                Some(SparseVector::from_pairs([(5, 1)]).unwrap()),
                vec![DocWeight::new(1, 1)],
                false,
            ),
        ]);
        let postings = MapPostings(HashMap::from([(b"5".to_vec(), Arc::new(clusters))]));
        (forward, postings)
    }

    #[test]
    fn weak_cluster_is_skipped_when_heap_full() {
        let (forward, postings) = fixture();
        let scorer = SeismicScorer::new(&postings, &forward, 2);
        let ctx = SparseQueryContext::new(&[(5, 1.0)], 1, 1, 1.0).unwrap();
        let hits = scorer.search(&ctx).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, 0);
    }

    #[test]
    fn large_heap_factor_disables_skipping() {
        let (forward, postings) = fixture();
        let scorer = SeismicScorer::new(&postings, &forward, 2);
        let ctx = SparseQueryContext::new(&[(5, 1.0)], 2, 1, 100_000.0).unwrap();
        let hits = scorer.search(&ctx).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn filter_excludes_documents() {
        let (forward, postings) = fixture();
        let mut filter = RoaringBitmap::new();
        filter.insert(1);
        let scorer = SeismicScorer::new(&postings, &forward, 2).with_filter(&filter);
        let ctx = SparseQueryContext::new(&[(5, 1.0)], 2, 1, 100_000.0).unwrap();
        let hits = scorer.search(&ctx).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, 1);
    }

    #[test]
    fn cancellation_returns_partial_results() {
        let (forward, postings) = fixture();
        let flag = AtomicBool::new(true);
        let scorer = SeismicScorer::new(&postings, &forward, 2).with_cancellation(&flag);
        let ctx = SparseQueryContext::new(&[(5, 1.0)], 2, 1, 1.0).unwrap();
        let hits = scorer.search(&ctx).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn unprunable_cluster_is_always_entered() {
        let weak = Arc::new(SparseVector::from_pairs([(5, 1)]).unwrap());
        let strong = Arc::new(SparseVector::from_pairs([(5, 200)]).unwrap());
        let forward = MapForward(HashMap::from([(0, strong), (1, weak)]));
        let clusters = PostingClusters::new(vec![
            DocumentCluster::new(
                Some(SparseVector::from_pairs([(5, 200)]).unwrap()),
                vec![DocWeight::new(0, 200)],
                false,
            ),
            // No summary: must be examined even with a full heap.
            DocumentCluster::new(None, vec![DocWeight::new(1, 1)], true),
        ]);
        let postings = MapPostings(HashMap::from([(b"5".to_vec(), Arc::new(clusters))]));

        let scorer = SeismicScorer::new(&postings, &forward, 2);
        let ctx = SparseQueryContext::new(&[(5, 1.0)], 2, 1, 1.0).unwrap();
        let hits = scorer.search(&ctx).unwrap();
        assert_eq!(hits.len(), 2);
    }
}
