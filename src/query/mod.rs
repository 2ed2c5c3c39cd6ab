//! Query-time types: the pruned query context and the bounded score
//! heap.

mod scorer;

pub use scorer::{ScoredDoc, SeismicScorer};

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use smallvec::SmallVec;

use crate::error::{Result, SparseError};
use crate::posting::{DocId, Term};
use crate::vector::{ByteQuantizer, SparseVector, Token};

/// A query after query-cut pruning: the retained tokens (highest weight
/// first), their quantized vector, and the search knobs.
///
/// `heap_factor` is the multiplicative slack on the top-K threshold:
/// `1.0` prunes aggressively, large values degrade towards exact search.
#[derive(Debug, Clone)]
pub struct SparseQueryContext {
    terms: Vec<Term>,
    query: SparseVector,
    k: usize,
    heap_factor: f32,
}

impl SparseQueryContext {
    /// Prune `tokens` to the `query_cut` highest-weight entries and
    /// quantize them. Query weights saturate rather than fail: a query
    /// is allowed to overweight a token beyond the ingest maximum.
    pub fn new(
        tokens: &[(Token, f32)],
        k: usize,
        query_cut: usize,
        heap_factor: f32,
    ) -> Result<Self> {
        if tokens.is_empty() {
            return Err(SparseError::InvalidParameter("query has no tokens".into()));
        }
        if k == 0 {
            return Err(SparseError::InvalidParameter("k must be at least 1".into()));
        }
        if query_cut == 0 {
            return Err(SparseError::InvalidParameter(
                "query_cut must be at least 1".into(),
            ));
        }
        if !(heap_factor > 0.0) {
            return Err(SparseError::InvalidParameter(format!(
                "heap_factor must be positive, got {heap_factor}"
            )));
        }

        let mut ranked: SmallVec<[(Token, f32); 16]> = SmallVec::from_slice(tokens);
        ranked.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(query_cut);

        let terms = ranked
            .iter()
            .map(|&(token, _)| token.to_string().into_bytes())
            .collect();
        let query = SparseVector::from_pairs(
            ranked
                .iter()
                .map(|&(token, weight)| (token, ByteQuantizer::quantize(weight))),
        )?;
        Ok(Self {
            terms,
            query,
            k,
            heap_factor,
        })
    }

    /// Retained terms, highest query weight first. This is the scorer's
    /// traversal order.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// The pruned, quantized query vector.
    pub fn query(&self) -> &SparseVector {
        &self.query
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn heap_factor(&self) -> f32 {
        self.heap_factor
    }
}

/// Min-heap of `(score, doc id)` bounded at `k` entries.
///
/// Once full, the smallest retained score is the pruning threshold;
/// pushes below it are dropped.
#[derive(Debug)]
pub(crate) struct ScoreHeap {
    heap: BinaryHeap<Reverse<(i32, DocId)>>,
    k: usize,
}

impl ScoreHeap {
    pub fn new(k: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(k + 1),
            k,
        }
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() == self.k
    }

    /// Smallest score in a full heap; `i32::MIN` until then.
    pub fn threshold(&self) -> i32 {
        if self.is_full() {
            self.heap.peek().map_or(i32::MIN, |Reverse((score, _))| *score)
        } else {
            i32::MIN
        }
    }

    pub fn push(&mut self, doc_id: DocId, score: i32) {
        if self.heap.len() < self.k {
            self.heap.push(Reverse((score, doc_id)));
        } else if self
            .heap
            .peek()
            .is_some_and(|Reverse((lowest, _))| score > *lowest)
        {
            self.heap.pop();
            self.heap.push(Reverse((score, doc_id)));
        }
    }

    /// Drain into a list ordered ascending by doc id.
    pub fn into_sorted_by_doc(self) -> Vec<ScoredDoc> {
        let mut entries: Vec<ScoredDoc> = self
            .heap
            .into_iter()
            .map(|Reverse((score, doc_id))| ScoredDoc { doc_id, score })
            .collect();
        entries.sort_unstable_by_key(|entry| entry.doc_id);
        entries
    }
}
