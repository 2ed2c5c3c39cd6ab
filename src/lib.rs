//! seismic: approximate nearest-neighbor search over sparse
//! learned-lexical vectors.
//!
//! Documents and queries are sparse maps from token ids to non-negative
//! weights (SPLADE-style neural sparse encoders). Given a corpus, the
//! index returns the top-K documents by inner product while traversing
//! only a small fraction of the postings, using two levers:
//!
//! - **Clustered postings**: each term's posting list is partitioned
//!   into clusters of mutually similar documents, and every cluster
//!   carries a pruned upper-envelope *summary* vector.
//! - **Heap thresholding**: the scorer keeps a bounded top-K heap; a
//!   whole cluster is skipped when `dot(summary, query) * heap_factor`
//!   cannot beat the current heap minimum.
//!
//! # Architecture
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`vector`] | Sparse vector primitive, byte quantization, dot products |
//! | [`posting`] | Posting entries, document clusters, cluster sequences |
//! | [`clustering`] | Random clustering, summary pruning, worker pool |
//! | [`index`] | Reader/writer capabilities, cache-gated two-tier readers, segment build/read |
//! | [`cache`] | Byte-budgeted registries with LRU eviction |
//! | [`codec`] | On-disk postings + term-dictionary file pair |
//! | [`merge`] | Batched parallel re-clustering of merged segments |
//! | [`query`] | Query-cut pruning, top-K scorer |
//! | [`settings`] | Process settings and per-field mapping parameters |
//!
//! Write path: ingest fills a [`index::SegmentBuilder`]; sealing
//! clusters every posting and writes the codec pair. Merges re-cluster
//! the union of input postings on a bounded worker pool. Read path: a
//! [`index::SegmentReader`] serves scorers through cache-gated readers
//! that warm the in-memory tier on miss.
//!
//! # Accuracy knobs
//!
//! | Knob | Effect |
//! |------|--------|
//! | `cluster_ratio` | Clusters per posting length; `0` disables pruning |
//! | `summary_prune_ratio` | Summary mass allowed to be dropped |
//! | `query_cut` | Query tokens retained for traversal |
//! | `heap_factor` | Threshold slack; large values degrade to exact |
//!
//! Scores are integer dot products over quantized `u8` weights; with a
//! sufficiently large `heap_factor` the scorer returns the exact top-K
//! under that scoring.

pub mod cache;
pub mod clustering;
pub mod codec;
pub mod error;
pub mod index;
pub mod merge;
pub mod posting;
pub mod query;
pub mod settings;
pub mod vector;

pub use error::{Result, SparseError};
pub use posting::{DocId, DocWeight, DocumentCluster, PostingClusters, Term};
pub use query::{ScoredDoc, SeismicScorer, SparseQueryContext};
pub use vector::{ByteQuantizer, SparseVector, Token};
