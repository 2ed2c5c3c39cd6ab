//! Index access capabilities and their composed (two-tier) variants.
//!
//! Readers and writers come in three flavors: in-memory (the cache
//! items), persisted (the codec), and composed (cache-gated read-through
//! wrappers used by clustering and scoring). Optional tiers are wrapped
//! into no-op implementations once at construction so downstream code
//! never branches on presence.

mod gated;
pub mod segment;

pub use gated::{CacheGatedForwardIndexReader, CacheGatedPostingsReader};
pub use segment::{SegmentBuilder, SegmentReader};

use std::sync::Arc;

use crate::error::Result;
use crate::posting::{DocId, DocumentCluster, SharedPostingClusters, Term};
use crate::vector::SparseVector;

/// Read access to a forward index (doc id to sparse vector).
pub trait SparseVectorReader: Send + Sync {
    /// `Ok(None)` when the doc id is out of range or has no vector.
    fn read(&self, doc_id: DocId) -> Result<Option<Arc<SparseVector>>>;
}

/// Write access to a forward index. First write to a slot wins;
/// subsequent writes are no-ops.
pub trait SparseVectorWriter: Send + Sync {
    fn insert(&self, doc_id: DocId, vector: Arc<SparseVector>) -> Result<()>;
}

/// Read access to a clustered-posting store (term to cluster sequence).
pub trait ClusteredPostingReader: Send + Sync {
    fn read(&self, term: &[u8]) -> Result<Option<SharedPostingClusters>>;
    /// The term universe of this store.
    fn terms(&self) -> Result<Vec<Term>>;
    fn term_count(&self) -> usize;
}

/// Write access to a clustered-posting store. Duplicate terms keep the
/// first insertion.
pub trait ClusteredPostingWriter: Send + Sync {
    fn insert(&self, term: &[u8], clusters: Vec<DocumentCluster>) -> Result<()>;
}

/// Reader over nothing; stands in for an absent tier.
pub(crate) struct NoopVectorReader;

impl SparseVectorReader for NoopVectorReader {
    fn read(&self, _doc_id: DocId) -> Result<Option<Arc<SparseVector>>> {
        Ok(None)
    }
}

/// Writer that drops everything; stands in for an absent tier.
pub(crate) struct NoopVectorWriter;

impl SparseVectorWriter for NoopVectorWriter {
    fn insert(&self, _doc_id: DocId, _vector: Arc<SparseVector>) -> Result<()> {
        Ok(())
    }
}
