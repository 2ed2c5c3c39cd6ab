//! Cache-gated read-through composition of an in-memory tier and a
//! persisted tier.

use std::sync::Arc;

use tracing::debug;

use crate::cache::{ClusteredPostingCacheItem, ForwardIndexCacheItem};
use crate::error::{Result, SparseError};
use crate::index::{
    ClusteredPostingReader, NoopVectorReader, NoopVectorWriter, SparseVectorReader,
    SparseVectorWriter,
};
use crate::posting::{DocId, SharedPostingClusters, Term};
use crate::vector::SparseVector;

/// Two-tier forward-index reader.
///
/// Reads hit the in-memory tier first, fall back to the persisted tier,
/// and opportunistically warm the cache with what the persisted tier
/// returned. Budget refusals during warming are suppressed: the warm
/// cache is best-effort.
pub struct CacheGatedForwardIndexReader {
    memory_reader: Arc<dyn SparseVectorReader>,
    memory_writer: Arc<dyn SparseVectorWriter>,
    persisted: Arc<dyn SparseVectorReader>,
}

impl CacheGatedForwardIndexReader {
    pub fn new(
        memory: Option<Arc<ForwardIndexCacheItem>>,
        persisted: Option<Arc<dyn SparseVectorReader>>,
    ) -> Self {
        let (memory_reader, memory_writer): (
            Arc<dyn SparseVectorReader>,
            Arc<dyn SparseVectorWriter>,
        ) = match memory {
            Some(item) => (item.clone(), item),
            None => (Arc::new(NoopVectorReader), Arc::new(NoopVectorWriter)),
        };
        Self {
            memory_reader,
            memory_writer,
            persisted: persisted.unwrap_or_else(|| Arc::new(NoopVectorReader)),
        }
    }
}

impl SparseVectorReader for CacheGatedForwardIndexReader {
    fn read(&self, doc_id: DocId) -> Result<Option<Arc<SparseVector>>> {
        // A transient failure of the cache tier degrades to a miss; the
        // persisted tier is the source of truth and its errors propagate.
        match self.memory_reader.read(doc_id) {
            Ok(Some(vector)) => return Ok(Some(vector)),
            Ok(None) => {}
            Err(err) => debug!(doc_id, %err, "cache-tier read failed, falling back"),
        }

        let vector = self.persisted.read(doc_id)?;
        if let Some(vector) = &vector {
            match self.memory_writer.insert(doc_id, Arc::clone(vector)) {
                Ok(()) => {}
                Err(SparseError::Budget { .. }) => {
                    debug!(doc_id, "cache warm skipped: budget exhausted");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(vector)
    }
}

/// Two-tier clustered-postings reader.
///
/// Values read through the cache; the term universe always comes from
/// the persisted side, since cached entries may have been evicted.
pub struct CacheGatedPostingsReader {
    memory: Arc<ClusteredPostingCacheItem>,
    persisted: Arc<dyn ClusteredPostingReader>,
}

impl CacheGatedPostingsReader {
    pub fn new(
        memory: Arc<ClusteredPostingCacheItem>,
        persisted: Arc<dyn ClusteredPostingReader>,
    ) -> Self {
        Self { memory, persisted }
    }
}

impl ClusteredPostingReader for CacheGatedPostingsReader {
    fn read(&self, term: &[u8]) -> Result<Option<SharedPostingClusters>> {
        match self.memory.read(term) {
            Ok(Some(clusters)) => return Ok(Some(clusters)),
            Ok(None) => {}
            Err(err) => debug!(%err, "cache-tier posting read failed, falling back"),
        }

        let clusters = self.persisted.read(term)?;
        if let Some(clusters) = &clusters {
            use crate::index::ClusteredPostingWriter;
            match self
                .memory
                .insert(term, clusters.clusters().to_vec())
            {
                Ok(()) => {}
                Err(SparseError::Budget { .. }) => {
                    debug!("posting cache warm skipped: budget exhausted");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(clusters)
    }

    fn terms(&self) -> Result<Vec<Term>> {
        self.persisted.terms()
    }

    fn term_count(&self) -> usize {
        self.persisted.term_count()
    }
}
