//! Clustering task units: one term, or a batch of terms.
//!
//! Tasks own everything they touch so they can run on the worker pool.
//! Besides returning the clusters to the caller, a task writes them
//! through to the posting cache; budget refusals there are suppressed
//! (cache population is best-effort), anything else propagates.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clustering::{ClusterParams, PostingClustering};
use crate::error::{Result, SparseError};
use crate::index::{ClusteredPostingWriter, SparseVectorReader};
use crate::posting::{DocWeight, PostingClusters, Term};

fn write_through(
    writer: &Option<Arc<dyn ClusteredPostingWriter>>,
    term: &[u8],
    clusters: &PostingClusters,
) -> Result<()> {
    if let Some(writer) = writer {
        match writer.insert(term, clusters.clusters().to_vec()) {
            Ok(()) => {}
            Err(SparseError::Budget { .. }) => {
                debug!("posting cache population skipped: budget exhausted");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Cluster one term's posting and publish the result to the cache.
pub struct ClusteringTask {
    term: Term,
    docs: Vec<DocWeight>,
    params: ClusterParams,
    reader: Arc<dyn SparseVectorReader>,
    writer: Option<Arc<dyn ClusteredPostingWriter>>,
    seed: Option<u64>,
}

impl ClusteringTask {
    pub fn new(
        term: Term,
        docs: Vec<DocWeight>,
        params: ClusterParams,
        reader: Arc<dyn SparseVectorReader>,
        writer: Option<Arc<dyn ClusteredPostingWriter>>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            term,
            docs,
            params,
            reader,
            writer,
            seed,
        }
    }

    pub fn run(self) -> Result<(Term, PostingClusters)> {
        let clustering =
            PostingClustering::random(self.params, Arc::clone(&self.reader), self.seed);
        let clusters = PostingClusters::new(clustering.cluster(&self.docs)?);
        write_through(&self.writer, &self.term, &clusters)?;
        Ok((self.term, clusters))
    }
}

/// Cluster a batch of terms (merge submits ~50 at a time).
pub struct BatchClusteringTask {
    terms: Vec<(Term, Vec<DocWeight>)>,
    params: ClusterParams,
    reader: Arc<dyn SparseVectorReader>,
    writer: Option<Arc<dyn ClusteredPostingWriter>>,
    seed: Option<u64>,
}

impl BatchClusteringTask {
    pub fn new(
        terms: Vec<(Term, Vec<DocWeight>)>,
        params: ClusterParams,
        reader: Arc<dyn SparseVectorReader>,
        writer: Option<Arc<dyn ClusteredPostingWriter>>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            terms,
            params,
            reader,
            writer,
            seed,
        }
    }

    pub fn run(self) -> Result<Vec<(Term, PostingClusters)>> {
        let mut results = Vec::with_capacity(self.terms.len());
        for (term, docs) in self.terms {
            let clustering =
                PostingClustering::random(self.params, Arc::clone(&self.reader), self.seed);
            let clusters = match clustering.cluster(&docs) {
                Ok(clusters) => PostingClusters::new(clusters),
                Err(err) => {
                    warn!(%err, "clustering failed for term batch entry");
                    return Err(err);
                }
            };
            write_through(&self.writer, &term, &clusters)?;
            results.push((term, clusters));
        }
        Ok(results)
    }
}
