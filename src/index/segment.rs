//! Segment lifecycle: batched ingest, seal-time clustering, and sealed
//! reads.
//!
//! A [`SegmentBuilder`] accepts validated documents, fills the forward
//! index, and accumulates raw postings per term. Sealing clusters every
//! posting (inline, flush is not fanned out) and writes the codec file
//! pair. A [`SegmentReader`] reopens the pair behind cache-gated
//! two-tier readers and hands out scorers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{CacheKey, CacheManager};
use crate::clustering::{ClusterParams, ClusteringTask};
use crate::codec::{ClusteredPostingFileWriter, FileHeader, SparseTermsFileReader};
use crate::error::{Result, SparseError};
use crate::index::{
    CacheGatedForwardIndexReader, CacheGatedPostingsReader, ClusteredPostingReader,
    SparseVectorReader, SparseVectorWriter,
};
use crate::posting::{DocId, DocWeight, Term};
use crate::query::{ScoredDoc, SeismicScorer, SparseQueryContext};
use crate::settings::SparseFieldConfig;
use crate::vector::{ByteQuantizer, SparseVector, Token};

/// Builder for one segment of one sparse field.
pub struct SegmentBuilder {
    key: CacheKey,
    config: SparseFieldConfig,
    cache: CacheManager,
    forward: Arc<crate::cache::ForwardIndexCacheItem>,
    raw_postings: BTreeMap<Term, Vec<DocWeight>>,
    added_docs: usize,
    seed: Option<u64>,
}

impl SegmentBuilder {
    /// Start a segment with a fixed doc-id capacity.
    pub fn new(
        cache: &CacheManager,
        key: CacheKey,
        config: SparseFieldConfig,
        doc_capacity: usize,
    ) -> Result<Self> {
        let config = config.validated()?;
        let forward = cache.forward_index(key, doc_capacity);
        Ok(Self {
            key,
            config,
            cache: cache.clone(),
            forward,
            raw_postings: BTreeMap::new(),
            added_docs: 0,
            seed: None,
        })
    }

    /// Deterministic clustering seed for the seal pass.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate and ingest one document's token weights.
    ///
    /// Tokens above the field's domain bound are rejected; raw zero
    /// weights are dropped; everything else is quantized (a small weight
    /// may legitimately quantize to a zero byte and is kept).
    pub fn add_document(&mut self, doc_id: DocId, tokens: &[(Token, f32)]) -> Result<()> {
        if doc_id as usize >= self.forward.capacity() {
            return Err(SparseError::InvalidParameter(format!(
                "doc id {doc_id} out of range for segment capacity {}",
                self.forward.capacity()
            )));
        }
        let mut pairs = Vec::with_capacity(tokens.len());
        for &(token, weight) in tokens {
            if token > self.config.max_token {
                return Err(SparseError::InvalidParameter(format!(
                    "token {token} exceeds field dimension bound {}",
                    self.config.max_token
                )));
            }
            if weight == 0.0 {
                continue;
            }
            pairs.push((token, ByteQuantizer::quantize_checked(weight)?));
        }

        let vector = Arc::new(SparseVector::from_pairs(pairs.iter().copied())?);
        // Explicit caller-driven write: a budget refusal surfaces.
        self.forward.insert(doc_id, vector)?;
        for (token, weight) in pairs {
            self.raw_postings
                .entry(token.to_string().into_bytes())
                .or_default()
                .push(DocWeight::new(doc_id, weight));
        }
        self.added_docs += 1;
        Ok(())
    }

    pub fn doc_count(&self) -> usize {
        self.added_docs
    }

    /// Cluster every posting and write the sealed file pair under
    /// `dir/name.*`.
    pub fn seal(self, dir: &Path, name: &str) -> Result<()> {
        let params = ClusterParams::from_config(&self.config, self.added_docs);
        let reader: Arc<dyn SparseVectorReader> = Arc::new(CacheGatedForwardIndexReader::new(
            Some(Arc::clone(&self.forward)),
            None,
        ));
        let posting_cache = self.cache.clustered_postings(self.key);
        let header = FileHeader::new(self.key.segment, self.key.field.to_string());
        let mut writer = ClusteredPostingFileWriter::create(dir, name, header)?;

        for (term, docs) in self.raw_postings {
            let task = ClusteringTask::new(
                term,
                docs,
                params,
                Arc::clone(&reader),
                Some(posting_cache.clone()),
                self.seed,
            );
            let (term, clusters) = match task.run() {
                Ok(result) => result,
                Err(err) => {
                    writer.close_with_error();
                    return Err(err);
                }
            };
            if let Err(err) = writer.write_term(&term, &clusters) {
                writer.close_with_error();
                return Err(err);
            }
        }
        debug!(
            segment = self.key.segment,
            docs = self.added_docs,
            "sealed segment"
        );
        writer.finish()
    }
}

/// Read side of a sealed segment field: persisted codec files behind
/// cache-gated two-tier readers.
pub struct SegmentReader {
    key: CacheKey,
    max_doc: usize,
    postings: Arc<CacheGatedPostingsReader>,
    forward: Arc<CacheGatedForwardIndexReader>,
}

impl SegmentReader {
    /// Open `dir/name.*`, validating checksums.
    ///
    /// `persisted_forward` is the host's document-vector source for this
    /// segment (absent in tests that pre-warm the cache: the forward tier
    /// then only serves what the build populated).
    pub fn open(
        cache: &CacheManager,
        key: CacheKey,
        dir: &Path,
        name: &str,
        max_doc: usize,
        persisted_forward: Option<Arc<dyn SparseVectorReader>>,
    ) -> Result<Self> {
        let persisted = SparseTermsFileReader::open_shared(dir, name)?;
        let postings = Arc::new(CacheGatedPostingsReader::new(
            cache.clustered_postings(key),
            persisted,
        ));
        let forward = Arc::new(CacheGatedForwardIndexReader::new(
            Some(cache.forward_index(key, max_doc)),
            persisted_forward,
        ));
        Ok(Self {
            key,
            max_doc,
            postings,
            forward,
        })
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn max_doc(&self) -> usize {
        self.max_doc
    }

    /// The two-tier posting reader.
    pub fn postings(&self) -> Arc<CacheGatedPostingsReader> {
        Arc::clone(&self.postings)
    }

    /// The two-tier forward-index reader.
    pub fn forward(&self) -> Arc<CacheGatedForwardIndexReader> {
        Arc::clone(&self.forward)
    }

    /// A scorer borrowing this segment's readers.
    pub fn scorer(&self) -> SeismicScorer<'_> {
        SeismicScorer::new(self.postings.as_ref(), self.forward.as_ref(), self.max_doc)
    }

    /// Convenience: search with the default scorer.
    pub fn search(&self, ctx: &SparseQueryContext) -> Result<Vec<ScoredDoc>> {
        self.scorer().search(ctx)
    }

    /// Term universe of the sealed files.
    pub fn terms(&self) -> Result<Vec<Term>> {
        self.postings.terms()
    }
}
