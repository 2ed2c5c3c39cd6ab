//! Merge pipeline: combine the postings of several immutable segments
//! into one freshly clustered segment.
//!
//! For every term in the union of the inputs' dictionaries, the merger
//! assembles the merged posting by translating each input's doc ids
//! through the host-supplied doc-id map (dropped docs are skipped) and
//! normalizing weights to quantized bytes. Terms are batched and
//! clustered on the worker pool; batches with clustering disabled run
//! inline. Results drain in submission order so the output dictionary
//! preserves term ordering.
//!
//! Error policy: I/O failures close the output writer with error and
//! propagate; a failed clustering batch is logged and skipped;
//! cancellation between batches surfaces as `Cancelled`.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheManager};
use crate::clustering::{BatchClusteringTask, ClusterParams, ClusterWorkerPool, TaskHandle};
use crate::codec::{ClusteredPostingFileWriter, FileHeader};
use crate::error::{Result, SparseError};
use crate::index::{SegmentReader, SparseVectorReader};
use crate::posting::{DocId, DocWeight, PostingClusters, Term};
use crate::settings::SparseFieldConfig;
use crate::vector::{ByteQuantizer, SparseVector};

/// Terms clustered per worker-pool submission.
pub const MERGE_BATCH_SIZE: usize = 50;

/// A posting weight as read from an input segment: native segments store
/// the quantized byte, foreign segments surface the raw float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MergeWeight {
    Native(u8),
    Raw(f32),
}

impl MergeWeight {
    fn into_byte(self) -> u8 {
        match self {
            MergeWeight::Native(byte) => {
                debug_assert_eq!(
                    byte,
                    ByteQuantizer::quantize(ByteQuantizer::dequantize(byte)),
                    "stored byte must survive quantization round-trip"
                );
                byte
            }
            MergeWeight::Raw(value) => ByteQuantizer::quantize(value),
        }
    }
}

/// Read access to one merge input's postings and document vectors.
pub trait MergePostingSource: Send + Sync {
    fn terms(&self) -> Result<Vec<Term>>;
    /// The term's posting in this input; empty when the term is absent.
    fn postings(&self, term: &[u8]) -> Result<Vec<(DocId, MergeWeight)>>;
    fn forward(&self) -> Arc<dyn SparseVectorReader>;
}

/// Maps an input segment's doc id to the merged segment's doc id;
/// `None` means the document was dropped.
pub type DocIdMap = Box<dyn Fn(DocId) -> Option<DocId> + Send + Sync>;

/// One input segment plus its doc-id translation.
pub struct MergeInput {
    pub source: Box<dyn MergePostingSource>,
    pub doc_map: DocIdMap,
}

/// Merge source over a sealed [`SegmentReader`]: weights are already
/// quantized bytes.
pub struct SegmentMergeSource {
    reader: Arc<SegmentReader>,
}

impl SegmentMergeSource {
    pub fn new(reader: Arc<SegmentReader>) -> Self {
        Self { reader }
    }
}

impl MergePostingSource for SegmentMergeSource {
    fn terms(&self) -> Result<Vec<Term>> {
        self.reader.terms()
    }

    fn postings(&self, term: &[u8]) -> Result<Vec<(DocId, MergeWeight)>> {
        use crate::index::ClusteredPostingReader;
        match self.reader.postings().read(term)? {
            Some(clusters) => Ok(clusters
                .doc_weights()
                .map(|entry| (entry.doc_id, MergeWeight::Native(entry.weight)))
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    fn forward(&self) -> Arc<dyn SparseVectorReader> {
        self.reader.forward()
    }
}

/// Vector reader over the merged doc-id space: each merged doc resolves
/// to (input index, old doc id) and reads from that input's forward
/// index.
struct MergedVectorReader {
    entries: HashMap<DocId, (usize, DocId)>,
    forwards: Vec<Arc<dyn SparseVectorReader>>,
}

impl SparseVectorReader for MergedVectorReader {
    fn read(&self, doc_id: DocId) -> Result<Option<Arc<SparseVector>>> {
        match self.entries.get(&doc_id) {
            Some(&(input, old_id)) => self.forwards[input].read(old_id),
            None => Ok(None),
        }
    }
}

/// Batched, parallel re-clustering merge of several segments.
pub struct SegmentMerger<'a> {
    inputs: &'a [MergeInput],
    config: &'a SparseFieldConfig,
    pool: &'a ClusterWorkerPool,
    cancelled: Option<&'a AtomicBool>,
    seed: Option<u64>,
}

impl<'a> SegmentMerger<'a> {
    pub fn new(
        inputs: &'a [MergeInput],
        config: &'a SparseFieldConfig,
        pool: &'a ClusterWorkerPool,
    ) -> Self {
        Self {
            inputs,
            config,
            pool,
            cancelled: None,
            seed: None,
        }
    }

    /// Cancellation flag checked between term batches.
    #[must_use]
    pub fn with_cancellation(mut self, flag: &'a AtomicBool) -> Self {
        self.cancelled = Some(flag);
        self
    }

    /// Clustering seed override. Defaults to the output segment id, so a
    /// re-run over the same inputs reproduces the same clusters.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Run the merge, producing the sealed file pair `dir/name.*` for
    /// `output_key` and warming the output segment's posting cache.
    pub fn merge(
        &self,
        cache: &CacheManager,
        output_key: CacheKey,
        total_docs: usize,
        dir: &Path,
        name: &str,
    ) -> Result<()> {
        let header = FileHeader::new(output_key.segment, output_key.field.to_string());
        let mut writer = ClusteredPostingFileWriter::create(dir, name, header)?;
        match self.merge_into(&mut writer, cache, output_key, total_docs) {
            Ok(()) => writer.finish(),
            Err(err) => {
                writer.close_with_error();
                Err(err)
            }
        }
    }

    fn merge_into(
        &self,
        writer: &mut ClusteredPostingFileWriter,
        cache: &CacheManager,
        output_key: CacheKey,
        total_docs: usize,
    ) -> Result<()> {
        let params = ClusterParams::from_config(self.config, total_docs);
        let seed = self.seed.unwrap_or(output_key.segment);
        let inline = params.cluster_ratio == 0.0;

        let mut all_terms: BTreeSet<Term> = BTreeSet::new();
        for input in self.inputs {
            all_terms.extend(input.source.terms()?);
        }
        debug!(
            terms = all_terms.len(),
            total_docs, inline, "merging clustered postings"
        );

        let forwards: Vec<Arc<dyn SparseVectorReader>> = self
            .inputs
            .iter()
            .map(|input| input.source.forward())
            .collect();
        let posting_cache = cache.clustered_postings(output_key);

        let terms: Vec<Term> = all_terms.into_iter().collect();
        let mut handles: Vec<TaskHandle<Result<Vec<(Term, PostingClusters)>>>> = Vec::new();
        for batch in terms.chunks(MERGE_BATCH_SIZE) {
            if self.is_cancelled() {
                return Err(SparseError::Cancelled);
            }
            let mut reverse: HashMap<DocId, (usize, DocId)> = HashMap::new();
            let mut batch_postings: Vec<(Term, Vec<DocWeight>)> = Vec::with_capacity(batch.len());
            for term in batch {
                let docs = self.merged_posting(term, total_docs, &mut reverse)?;
                batch_postings.push((term.clone(), docs));
            }
            let reader: Arc<dyn SparseVectorReader> = Arc::new(MergedVectorReader {
                entries: reverse,
                forwards: forwards.clone(),
            });
            let task = BatchClusteringTask::new(
                batch_postings,
                params,
                reader,
                Some(posting_cache.clone()),
                Some(seed),
            );
            // Degenerate batches are executed on the merge thread; real
            // clustering fans out to the pool.
            let handle = if inline {
                TaskHandle::ready(task.run())
            } else {
                self.pool.submit(move || task.run())
            };
            handles.push(handle);
        }

        for (batch_index, handle) in handles.into_iter().enumerate() {
            if self.is_cancelled() {
                return Err(SparseError::Cancelled);
            }
            match handle.join()? {
                Ok(results) => {
                    for (term, clusters) in results {
                        writer.write_term(&term, &clusters)?;
                    }
                }
                Err(err @ SparseError::Io(_)) => return Err(err),
                Err(err) => {
                    warn!(batch_index, %err, "clustering batch failed during merge; skipping");
                }
            }
        }
        Ok(())
    }

    /// Assemble the merged posting for one term: translate ids, drop
    /// deleted docs, normalize weights, and record the reverse mapping
    /// for vector reads during clustering.
    fn merged_posting(
        &self,
        term: &[u8],
        total_docs: usize,
        reverse: &mut HashMap<DocId, (usize, DocId)>,
    ) -> Result<Vec<DocWeight>> {
        let mut docs = Vec::new();
        for (input_index, input) in self.inputs.iter().enumerate() {
            for (old_id, weight) in input.source.postings(term)? {
                let Some(new_id) = (input.doc_map)(old_id) else {
                    continue;
                };
                if new_id as usize >= total_docs {
                    return Err(SparseError::Invariant(format!(
                        "merged doc id {new_id} exceeds output doc count {total_docs}"
                    )));
                }
                reverse.insert(new_id, (input_index, old_id));
                docs.push(DocWeight::new(new_id, weight.into_byte()));
            }
        }
        docs.sort_unstable_by_key(|doc| doc.doc_id);
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SparseTermsFileReader;
    use crate::index::ClusteredPostingReader;
    use std::collections::HashMap;

    /// In-memory source modeling a non-native segment: raw float weights.
    struct RawSource {
        docs: HashMap<DocId, Arc<SparseVector>>,
    }

    impl RawSource {
        fn new(entries: &[(DocId, &[(u32, f32)])]) -> Self {
            let docs = entries
                .iter()
                .map(|&(doc_id, pairs)| {
                    let quantized: Vec<(u32, u8)> = pairs
                        .iter()
                        .map(|&(token, weight)| (token, ByteQuantizer::quantize(weight)))
                        .collect();
                    (doc_id, Arc::new(SparseVector::from_pairs(quantized).unwrap()))
                })
                .collect();
            Self { docs }
        }
    }

    struct RawForward(HashMap<DocId, Arc<SparseVector>>);

    impl SparseVectorReader for RawForward {
        fn read(&self, doc_id: DocId) -> Result<Option<Arc<SparseVector>>> {
            Ok(self.0.get(&doc_id).cloned())
        }
    }

    impl MergePostingSource for RawSource {
        fn terms(&self) -> Result<Vec<Term>> {
            let mut terms: BTreeSet<Term> = BTreeSet::new();
            for vector in self.docs.values() {
                terms.extend(vector.tokens().iter().map(|t| t.to_string().into_bytes()));
            }
            Ok(terms.into_iter().collect())
        }

        fn postings(&self, term: &[u8]) -> Result<Vec<(DocId, MergeWeight)>> {
            let token: u32 = std::str::from_utf8(term).unwrap().parse().unwrap();
            let mut posting = Vec::new();
            for (&doc_id, vector) in &self.docs {
                if let Some(weight) = vector.weight(token) {
                    posting.push((doc_id, MergeWeight::Raw(ByteQuantizer::dequantize(weight))));
                }
            }
            posting.sort_unstable_by_key(|&(doc_id, _)| doc_id);
            Ok(posting)
        }

        fn forward(&self) -> Arc<dyn SparseVectorReader> {
            Arc::new(RawForward(self.docs.clone()))
        }
    }

    fn merge_inputs() -> Vec<MergeInput> {
        // Input 0: docs 0..3 (doc 1 deleted); input 1: docs 0..2.
        let a = RawSource::new(&[
            (0, &[(10, 1.0), (20, 2.0)]),
            (1, &[(10, 3.0)]),
            (2, &[(20, 0.5)]),
        ]);
        let b = RawSource::new(&[(0, &[(10, 0.25)]), (1, &[(30, 5.0)])]);
        vec![
            MergeInput {
                source: Box::new(a),
                doc_map: Box::new(|old| match old {
                    0 => Some(0),
                    1 => None, // deleted
                    2 => Some(1),
                    _ => None,
                }),
            },
            MergeInput {
                source: Box::new(b),
                doc_map: Box::new(|old| Some(old + 2)),
            },
        ]
    }

    #[test]
    fn merge_translates_ids_and_drops_deleted_docs() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(u64::MAX);
        let pool = ClusterWorkerPool::new(2);
        let config = SparseFieldConfig {
            approximate_threshold: 0,
            ..Default::default()
        };
        let inputs = merge_inputs();
        let merger = SegmentMerger::new(&inputs, &config, &pool);
        merger
            .merge(&cache, CacheKey::new(9, 0), 4, dir.path(), "merged")
            .unwrap();

        let reader = SparseTermsFileReader::open(dir.path(), "merged").unwrap();
        assert_eq!(
            reader.terms().unwrap(),
            vec![b"10".to_vec(), b"20".to_vec(), b"30".to_vec()]
        );
        // Token 10: old docs a0, a1 (deleted), b0 -> new ids 0 and 2.
        let posting = reader.read(b"10").unwrap().unwrap();
        let mut ids: Vec<DocId> = posting.doc_weights().map(|d| d.doc_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 2]);
        // Token 30 only exists in input 1 doc 1 -> new id 3.
        let posting = reader.read(b"30").unwrap().unwrap();
        let ids: Vec<DocId> = posting.doc_weights().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn merge_is_deterministic_under_a_seed() {
        let config = SparseFieldConfig {
            approximate_threshold: 0,
            ..Default::default()
        };
        let pool = ClusterWorkerPool::new(2);

        let mut outputs = Vec::new();
        for run in 0..2u64 {
            let dir = tempfile::tempdir().unwrap();
            let cache = CacheManager::new(u64::MAX);
            let inputs = merge_inputs();
            let merger = SegmentMerger::new(&inputs, &config, &pool).with_seed(7);
            merger
                .merge(&cache, CacheKey::new(run, 0), 4, dir.path(), "merged")
                .unwrap();
            let reader = SparseTermsFileReader::open(dir.path(), "merged").unwrap();
            let clusters = reader.read(b"10").unwrap().unwrap();
            outputs.push((*clusters).clone());
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn cancellation_surfaces_between_batches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(u64::MAX);
        let pool = ClusterWorkerPool::new(1);
        let config = SparseFieldConfig::default();
        let inputs = merge_inputs();
        let flag = AtomicBool::new(true);
        let merger = SegmentMerger::new(&inputs, &config, &pool).with_cancellation(&flag);
        let err = merger
            .merge(&cache, CacheKey::new(9, 0), 4, dir.path(), "merged")
            .unwrap_err();
        assert!(matches!(err, SparseError::Cancelled));
        // The partial output was removed by close-with-error.
        assert!(!dir.path().join("merged.cpd").exists());
    }

    #[test]
    fn doc_id_overflow_is_an_invariant_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(u64::MAX);
        let pool = ClusterWorkerPool::new(1);
        let config = SparseFieldConfig {
            approximate_threshold: 0,
            ..Default::default()
        };
        let inputs = merge_inputs();
        let merger = SegmentMerger::new(&inputs, &config, &pool);
        // total_docs too small for the remapped ids.
        let err = merger
            .merge(&cache, CacheKey::new(9, 0), 1, dir.path(), "merged")
            .unwrap_err();
        assert!(matches!(err, SparseError::Invariant(_)));
    }
}
