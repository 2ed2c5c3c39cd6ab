//! Reading side of the codec: checksum-validated open, then O(1) random
//! access into the postings file via the term dictionary.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::varint::{read_varu32, read_varu64};
use crate::codec::{verify_footer, FileHeader, POSTINGS_EXTENSION, TERMS_EXTENSION};
use crate::error::{Result, SparseError};
use crate::index::ClusteredPostingReader;
use crate::posting::{DocId, DocWeight, DocumentCluster, PostingClusters, SharedPostingClusters, Term};
use crate::vector::{SparseVector, Token};

/// Decode one per-term record, validating decode-time invariants:
/// strictly ascending doc ids, strictly ascending summary tokens, and a
/// boolean skip flag.
pub fn decode_record<R: Read>(input: &mut R) -> Result<PostingClusters> {
    let num_clusters = read_varu64(input)? as usize;
    let mut clusters = Vec::with_capacity(num_clusters.min(1024));
    for _ in 0..num_clusters {
        let num_docs = read_varu64(input)? as usize;
        let mut docs = Vec::with_capacity(num_docs.min(65_536));
        let mut previous: Option<DocId> = None;
        for _ in 0..num_docs {
            let doc_id = read_varu32(input)?;
            if let Some(previous) = previous {
                if doc_id <= previous {
                    return Err(SparseError::Corruption(format!(
                        "doc ids not strictly ascending: {previous} then {doc_id}"
                    )));
                }
            }
            previous = Some(doc_id);
            let mut weight = [0u8; 1];
            input.read_exact(&mut weight)?;
            docs.push(DocWeight::new(doc_id, weight[0]));
        }

        let mut flag = [0u8; 1];
        input.read_exact(&mut flag)?;
        let should_not_skip = match flag[0] {
            0 => false,
            1 => true,
            other => {
                return Err(SparseError::Corruption(format!(
                    "bad skip-flag byte {other}"
                )))
            }
        };

        let summary_len = read_varu64(input)? as usize;
        let summary = if summary_len == 0 {
            None
        } else {
            let mut tokens: Vec<Token> = Vec::with_capacity(summary_len.min(65_536));
            let mut weights: Vec<u8> = Vec::with_capacity(summary_len.min(65_536));
            for _ in 0..summary_len {
                let token = read_varu32(input)?;
                if let Some(&last) = tokens.last() {
                    if token <= last {
                        return Err(SparseError::Corruption(format!(
                            "summary tokens not strictly ascending: {last} then {token}"
                        )));
                    }
                }
                let mut weight = [0u8; 1];
                input.read_exact(&mut weight)?;
                tokens.push(token);
                weights.push(weight[0]);
            }
            Some(SparseVector::from_sorted_parts(tokens, weights))
        };

        clusters.push(DocumentCluster::new(summary, docs, should_not_skip));
    }
    Ok(PostingClusters::new(clusters))
}

/// Persisted-side reader over one sealed segment field's file pair.
///
/// Open validates both checksums and loads the term dictionary; `read`
/// seeks straight to the term's record. The file handle sits behind a
/// mutex so the composed cache-gated reader needs no external locking.
#[derive(Debug)]
pub struct SparseTermsFileReader {
    postings: Mutex<File>,
    offsets: BTreeMap<Term, u64>,
    header: FileHeader,
}

impl SparseTermsFileReader {
    /// Open `<dir>/<name>.cpd` + `<dir>/<name>.cpt`, verifying footers.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        let postings_path = dir.join(format!("{name}.{POSTINGS_EXTENSION}"));
        let terms_path = dir.join(format!("{name}.{TERMS_EXTENSION}"));

        let mut postings = File::open(&postings_path)?;
        verify_footer(&mut postings)?;
        postings.seek(SeekFrom::Start(0))?;
        let header = FileHeader::read(&mut postings)?;

        let mut terms_file = File::open(&terms_path)?;
        verify_footer(&mut terms_file)?;
        terms_file.seek(SeekFrom::Start(0))?;
        let mut dict = BufReader::new(terms_file);
        let dict_header = FileHeader::read(&mut dict)?;
        if dict_header != header {
            return Err(SparseError::Corruption(format!(
                "term dictionary header does not match postings header: {dict_header:?} vs {header:?}"
            )));
        }

        let term_count = read_varu64(&mut dict)? as usize;
        let mut offsets = BTreeMap::new();
        for _ in 0..term_count {
            let len = read_varu64(&mut dict)? as usize;
            if len > 4096 {
                return Err(SparseError::Corruption(format!(
                    "unreasonable term length {len}"
                )));
            }
            let mut term = vec![0u8; len];
            dict.read_exact(&mut term)?;
            let offset = read_varu64(&mut dict)?;
            if offsets.insert(term, offset).is_some() {
                return Err(SparseError::Corruption(
                    "duplicate term in dictionary".into(),
                ));
            }
        }

        Ok(Self {
            postings: Mutex::new(postings),
            offsets,
            header,
        })
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Open and return as a shared trait object for composition.
    pub fn open_shared(dir: &Path, name: &str) -> Result<Arc<dyn ClusteredPostingReader>> {
        Ok(Arc::new(Self::open(dir, name)?))
    }
}

impl ClusteredPostingReader for SparseTermsFileReader {
    fn read(&self, term: &[u8]) -> Result<Option<SharedPostingClusters>> {
        let Some(&offset) = self.offsets.get(term) else {
            return Ok(None);
        };
        let mut file = self.postings.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut *file);
        let clusters = decode_record(&mut reader)?;
        Ok(Some(Arc::new(clusters)))
    }

    fn terms(&self) -> Result<Vec<Term>> {
        Ok(self.offsets.keys().cloned().collect())
    }

    fn term_count(&self) -> usize {
        self.offsets.len()
    }
}
