//! Writing side of the codec: the postings data file and its term
//! dictionary.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::codec::varint::{write_varu32, write_varu64};
use crate::codec::{FileHeader, FOOTER_MAGIC, POSTINGS_EXTENSION, TERMS_EXTENSION};
use crate::error::Result;
use crate::posting::{PostingClusters, Term};

/// Writer that mirrors everything into a running CRC32 and byte count.
struct CrcWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        }
    }

    fn position(&self) -> u64 {
        self.written
    }

    /// Write the footer: the magic is covered by the checksum, the
    /// checksum itself is not.
    fn finalize(mut self) -> Result<()> {
        self.write_all(&FOOTER_MAGIC)?;
        let crc = self.hasher.clone().finalize();
        self.inner.write_all(&crc.to_le_bytes())?;
        self.inner.flush()?;
        Ok(())
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Encode one per-term record. Cluster order is preserved verbatim: it is
/// the scorer's skipping order.
pub fn encode_record<W: Write>(out: &mut W, clusters: &PostingClusters) -> Result<()> {
    write_varu64(out, clusters.len() as u64)?;
    for cluster in clusters.clusters() {
        write_varu64(out, cluster.len() as u64)?;
        for entry in cluster.iter() {
            write_varu32(out, entry.doc_id)?;
            out.write_all(&[entry.weight])?;
        }
        out.write_all(&[u8::from(cluster.should_not_skip())])?;
        match cluster.summary() {
            None => write_varu64(out, 0)?,
            Some(summary) => {
                write_varu64(out, summary.len() as u64)?;
                for (token, weight) in summary.iter() {
                    write_varu32(out, token)?;
                    out.write_all(&[weight])?;
                }
            }
        }
    }
    Ok(())
}

/// Streaming writer for one sealed segment field.
///
/// Terms must be written in their final dictionary order; `finish`
/// seals both files with checksummed footers. Dropping the writer (or
/// calling [`ClusteredPostingFileWriter::close_with_error`]) abandons
/// the output without finalizing, leaving no readable files behind.
pub struct ClusteredPostingFileWriter {
    postings: CrcWriter<BufWriter<File>>,
    terms: Vec<(Term, u64)>,
    header: FileHeader,
    postings_path: PathBuf,
    terms_path: PathBuf,
}

impl ClusteredPostingFileWriter {
    /// Create both output files and write the postings header.
    pub fn create(dir: &Path, name: &str, header: FileHeader) -> Result<Self> {
        let postings_path = dir.join(format!("{name}.{POSTINGS_EXTENSION}"));
        let terms_path = dir.join(format!("{name}.{TERMS_EXTENSION}"));
        let mut postings = CrcWriter::new(BufWriter::new(File::create(&postings_path)?));
        header.write(&mut postings)?;
        Ok(Self {
            postings,
            terms: Vec::new(),
            header,
            postings_path,
            terms_path,
        })
    }

    /// Append one term's record, remembering its offset for the
    /// dictionary.
    pub fn write_term(&mut self, term: &[u8], clusters: &PostingClusters) -> Result<()> {
        let offset = self.postings.position();
        encode_record(&mut self.postings, clusters)?;
        self.terms.push((term.to_vec(), offset));
        Ok(())
    }

    /// Number of terms written so far.
    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Seal the postings file and write the term dictionary.
    pub fn finish(self) -> Result<()> {
        let term_count = self.terms.len();
        self.postings.finalize()?;

        let mut dict = CrcWriter::new(BufWriter::new(File::create(&self.terms_path)?));
        self.header.write(&mut dict)?;
        write_varu64(&mut dict, term_count as u64)?;
        for (term, offset) in &self.terms {
            write_varu64(&mut dict, term.len() as u64)?;
            dict.write_all(term)?;
            write_varu64(&mut dict, *offset)?;
        }
        dict.finalize()?;
        debug!(
            segment = self.header.segment_id,
            terms = term_count,
            "sealed clustered-posting files"
        );
        Ok(())
    }

    /// Close without finalizing after an I/O error and remove the
    /// partial output.
    pub fn close_with_error(self) {
        let Self {
            postings,
            postings_path,
            terms_path,
            ..
        } = self;
        drop(postings);
        for path in [&postings_path, &terms_path] {
            if path.exists() {
                if let Err(err) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), %err, "failed to remove partial codec file");
                }
            }
        }
    }
}
