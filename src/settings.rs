//! Typed configuration: process-wide settings and per-field mapping
//! parameters.
//!
//! Field parameters are read from the host's field schema when the field
//! is created and are immutable afterwards; the structs here validate
//! once at construction so downstream code never re-checks ranges.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SparseError};
use crate::vector::Token;

/// Default maximum retained posting length per term.
pub const DEFAULT_N_POSTINGS: i32 = 6000;
/// Default fraction of summary mass that may be dropped.
pub const DEFAULT_SUMMARY_PRUNE_RATIO: f32 = 0.4;
/// Default clusters-per-posting-length ratio.
pub const DEFAULT_CLUSTER_RATIO: f32 = 0.1;
/// Default doc-count floor below which a field degrades to plain postings.
pub const DEFAULT_APPROXIMATE_THRESHOLD: u32 = 1_000_000;
/// Posting length derived from doc count when `n_postings` is `-1`.
pub const DEFAULT_POSTING_PRUNE_RATIO: f32 = 0.1;
/// Lower bound on the derived posting length.
pub const DEFAULT_POSTING_MINIMUM_LENGTH: usize = 4000;

/// Cache byte budget: a percentage of the process heap or an absolute
/// byte size. Parsed from strings like `"10%"`, `"512mb"`, or `"1048576"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CircuitBreakerLimit {
    /// Percentage of the heap size supplied at cache-manager init.
    Percent(f32),
    /// Absolute byte budget.
    Bytes(u64),
}

impl CircuitBreakerLimit {
    /// Parse the textual setting form.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim().to_ascii_lowercase();
        if let Some(percent) = text.strip_suffix('%') {
            let value: f32 = percent.trim().parse().map_err(|_| {
                SparseError::InvalidParameter(format!("bad percentage in breaker limit: {text:?}"))
            })?;
            if !(0.0..=100.0).contains(&value) {
                return Err(SparseError::InvalidParameter(format!(
                    "breaker limit percentage must be within [0, 100], got {value}"
                )));
            }
            return Ok(Self::Percent(value));
        }
        let (digits, multiplier) = if let Some(d) = text.strip_suffix("kb") {
            (d, 1u64 << 10)
        } else if let Some(d) = text.strip_suffix("mb") {
            (d, 1u64 << 20)
        } else if let Some(d) = text.strip_suffix("gb") {
            (d, 1u64 << 30)
        } else if let Some(d) = text.strip_suffix('b') {
            (d, 1)
        } else {
            (text.as_str(), 1)
        };
        let value: u64 = digits.trim().parse().map_err(|_| {
            SparseError::InvalidParameter(format!("bad byte size in breaker limit: {text:?}"))
        })?;
        Ok(Self::Bytes(value * multiplier))
    }

    /// Resolve to an absolute byte budget against a heap size.
    pub fn resolve(&self, heap_bytes: u64) -> u64 {
        match *self {
            Self::Percent(percent) => ((heap_bytes as f64) * (percent as f64) / 100.0) as u64,
            Self::Bytes(bytes) => bytes,
        }
    }
}

/// Process-wide settings for the sparse index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseSettings {
    /// Worker-pool size for merge-time clustering. Defaults to
    /// `max(1, cpus / 2)`; clamped to `[1, cpus]`.
    pub index_thread_qty: usize,
    /// Cache byte budget.
    pub circuit_breaker_limit: CircuitBreakerLimit,
    /// Enables telemetry snapshots (memory stats).
    pub stats_enabled: bool,
    /// Upper bound on document fields considered by the host's reranker.
    pub reranker_max_document_fields: usize,
}

impl Default for SparseSettings {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            index_thread_qty: (cpus / 2).max(1),
            circuit_breaker_limit: CircuitBreakerLimit::Percent(10.0),
            stats_enabled: false,
            reranker_max_document_fields: 50,
        }
    }
}

impl SparseSettings {
    /// Clamp the thread quantity into `[1, cpus]` and validate the rest.
    pub fn validated(mut self) -> Result<Self> {
        let cpus = num_cpus::get();
        self.index_thread_qty = self.index_thread_qty.clamp(1, cpus);
        if self.reranker_max_document_fields == 0 {
            return Err(SparseError::InvalidParameter(
                "reranker_max_document_fields must be at least 1".into(),
            ));
        }
        Ok(self)
    }
}

/// Per-field mapping parameters, immutable after field creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseFieldConfig {
    /// Max retained posting length per term; `-1` derives the value from
    /// the segment's doc count.
    pub n_postings: i32,
    /// Fraction of summary mass that may be dropped in `[0, 1]`.
    pub summary_prune_ratio: f32,
    /// Clusters per posting length in `[0, 1]`; `0` disables clustering.
    pub cluster_ratio: f32,
    /// Minimum doc count to enable cluster-based pruning; below it the
    /// field degrades to plain postings.
    pub approximate_threshold: u32,
    /// Upper bound (inclusive) of the field's token domain. Tokens above
    /// it are rejected at ingest.
    pub max_token: Token,
}

impl Default for SparseFieldConfig {
    fn default() -> Self {
        Self {
            n_postings: DEFAULT_N_POSTINGS,
            summary_prune_ratio: DEFAULT_SUMMARY_PRUNE_RATIO,
            cluster_ratio: DEFAULT_CLUSTER_RATIO,
            approximate_threshold: DEFAULT_APPROXIMATE_THRESHOLD,
            max_token: 65_535,
        }
    }
}

impl SparseFieldConfig {
    /// Validate ranges once at field creation.
    pub fn validated(self) -> Result<Self> {
        if self.n_postings < -1 || self.n_postings == 0 {
            return Err(SparseError::InvalidParameter(format!(
                "n_postings must be positive or -1, got {}",
                self.n_postings
            )));
        }
        if !(0.0..=1.0).contains(&self.summary_prune_ratio) {
            return Err(SparseError::InvalidParameter(format!(
                "summary_prune_ratio must be within [0, 1], got {}",
                self.summary_prune_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.cluster_ratio) {
            return Err(SparseError::InvalidParameter(format!(
                "cluster_ratio must be within [0, 1], got {}",
                self.cluster_ratio
            )));
        }
        Ok(self)
    }

    /// Effective posting length cap for a segment of `doc_count` docs.
    pub fn effective_n_postings(&self, doc_count: usize) -> usize {
        if self.n_postings == -1 {
            ((DEFAULT_POSTING_PRUNE_RATIO * doc_count as f32) as usize)
                .max(DEFAULT_POSTING_MINIMUM_LENGTH)
        } else {
            self.n_postings as usize
        }
    }

    /// Effective cluster ratio for a segment of `doc_count` docs: forced
    /// to zero below the approximate threshold.
    pub fn effective_cluster_ratio(&self, doc_count: usize) -> f32 {
        if self.approximate_threshold > 0 && doc_count < self.approximate_threshold as usize {
            0.0
        } else {
            self.cluster_ratio
        }
    }
}
