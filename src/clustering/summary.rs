//! Cluster summary computation: coordinate-wise maximum with mass-ratio
//! pruning.
//!
//! The summary is an upper envelope of its members: for every token it
//! stores the largest member weight, so `dot(summary, q)` bounds the best
//! member score from above. Pruning then drops the lowest-weight tokens
//! until the retained mass ratio reaches `1 - prune_ratio`, trading a
//! looser bound for a smaller vector.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::vector::{SparseVector, Token};

/// Build the pruned upper-envelope summary for a cluster's members.
pub fn summarize(members: &[Arc<SparseVector>], prune_ratio: f32) -> SparseVector {
    let mut envelope: BTreeMap<Token, u8> = BTreeMap::new();
    for vector in members {
        for (token, weight) in vector.iter() {
            let slot = envelope.entry(token).or_insert(0);
            *slot = (*slot).max(weight);
        }
    }

    let total: u64 = envelope.values().map(|&w| w as u64).sum();
    let target = (1.0 - prune_ratio as f64) * total as f64;

    // Heaviest tokens first; ties resolved by token for determinism.
    let mut by_weight: Vec<(Token, u8)> = envelope.into_iter().collect();
    by_weight.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut kept: Vec<(Token, u8)> = Vec::new();
    let mut accumulated = 0u64;
    for (token, weight) in by_weight {
        if accumulated as f64 >= target {
            break;
        }
        accumulated += weight as u64;
        kept.push((token, weight));
    }

    kept.sort_unstable_by_key(|&(token, _)| token);
    let (tokens, weights) = kept.into_iter().unzip();
    SparseVector::from_sorted_parts(tokens, weights)
}
