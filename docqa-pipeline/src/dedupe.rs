//! Near-duplicate filtering of retrieval results.
//!
//! Overlapping chunks from the same document frequently surface
//! together in a nearest-neighbour search. The filter keys each result
//! on a normalized prefix of its text (lowercased, trimmed, first N
//! characters) and keeps the first occurrence by retrieval rank.
//!
//! Known limitation: duplicates whose divergence starts inside the
//! prefix are never caught, and distinct passages sharing a boilerplate
//! prefix collapse into one. The prefix length is tunable for that
//! reason.

use docqa_index::RetrievalResult;
use std::collections::HashSet;
use tracing::debug;

/// Keep the first result per normalized text prefix, in rank order.
pub fn dedupe(results: Vec<RetrievalResult>, prefix_len: usize) -> Vec<RetrievalResult> {
    let total = results.len();
    let mut seen: HashSet<String> = HashSet::new();
    let deduped: Vec<RetrievalResult> = results
        .into_iter()
        .filter(|result| seen.insert(normalized_prefix(&result.text, prefix_len)))
        .collect();
    if deduped.len() < total {
        debug!("Deduplicated {} of {} retrieved passages", total - deduped.len(), total);
    }
    deduped
}

fn normalized_prefix(text: &str, prefix_len: usize) -> String {
    text.to_lowercase().trim().chars().take(prefix_len).collect()
}
