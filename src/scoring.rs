//! Fuzzy scoring used to pick the best search result for a track identifier.
//!
//! Search results frequently carry extra decoration ("- Remastered 2011",
//! "(Live)"), so the comparison is a partial match: the shorter string is
//! aligned against every same-length window of the longer one and the best
//! window wins.

use strsim::normalized_levenshtein;

use crate::models::TrackCandidate;
use crate::normalize::fold_for_match;

// ============================================================================
// Similarity
// ============================================================================

/// Case- and diacritic-insensitive partial similarity, 0 to 100.
///
/// Returns 100 when the shorter string occurs verbatim inside the longer one
/// and 0 when either side is empty.
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = fold_for_match(a).chars().collect();
    let b: Vec<char> = fold_for_match(b).chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let needle: String = shorter.iter().collect();

    let mut best: f64 = 0.0;
    for window in longer.windows(shorter.len()) {
        let candidate: String = window.iter().collect();
        let similarity = normalized_levenshtein(&needle, &candidate);
        if similarity > best {
            best = similarity;
            if best >= 1.0 {
                break;
            }
        }
    }

    (best * 100.0).round() as u8
}

// ============================================================================
// Candidate Selection
// ============================================================================

/// A search result together with its score against the query.
#[derive(Debug, Clone, Copy)]
pub struct ScoredCandidate<'a> {
    pub candidate: &'a TrackCandidate,
    pub index: usize,
    pub score: u8,
}

/// Pick the candidate whose name best matches `query`.
/// Ties go to the earliest candidate, so the service's own ranking breaks them.
pub fn select_best_candidate<'a>(
    query: &str,
    candidates: &'a [TrackCandidate],
) -> Option<ScoredCandidate<'a>> {
    let mut best: Option<ScoredCandidate<'a>> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let score = partial_ratio(query, &candidate.name);
        // Strictly greater keeps the first-seen candidate on ties
        if best.map_or(true, |b| score > b.score) {
            best = Some(ScoredCandidate {
                candidate,
                index,
                score,
            });
        }
    }
    best
}
