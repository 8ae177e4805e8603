//! Reciprocal Rank Fusion of the semantic and lexical candidate lists.
//!
//! Every position found in either list scores
//! `1 / (semantic_rank + C) + 1 / (lexical_rank + C)` with 0-based ranks; a
//! list that lacks the position contributes `1 / (missing_rank + C)` rather
//! than nothing. Pure and deterministic: no I/O, no hashing order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use studydb_core::config::Settings;
use studydb_core::types::Position;

pub const RRF_K: f64 = 60.0;
pub const MISSING_RANK: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub rrf_k: f64,
    pub missing_rank: usize,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self { rrf_k: RRF_K, missing_rank: MISSING_RANK }
    }
}

impl FusionParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self { rrf_k: settings.rrf_k, missing_rank: settings.missing_rank }
    }

    fn term(&self, rank: Option<usize>) -> f64 {
        1.0 / (rank.unwrap_or(self.missing_rank) as f64 + self.rrf_k)
    }
}

/// Rank of one position in each source list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankPair {
    pub semantic: Option<usize>,
    pub lexical: Option<usize>,
}

/// Per-query map from position to its source ranks. Built, fused, dropped.
#[derive(Debug, Default)]
pub struct CandidateRegistry {
    ranks: BTreeMap<Position, RankPair>,
}

impl CandidateRegistry {
    /// Only the first occurrence of a position within a list counts.
    pub fn from_lists(semantic: &[Position], lexical: &[Position]) -> Self {
        let mut ranks: BTreeMap<Position, RankPair> = BTreeMap::new();
        for (rank, &pos) in semantic.iter().enumerate() {
            ranks.entry(pos).or_default().semantic.get_or_insert(rank);
        }
        for (rank, &pos) in lexical.iter().enumerate() {
            ranks.entry(pos).or_default().lexical.get_or_insert(rank);
        }
        Self { ranks }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn get(&self, position: Position) -> Option<RankPair> {
        self.ranks.get(&position).copied()
    }

    /// All candidates, best first.
    pub fn into_ranked(self, params: &FusionParams) -> Vec<FusedHit> {
        let mut hits: Vec<FusedHit> = self
            .ranks
            .into_iter()
            .map(|(position, r)| FusedHit {
                position,
                score: params.term(r.semantic) + params.term(r.lexical),
                semantic_rank: r.semantic,
                lexical_rank: r.lexical,
            })
            .collect();
        hits.sort_by(FusedHit::ordering);
        hits
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedHit {
    pub position: Position,
    pub score: f64,
    pub semantic_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

impl FusedHit {
    /// Higher score first; ties to the earlier semantic rank, then the earlier
    /// lexical rank, then the lower position. Absent ranks sort last.
    fn ordering(a: &Self, b: &Self) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.semantic_rank.unwrap_or(usize::MAX).cmp(&b.semantic_rank.unwrap_or(usize::MAX)))
            .then_with(|| a.lexical_rank.unwrap_or(usize::MAX).cmp(&b.lexical_rank.unwrap_or(usize::MAX)))
            .then_with(|| a.position.cmp(&b.position))
    }
}

/// Top `k` positions with `C = 60` and missing rank 1000.
pub fn fuse(semantic: &[Position], lexical: &[Position], k: usize) -> Vec<Position> {
    fuse_with(semantic, lexical, k, &FusionParams::default())
}

pub fn fuse_with(semantic: &[Position], lexical: &[Position], k: usize, params: &FusionParams) -> Vec<Position> {
    fuse_scored(semantic, lexical, k, params).into_iter().map(|h| h.position).collect()
}

pub fn fuse_scored(semantic: &[Position], lexical: &[Position], k: usize, params: &FusionParams) -> Vec<FusedHit> {
    let mut hits = CandidateRegistry::from_lists(semantic, lexical).into_ranked(params);
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapped_top_two_tie_and_semantic_order_breaks_it() {
        // 5: ranks (0, 1); 2: ranks (1, 0). Both score 1/60 + 1/61.
        let hits = fuse_scored(&[5, 2, 7], &[2, 5, 9], 4, &FusionParams::default());
        assert_eq!(hits[0].score, hits[1].score);
        assert!((hits[0].score - (1.0 / 60.0 + 1.0 / 61.0)).abs() < 1e-15);
        assert_eq!(fuse(&[5, 2, 7], &[2, 5, 9], 2), vec![5, 2]);
    }

    #[test]
    fn single_source_matches_are_dampened_not_dropped() {
        // 7 (semantic rank 2) and 9 (lexical rank 2) tie; semantic presence wins.
        assert_eq!(fuse(&[5, 2, 7], &[2, 5, 9], 4), vec![5, 2, 7, 9]);
        let hits = fuse_scored(&[5, 2, 7], &[2, 5, 9], 4, &FusionParams::default());
        assert!((hits[2].score - (1.0 / 62.0 + 1.0 / 1060.0)).abs() < 1e-15);
    }

    #[test]
    fn top_in_both_lists_is_first() {
        assert_eq!(fuse(&[3, 1, 2], &[3, 2, 1], 3)[0], 3);
    }

    #[test]
    fn output_has_no_duplicates_and_only_known_positions() {
        let out = fuse(&[4, 1, 8, 1], &[1, 4, 4, 6], 10);
        assert_eq!(out.len(), 4);
        let mut sorted = out.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 4, 6, 8]);
    }

    #[test]
    fn duplicate_within_a_list_keeps_first_rank() {
        let registry = CandidateRegistry::from_lists(&[4, 1, 4], &[1, 1]);
        assert_eq!(registry.get(4), Some(RankPair { semantic: Some(0), lexical: None }));
        assert_eq!(registry.get(1), Some(RankPair { semantic: Some(1), lexical: Some(0) }));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn deterministic_across_calls() {
        let semantic = [9, 3, 14, 0, 7, 2];
        let lexical = [3, 0, 11, 9, 5, 1];
        assert_eq!(fuse(&semantic, &lexical, 5), fuse(&semantic, &lexical, 5));
    }

    #[test]
    fn lexical_only_list_keeps_its_order() {
        assert_eq!(fuse(&[], &[8, 2], 2), vec![8, 2]);
    }

    #[test]
    fn empty_lists_fuse_to_nothing() {
        assert!(fuse(&[], &[], 3).is_empty());
    }

    #[test]
    fn custom_constant_changes_scores() {
        let hits = fuse_scored(&[1], &[1], 1, &FusionParams { rrf_k: 1.0, missing_rank: 1000 });
        assert_eq!(hits[0].score, 2.0);
    }

    #[test]
    fn k_zero_is_empty() {
        assert!(fuse(&[1, 2], &[2, 1], 0).is_empty());
    }
}
