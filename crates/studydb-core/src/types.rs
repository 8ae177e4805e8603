//! Domain types used by the lexical, semantic and hybrid engines.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Index of a chunk in its session's chunk sequence. Doubles as the
/// retrieval-result identifier.
pub type Position = usize;
pub type Meta = HashMap<String, String>;

/// An immutable passage of source text.
///
/// - `position`: insertion order within the session, `0..N`
/// - `text`: the passage returned to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub position: Position,
    pub text: String,
}

impl Chunk {
    /// Number texts in insertion order.
    pub fn sequence<I, S>(texts: I) -> Vec<Chunk>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        texts
            .into_iter()
            .enumerate()
            .map(|(position, text)| Chunk { position, text: text.into() })
            .collect()
    }
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Semantic,
    Lexical,
}

/// The minimal surface returned by both engines.
///
/// `score` is engine-specific: squared L2 distance for `Semantic` (lower is
/// closer), BM25 for `Lexical` (higher is better). Hits are always returned
/// best-first, so callers that only need ranks can ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub position: Position,
    pub score: f32,
    pub source: SourceKind,
}

pub fn positions(hits: &[SearchHit]) -> Vec<Position> {
    hits.iter().map(|h| h.position).collect()
}
