//! studydb-vector
//!
//! Exact nearest-neighbour search over a session's chunk embeddings.
pub mod flat;

pub use flat::{squared_l2, SemanticIndex};
