//! studydb-text
//!
//! Lexical ranking over a session's chunks: whitespace tokenization and an
//! in-memory BM25 (Okapi) index that serializes alongside the session.
pub mod bm25;
pub mod tokenize;

pub use bm25::LexicalIndex;
pub use tokenize::{tokenize, tokenize_all};
