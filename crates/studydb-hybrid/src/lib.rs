//! Per-session hybrid retrieval: a semantic index and a BM25 index built over
//! the same chunk sequence, queried together and merged with Reciprocal Rank
//! Fusion.
pub mod fusion;
pub mod manager;
pub mod store;

pub use fusion::{fuse, fuse_scored, fuse_with, FusedHit, FusionParams};
pub use manager::{RetrievedChunk, SessionIndexManager};
pub use store::{FsSessionStore, MemorySessionStore, SessionArtifacts, SessionManifest, SessionStore};
