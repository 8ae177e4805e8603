//! Shared data model, error kinds, configuration and the ingestion boundary
//! for the studydb retrieval engine.
#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod config;
pub mod error;
pub mod ingest;
pub mod splitter;
pub mod traits;
pub mod types;
