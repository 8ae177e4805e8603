use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use studydb_core::config::Settings;
use studydb_core::error::{Error, Result};
use studydb_core::ingest::IngestInput;
use studydb_core::splitter::TextSplitter;
use studydb_core::traits::{Embedder, SessionRetriever};
use studydb_core::types::{positions, Chunk, Position};
use studydb_text::{tokenize, tokenize_all, LexicalIndex};
use studydb_vector::SemanticIndex;

use crate::fusion::{fuse_scored, FusionParams};
use crate::store::{FsSessionStore, SessionArtifacts, SessionManifest, SessionStore};

/// One fused result with the ranks that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub position: Position,
    pub text: String,
    pub score: f64,
    pub semantic_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

/// Owns per-session hybrid indexes: builds them from chunk text, answers
/// fused queries and deletes them.
pub struct SessionIndexManager {
    settings: Settings,
    splitter: TextSplitter,
    embedder: Box<dyn Embedder>,
    store: Box<dyn SessionStore>,
}

impl SessionIndexManager {
    pub fn new(settings: Settings, embedder: Box<dyn Embedder>, store: Box<dyn SessionStore>) -> Result<Self> {
        settings.validate()?;
        let splitter = TextSplitter::from_settings(&settings.splitter)?;
        Ok(Self { settings, splitter, embedder, store })
    }

    /// Filesystem store under `session_root` (relative to the working
    /// directory) and the embedder the settings select.
    pub fn open(settings: Settings) -> anyhow::Result<Self> {
        let root = settings.session_root_path(&std::env::current_dir()?);
        let store = FsSessionStore::new(&root)?;
        let embedder = studydb_embed::default_embedder(&settings.embedding)?;
        tracing::info!(root = %root.display(), embedder = embedder.id(), "session index manager ready");
        Ok(Self::new(settings, embedder, Box::new(store))?)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Build all three structures for `session_id` from `chunks` and replace
    /// whatever the session held. On error the previous index stays live.
    pub fn index(&self, chunks: &[String], session_id: &str) -> Result<SessionManifest> {
        check_session_id(session_id)?;
        if chunks.is_empty() {
            return Err(Error::BuildFailure(format!("no chunks supplied for session {session_id}")));
        }

        let embeddings = self.embed_chunks(chunks)?;
        let mut semantic = SemanticIndex::new(self.embedder.dim());
        semantic.build(&embeddings)?;
        let mut lexical = LexicalIndex::new(self.settings.bm25.clone());
        lexical.build(&tokenize_all(chunks))?;

        let artifacts = SessionArtifacts::new(
            session_id,
            self.embedder.id(),
            Chunk::sequence(chunks.iter().cloned()),
            semantic,
            lexical,
        );
        let manifest = self.store.save(artifacts)?;
        tracing::info!(session = %session_id, version = manifest.version, chunks = manifest.chunk_count, "indexed session");
        Ok(manifest)
    }

    /// Split raw text or documents with the configured splitter, then index.
    pub fn index_input(&self, input: IngestInput, session_id: &str) -> Result<SessionManifest> {
        let chunks = input.into_chunks(&self.splitter);
        tracing::debug!(session = %session_id, chunks = chunks.len(), "prepared chunks");
        self.index(&chunks, session_id)
    }

    fn embed_chunks(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        let pb = if self.settings.show_progress {
            ProgressBar::new(chunks.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.settings.embedding.batch_size) {
            let vectors = self
                .embedder
                .embed_batch(batch)
                .map_err(|e| Error::BuildFailure(format!("embedding failed: {e:#}")))?;
            if vectors.len() != batch.len() {
                return Err(Error::BuildFailure(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }
            embeddings.extend(vectors);
            pb.inc(batch.len() as u64);
        }
        pb.finish_with_message("embedded");
        Ok(embeddings)
    }

    /// Fused hits, best first, at most `top_k` and never more than the
    /// session's chunk count.
    pub fn retrieve_hits(&self, query: &str, top_k: usize, session_id: &str) -> Result<Vec<RetrievedChunk>> {
        check_session_id(session_id)?;
        if top_k == 0 {
            return Err(Error::InvalidInput("top_k must be at least 1".to_string()));
        }
        let artifacts = self.store.load(session_id)?;
        let manifest = &artifacts.manifest;
        if manifest.embedder != self.embedder.id() || manifest.dim != self.embedder.dim() {
            return Err(Error::BuildFailure(format!(
                "session {session_id} was indexed with {} (dim {}), current embedder is {} (dim {})",
                manifest.embedder,
                manifest.dim,
                self.embedder.id(),
                self.embedder.dim()
            )));
        }

        let pool = top_k.saturating_mul(self.settings.oversample);
        let query_vec = self
            .embedder
            .embed(query)
            .map_err(|e| Error::Retrieval(format!("failed to embed query: {e:#}")))?;
        let semantic = positions(&artifacts.semantic.search(&query_vec, pool)?);
        let lexical = positions(&artifacts.lexical.search(&tokenize(query), pool)?);

        let fused = fuse_scored(&semantic, &lexical, top_k, &FusionParams::from_settings(&self.settings));
        let mut out = Vec::with_capacity(fused.len());
        for hit in fused {
            let chunk = artifacts.chunks.get(hit.position).ok_or_else(|| {
                Error::Retrieval(format!("position {} is outside session {session_id}", hit.position))
            })?;
            out.push(RetrievedChunk {
                position: hit.position,
                text: chunk.text.clone(),
                score: hit.score,
                semantic_rank: hit.semantic_rank,
                lexical_rank: hit.lexical_rank,
            });
        }
        tracing::debug!(session = %session_id, top_k, pool, returned = out.len(), "retrieved");
        Ok(out)
    }

    pub fn retrieve(&self, query: &str, top_k: usize, session_id: &str) -> Result<Vec<String>> {
        Ok(self.retrieve_hits(query, top_k, session_id)?.into_iter().map(|h| h.text).collect())
    }

    /// Idempotent; a later retrieve reports `SessionNotFound`.
    pub fn delete(&self, session_id: &str) -> Result<()> {
        check_session_id(session_id)?;
        self.store.delete(session_id)
    }

    pub fn session_info(&self, session_id: &str) -> Result<SessionManifest> {
        check_session_id(session_id)?;
        self.store.manifest(session_id)
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionManifest>> {
        self.store.list()
    }
}

fn check_session_id(session_id: &str) -> Result<()> {
    if session_id.trim().is_empty() {
        return Err(Error::InvalidInput("session id must not be empty".to_string()));
    }
    Ok(())
}

impl SessionRetriever for SessionIndexManager {
    fn index(&self, chunks: &[String], session_id: &str) -> Result<()> {
        Self::index(self, chunks, session_id).map(|_| ())
    }

    fn retrieve(&self, query: &str, top_k: usize, session_id: &str) -> Result<Vec<String>> {
        Self::retrieve(self, query, top_k, session_id)
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        Self::delete(self, session_id)
    }
}
