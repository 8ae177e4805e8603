use crate::error::Result;

/// Outbound embedding collaborator. Vectors have a fixed dimension per model.
pub trait Embedder: Send + Sync {
    /// Stable model identifier, stored with every session index.
    fn id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for query"))
    }
}

/// The narrow interface exposed to chunking and chat collaborators.
pub trait SessionRetriever: Send + Sync {
    fn index(&self, chunks: &[String], session_id: &str) -> Result<()>;
    fn retrieve(&self, query: &str, top_k: usize, session_id: &str) -> Result<Vec<String>>;
    fn delete(&self, session_id: &str) -> Result<()>;
}
