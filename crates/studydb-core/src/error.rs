use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Building (or loading) a session index failed; the session must be re-indexed.
    #[error("Index build failed: {0}")]
    BuildFailure(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// An index was queried before `build` populated it.
    #[error("Index not ready: {0}")]
    IndexNotReady(&'static str),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the caller should (re)index the session before retrying,
    /// e.g. "upload content first" or a corrupt stored index.
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, Error::BuildFailure(_) | Error::SessionNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
