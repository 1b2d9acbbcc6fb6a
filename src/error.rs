use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("no access token loaded")]
    MissingCredentials,
    #[error("no expiry could be resolved for {0}")]
    NoExpiry(String),
    #[error("invalid request uri")]
    InvalidUri,
    #[error("http transport error: {0}")]
    Http(String),
    #[error("failed to persist snapshot: {0:#}")]
    Persist(#[from] anyhow::Error),
}

impl ChainError {
    /// Terminal errors stop a running poll loop, everything else skips one cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainError::MissingCredentials | ChainError::NoExpiry(_))
    }
}
