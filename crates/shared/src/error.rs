use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Transport,
    Protocol,
    Decode,
}

/// Failure of a single query round-trip. Missing or wrong-typed fields inside
/// an otherwise valid body are not errors; they are defaulted during decoding
/// and normalization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("malformed response body: {0}")]
    Decode(String),
}

impl QueryError {
    pub fn kind(&self) -> QueryErrorKind {
        match self {
            QueryError::Transport(_) => QueryErrorKind::Transport,
            QueryError::Status(_) => QueryErrorKind::Protocol,
            QueryError::Decode(_) => QueryErrorKind::Decode,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            QueryError::Status(code) => Some(*code),
            _ => None,
        }
    }
}
