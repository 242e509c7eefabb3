use docgraph_types::DocumentKey;

/// Errors from document store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// A create targeted a key that already holds a document.
    #[error("document already exists: {0}")]
    AlreadyExists(DocumentKey),

    /// A transaction read a document that changed before commit.
    #[error("transaction conflict on {0}")]
    Conflict(DocumentKey),

    /// The transaction was rolled back.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Attempted to write a document whose key has an empty half.
    #[error("incomplete document key: {0}")]
    IncompleteKey(DocumentKey),

    /// Storage backend is unreachable or refused the call.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The call was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Returns `true` for errors a transaction retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
