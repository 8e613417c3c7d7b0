/// Errors that can occur within the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The computed shard index is not covered by any configured database.
    #[error("storage: shard index {index} has no assigned database")]
    ShardUnassigned { index: u32 },

    /// An update targeted a row that does not exist.
    #[error("storage: {entity} not matched (id={id})")]
    NotMatched { entity: &'static str, id: String },

    /// An underlying SQLite error.
    #[error("storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure (sections/hide_texts columns).
    #[error("storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure while opening a database directory.
    #[error("storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored column held a value outside the domain contract.
    #[error("storage: invalid value in column '{column}': {detail}")]
    InvalidColumn {
        column: &'static str,
        detail: String,
    },
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
