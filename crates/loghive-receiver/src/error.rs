use loghive_storage::StorageError;

/// One shard group that failed persistence while the rest of the packet
/// continued.
#[derive(Debug)]
pub struct GroupFailure {
    pub collection: String,
    pub records: usize,
    pub error: StorageError,
}

/// Errors surfaced by the ingest path.
///
/// Side-effect failures (metrics, alarms, notifier) never appear here; they
/// are logged and counted where they happen.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The packet failed validation before any persistence was attempted.
    #[error("ingest: invalid packet: {0}")]
    ArgsInvalid(String),

    /// A storage failure that prevented the whole packet from being routed.
    #[error("ingest: {0}")]
    Storage(#[from] StorageError),

    /// One or more shard groups failed; the remaining groups are durable.
    #[error("ingest: {} shard group(s) failed persistence", failures.len())]
    PartialPersistence { failures: Vec<GroupFailure> },
}
