//! The receiver pipeline: packet decode, grouped bulk persistence and
//! asynchronous side-effect dispatch (metrics, alarms).
//!
//! Flow: packet -> [`decode`] -> [`ingest::Ingestor`] groups records by
//! `(shard database, monthly collection)`, persists every group, then hands
//! each newly written record to the bounded side-effect pool which feeds the
//! [`metrics::MetricsAggregator`] and the alarm registry. Persistence is
//! never shed; side-effect work is.

pub mod decode;
pub mod error;
pub mod ingest;
pub mod metrics;


pub use decode::{Frame, Packet};
pub use error::{GroupFailure, IngestError};
pub use ingest::{IngestSummary, Ingestor};
pub use metrics::MetricsAggregator;
