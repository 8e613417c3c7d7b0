use crate::decode::{self, Packet};
use crate::error::{GroupFailure, IngestError};
use crate::metrics::MetricsAggregator;
use loghive_alarm::RuleRegistry;
use loghive_common::clock::Clock;
use loghive_common::types::LogRecord;
use loghive_storage::{CollectionManager, ShardMap};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing;

/// Process-lifetime ingest counters, exposed for health/diagnostics.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub received_frames: AtomicU64,
    pub persisted_records: AtomicU64,
    pub dropped_frames: AtomicU64,
    pub shed_side_effects: AtomicU64,
}

/// Outcome of one accepted packet.
#[derive(Debug, Clone, Copy, serde::Serialize, utoipa::ToSchema)]
pub struct IngestSummary {
    /// Frames carried by the packet.
    pub received: usize,
    /// Records newly written (redelivered duplicates excluded).
    pub persisted: usize,
    /// Frames dropped at decode time (bad level or implausible future time).
    pub dropped: usize,
}

/// The per-packet entry point of the receiver.
///
/// Persistence is synchronous with the request: every shard group is
/// attempted before the caller sees a response, and groups fail
/// independently. Metrics and alarm evaluation happen after a record is
/// durably new, on a bounded worker pool; when the pool is full that
/// record's side-effects are shed (counted), never its persistence.
pub struct Ingestor {
    shards: Arc<ShardMap>,
    registry: Arc<RuleRegistry>,
    aggregator: Arc<MetricsAggregator>,
    side_effects: Arc<Semaphore>,
    stats: Arc<IngestStats>,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    /// `workers == 0` sizes the side-effect pool to the CPU count.
    pub fn new(
        shards: Arc<ShardMap>,
        registry: Arc<RuleRegistry>,
        aggregator: Arc<MetricsAggregator>,
        workers: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism().map_or(4, |n| n.get())
        } else {
            workers
        };
        Self {
            shards,
            registry,
            aggregator,
            side_effects: Arc::new(Semaphore::new(workers)),
            stats: Arc::new(IngestStats::default()),
            clock,
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    pub async fn ingest(
        &self,
        client_ip: &str,
        packet: &Packet,
    ) -> Result<IngestSummary, IngestError> {
        let received = packet.frames.len();
        self.stats
            .received_frames
            .fetch_add(received as u64, Ordering::Relaxed);

        let decoded = decode::decode_packet(packet, client_ip, self.clock.as_ref())?;
        let dropped = decoded.dropped();
        if dropped > 0 {
            self.stats
                .dropped_frames
                .fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::debug!(
                module = %packet.module,
                bad_level = decoded.dropped_level,
                future_time = decoded.dropped_future,
                "dropped undecodable frames"
            );
        }

        // Group by monthly collection; the collection name embeds the shard
        // index so it is unique across databases.
        let mut groups: HashMap<String, (Arc<CollectionManager>, Vec<LogRecord>)> = HashMap::new();
        for record in decoded.records {
            let route = self.shards.route(&record.module, record.time_sec)?;
            groups
                .entry(route.collection)
                .or_insert_with(|| (route.database, Vec::new()))
                .1
                .push(record);
        }

        let mut persisted = 0usize;
        let mut failures = Vec::new();
        for (collection, (database, records)) in groups {
            let group_size = records.len();
            match database.insert_many(&collection, &records) {
                Ok(inserted) => {
                    for (record, newly_written) in records.into_iter().zip(inserted) {
                        if newly_written {
                            persisted += 1;
                            self.dispatch_side_effects(record);
                        }
                    }
                }
                Err(error) => {
                    tracing::error!(
                        collection = %collection,
                        records = group_size,
                        error = %error,
                        "bulk insert failed, continuing with remaining groups"
                    );
                    failures.push(GroupFailure {
                        collection,
                        records: group_size,
                        error,
                    });
                }
            }
        }
        self.stats
            .persisted_records
            .fetch_add(persisted as u64, Ordering::Relaxed);

        if !failures.is_empty() {
            return Err(IngestError::PartialPersistence { failures });
        }
        Ok(IngestSummary {
            received,
            persisted,
            dropped,
        })
    }

    /// Hands one newly persisted record to the side-effect pool. Completion
    /// is not awaited; the HTTP response does not wait for alarms.
    fn dispatch_side_effects(&self, record: LogRecord) {
        match Arc::clone(&self.side_effects).try_acquire_owned() {
            Ok(permit) => {
                let aggregator = Arc::clone(&self.aggregator);
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    let _permit = permit;
                    aggregator.observe(&record);
                    if registry.is_module_enabled(&record.module) {
                        registry.evaluate(&record).await;
                    }
                });
            }
            Err(_) => {
                self.stats.shed_side_effects.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    module = %record.module,
                    "side-effect pool exhausted, metrics/alarms shed for record"
                );
            }
        }
    }
}
