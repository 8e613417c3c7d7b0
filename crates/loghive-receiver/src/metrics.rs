use loghive_common::types::LogRecord;
use loghive_storage::sharding::fnv1a32;
use loghive_storage::MetricsUpdate;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

const STRIPE_COUNT: usize = 64;

#[derive(Debug, Default)]
struct HourCounter {
    sum: i64,
    levels: HashMap<i32, i64>,
    ips: HashMap<String, i64>,
}

/// module -> hour-precision timestamp -> counters
type Stripe = HashMap<String, HashMap<i64, HourCounter>>;

/// In-process rolling counters for `module_metrics`.
///
/// `observe` touches exactly one of 64 mutex stripes chosen by the module
/// name hash, so concurrent producers rarely contend. `drain` swaps each
/// stripe's map for an empty one and folds the snapshot into per
/// `(module, date)` updates; a counter is never reported twice, and a stripe
/// is snapshot atomically.
pub struct MetricsAggregator {
    stripes: Vec<Mutex<Stripe>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::new(Stripe::new())).collect(),
        }
    }

    fn lock_stripe(&self, module: &str) -> MutexGuard<'_, Stripe> {
        let position = fnv1a32(module) as usize % STRIPE_COUNT;
        self.stripes[position]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts one persisted record. Only called after the record was newly
    /// written, so redelivered packets do not inflate the metrics.
    pub fn observe(&self, record: &LogRecord) {
        let hour_ts = record.time_sec - record.time_sec.rem_euclid(3600);
        let mut stripe = self.lock_stripe(&record.module);
        let counter = stripe
            .entry(record.module.clone())
            .or_default()
            .entry(hour_ts)
            .or_default();
        counter.sum += 1;
        *counter.levels.entry(record.level.as_i32()).or_insert(0) += 1;
        *counter.ips.entry(record.ip.clone()).or_insert(0) += 1;
    }

    /// Snapshot-and-reset. The caller persists the returned updates; on
    /// persistence failure the snapshot is discarded, metrics are advisory.
    pub fn drain(&self) -> Vec<MetricsUpdate> {
        let mut merged: HashMap<(String, String), MetricsUpdate> = HashMap::new();

        for stripe in &self.stripes {
            let taken = {
                let mut guard = stripe.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                std::mem::take(&mut *guard)
            };
            for (module, hours) in taken {
                for (hour_ts, counter) in hours {
                    let date = chrono::DateTime::from_timestamp(hour_ts, 0)
                        .unwrap_or_default()
                        .date_naive()
                        .format("%Y-%m-%d")
                        .to_string();
                    let update = merged
                        .entry((module.clone(), date.clone()))
                        .or_insert_with(|| MetricsUpdate {
                            module: module.clone(),
                            date,
                            number: 0,
                            sections: HashMap::new(),
                        });
                    update.number += counter.sum;
                    let section = update.sections.entry(hour_ts.to_string()).or_default();
                    section.sum += counter.sum;
                    for (level, n) in counter.levels {
                        *section.levels.entry(level.to_string()).or_insert(0) += n;
                    }
                    for (ip, n) in counter.ips {
                        *section.ips.entry(ip).or_insert(0) += n;
                    }
                }
            }
        }

        merged.into_values().collect()
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
