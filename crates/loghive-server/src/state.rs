use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use loghive_alarm::RuleRegistry;
use loghive_receiver::{Ingestor, MetricsAggregator};
use loghive_storage::MetaStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub registry: Arc<RuleRegistry>,
    pub meta: Arc<MetaStore>,
    pub aggregator: Arc<MetricsAggregator>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}
