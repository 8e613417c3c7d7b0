use anyhow::Result;
use chrono::Utc;
use loghive_alarm::RuleRegistry;
use loghive_common::clock::SystemClock;
use loghive_common::types::{AlarmRule, HookUrl, Level};
use loghive_receiver::{Ingestor, MetricsAggregator};
use loghive_storage::{MetaStore, ShardMap};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;

use loghive_server::app;
use loghive_server::config::{SeedFile, ServerConfig};
use loghive_server::state::AppState;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  loghive-server [config.toml]                        Start the receiver");
    eprintln!("  loghive-server seed-rules <config.toml> <seed.json> Import alarm rules and hooks");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("loghive=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("seed-rules") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("seed-rules requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("seed-rules requires <seed.json> argument")
            })?;
            run_seed_rules(config_path, seed_path)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

/// Import alarm rules and hook endpoints from a JSON seed file. Existing
/// rule keys and hook ids are skipped, not overwritten.
fn run_seed_rules(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let meta = MetaStore::open(Path::new(&config.meta_path))?;

    let seed_content = std::fs::read_to_string(seed_path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", seed_path, e))?;
    let seed: SeedFile = serde_json::from_str(&seed_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", seed_path, e))?;

    let existing_hooks: std::collections::HashSet<String> =
        meta.list_hooks()?.into_iter().map(|h| h.id).collect();
    let existing_keys: std::collections::HashSet<String> =
        meta.list_rule_keys()?.into_iter().collect();

    let mut hooks_created = 0u32;
    let mut hooks_skipped = 0u32;
    for hook in &seed.hooks {
        if existing_hooks.contains(&hook.id) {
            tracing::warn!(id = %hook.id, "hook already exists, skipping");
            hooks_skipped += 1;
            continue;
        }
        let method = hook
            .method
            .parse()
            .map_err(|e: String| anyhow::anyhow!("hook '{}': {}", hook.id, e))?;
        meta.insert_hook(&HookUrl {
            id: hook.id.clone(),
            name: hook.name.clone(),
            url: hook.url.clone(),
            method,
            keyword: hook.keyword.clone(),
            hide_texts: hook.hide_texts.clone(),
            updated_at: Utc::now(),
        })?;
        hooks_created += 1;
    }

    let mut rules_created = 0u32;
    let mut rules_skipped = 0u32;
    for rule in &seed.rules {
        let level = Level::try_from(rule.level)
            .map_err(|e| anyhow::anyhow!("rule '{}_{}': {}", rule.module, rule.short, e))?;
        let key = loghive_common::types::rule_key(&rule.module, &rule.short, level);
        if existing_keys.contains(&key) {
            tracing::warn!(key = %key, "alarm rule already exists, skipping");
            rules_skipped += 1;
            continue;
        }
        meta.insert_alarm_rule(&AlarmRule {
            id: loghive_common::id::next_id(),
            module: rule.module.clone(),
            short: rule.short.clone(),
            level,
            tag: rule.tag.clone(),
            hook_id: rule.hook_id.clone(),
            rate_sec: rule.rate_sec,
            enabled: rule.enabled,
            updated_at: Utc::now(),
        })?;
        rules_created += 1;
    }

    tracing::info!(
        hooks_created,
        hooks_skipped,
        rules_created,
        rules_skipped,
        "seed-rules completed"
    );
    Ok(())
}

/// Re-reads rules and hooks from the meta store and swaps the rule table.
fn reload_rule_table(meta: &MetaStore, registry: &RuleRegistry) -> Result<()> {
    let rules = meta.list_enabled_rules()?;
    let hooks = meta.list_hooks()?;
    registry.reload(rules, hooks);
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;

    tracing::info!(
        http_port = config.http_port,
        databases = config.databases.len(),
        max_shard_index = config.max_shard_index,
        meta = %config.meta_path,
        "loghive-server starting"
    );

    // Build components
    let clock = Arc::new(SystemClock);
    let shards = Arc::new(ShardMap::open(&config.databases, config.max_shard_index)?);
    let meta = Arc::new(MetaStore::open(Path::new(&config.meta_path))?);

    let registry = Arc::new(RuleRegistry::new(clock.clone()));
    registry.add_hide_texts(config.hide_texts.iter().cloned());
    if let Err(e) = reload_rule_table(&meta, &registry) {
        tracing::error!(error = %e, "failed to load alarm rules from meta store");
    }

    let aggregator = Arc::new(MetricsAggregator::new());
    let ingestor = Arc::new(Ingestor::new(
        shards,
        Arc::clone(&registry),
        Arc::clone(&aggregator),
        config.side_effect_workers,
        clock,
    ));

    let state = AppState {
        ingestor,
        registry: Arc::clone(&registry),
        meta: Arc::clone(&meta),
        aggregator: Arc::clone(&aggregator),
        start_time: Utc::now(),
        config: Arc::new(config.clone()),
    };

    // Rule reload loop: picks up admin changes by polling updated_at.
    let reload_meta = Arc::clone(&meta);
    let reload_registry = Arc::clone(&registry);
    let reload_secs = config.rule_reload_secs.max(1);
    let reload_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(reload_secs));
        tick.tick().await; // immediate first tick was done at startup
        loop {
            tick.tick().await;
            if let Err(e) = reload_rule_table(&reload_meta, &reload_registry) {
                tracing::error!(error = %e, "alarm rule reload failed");
            }
        }
    });

    // Metrics flush loop: snapshot-and-reset, persist, discard on failure.
    let flush_meta = Arc::clone(&meta);
    let flush_aggregator = Arc::clone(&aggregator);
    let flush_secs = config.metrics_flush_secs.max(1);
    let flush_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(flush_secs));
        loop {
            tick.tick().await;
            let updates = flush_aggregator.drain();
            if updates.is_empty() {
                continue;
            }
            if let Err(e) = flush_meta.apply_metrics(&updates) {
                // Metrics are advisory; the snapshot is dropped, not retried.
                tracing::error!(error = %e, updates = updates.len(), "metrics flush failed, snapshot discarded");
            }
        }
    });

    // Metrics retention loop.
    let cleanup_meta = Arc::clone(&meta);
    let retention_days = config.metrics_retention_days;
    let cleanup_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match cleanup_meta.cleanup_expired_metrics(retention_days) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "cleaned up expired module metrics")
                }
                Err(e) => tracing::error!(error = %e, "module metrics cleanup failed"),
                _ => {}
            }
        }
    });

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        signal::ctrl_c().await.ok();
        tracing::info!("shutting down gracefully");
    })
    .await?;

    reload_handle.abort();
    flush_handle.abort();
    cleanup_handle.abort();
    tracing::info!("server stopped");

    Ok(())
}
