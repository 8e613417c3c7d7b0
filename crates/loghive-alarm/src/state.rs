use chrono::{Local, TimeZone};
use loghive_common::clock::Clock;
use loghive_common::types::{AlarmRule, HookUrl, LogRecord};
use loghive_notify::Notifier;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing;

/// Keyword prepended to alarm content unless the hook overrides it.
pub const DEFAULT_KEYWORD: &str = "[QELOG]";

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const MASK: &str = "****";

fn machine_ip() -> &'static str {
    static MACHINE_IP: OnceLock<String> = OnceLock::new();
    MACHINE_IP.get_or_init(|| loghive_common::net::local_ipv4().to_string())
}

/// Runtime state of one alarm rule.
///
/// Two regimes: armed (`latest_send_unix == 0`, the next hit fires) and
/// cooling (`> 0`, hits only count until `rate_sec` has elapsed). With
/// `rate_sec <= 0` the armed sentinel is deliberately never advanced, so
/// every qualifying record fires.
///
/// Never persisted and never mutated except through its atomics; the owning
/// registry swaps whole snapshots instead of editing states in place.
pub struct RuleState {
    rule: AlarmRule,
    hook: Option<HookUrl>,
    notifier: Option<Box<dyn Notifier>>,
    /// Hook hide-texts merged with the registry-global list at build time.
    hide_texts: Vec<String>,
    count: AtomicU64,
    latest_send_unix: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl RuleState {
    pub fn new(
        rule: AlarmRule,
        hook: Option<HookUrl>,
        notifier: Option<Box<dyn Notifier>>,
        global_hide_texts: &[String],
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut hide_texts: Vec<String> = Vec::new();
        if let Some(hook) = &hook {
            hide_texts.extend(hook.hide_texts.iter().filter(|t| !t.is_empty()).cloned());
        }
        hide_texts.extend(global_hide_texts.iter().filter(|t| !t.is_empty()).cloned());
        Self {
            rule,
            hook,
            notifier,
            hide_texts,
            count: AtomicU64::new(0),
            latest_send_unix: AtomicI64::new(0),
            clock,
        }
    }

    pub fn rule(&self) -> &AlarmRule {
        &self.rule
    }

    /// Hits accumulated since the last successful emission.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn latest_send_unix(&self) -> i64 {
        self.latest_send_unix.load(Ordering::Acquire)
    }

    pub fn keyword(&self) -> &str {
        match &self.hook {
            Some(hook) if !hook.keyword.is_empty() => &hook.keyword,
            _ => DEFAULT_KEYWORD,
        }
    }

    /// Feeds one matching record through the state machine.
    ///
    /// The counter is incremented exactly once per record. Emission happens
    /// when the state is armed or the rate window has elapsed; on success the
    /// counter resets and the window restarts. A failed or timed-out send
    /// leaves all state untouched so the next record retries under the same
    /// gating.
    pub async fn observe(&self, record: &LogRecord) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;

        let now = self.clock.unix_seconds();
        let last = self.latest_send_unix.load(Ordering::Acquire);
        if last != 0 && now - last <= self.rule.rate_sec {
            return;
        }

        let Some(notifier) = self.notifier.as_deref() else {
            tracing::warn!(rule = %self.rule.key(), "alarm matched but no notifier is configured");
            return;
        };

        let content = self.render(record, count);
        match tokio::time::timeout(SEND_TIMEOUT, notifier.send(&content)).await {
            Ok(Ok(())) => {
                self.count.store(0, Ordering::Relaxed);
                let next = if self.rule.rate_sec > 0 { now } else { 0 };
                self.latest_send_unix.store(next, Ordering::Release);
            }
            Ok(Err(e)) => {
                tracing::error!(
                    rule = %self.rule.key(),
                    method = notifier.method_name(),
                    error = %e,
                    "alarm send failed"
                );
            }
            Err(_) => {
                tracing::error!(
                    rule = %self.rule.key(),
                    method = notifier.method_name(),
                    "alarm send timed out"
                );
            }
        }
    }

    fn render(&self, record: &LogRecord, count: u64) -> String {
        let when = match Local.timestamp_opt(record.time_sec, 0).single() {
            Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => record.time_sec.to_string(),
        };
        let mut content = format!(
            "{keyword}\n标签: {tag}\nIP: {ip}\n时间: {when}\n等级: {level}\n短消息: {short}\n详情: {full}\n频次: {count}/{rate}s\n报警节点: {node}",
            keyword = self.keyword(),
            tag = self.rule.tag,
            ip = record.ip,
            when = when,
            level = record.level,
            short = record.short,
            full = record.full,
            count = count,
            rate = self.rule.rate_sec,
            node = machine_ip(),
        );
        for hide in &self.hide_texts {
            content = content.replace(hide, MASK);
        }
        content
    }
}
