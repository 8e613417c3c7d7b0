use crate::registry::RuleRegistry;
use crate::state::{RuleState, DEFAULT_KEYWORD};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use loghive_common::clock::Clock;
use loghive_common::types::{AlarmRule, HookUrl, Level, LogRecord, NotifyMethod};
use loghive_notify::error::{NotifyError, Result as NotifyResult};
use loghive_notify::Notifier;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    fn at(now: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(now),
        })
    }

    fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_seconds(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MockNotifier {
    sent: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, content: &str) -> NotifyResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::NoEndpoint("mock"));
        }
        self.sent.lock().unwrap().push(content.to_string());
        Ok(())
    }

    fn method_name(&self) -> &str {
        "mock"
    }

    fn set_endpoint(&mut self, _url: &str) {}
}

fn make_rule(rate_sec: i64, updated_unix: i64) -> AlarmRule {
    AlarmRule {
        id: "rule-1".to_string(),
        module: "svc-a".to_string(),
        short: "oom".to_string(),
        level: Level::Error,
        tag: "生产".to_string(),
        hook_id: "hook-1".to_string(),
        rate_sec,
        enabled: true,
        updated_at: Utc.timestamp_opt(updated_unix, 0).unwrap(),
    }
}

fn make_hook() -> HookUrl {
    HookUrl {
        id: "hook-1".to_string(),
        name: "ops".to_string(),
        url: "https://example.invalid/robot".to_string(),
        method: NotifyMethod::DingTalk,
        keyword: String::new(),
        hide_texts: Vec::new(),
        updated_at: Utc.timestamp_opt(1, 0).unwrap(),
    }
}

fn make_record(time_sec: i64) -> LogRecord {
    LogRecord {
        id: loghive_common::id::next_id(),
        module: "svc-a".to_string(),
        ip: "10.0.0.7".to_string(),
        level: Level::Error,
        short: "oom".to_string(),
        full: "out of memory while allocating 4096 bytes".to_string(),
        condition_one: String::new(),
        condition_two: String::new(),
        condition_three: String::new(),
        trace_id: "trace-1".to_string(),
        time_ms: time_sec * 1000,
        time_sec,
        message_id: String::new(),
    }
}

fn make_state(
    rate_sec: i64,
    hook: Option<HookUrl>,
    clock: Arc<ManualClock>,
) -> (RuleState, Arc<Mutex<Vec<String>>>, Arc<AtomicBool>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let fail = Arc::new(AtomicBool::new(false));
    let notifier = MockNotifier {
        sent: Arc::clone(&sent),
        fail: Arc::clone(&fail),
    };
    let state = RuleState::new(
        make_rule(rate_sec, 1),
        hook,
        Some(Box::new(notifier)),
        &[],
        clock,
    );
    (state, sent, fail)
}

#[tokio::test]
async fn armed_state_fires_on_first_match() {
    let clock = ManualClock::at(1000);
    let (state, sent, _) = make_state(60, Some(make_hook()), clock);

    state.observe(&make_record(1000)).await;

    assert_eq!(sent.lock().unwrap().len(), 1);
    assert_eq!(state.count(), 0);
    assert_eq!(state.latest_send_unix(), 1000);
}

#[tokio::test]
async fn cooling_counts_hits_without_emitting() {
    let clock = ManualClock::at(1000);
    let (state, sent, _) = make_state(60, Some(make_hook()), Arc::clone(&clock));

    // A burst of 100 matches inside the rate window: one emission, the rest
    // only accumulate.
    for i in 0..100 {
        clock.set(1000 + i * 30 / 100);
        state.observe(&make_record(1000)).await;
    }

    assert_eq!(sent.lock().unwrap().len(), 1);
    assert_eq!(state.count(), 99);
}

#[tokio::test]
async fn emission_resumes_after_rate_window() {
    let clock = ManualClock::at(1000);
    let (state, sent, _) = make_state(60, Some(make_hook()), Arc::clone(&clock));

    state.observe(&make_record(1000)).await;

    // Exactly at the boundary the window has not elapsed yet.
    clock.set(1060);
    state.observe(&make_record(1060)).await;
    assert_eq!(sent.lock().unwrap().len(), 1);

    clock.set(1061);
    state.observe(&make_record(1061)).await;

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    // Counter was reset by the first emission; the second reports only the
    // hits since then (the boundary one plus this one).
    assert!(sent[1].contains("频次: 2/60s"), "content: {}", sent[1]);
}

#[tokio::test]
async fn zero_rate_fires_every_time_and_keeps_sentinel() {
    let clock = ManualClock::at(1000);
    let (state, sent, _) = make_state(0, Some(make_hook()), clock);

    state.observe(&make_record(1000)).await;
    state.observe(&make_record(1000)).await;
    state.observe(&make_record(1000)).await;

    assert_eq!(sent.lock().unwrap().len(), 3);
    // The never-sent sentinel must not advance when rate <= 0.
    assert_eq!(state.latest_send_unix(), 0);
}

#[tokio::test]
async fn failed_send_leaves_state_for_retry() {
    let clock = ManualClock::at(1000);
    let (state, sent, fail) = make_state(60, Some(make_hook()), clock);

    fail.store(true, Ordering::SeqCst);
    state.observe(&make_record(1000)).await;
    assert!(sent.lock().unwrap().is_empty());
    assert_eq!(state.count(), 1);
    assert_eq!(state.latest_send_unix(), 0);

    // Next matching record retries immediately under the same gating.
    fail.store(false, Ordering::SeqCst);
    state.observe(&make_record(1001)).await;
    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("频次: 2/60s"), "content: {}", sent[0]);
}

#[tokio::test]
async fn content_carries_the_template_fields() {
    let clock = ManualClock::at(1000);
    let (state, sent, _) = make_state(60, Some(make_hook()), clock);

    state.observe(&make_record(1_700_000_000)).await;

    let sent = sent.lock().unwrap();
    let content = &sent[0];
    assert!(content.starts_with(DEFAULT_KEYWORD));
    assert!(content.contains("标签: 生产"));
    assert!(content.contains("IP: 10.0.0.7"));
    assert!(content.contains("时间: "));
    assert!(content.contains("等级: ERROR"));
    assert!(content.contains("短消息: oom"));
    assert!(content.contains("详情: out of memory while allocating 4096 bytes"));
    assert!(content.contains("频次: 1/60s"));
    assert!(content.contains("报警节点: "));
}

#[tokio::test]
async fn hook_keyword_overrides_default() {
    let clock = ManualClock::at(1000);
    let mut hook = make_hook();
    hook.keyword = "[OPS]".to_string();
    let (state, sent, _) = make_state(60, Some(hook), clock);

    state.observe(&make_record(1000)).await;
    assert!(sent.lock().unwrap()[0].starts_with("[OPS]"));
}

#[tokio::test]
async fn hide_texts_are_redacted_from_content() {
    let clock = ManualClock::at(1000);
    let mut hook = make_hook();
    hook.hide_texts = vec!["10.0.0.7".to_string()];

    let sent = Arc::new(Mutex::new(Vec::new()));
    let notifier = MockNotifier {
        sent: Arc::clone(&sent),
        fail: Arc::new(AtomicBool::new(false)),
    };
    let global_hides = vec!["4096".to_string()];
    let state = RuleState::new(
        make_rule(60, 1),
        Some(hook),
        Some(Box::new(notifier)),
        &global_hides,
        clock,
    );

    state.observe(&make_record(1000)).await;

    let sent = sent.lock().unwrap();
    let content = &sent[0];
    assert!(!content.contains("10.0.0.7"));
    assert!(!content.contains("4096"));
    assert!(content.contains("****"));
}

// ---- registry ----

fn registry_with_sink(clock: Arc<ManualClock>) -> (RuleRegistry, Arc<Mutex<Vec<String>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sent);
    let registry = RuleRegistry::with_factory(
        clock,
        Box::new(move |_hook| {
            Box::new(MockNotifier {
                sent: Arc::clone(&sink),
                fail: Arc::new(AtomicBool::new(false)),
            })
        }),
    );
    (registry, sent)
}

#[tokio::test]
async fn module_enablement_follows_loaded_rules() {
    let clock = ManualClock::at(1000);
    let (registry, _) = registry_with_sink(clock);

    registry.reload(vec![make_rule(60, 1)], vec![make_hook()]);
    assert!(registry.is_module_enabled("svc-a"));
    assert!(!registry.is_module_enabled("svc-b"));

    registry.reload(Vec::new(), Vec::new());
    assert!(!registry.is_module_enabled("svc-a"));
}

#[tokio::test]
async fn evaluate_ignores_records_without_a_rule() {
    let clock = ManualClock::at(1000);
    let (registry, sent) = registry_with_sink(clock);
    registry.reload(vec![make_rule(60, 1)], vec![make_hook()]);

    let mut record = make_record(1000);
    record.short = "disk-full".to_string();
    registry.evaluate(&record).await;
    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reload_carries_state_forward_when_rule_unchanged() {
    let clock = ManualClock::at(1000);
    let (registry, sent) = registry_with_sink(Arc::clone(&clock));

    registry.reload(vec![make_rule(60, 1)], vec![make_hook()]);
    registry.evaluate(&make_record(1000)).await;
    assert_eq!(sent.lock().unwrap().len(), 1);

    let before = registry.state("svc-a_oom_ERROR").unwrap();

    // Reload with the same updated_at plus an unrelated new rule.
    let mut unrelated = make_rule(60, 1);
    unrelated.id = "rule-2".to_string();
    unrelated.module = "svc-b".to_string();
    registry.reload(vec![make_rule(60, 1), unrelated], vec![make_hook()]);

    let after = registry.state("svc-a_oom_ERROR").unwrap();
    assert!(Arc::ptr_eq(&before, &after));

    // Still cooling: a matching record inside the window must not re-fire.
    clock.set(1030);
    registry.evaluate(&make_record(1030)).await;
    assert_eq!(sent.lock().unwrap().len(), 1);
    assert_eq!(after.count(), 1);
}

#[tokio::test]
async fn reload_resets_state_when_rule_was_updated() {
    let clock = ManualClock::at(1000);
    let (registry, sent) = registry_with_sink(Arc::clone(&clock));

    registry.reload(vec![make_rule(60, 1)], vec![make_hook()]);
    registry.evaluate(&make_record(1000)).await;
    assert_eq!(sent.lock().unwrap().len(), 1);

    // The admin touched the rule: updated_at advanced, the state re-arms.
    registry.reload(vec![make_rule(60, 2)], vec![make_hook()]);

    clock.set(1010);
    registry.evaluate(&make_record(1010)).await;
    assert_eq!(sent.lock().unwrap().len(), 2);
}
