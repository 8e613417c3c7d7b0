use crate::state::RuleState;
use loghive_common::clock::Clock;
use loghive_common::types::{AlarmRule, HookUrl, LogRecord};
use loghive_notify::{channels, Notifier};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing;

/// Builds the notifier for a hook; replaceable so tests can capture sends.
pub type NotifierFactory = dyn Fn(&HookUrl) -> Box<dyn Notifier> + Send + Sync;

#[derive(Default)]
struct Inner {
    /// rule key -> shared state. States carry over across reloads when the
    /// rule's `updated_at` is unchanged.
    states: HashMap<String, Arc<RuleState>>,
    hooks: HashMap<String, HookUrl>,
    /// Modules with at least one enabled rule; lets the ingest path skip the
    /// per-record key lookup for quiet modules.
    modules: HashMap<String, bool>,
    hide_texts: Vec<String>,
}

/// The hot-swappable table of enabled alarm rules.
///
/// One RW lock guards the three maps; the only writer is [`reload`]. Readers
/// during a reload see either the old or the new snapshot consistently.
/// Per-rule counters live in [`RuleState`] atomics, so `evaluate` holds the
/// read lock only for the map lookup.
///
/// [`reload`]: RuleRegistry::reload
pub struct RuleRegistry {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    factory: Box<NotifierFactory>,
}

impl RuleRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_factory(
            clock,
            Box::new(|hook| channels::create(hook.method, &hook.url)),
        )
    }

    pub fn with_factory(clock: Arc<dyn Clock>, factory: Box<NotifierFactory>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
            factory,
        }
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers process-wide hide texts applied to every rendered alarm.
    /// Takes effect for states built by subsequent reloads.
    pub fn add_hide_texts<I>(&self, texts: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut inner = self.write_inner();
        inner.hide_texts.extend(texts.into_iter().filter(|t| !t.is_empty()));
    }

    /// Cheap pre-filter: does this module have any enabled rule at all?
    pub fn is_module_enabled(&self, module: &str) -> bool {
        let inner = self.read_inner();
        inner.modules.get(module).copied().unwrap_or(false)
    }

    pub fn rule_count(&self) -> usize {
        self.read_inner().states.len()
    }

    pub fn state(&self, rule_key: &str) -> Option<Arc<RuleState>> {
        self.read_inner().states.get(rule_key).cloned()
    }

    /// Rebuilds the rule table from a fresh read of the rule store.
    ///
    /// Build-then-swap: new maps are assembled outside the write lock, then
    /// assigned in one shot. A rule whose key existed before with an
    /// unchanged `updated_at` keeps its previous state (counter and
    /// last-send time survive); a changed `updated_at` resets it.
    pub fn reload(&self, rules: Vec<AlarmRule>, hooks: Vec<HookUrl>) {
        let hooks_map: HashMap<String, HookUrl> =
            hooks.into_iter().map(|h| (h.id.clone(), h)).collect();

        let (global_hides, old_states) = {
            let inner = self.read_inner();
            (inner.hide_texts.clone(), inner.states.clone())
        };

        let mut states = HashMap::with_capacity(rules.len());
        let mut modules = HashMap::new();
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            let key = rule.key();
            modules.insert(rule.module.clone(), true);

            let carried = old_states
                .get(&key)
                .filter(|state| state.rule().updated_at == rule.updated_at)
                .cloned();
            let state = match carried {
                Some(state) => state,
                None => {
                    let hook = hooks_map.get(&rule.hook_id).cloned();
                    let notifier = hook.as_ref().map(|h| (self.factory)(h));
                    if notifier.is_none() {
                        tracing::warn!(rule = %key, hook_id = %rule.hook_id, "rule has no resolvable hook");
                    }
                    Arc::new(RuleState::new(
                        rule,
                        hook,
                        notifier,
                        &global_hides,
                        Arc::clone(&self.clock),
                    ))
                }
            };
            states.insert(key, state);
        }

        let rule_total = states.len();
        let hook_total = hooks_map.len();
        {
            let mut inner = self.write_inner();
            inner.states = states;
            inner.hooks = hooks_map;
            inner.modules = modules;
        }
        tracing::info!(rules = rule_total, hooks = hook_total, "alarm rule table reloaded");
    }

    /// Runs one record through its matching rule, if any.
    ///
    /// The read lock covers only the map lookup; the state machine itself is
    /// atomics plus the notifier call.
    pub async fn evaluate(&self, record: &LogRecord) {
        let state = {
            let inner = self.read_inner();
            inner.states.get(&record.rule_key()).cloned()
        };
        if let Some(state) = state {
            state.observe(record).await;
        }
    }
}
