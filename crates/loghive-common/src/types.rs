use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a log record.
///
/// The numeric values are part of the wire contract with producers and of
/// the persisted representation; they must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    DPanic,
    Panic,
    Fatal,
}

impl Level {
    pub fn as_i32(self) -> i32 {
        i32::from(self)
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::DPanic => "DPANIC",
            Level::Panic => "PANIC",
            Level::Fatal => "FATAL",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Level> for i32 {
    fn from(lvl: Level) -> i32 {
        match lvl {
            Level::Debug => -1,
            Level::Info => 0,
            Level::Warn => 1,
            Level::Error => 2,
            Level::DPanic => 3,
            Level::Panic => 4,
            Level::Fatal => 5,
        }
    }
}

impl TryFrom<i32> for Level {
    type Error = UnknownLevel;

    fn try_from(v: i32) -> Result<Self, UnknownLevel> {
        match v {
            -1 => Ok(Level::Debug),
            0 => Ok(Level::Info),
            1 => Ok(Level::Warn),
            2 => Ok(Level::Error),
            3 => Ok(Level::DPanic),
            4 => Ok(Level::Panic),
            5 => Ok(Level::Fatal),
            _ => Err(UnknownLevel(v)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level {0}, expected -1..=5")]
pub struct UnknownLevel(pub i32);

/// One persisted log record, the atomic unit of the ingest pipeline.
///
/// Created once at decode time, written once, never mutated.
/// Invariant: `time_sec == time_ms / 1000`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Server-assigned time-ordered identifier (24-char hex, see [`crate::id`]).
    pub id: String,
    /// Producer module name, also the sharding key.
    pub module: String,
    /// Producer host ip as seen by the HTTP layer.
    pub ip: String,
    pub level: Level,
    /// Short message, bounded length, indexed.
    pub short: String,
    /// Full message, unbounded.
    pub full: String,
    pub condition_one: String,
    pub condition_two: String,
    pub condition_three: String,
    pub trace_id: String,
    /// Producer-side print time in milliseconds.
    pub time_ms: i64,
    /// Second precision of `time_ms`, used for the time index.
    pub time_sec: i64,
    /// Producer message id; redeliveries reuse it, letting the storage layer
    /// treat duplicate writes as success.
    pub message_id: String,
}

impl LogRecord {
    /// Dedup identity used to match this record against alarm rules.
    pub fn rule_key(&self) -> String {
        rule_key(&self.module, &self.short, self.level)
    }
}

/// `module_short_LEVEL`, the identity shared by a record and the rule that
/// matches it.
pub fn rule_key(module: &str, short: &str, level: Level) -> String {
    format!("{}_{}_{}", module, short, level.name())
}

/// An alarm rule as read from the meta store.
///
/// `updated_at` is promised monotonically non-decreasing per rule key by the
/// admin collaborator; a change of it resets the runtime state of the rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRule {
    pub id: String,
    pub module: String,
    pub short: String,
    pub level: Level,
    /// Free-form label rendered into the alarm content (标签).
    pub tag: String,
    pub hook_id: String,
    /// Minimum seconds between emissions; `<= 0` means every hit fires.
    pub rate_sec: i64,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl AlarmRule {
    pub fn key(&self) -> String {
        rule_key(&self.module, &self.short, self.level)
    }
}

/// Delivery method of a hook endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMethod {
    DingTalk,
}

impl std::fmt::Display for NotifyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyMethod::DingTalk => f.write_str("dingtalk"),
        }
    }
}

impl std::str::FromStr for NotifyMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dingtalk" | "dingding" => Ok(NotifyMethod::DingTalk),
            _ => Err(format!("unknown notify method: {s}")),
        }
    }
}

/// A notification endpoint configuration, bound to rules by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookUrl {
    pub id: String,
    pub name: String,
    pub url: String,
    pub method: NotifyMethod,
    /// Overrides the default content keyword when non-empty.
    pub keyword: String,
    /// Substrings redacted from outbound alarm content.
    pub hide_texts: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips_through_i32() {
        for v in -1..=5 {
            let lvl = Level::try_from(v).unwrap();
            assert_eq!(lvl.as_i32(), v);
        }
        assert!(Level::try_from(6).is_err());
        assert!(Level::try_from(-2).is_err());
    }

    #[test]
    fn level_names_match_wire_contract() {
        assert_eq!(Level::Debug.name(), "DEBUG");
        assert_eq!(Level::Error.name(), "ERROR");
        assert_eq!(Level::Fatal.name(), "FATAL");
    }

    #[test]
    fn rule_key_is_module_short_level() {
        assert_eq!(rule_key("svc-a", "oom", Level::Error), "svc-a_oom_ERROR");
    }

    #[test]
    fn notify_method_parses_legacy_spelling() {
        assert_eq!(
            "dingding".parse::<NotifyMethod>().unwrap(),
            NotifyMethod::DingTalk
        );
        assert!("pager".parse::<NotifyMethod>().is_err());
    }
}
