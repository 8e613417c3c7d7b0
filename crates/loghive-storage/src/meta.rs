use crate::error::{Result, StorageError};
use chrono::{DateTime, NaiveDate, Utc};
use loghive_common::types::{AlarmRule, HookUrl, Level, NotifyMethod};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const ALARM_RULES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alarm_rules (
    id TEXT PRIMARY KEY,
    module TEXT NOT NULL,
    short TEXT NOT NULL,
    level INTEGER NOT NULL,
    tag TEXT NOT NULL DEFAULT '',
    hook_id TEXT NOT NULL DEFAULT '',
    rate_sec INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_alarm_rules_key ON alarm_rules(module, short, level);
CREATE INDEX IF NOT EXISTS idx_alarm_rules_enabled ON alarm_rules(enabled);
";

const HOOK_URLS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hook_urls (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    url TEXT NOT NULL,
    method TEXT NOT NULL DEFAULT 'dingtalk',
    keyword TEXT NOT NULL DEFAULT '',
    hide_texts TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

const MODULE_METRICS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS module_metrics (
    module_name TEXT NOT NULL,
    created_date TEXT NOT NULL,
    number INTEGER NOT NULL DEFAULT 0,
    sections TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    UNIQUE(module_name, created_date)
);
CREATE INDEX IF NOT EXISTS idx_module_metrics_number ON module_metrics(number DESC);
CREATE INDEX IF NOT EXISTS idx_module_metrics_date ON module_metrics(created_date);
";

/// Per-hour accumulator inside a `module_metrics` row.
///
/// Map keys are stringified so the value round-trips through the JSON
/// `sections` column: `levels` is keyed by the numeric level, `ips` by the
/// producer ip.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    pub sum: i64,
    #[serde(default)]
    pub levels: HashMap<String, i64>,
    #[serde(default)]
    pub ips: HashMap<String, i64>,
}

impl Section {
    pub fn merge(&mut self, other: &Section) {
        self.sum += other.sum;
        for (level, n) in &other.levels {
            *self.levels.entry(level.clone()).or_insert(0) += n;
        }
        for (ip, n) in &other.ips {
            *self.ips.entry(ip.clone()).or_insert(0) += n;
        }
    }
}

/// One flush delta for a `(module, date)` pair, produced by the in-process
/// aggregator. `sections` is keyed by the hour-precision unix timestamp.
#[derive(Debug, Clone)]
pub struct MetricsUpdate {
    pub module: String,
    /// ISO date (`YYYY-MM-DD`, UTC) the hours of this update belong to.
    pub date: String,
    pub number: i64,
    pub sections: HashMap<String, Section>,
}

/// A persisted `module_metrics` row.
#[derive(Debug, Clone)]
pub struct ModuleMetricsRow {
    pub module: String,
    pub date: String,
    pub number: i64,
    pub sections: HashMap<String, Section>,
}

/// Meta database: alarm rules, hook endpoints and the module metrics rollup.
///
/// Rule and hook schemas are owned by the admin collaborator; the ingest core
/// only reads them and is promised that `updated_at` is monotonically
/// non-decreasing per rule key. The write operations kept here exist for
/// seeding and tests.
pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(ALARM_RULES_SCHEMA)?;
        conn.execute_batch(HOOK_URLS_SCHEMA)?;
        conn.execute_batch(MODULE_METRICS_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- alarm rules / hooks ----

    pub fn insert_alarm_rule(&self, rule: &AlarmRule) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO alarm_rules (id, module, short, level, tag, hook_id, rate_sec, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                rule.id,
                rule.module,
                rule.short,
                rule.level.as_i32(),
                rule.tag,
                rule.hook_id,
                rule.rate_sec,
                rule.enabled,
                Utc::now().timestamp(),
                rule.updated_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_hook(&self, hook: &HookUrl) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO hook_urls (id, name, url, method, keyword, hide_texts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                hook.id,
                hook.name,
                hook.url,
                hook.method.to_string(),
                hook.keyword,
                serde_json::to_string(&hook.hide_texts)?,
                Utc::now().timestamp(),
                hook.updated_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Flips the enable flag and advances `updated_at` so a running registry
    /// resets the rule's state on the next reload.
    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.lock_conn();
        let changed = conn.execute(
            "UPDATE alarm_rules SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![enabled, Utc::now().timestamp(), id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotMatched {
                entity: "alarm_rule",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn list_enabled_rules(&self) -> Result<Vec<AlarmRule>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, module, short, level, tag, hook_id, rate_sec, enabled, updated_at
             FROM alarm_rules WHERE enabled = 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;
        let mut rules = Vec::new();
        for row in rows {
            let (id, module, short, level, tag, hook_id, rate_sec, enabled, updated_at) = row?;
            let level = Level::try_from(level).map_err(|e| StorageError::InvalidColumn {
                column: "level",
                detail: e.to_string(),
            })?;
            rules.push(AlarmRule {
                id,
                module,
                short,
                level,
                tag,
                hook_id,
                rate_sec,
                enabled,
                updated_at: timestamp_to_datetime(updated_at),
            });
        }
        Ok(rules)
    }

    pub fn list_hooks(&self) -> Result<Vec<HookUrl>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, url, method, keyword, hide_texts, updated_at FROM hook_urls",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;
        let mut hooks = Vec::new();
        for row in rows {
            let (id, name, url, method, keyword, hide_texts, updated_at) = row?;
            let method: NotifyMethod =
                method.parse().map_err(|detail| StorageError::InvalidColumn {
                    column: "method",
                    detail,
                })?;
            let hide_texts: Vec<String> = serde_json::from_str(&hide_texts)?;
            hooks.push(HookUrl {
                id,
                name,
                url,
                method,
                keyword,
                hide_texts,
                updated_at: timestamp_to_datetime(updated_at),
            });
        }
        Ok(hooks)
    }

    /// Rule keys of every stored rule, enabled or not. The unique index on
    /// `(module, short, level)` spans both, so seeding dedups against this.
    pub fn list_rule_keys(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached("SELECT module, short, level FROM alarm_rules")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i32>(2)?,
            ))
        })?;
        let mut keys = Vec::new();
        for row in rows {
            let (module, short, level) = row?;
            let level = Level::try_from(level).map_err(|e| StorageError::InvalidColumn {
                column: "level",
                detail: e.to_string(),
            })?;
            keys.push(loghive_common::types::rule_key(&module, &short, level));
        }
        Ok(keys)
    }

    // ---- module metrics ----

    /// Applies one flush snapshot. Each update accumulates into its
    /// `(module, date)` row: `number` adds up and the per-hour sections merge;
    /// `created_at`/`created_date` are written on first insert only.
    pub fn apply_metrics(&self, updates: &[MetricsUpdate]) -> Result<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;
        for update in updates {
            let existing = tx
                .query_row(
                    "SELECT number, sections FROM module_metrics WHERE module_name = ?1 AND created_date = ?2",
                    rusqlite::params![update.module, update.date],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            match existing {
                Some((number, sections_json)) => {
                    let mut sections: HashMap<String, Section> =
                        serde_json::from_str(&sections_json)?;
                    for (hour, delta) in &update.sections {
                        sections.entry(hour.clone()).or_default().merge(delta);
                    }
                    tx.execute(
                        "UPDATE module_metrics SET number = ?1, sections = ?2
                         WHERE module_name = ?3 AND created_date = ?4",
                        rusqlite::params![
                            number + update.number,
                            serde_json::to_string(&sections)?,
                            update.module,
                            update.date,
                        ],
                    )?;
                }
                None => {
                    tx.execute(
                        "INSERT INTO module_metrics (module_name, created_date, number, sections, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![
                            update.module,
                            update.date,
                            update.number,
                            serde_json::to_string(&update.sections)?,
                            Utc::now().timestamp(),
                        ],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_module_metrics(
        &self,
        module: &str,
        date: NaiveDate,
    ) -> Result<Option<ModuleMetricsRow>> {
        let conn = self.lock_conn();
        let row = conn
            .query_row(
                "SELECT number, sections FROM module_metrics WHERE module_name = ?1 AND created_date = ?2",
                rusqlite::params![module, date.format("%Y-%m-%d").to_string()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        match row {
            Some((number, sections_json)) => Ok(Some(ModuleMetricsRow {
                module: module.to_string(),
                date: date.format("%Y-%m-%d").to_string(),
                number,
                sections: serde_json::from_str(&sections_json)?,
            })),
            None => Ok(None),
        }
    }

    /// Drops metrics rows older than the retention window. Returns the number
    /// of rows removed.
    pub fn cleanup_expired_metrics(&self, retention_days: u32) -> Result<usize> {
        let cutoff = (Utc::now() - chrono::Duration::days(i64::from(retention_days)))
            .date_naive()
            .format("%Y-%m-%d")
            .to_string();
        let conn = self.lock_conn();
        let removed = conn.execute(
            "DELETE FROM module_metrics WHERE created_date < ?1",
            rusqlite::params![cutoff],
        )?;
        if removed > 0 {
            tracing::info!(removed, cutoff = %cutoff, "removed expired module metrics");
        }
        Ok(removed)
    }
}

fn timestamp_to_datetime(unix: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(unix, 0).unwrap_or_default()
}
