use crate::error::Result;
use loghive_common::types::LogRecord;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing;

// One monthly collection per file. The compound index mirrors the common
// query shape (module + time window, optionally narrowed by level/short/c1);
// c2 and c3 are deliberately left unindexed to bound index size. The partial
// unique index on mi makes redelivered writes no-ops.
const LOGGING_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS logging (
    id TEXT PRIMARY KEY,
    m  TEXT NOT NULL,
    ip TEXT NOT NULL DEFAULT '',
    l  INTEGER NOT NULL,
    s  TEXT NOT NULL DEFAULT '',
    f  TEXT NOT NULL DEFAULT '',
    c1 TEXT NOT NULL DEFAULT '',
    c2 TEXT NOT NULL DEFAULT '',
    c3 TEXT NOT NULL DEFAULT '',
    ti TEXT NOT NULL DEFAULT '',
    tm INTEGER NOT NULL,
    ts INTEGER NOT NULL,
    mi TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_logging_m_ts_l_s_c1 ON logging(m, ts, l, s, c1);
CREATE INDEX IF NOT EXISTS idx_logging_ti ON logging(ti DESC);
CREATE UNIQUE INDEX IF NOT EXISTS idx_logging_mi ON logging(mi) WHERE mi != '';
";

/// One shard database endpoint: a directory of monthly collection files.
///
/// `ensure` is idempotent and safe to call concurrently; names seen once are
/// cached (with their open connection) for the life of the process and never
/// evicted — memory is bounded by `shards x active months`. Writes to one
/// collection serialize on that collection's connection mutex only.
pub struct CollectionManager {
    data_dir: PathBuf,
    collections: Mutex<HashMap<String, Arc<Mutex<Connection>>>>,
}

impl CollectionManager {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            collections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the collections map, recovering from a poisoned Mutex if necessary.
    fn lock_collections(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<Connection>>>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.db"))
    }

    /// Creates the collection file and installs its indexes on first sight
    /// of the name; afterwards returns the cached handle.
    pub fn ensure(&self, name: &str) -> Result<Arc<Mutex<Connection>>> {
        let mut collections = self.lock_collections();
        if let Some(conn) = collections.get(name) {
            return Ok(Arc::clone(conn));
        }
        let conn = Connection::open(self.collection_path(name))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(LOGGING_SCHEMA)?;
        tracing::info!(collection = %name, "created collection");
        let conn = Arc::new(Mutex::new(conn));
        collections.insert(name.to_string(), Arc::clone(&conn));
        Ok(conn)
    }

    pub fn is_ensured(&self, name: &str) -> bool {
        self.lock_collections().contains_key(name)
    }

    /// Unordered bulk insert of one shard group in a single transaction.
    ///
    /// Returns a per-record flag telling whether the row was newly written;
    /// a redelivered record (duplicate id or message id) counts as success
    /// but reports `false` so side-effects are not replayed for it.
    pub fn insert_many(&self, name: &str, records: &[LogRecord]) -> Result<Vec<bool>> {
        let conn = self.ensure(name)?;
        let mut conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = conn.transaction()?;
        let mut inserted = Vec::with_capacity(records.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO logging (id, m, ip, l, s, f, c1, c2, c3, ti, tm, ts, mi)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for record in records {
                let changed = stmt.execute(rusqlite::params![
                    record.id,
                    record.module,
                    record.ip,
                    record.level.as_i32(),
                    record.short,
                    record.full,
                    record.condition_one,
                    record.condition_two,
                    record.condition_three,
                    record.trace_id,
                    record.time_ms,
                    record.time_sec,
                    record.message_id,
                ])?;
                inserted.push(changed > 0);
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn count_records(&self, name: &str) -> Result<i64> {
        let conn = self.ensure(name)?;
        let conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = conn.query_row("SELECT COUNT(*) FROM logging", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Index names present in the collection, for operational checks.
    pub fn index_names(&self, name: &str) -> Result<Vec<String>> {
        let conn = self.ensure(name)?;
        let conn = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'logging' ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}
