//! Deterministic mapping of `(module, time)` to a shard and a monthly
//! collection.
//!
//! The shard index must stay stable across processes and releases, so the
//! module hash is a fixed 32-bit FNV-1a (offset basis `2166136261`, prime
//! `16777619`) rather than the std hasher. Collections rotate monthly and
//! are named `logging_{shard}_{YYYYMM}` from the record time in UTC.

use crate::collections::CollectionManager;
use crate::error::{Result, StorageError};
use std::path::Path;
use std::sync::Arc;

/// Upper bound of the shard index space.
///
/// Each configured database owns a contiguous range of indices, e.g. with
/// four databases over the default of 8: db1=[1,2] db2=[3,4] db3=[5,6]
/// db4=[7,8]. Growing the fleet means raising this value (never lowering it)
/// and adding databases for the new range.
pub const DEFAULT_MAX_SHARD_INDEX: u32 = 8;

/// 32-bit FNV-1a over the module name bytes.
pub fn fnv1a32(s: &str) -> u32 {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;
    let mut hash = OFFSET_BASIS;
    for b in s.as_bytes() {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Shard index for a module, in `[1, max_shard_index]`.
pub fn shard_index(module: &str, max_shard_index: u32) -> u32 {
    fnv1a32(module) % max_shard_index + 1
}

/// Monthly collection name, `logging_{shard}_{YYYYMM}` (UTC).
pub fn collection_name(shard_index: u32, time_sec: i64) -> String {
    let month = chrono::DateTime::from_timestamp(time_sec, 0)
        .unwrap_or_default()
        .format("%Y%m");
    format!("logging_{shard_index}_{month}")
}

/// Result of routing one record: where it is persisted.
#[derive(Clone)]
pub struct Route {
    pub shard_index: u32,
    pub collection: String,
    pub database: Arc<CollectionManager>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("shard_index", &self.shard_index)
            .field("collection", &self.collection)
            .finish()
    }
}

/// Operator-supplied shard topology: an ordered list of database endpoints
/// and the derived contiguous shard-index assignment.
pub struct ShardMap {
    max_shard_index: u32,
    databases: Vec<Arc<CollectionManager>>,
    /// `assignment[shard_index - 1]` is the position in `databases`.
    assignment: Vec<usize>,
}

impl ShardMap {
    /// Opens every configured database directory and derives the assignment.
    pub fn open<P: AsRef<Path>>(data_dirs: &[P], max_shard_index: u32) -> Result<Self> {
        let databases = data_dirs
            .iter()
            .map(|dir| CollectionManager::open(dir.as_ref()).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let assignment = Self::assign(databases.len(), max_shard_index);
        Ok(Self {
            max_shard_index,
            databases,
            assignment,
        })
    }

    /// Contiguous range assignment. The remainder after integer division is
    /// spread one index per database from the front of the list.
    fn assign(database_count: usize, max_shard_index: u32) -> Vec<usize> {
        let mut assignment = Vec::with_capacity(max_shard_index as usize);
        if database_count == 0 {
            return assignment;
        }
        let count = database_count.min(max_shard_index as usize);
        let span = max_shard_index as usize / count;
        let remainder = max_shard_index as usize % count;
        for pos in 0..count {
            let width = span + usize::from(pos < remainder);
            for _ in 0..width {
                assignment.push(pos);
            }
        }
        assignment
    }

    pub fn max_shard_index(&self) -> u32 {
        self.max_shard_index
    }

    pub fn databases(&self) -> &[Arc<CollectionManager>] {
        &self.databases
    }

    /// Pure lookup: no I/O happens here; the collection is only materialized
    /// later by [`CollectionManager::ensure`].
    pub fn route(&self, module: &str, time_sec: i64) -> Result<Route> {
        let index = shard_index(module, self.max_shard_index);
        let position = self
            .assignment
            .get(index as usize - 1)
            .copied()
            .ok_or(StorageError::ShardUnassigned { index })?;
        Ok(Route {
            shard_index: index,
            collection: collection_name(index, time_sec),
            database: Arc::clone(&self.databases[position]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a32_matches_reference_vectors() {
        // Published FNV-1a 32-bit vectors; these lock the hash across releases.
        assert_eq!(fnv1a32(""), 0x811c_9dc5);
        assert_eq!(fnv1a32("a"), 0xe40c_292c);
        assert_eq!(fnv1a32("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn shard_index_is_deterministic_and_in_range() {
        assert_eq!(shard_index("svc-a", 8), 4);
        assert_eq!(shard_index("svc-b", 8), 7);
        for module in ["svc-a", "order-api", "pay-gateway", "日志模块", ""] {
            let first = shard_index(module, 8);
            assert_eq!(first, shard_index(module, 8));
            assert!((1..=8).contains(&first));
        }
    }

    #[test]
    fn collection_name_rotates_monthly_in_utc() {
        // 1_700_000_000 is 2023-11-14 UTC.
        assert_eq!(collection_name(4, 1_700_000_000), "logging_4_202311");
        assert_eq!(collection_name(1, 0), "logging_1_197001");
    }

    #[test]
    fn assignment_is_contiguous() {
        // Four databases over eight indices: db1=[1,2] db2=[3,4] db3=[5,6] db4=[7,8].
        assert_eq!(ShardMap::assign(4, 8), vec![0, 0, 1, 1, 2, 2, 3, 3]);
        // Remainder spreads from the front: three databases over eight.
        assert_eq!(ShardMap::assign(3, 8), vec![0, 0, 0, 1, 1, 1, 2, 2]);
        assert_eq!(ShardMap::assign(1, 8), vec![0; 8]);
        assert!(ShardMap::assign(0, 8).is_empty());
    }

    #[test]
    fn route_without_databases_is_unassigned() {
        let dirs: Vec<std::path::PathBuf> = Vec::new();
        let map = ShardMap::open(&dirs, 8).unwrap();
        let err = map.route("svc-a", 1_700_000_000).unwrap_err();
        assert!(matches!(err, StorageError::ShardUnassigned { index: 4 }));
    }

    #[test]
    fn route_picks_the_owning_database() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs: Vec<_> = (1..=4).map(|i| tmp.path().join(format!("db{i}"))).collect();
        let map = ShardMap::open(&dirs, 8).unwrap();

        // svc-a hashes to shard 4 -> second database; svc-b to shard 7 -> fourth.
        let a = map.route("svc-a", 1_700_000_000).unwrap();
        assert_eq!(a.shard_index, 4);
        assert_eq!(a.collection, "logging_4_202311");
        assert!(Arc::ptr_eq(&a.database, &map.databases()[1]));

        let b = map.route("svc-b", 1_700_000_000).unwrap();
        assert_eq!(b.shard_index, 7);
        assert!(Arc::ptr_eq(&b.database, &map.databases()[3]));
    }
}
