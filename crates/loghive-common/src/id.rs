//! Time-ordered record identifiers.
//!
//! A record id is 12 bytes rendered as 24 lowercase hex chars:
//! 4 bytes of big-endian unix seconds, a 5-byte per-process random value and
//! a 3-byte big-endian counter seeded randomly at startup. Ids generated on
//! one process sort lexicographically by creation second.

use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

fn process_unique() -> &'static [u8; 5] {
    PROCESS_UNIQUE.get_or_init(|| rand::thread_rng().gen())
}

fn counter() -> &'static AtomicU32 {
    COUNTER.get_or_init(|| AtomicU32::new(rand::thread_rng().gen()))
}

/// Generates the next record id for the current unix second.
pub fn next_id() -> String {
    let now = chrono::Utc::now().timestamp();
    next_id_at(now as u32)
}

/// Generates a record id stamped with the given unix second.
pub fn next_id_at(unix_sec: u32) -> String {
    use std::fmt::Write;

    let seq = counter().fetch_add(1, Ordering::Relaxed);
    let unique = process_unique();

    let mut raw = [0u8; 12];
    raw[0..4].copy_from_slice(&unix_sec.to_be_bytes());
    raw[4..9].copy_from_slice(unique);
    // low 3 bytes of the counter
    raw[9..12].copy_from_slice(&seq.to_be_bytes()[1..4]);

    let mut out = String::with_capacity(24);
    for b in raw {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_hex_shaped() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = next_id();
            assert_eq!(id.len(), 24);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(seen.insert(id), "duplicate id generated");
        }
    }

    #[test]
    fn ids_sort_by_creation_second() {
        let earlier = next_id_at(1_700_000_000);
        let later = next_id_at(1_700_000_060);
        assert!(earlier < later);
    }
}
