//! Alarm evaluation for the ingest stream.
//!
//! [`registry::RuleRegistry`] holds the enabled rules as a hot-swappable
//! snapshot; [`state::RuleState`] is the per-rule counter and rate-limited
//! emission state machine. Evaluation is wait-free after the registry map
//! lookup: states are only touched through atomics, and reload replaces the
//! whole snapshot under a write lock without mutating live states.

pub mod registry;
pub mod state;

#[cfg(test)]
mod tests;

pub use registry::RuleRegistry;
pub use state::RuleState;
