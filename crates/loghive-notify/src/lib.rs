//! Notification delivery capability for fired alarms.
//!
//! The alarm state machine only sees the [`Notifier`] trait; concrete
//! channels (currently DingTalk) live in [`channels`] and are chosen from
//! the hook's configured method at rule-state construction.

pub mod channels;
pub mod error;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use error::Result;

/// A delivery channel for rendered alarm content.
///
/// Implementations must be cheap to construct (one per rule state) and safe
/// to call concurrently. Delivery failures are reported through the returned
/// error; the caller decides whether to retry on the next matching record.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers the rendered content to the configured endpoint.
    async fn send(&self, content: &str) -> Result<()>;

    /// Returns the channel method name (e.g. `"dingtalk"`).
    fn method_name(&self) -> &str;

    /// Points the channel at a new endpoint URL.
    fn set_endpoint(&mut self, url: &str);
}
