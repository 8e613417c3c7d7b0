pub mod dingtalk;

use crate::Notifier;
use loghive_common::types::NotifyMethod;

/// Builds the channel implementation for a hook's configured method,
/// pointed at the given endpoint.
pub fn create(method: NotifyMethod, endpoint: &str) -> Box<dyn Notifier> {
    match method {
        NotifyMethod::DingTalk => {
            let mut channel = dingtalk::DingTalk::new();
            channel.set_endpoint(endpoint);
            Box::new(channel)
        }
    }
}
