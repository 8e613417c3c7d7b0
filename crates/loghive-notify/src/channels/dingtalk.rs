use crate::error::{NotifyError, Result};
use crate::Notifier;
use async_trait::async_trait;
use serde_json::Value;
use tracing;

const SERVICE: &str = "dingtalk";
const MAX_ATTEMPTS: u32 = 3;

/// DingTalk group robot webhook.
///
/// Content is sent as a plain `text` message; the robot's keyword filter is
/// satisfied by the keyword line the alarm renderer puts first.
pub struct DingTalk {
    client: reqwest::Client,
    webhook_url: String,
}

impl DingTalk {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: String::new(),
        }
    }

    pub(crate) fn payload(content: &str) -> Value {
        serde_json::json!({
            "msgtype": "text",
            "text": { "content": content }
        })
    }

    async fn post_once(&self, payload: &Value) -> Result<()> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        // HTTP 200 still carries an errcode in the body.
        let body: Value = resp.json().await?;
        let errcode = body.get("errcode").and_then(|v| v.as_i64()).unwrap_or(0);
        if errcode != 0 {
            let errmsg = body
                .get("errmsg")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            return Err(NotifyError::Rejected {
                service: SERVICE,
                errcode,
                errmsg,
            });
        }
        Ok(())
    }
}

impl Default for DingTalk {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for DingTalk {
    async fn send(&self, content: &str) -> Result<()> {
        if self.webhook_url.is_empty() {
            return Err(NotifyError::NoEndpoint(SERVICE));
        }
        let payload = Self::payload(content);

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.post_once(&payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "DingTalk webhook attempt failed"
                    );
                    last_err = Some(e);
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }
        Err(last_err.expect("at least one attempt ran"))
    }

    fn method_name(&self) -> &str {
        SERVICE
    }

    fn set_endpoint(&mut self, url: &str) {
        self.webhook_url = url.to_string();
    }
}
