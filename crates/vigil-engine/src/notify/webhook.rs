use crate::notify::NotifyError;

/// Generic webhook channel; also carries Slack deliveries (Slack incoming
/// webhooks accept a `{"text"}` payload).
#[derive(Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub async fn send(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<Option<String>, NotifyError> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Gateway(format!("webhook returned {status}")));
        }
        Ok(None)
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}
