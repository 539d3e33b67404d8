use serde::Deserialize;

use crate::notify::NotifyError;

/// SMS (and voice-call) channel, delivered through an HTTP gateway.
///
/// The gateway receives `{"to", "message", "voice"}` and replies with an
/// optional `{"id"}`.
#[derive(Clone)]
pub struct SmsSender {
    client: reqwest::Client,
    gateway_url: String,
}

#[derive(Deserialize)]
struct GatewayResponse {
    id: Option<String>,
}

impl SmsSender {
    pub fn new(gateway_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url,
        }
    }

    pub async fn send(
        &self,
        to: &str,
        message: &str,
        voice: bool,
    ) -> Result<Option<String>, NotifyError> {
        let response = self
            .client
            .post(&self.gateway_url)
            .json(&serde_json::json!({
                "to": to,
                "message": message,
                "voice": voice,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Gateway(format!(
                "sms gateway returned {status}"
            )));
        }

        let parsed: Option<GatewayResponse> = response.json().await.ok();
        Ok(parsed.and_then(|r| r.id))
    }
}
