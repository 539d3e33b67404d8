use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vigil_core::{Monitor, MonitorKind, Sample, SampleMetadata, Status};

use crate::classify::{classify_value, worst};
use crate::probes::Probe;

/// Bytes of response body the pattern window covers.
const BODY_WINDOW_BYTES: usize = 1024 * 1024;

/// Probe for URL (GET) and API-POST monitors.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample {
        let request = match &monitor.kind {
            MonitorKind::Url { url } => self.client.get(url),
            MonitorKind::ApiPost { url, post_body } => self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(post_body),
            other => {
                return Sample::probe_error(
                    &monitor.id,
                    now,
                    format!("http probe cannot handle {} monitors", other.label()),
                );
            }
        };

        let started = Instant::now();
        let response = request
            .timeout(Duration::from_secs(u64::from(monitor.timeout_secs)))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("request timed out after {}s", monitor.timeout_secs)
                } else if e.is_connect() {
                    format!("connection failed: {}", e.without_url())
                } else {
                    format!("request failed: {}", e.without_url())
                };
                return Sample::probe_error(&monitor.id, now, message);
            }
        };

        let status_code = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return Sample::probe_error(
                    &monitor.id,
                    now,
                    format!("failed to read response body: {}", e.without_url()),
                );
            }
        };
        let response_time_ms = started.elapsed().as_millis() as u64;

        let window = &body[..body.len().min(BODY_WINDOW_BYTES)];
        let text = String::from_utf8_lossy(window);

        let code_expected = if monitor.expected_status_codes.is_empty() {
            (200..300).contains(&status_code)
        } else {
            monitor.expected_status_codes.contains(&status_code)
        };

        let mut metadata = SampleMetadata {
            status_code: Some(status_code),
            ..SampleMetadata::default()
        };

        let mut verdict = if code_expected {
            Status::Ok
        } else {
            Status::Alarm
        };

        if let Some(pattern) = &monitor.positive_pattern {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    let matched = re.is_match(&text);
                    metadata.positive_pattern_matched = Some(matched);
                    if !matched {
                        verdict = worst(verdict, Status::Warning);
                    }
                }
                Err(e) => {
                    return Sample::probe_error(
                        &monitor.id,
                        now,
                        format!("invalid positive pattern: {e}"),
                    );
                }
            }
        }

        if let Some(pattern) = &monitor.negative_pattern {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    let matched = re.is_match(&text);
                    metadata.negative_pattern_matched = Some(matched);
                    if matched {
                        verdict = Status::Alarm;
                    }
                }
                Err(e) => {
                    return Sample::probe_error(
                        &monitor.id,
                        now,
                        format!("invalid negative pattern: {e}"),
                    );
                }
            }
        }

        // Response time runs through the ordinary thresholds as well
        let value = response_time_ms as f64;
        let status = worst(verdict, classify_value(value, &monitor.thresholds));

        let error_message = match status {
            Status::Ok => None,
            _ if !code_expected => Some(format!("unexpected status code {status_code}")),
            _ if metadata.negative_pattern_matched == Some(true) => {
                Some("negative pattern matched".to_string())
            }
            _ if metadata.positive_pattern_matched == Some(false) => {
                Some("positive pattern not found".to_string())
            }
            _ => Some(format!("response time {response_time_ms}ms over threshold")),
        };

        Sample {
            monitor_id: monitor.id.clone(),
            timestamp: now,
            value: Some(value),
            status,
            response_time_ms: Some(response_time_ms),
            metadata,
            error_message,
        }
    }
}
