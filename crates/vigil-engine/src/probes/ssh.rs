use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vigil_core::{Monitor, MonitorKind, Sample, SampleMetadata, SshTarget, Status};

use crate::classify::classify_value;
use crate::probes::command::{self, CommandError};
use crate::probes::Probe;

const OUTPUT_CAP: usize = 64 * 1024;

/// Canned command for CPU utilisation percent.
const CPU_COMMAND: &str = "top -bn2 -d 0.2 | grep '^%Cpu' | tail -1 | awk '{print 100-$8}'";

/// Canned command for memory utilisation percent.
const MEM_COMMAND: &str = r#"free | awk '/Mem:/ {printf "%.1f", $3/$2*100}'"#;

fn disk_command(path: &str) -> String {
    format!(r#"df -P '{path}' | awk 'NR==2 {{sub(/%/,"",$5); print $5}}'"#)
}

/// Probe for SSH remote commands and the command-backed resource checks
/// (CPU / MEM / DISK / CUSTOM). Resource checks run locally unless a
/// remote target is configured.
pub struct SshProbe;

impl SshProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SshProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// First numeric token in command output, if any.
pub(crate) fn parse_numeric(output: &str) -> Option<f64> {
    let re = regex::Regex::new(r"-?\d+(?:\.\d+)?").ok()?;
    re.find(output.trim())?.as_str().parse().ok()
}

#[async_trait]
impl Probe for SshProbe {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample {
        let (command, remote): (String, Option<SshTarget>) = match &monitor.kind {
            MonitorKind::Ssh {
                host,
                port,
                username,
                password,
                private_key,
                command,
            } => (
                command.clone(),
                Some(SshTarget {
                    host: host.clone(),
                    port: *port,
                    username: username.clone(),
                    password: password.clone(),
                    private_key: private_key.clone(),
                }),
            ),
            MonitorKind::Cpu { remote } => (CPU_COMMAND.to_string(), remote.clone()),
            MonitorKind::Mem { remote } => (MEM_COMMAND.to_string(), remote.clone()),
            MonitorKind::Disk { path, remote } => (disk_command(path), remote.clone()),
            MonitorKind::Custom { command, remote } => (command.clone(), remote.clone()),
            other => {
                return Sample::probe_error(
                    &monitor.id,
                    now,
                    format!("command probe cannot handle {} monitors", other.label()),
                );
            }
        };

        let timeout = Duration::from_secs(u64::from(monitor.timeout_secs));
        let output = match command::run(remote.as_ref(), &command, timeout, OUTPUT_CAP).await {
            Ok(out) => out,
            Err(CommandError::TimedOut(d)) => {
                return Sample::probe_error(
                    &monitor.id,
                    now,
                    format!("command timed out after {d:?}"),
                );
            }
            Err(CommandError::AuthFailed(who)) => {
                return Sample::probe_error(&monitor.id, now, format!("SSH auth failed for {who}"));
            }
            Err(e) => {
                return Sample::probe_error(&monitor.id, now, e.to_string());
            }
        };

        if output.exit_code != 0 {
            let detail = output
                .stderr
                .lines()
                .next()
                .filter(|l| !l.is_empty())
                .unwrap_or("no stderr output");
            return Sample {
                monitor_id: monitor.id.clone(),
                timestamp: now,
                value: None,
                status: Status::Error,
                response_time_ms: None,
                metadata: SampleMetadata {
                    exit_code: Some(output.exit_code),
                    ..SampleMetadata::default()
                },
                error_message: Some(format!(
                    "command exited with {}: {detail}",
                    output.exit_code
                )),
            };
        }

        let value = parse_numeric(&output.stdout);
        let status = value
            .map(|v| classify_value(v, &monitor.thresholds))
            .unwrap_or(Status::Ok);

        Sample {
            monitor_id: monitor.id.clone(),
            timestamp: now,
            value,
            status,
            response_time_ms: None,
            metadata: SampleMetadata {
                exit_code: Some(output.exit_code),
                ..SampleMetadata::default()
            },
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Thresholds;

    fn monitor(kind_json: serde_json::Value) -> Monitor {
        let mut base = serde_json::json!({
            "id": "m-cmd",
            "name": "host-check",
            "severity": "medium",
        });
        base.as_object_mut()
            .unwrap()
            .extend(kind_json.as_object().unwrap().clone());
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn parse_numeric_variants() {
        assert_eq!(parse_numeric("42\n"), Some(42.0));
        assert_eq!(parse_numeric("load: 1.25 ok"), Some(1.25));
        assert_eq!(parse_numeric("-3.5"), Some(-3.5));
        assert_eq!(parse_numeric("no digits here"), None);
    }

    #[tokio::test]
    async fn local_custom_command_classifies_value() {
        let mut mon = monitor(serde_json::json!({
            "monitor_type": "CUSTOM",
            "command": "echo 97",
        }));
        mon.thresholds = Thresholds {
            high_warning: Some(80.0),
            high_alarm: Some(95.0),
            ..Thresholds::default()
        };

        let sample = SshProbe::new().check(&mon, Utc::now()).await;
        assert_eq!(sample.value, Some(97.0));
        assert_eq!(sample.status, Status::Alarm);
    }

    #[tokio::test]
    async fn nonzero_exit_is_probe_error() {
        let mon = monitor(serde_json::json!({
            "monitor_type": "CUSTOM",
            "command": "echo broken >&2; exit 2",
        }));

        let sample = SshProbe::new().check(&mon, Utc::now()).await;
        assert_eq!(sample.status, Status::Error);
        assert!(sample.value.is_none());
        assert!(sample.error_message.unwrap().contains("broken"));
        assert_eq!(sample.metadata.exit_code, Some(2));
    }

    #[tokio::test]
    async fn non_numeric_output_with_zero_exit_is_ok() {
        let mon = monitor(serde_json::json!({
            "monitor_type": "CUSTOM",
            "command": "echo 'service is healthy'",
        }));

        let sample = SshProbe::new().check(&mon, Utc::now()).await;
        assert_eq!(sample.status, Status::Ok);
        assert!(sample.value.is_none());
    }

    #[test]
    fn disk_command_strips_percent() {
        let cmd = disk_command("/var");
        assert!(cmd.contains("df -P '/var'"));
        assert!(cmd.contains("sub(/%/"));
    }
}
