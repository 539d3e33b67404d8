use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vigil_core::{Monitor, MonitorKind, Sample, SampleMetadata, Status};

use crate::classify::classify_value;
use crate::probes::command::{run_local, CommandError};
use crate::probes::Probe;

const OUTPUT_CAP: usize = 64 * 1024;

/// ICMP probe.
///
/// Shells out to the system `ping` binary rather than opening raw sockets,
/// which would require elevated privileges. The command goes through the
/// engine's single shell runner, so timeout/kill semantics match every
/// other shelled command.
pub struct PingProbe;

impl PingProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the mean round-trip time in milliseconds from `ping` output.
///
/// Prefers the summary line (`rtt min/avg/max/mdev = a/b/c/d ms` on Linux,
/// `round-trip min/avg/max/stddev = ...` on BSDs); falls back to averaging
/// the per-reply `time=` figures.
pub(crate) fn parse_mean_rtt(output: &str) -> Option<f64> {
    let summary = regex::Regex::new(r"min/avg/max[^=]*=\s*[0-9.]+/([0-9.]+)/").ok()?;
    if let Some(caps) = summary.captures(output) {
        if let Ok(avg) = caps[1].parse::<f64>() {
            return Some(avg);
        }
    }

    let per_reply = regex::Regex::new(r"time[=<]([0-9.]+)\s*ms").ok()?;
    let times: Vec<f64> = per_reply
        .captures_iter(output)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .collect();
    if times.is_empty() {
        None
    } else {
        Some(times.iter().sum::<f64>() / times.len() as f64)
    }
}

#[async_trait]
impl Probe for PingProbe {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample {
        let MonitorKind::Ping { host, count } = &monitor.kind else {
            return Sample::probe_error(
                &monitor.id,
                now,
                format!("ping probe cannot handle {} monitors", monitor.kind.label()),
            );
        };

        // Per-reply timeout, leaving headroom inside the monitor deadline
        let reply_timeout = (u64::from(monitor.timeout_secs) / u64::from(*count).max(1)).max(1);
        let command = format!(
            "ping -n -q -c {} -W {} {}",
            count,
            reply_timeout,
            shell_quote(host)
        );

        let output = match run_local(
            &command,
            Duration::from_secs(u64::from(monitor.timeout_secs)),
            OUTPUT_CAP,
        )
        .await
        {
            Ok(out) => out,
            Err(CommandError::TimedOut(d)) => {
                return Sample::probe_error(&monitor.id, now, format!("ping timed out after {d:?}"));
            }
            Err(e) => {
                return Sample::probe_error(&monitor.id, now, format!("ping failed: {e}"));
            }
        };

        match parse_mean_rtt(&output.stdout) {
            Some(avg_ms) => Sample {
                monitor_id: monitor.id.clone(),
                timestamp: now,
                value: Some(avg_ms),
                status: classify_value(avg_ms, &monitor.thresholds),
                response_time_ms: Some(avg_ms.round() as u64),
                metadata: SampleMetadata {
                    exit_code: Some(output.exit_code),
                    ..SampleMetadata::default()
                },
                error_message: None,
            },
            None => {
                let detail = if output.stderr.is_empty() {
                    "no echo replies received".to_string()
                } else {
                    output.stderr.lines().next().unwrap_or_default().to_string()
                };
                Sample::probe_error(&monitor.id, now, format!("{host} unreachable: {detail}"))
            }
        }
    }
}

/// Single-quote a value for `sh -c`, closing and reopening around embedded
/// quotes.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
