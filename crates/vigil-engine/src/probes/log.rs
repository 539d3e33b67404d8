use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vigil_core::{Monitor, MonitorKind, Sample, SampleMetadata, Status};

use crate::classify::classify_value;
use crate::probes::command::run_ssh;
use crate::probes::Probe;

const OUTPUT_CAP: usize = 256 * 1024;

/// Lines read from the end of the log per check.
const READ_WINDOW_LINES: usize = 1000;

/// Matched lines carried in sample metadata.
const MAX_MATCHED_LINES: usize = 10;

/// Log pattern probe. Reads the tail of a log file, locally or over SSH,
/// and counts lines matching the configured pattern.
pub struct LogProbe;

impl LogProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Static category-to-hint mapping surfaced alongside matches.
fn hints_for(lines: &[String]) -> Vec<String> {
    const RULES: &[(&[&str], &str)] = &[
        (
            &["out of memory", "oom-killer", "oom"],
            "Increase available memory or restart the leaking process",
        ),
        (
            &["no space left", "disk full"],
            "Free disk space or expand the volume",
        ),
        (
            &["connection refused", "could not connect"],
            "Check that the dependent service is running and reachable",
        ),
        (
            &["permission denied"],
            "Check file ownership and the service user's permissions",
        ),
        (
            &["timeout", "timed out"],
            "Check network latency and downstream service load",
        ),
    ];

    let mut hints = Vec::new();
    for (needles, hint) in RULES {
        let relevant = lines.iter().any(|line| {
            let lower = line.to_lowercase();
            needles.iter().any(|n| lower.contains(n))
        });
        if relevant && !hints.contains(&hint.to_string()) {
            hints.push(hint.to_string());
        }
    }
    hints
}

/// Apply the pattern to the window and build match metadata.
pub(crate) fn scan_window(
    window: &str,
    pattern: &regex::Regex,
) -> (usize, Vec<String>) {
    let matched: Vec<&str> = window.lines().filter(|l| pattern.is_match(l)).collect();
    let first_n = matched
        .iter()
        .take(MAX_MATCHED_LINES)
        .map(|l| l.to_string())
        .collect();
    (matched.len(), first_n)
}

#[async_trait]
impl Probe for LogProbe {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample {
        let MonitorKind::Log {
            path,
            pattern,
            remote,
        } = &monitor.kind
        else {
            return Sample::probe_error(
                &monitor.id,
                now,
                format!("log probe cannot handle {} monitors", monitor.kind.label()),
            );
        };

        let pattern_src = pattern
            .as_deref()
            .or(monitor.positive_pattern.as_deref())
            .unwrap_or("error|fatal|panic");
        let re = match regex::Regex::new(pattern_src) {
            Ok(re) => re,
            Err(e) => {
                return Sample::probe_error(&monitor.id, now, format!("invalid log pattern: {e}"));
            }
        };

        let timeout = Duration::from_secs(u64::from(monitor.timeout_secs));
        let window = match remote {
            Some(target) => {
                let command = format!("tail -n {READ_WINDOW_LINES} '{path}'");
                match run_ssh(target, &command, timeout, OUTPUT_CAP).await {
                    Ok(out) if out.exit_code == 0 => out.stdout,
                    Ok(out) => {
                        return Sample::probe_error(
                            &monitor.id,
                            now,
                            format!(
                                "remote read of {path} failed: {}",
                                out.stderr.lines().next().unwrap_or("unknown error")
                            ),
                        );
                    }
                    Err(e) => {
                        return Sample::probe_error(
                            &monitor.id,
                            now,
                            format!("remote read of {path} failed: {e}"),
                        );
                    }
                }
            }
            None => match tokio::fs::read_to_string(path).await {
                Ok(contents) => {
                    let lines: Vec<&str> = contents.lines().collect();
                    let start = lines.len().saturating_sub(READ_WINDOW_LINES);
                    lines[start..].join("\n")
                }
                Err(e) => {
                    return Sample::probe_error(
                        &monitor.id,
                        now,
                        format!("cannot read {path}: {e}"),
                    );
                }
            },
        };

        let (count, matched_lines) = scan_window(&window, &re);
        let value = count as f64;

        // With thresholds configured the count classifies like any other
        // reading; otherwise any match is the abnormal condition
        let status = if monitor.thresholds.is_empty() {
            if count > 0 { Status::Alarm } else { Status::Ok }
        } else {
            classify_value(value, &monitor.thresholds)
        };

        let solutions = hints_for(&matched_lines);

        Sample {
            monitor_id: monitor.id.clone(),
            timestamp: now,
            value: Some(value),
            status,
            response_time_ms: None,
            metadata: SampleMetadata {
                log_matches: matched_lines,
                solutions,
                ..SampleMetadata::default()
            },
            error_message: match status {
                Status::Ok => None,
                _ => Some(format!("{count} matching lines in {path}")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn log_monitor(path: &str, pattern: Option<&str>) -> Monitor {
        serde_json::from_value(serde_json::json!({
            "id": "m-log",
            "name": "app-log",
            "monitor_type": "LOG",
            "path": path,
            "pattern": pattern,
            "severity": "medium",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn counts_matching_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "INFO started").unwrap();
        writeln!(file, "ERROR connection refused to db:5432").unwrap();
        writeln!(file, "INFO retrying").unwrap();
        writeln!(file, "ERROR connection refused to db:5432").unwrap();

        let mon = log_monitor(file.path().to_str().unwrap(), Some("ERROR"));
        let sample = LogProbe::new().check(&mon, Utc::now()).await;

        assert_eq!(sample.value, Some(2.0));
        assert_eq!(sample.status, Status::Alarm);
        assert_eq!(sample.metadata.log_matches.len(), 2);
        assert!(sample
            .metadata
            .solutions
            .iter()
            .any(|s| s.contains("dependent service")));
    }

    #[tokio::test]
    async fn clean_log_is_ok() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "INFO all quiet").unwrap();

        let mon = log_monitor(file.path().to_str().unwrap(), Some("ERROR"));
        let sample = LogProbe::new().check(&mon, Utc::now()).await;

        assert_eq!(sample.value, Some(0.0));
        assert_eq!(sample.status, Status::Ok);
        assert!(sample.metadata.log_matches.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_probe_error() {
        let mon = log_monitor("/nonexistent/vigil-test.log", Some("ERROR"));
        let sample = LogProbe::new().check(&mon, Utc::now()).await;
        assert_eq!(sample.status, Status::Error);
        assert!(sample.value.is_none());
    }

    #[tokio::test]
    async fn thresholds_override_any_match_rule() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ERROR one").unwrap();

        let mut mon = log_monitor(file.path().to_str().unwrap(), Some("ERROR"));
        mon.thresholds.high_alarm = Some(5.0);

        let sample = LogProbe::new().check(&mon, Utc::now()).await;
        // One match is below the configured alarm threshold
        assert_eq!(sample.status, Status::Ok);
    }

    #[test]
    fn matched_lines_are_capped() {
        let window: String = (0..50).map(|i| format!("ERROR line {i}\n")).collect();
        let re = regex::Regex::new("ERROR").unwrap();
        let (count, lines) = scan_window(&window, &re);
        assert_eq!(count, 50);
        assert_eq!(lines.len(), MAX_MATCHED_LINES);
    }

    #[test]
    fn hints_deduplicate() {
        let lines = vec![
            "ERROR Out of memory in worker".to_string(),
            "ERROR oom-killer invoked".to_string(),
        ];
        let hints = hints_for(&lines);
        assert_eq!(hints.len(), 1);
    }
}
