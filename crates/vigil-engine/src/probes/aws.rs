use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatch::config::Credentials;
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::{Datapoint, Dimension, Statistic};
use chrono::{DateTime, Utc};
use vigil_core::{Monitor, MonitorKind, Sample, SampleMetadata};

use crate::classify::classify_value;
use crate::probes::Probe;

/// CloudWatch metric probe.
///
/// Fetches `GetMetricStatistics` for the configured namespace/metric over
/// the monitor's last period and reports the most recent datapoint's
/// average.
pub struct AwsProbe;

impl AwsProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AwsProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Dimension key for the common CloudWatch namespaces; `InstanceId`
/// otherwise.
fn dimension_name(namespace: &str) -> &'static str {
    match namespace {
        "AWS/RDS" => "DBInstanceIdentifier",
        "AWS/Lambda" => "FunctionName",
        "AWS/ELB" => "LoadBalancerName",
        "AWS/ApplicationELB" => "LoadBalancer",
        "AWS/SQS" => "QueueName",
        _ => "InstanceId",
    }
}

/// Most recent datapoint by timestamp.
fn latest_datapoint(datapoints: &[Datapoint]) -> Option<&Datapoint> {
    datapoints
        .iter()
        .filter(|d| d.timestamp().is_some())
        .max_by_key(|d| d.timestamp().map(|t| t.secs()))
}

#[async_trait]
impl Probe for AwsProbe {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample {
        let MonitorKind::Aws {
            region,
            service,
            resource_id,
            metric_name,
            access_key_id,
            secret_access_key,
        } = &monitor.kind
        else {
            return Sample::probe_error(
                &monitor.id,
                now,
                format!("aws probe cannot handle {} monitors", monitor.kind.label()),
            );
        };

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()));
        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "monitor-config",
            ));
        }
        let config = loader.load().await;
        let client = aws_sdk_cloudwatch::Client::new(&config);

        // Look back at least 10 minutes so sparse metrics still produce a
        // datapoint
        let lookback_secs = i64::from(monitor.period_minutes).max(10) * 60;
        let start = now.timestamp() - lookback_secs;

        let result = client
            .get_metric_statistics()
            .namespace(service)
            .metric_name(metric_name)
            .dimensions(
                Dimension::builder()
                    .name(dimension_name(service))
                    .value(resource_id)
                    .build(),
            )
            .start_time(AwsDateTime::from_secs(start))
            .end_time(AwsDateTime::from_secs(now.timestamp()))
            .period(300)
            .statistics(Statistic::Average)
            .send()
            .await;

        let output = match result {
            Ok(out) => out,
            Err(e) => {
                return Sample::probe_error(
                    &monitor.id,
                    now,
                    format!("CloudWatch request failed: {}", e.into_service_error()),
                );
            }
        };

        let datapoints = output.datapoints();
        let Some(latest) = latest_datapoint(datapoints) else {
            return Sample::probe_error(
                &monitor.id,
                now,
                format!("no datapoints for {service}/{metric_name} ({resource_id})"),
            );
        };

        let Some(value) = latest.average() else {
            return Sample::probe_error(&monitor.id, now, "datapoint carries no average");
        };

        Sample {
            monitor_id: monitor.id.clone(),
            timestamp: now,
            value: Some(value),
            status: classify_value(value, &monitor.thresholds),
            response_time_ms: None,
            metadata: SampleMetadata::default(),
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_name_maps_common_namespaces() {
        assert_eq!(dimension_name("AWS/EC2"), "InstanceId");
        assert_eq!(dimension_name("AWS/RDS"), "DBInstanceIdentifier");
        assert_eq!(dimension_name("AWS/Lambda"), "FunctionName");
        assert_eq!(dimension_name("Custom/App"), "InstanceId");
    }

    #[test]
    fn latest_datapoint_picks_newest() {
        let older = Datapoint::builder()
            .timestamp(AwsDateTime::from_secs(1_000))
            .average(1.0)
            .build();
        let newer = Datapoint::builder()
            .timestamp(AwsDateTime::from_secs(2_000))
            .average(2.0)
            .build();
        let points = vec![older, newer];
        assert_eq!(latest_datapoint(&points).unwrap().average(), Some(2.0));
    }

    #[test]
    fn latest_datapoint_empty_is_none() {
        assert!(latest_datapoint(&[]).is_none());
    }
}
