pub mod aws;
pub mod certificate;
pub mod command;
pub mod http;
pub mod log;
pub mod ping;
pub mod ssh;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vigil_core::{Monitor, MonitorKind, Sample};

pub use aws::AwsProbe;
pub use certificate::CertificateProbe;
pub use http::HttpProbe;
pub use log::LogProbe;
pub use ping::PingProbe;
pub use ssh::SshProbe;

/// A probe turns a monitor definition into one [`Sample`].
///
/// Probes never fail across this boundary: every failure mode is encoded
/// as a `status = error` sample carrying an `error_message`. Probes must
/// honor the monitor's timeout for their outbound calls (the evaluator
/// additionally enforces a hard deadline) and must be safe to invoke
/// concurrently for different monitors.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample;
}

/// The seam the evaluator talks to: something that can check any monitor.
/// In production this is the [`ProbeRegistry`]; tests substitute scripted
/// implementations.
#[async_trait]
pub trait ProbeDispatch: Send + Sync {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample;
}

/// One probe per monitor type.
pub struct ProbeRegistry {
    http: HttpProbe,
    ping: PingProbe,
    ssh: SshProbe,
    aws: AwsProbe,
    certificate: CertificateProbe,
    log: LogProbe,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self {
            http: HttpProbe::new(),
            ping: PingProbe::new(),
            ssh: SshProbe::new(),
            aws: AwsProbe::new(),
            certificate: CertificateProbe::new(),
            log: LogProbe::new(),
        }
    }

    fn probe_for(&self, kind: &MonitorKind) -> &dyn Probe {
        match kind {
            MonitorKind::Url { .. } | MonitorKind::ApiPost { .. } => &self.http,
            MonitorKind::Ping { .. } => &self.ping,
            MonitorKind::Ssh { .. }
            | MonitorKind::Cpu { .. }
            | MonitorKind::Mem { .. }
            | MonitorKind::Disk { .. }
            | MonitorKind::Custom { .. } => &self.ssh,
            MonitorKind::Aws { .. } => &self.aws,
            MonitorKind::Certificate { .. } => &self.certificate,
            MonitorKind::Log { .. } => &self.log,
        }
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeDispatch for ProbeRegistry {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample {
        self.probe_for(&monitor.kind).check(monitor, now).await
    }
}
