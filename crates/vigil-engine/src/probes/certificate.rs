use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;
use vigil_core::{CertificateInfo, Monitor, MonitorKind, Sample, SampleMetadata, Status};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::probes::Probe;

/// TLS certificate expiry probe.
///
/// Performs a handshake and inspects the leaf certificate. Verification is
/// deliberately disabled: an expired or otherwise invalid chain must still
/// be observable, since measuring exactly that condition is the probe's
/// job.
pub struct CertificateProbe {
    connector: TlsConnector,
}

/// Accepts any presented chain. See the probe-level comment.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

impl CertificateProbe {
    pub fn new() -> Self {
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
            .with_no_client_auth();
        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }
}

impl Default for CertificateProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify days-until-expiry against the monitor's day thresholds.
pub(crate) fn classify_days(days: i64, warning_days: i64, alarm_days: i64) -> Status {
    if days <= alarm_days {
        Status::Alarm
    } else if days <= warning_days {
        Status::Warning
    } else {
        Status::Ok
    }
}

/// Extract the fields of interest from a DER-encoded leaf certificate.
pub(crate) fn parse_leaf(
    der: &[u8],
    now: DateTime<Utc>,
) -> Result<CertificateInfo, String> {
    let (_, cert) = x509_parser::certificate::X509Certificate::from_der(der)
        .map_err(|e| format!("certificate parse failed: {e}"))?;

    let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| "certificate notAfter out of range".to_string())?;
    let days_remaining = (not_after.timestamp() - now.timestamp()).div_euclid(86_400);

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let sans = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|gn| match gn {
                    GeneralName::DNSName(name) => Some((*name).to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(CertificateInfo {
        common_name,
        issuer: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string(),
        sans,
        not_after,
        days_remaining,
    })
}

#[async_trait]
impl Probe for CertificateProbe {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample {
        let MonitorKind::Certificate {
            hostname,
            port,
            warning_threshold_days,
            alarm_threshold_days,
        } = &monitor.kind
        else {
            return Sample::probe_error(
                &monitor.id,
                now,
                format!(
                    "certificate probe cannot handle {} monitors",
                    monitor.kind.label()
                ),
            );
        };

        let timeout = Duration::from_secs(u64::from(monitor.timeout_secs));
        let server_name = match ServerName::try_from(hostname.clone()) {
            Ok(name) => name,
            Err(e) => {
                return Sample::probe_error(&monitor.id, now, format!("invalid hostname: {e}"));
            }
        };

        let handshake = async {
            let tcp = tokio::net::TcpStream::connect((hostname.as_str(), *port)).await?;
            self.connector.connect(server_name, tcp).await
        };

        let stream = match tokio::time::timeout(timeout, handshake).await {
            Err(_) => {
                return Sample::probe_error(
                    &monitor.id,
                    now,
                    format!("TLS handshake timed out after {}s", monitor.timeout_secs),
                );
            }
            Ok(Err(e)) => {
                return Sample::probe_error(&monitor.id, now, format!("TLS handshake failed: {e}"));
            }
            Ok(Ok(stream)) => stream,
        };

        let (_, session) = stream.get_ref();
        let Some(leaf) = session.peer_certificates().and_then(|certs| certs.first()) else {
            return Sample::probe_error(&monitor.id, now, "server presented no certificate");
        };

        let info = match parse_leaf(leaf.as_ref(), now) {
            Ok(info) => info,
            Err(e) => return Sample::probe_error(&monitor.id, now, e),
        };

        let status = classify_days(
            info.days_remaining,
            *warning_threshold_days,
            *alarm_threshold_days,
        );
        let days = info.days_remaining;

        Sample {
            monitor_id: monitor.id.clone(),
            timestamp: now,
            value: Some(days as f64),
            status,
            response_time_ms: None,
            metadata: SampleMetadata {
                certificate: Some(info),
                ..SampleMetadata::default()
            },
            error_message: match status {
                Status::Ok => None,
                _ => Some(format!("certificate expires in {days} days")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_thresholds_classify() {
        assert_eq!(classify_days(120, 30, 7), Status::Ok);
        assert_eq!(classify_days(30, 30, 7), Status::Warning);
        assert_eq!(classify_days(8, 30, 7), Status::Warning);
        assert_eq!(classify_days(7, 30, 7), Status::Alarm);
        assert_eq!(classify_days(0, 30, 7), Status::Alarm);
        assert_eq!(classify_days(-3, 30, 7), Status::Alarm);
    }

    #[test]
    fn days_remaining_floors_partial_days() {
        // 5 days minus one second is 4 whole days
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let not_after = now.timestamp() + 5 * 86_400 - 1;
        let days = (not_after - now.timestamp()).div_euclid(86_400);
        assert_eq!(days, 4);

        // Already expired floors negative
        let expired = now.timestamp() - 1;
        assert_eq!((expired - now.timestamp()).div_euclid(86_400), -1);
    }
}
