use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Classification of a single observation (and, derived from the stream of
/// observations, of a monitor's current condition).
///
/// `Error` means the probe itself failed (timeout, auth, unreachable); it
/// counts as a failure for hysteresis purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Warning,
    Alarm,
    Error,
}

impl Status {
    /// Whether the observation counts as a failure for hysteresis.
    pub fn is_failure(self) -> bool {
        !matches!(self, Status::Ok)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => f.write_str("ok"),
            Status::Warning => f.write_str("warning"),
            Status::Alarm => f.write_str("alarm"),
            Status::Error => f.write_str("error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// Certificate fields captured by the TLS probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub common_name: Option<String>,
    pub issuer: String,
    pub serial: String,
    pub sans: Vec<String>,
    pub not_after: DateTime<Utc>,
    pub days_remaining: i64,
}

/// Structured per-sample metadata. Probes fill in the fields they know
/// about; everything else stays at its empty default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_pattern_matched: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_pattern_matched: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_matches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub solutions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// One observation produced by a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub monitor_id: String,
    pub timestamp: DateTime<Utc>,
    /// Numeric reading, when the probe produces one. Null on probe failure.
    pub value: Option<f64>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default)]
    pub metadata: SampleMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Sample {
    /// A sample recording a probe-level failure.
    pub fn probe_error(
        monitor_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            timestamp,
            value: None,
            status: Status::Error,
            response_time_ms: None,
            metadata: SampleMetadata::default(),
            error_message: Some(message.into()),
        }
    }
}
