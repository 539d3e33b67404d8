use std::fmt;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// MonitorName
// ---------------------------------------------------------------------------

const MAX_NAME_LENGTH: usize = 128;

/// A validated monitor name: letters, digits, hyphens, underscores and dots,
/// 1-128 characters, no leading or trailing separator. Names are globally
/// unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonitorName(String);

impl MonitorName {
    /// Create a new `MonitorName` after validation.
    pub fn new(s: impl Into<String>) -> Result<Self, NameError> {
        let s = s.into();

        if s.is_empty() {
            return Err(NameError::Empty);
        }

        if s.len() > MAX_NAME_LENGTH {
            return Err(NameError::TooLong(s.len()));
        }

        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(NameError::InvalidCharacters);
        }

        if s.starts_with(['-', '_', '.']) || s.ends_with(['-', '_', '.']) {
            return Err(NameError::InvalidSeparatorPosition);
        }

        Ok(Self(s))
    }
}

impl TryFrom<String> for MonitorName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MonitorName> for String {
    fn from(name: MonitorName) -> Self {
        name.0
    }
}

impl fmt::Display for MonitorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MonitorName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when validating a monitor name.
#[derive(Debug, Clone, Error)]
pub enum NameError {
    #[error("monitor name must not be empty")]
    Empty,

    #[error("monitor name length {0} exceeds maximum of {MAX_NAME_LENGTH}")]
    TooLong(usize),

    #[error("monitor name must contain only letters, digits, '-', '_' and '.'")]
    InvalidCharacters,

    #[error("monitor name must not start or end with a separator")]
    InvalidSeparatorPosition,
}

// ---------------------------------------------------------------------------
// Severity & channels
// ---------------------------------------------------------------------------

/// Monitor-level severity. Used for scheduling priority and channel
/// resolution; alert transitions use the two-level [`AlertSeverity`] model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric rank for ordering, critical highest.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
            Severity::Critical => 3,
        }
    }
}

/// Alert severity: the two-level model driving state-machine transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Alarm,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Warning => f.write_str("warning"),
            AlertSeverity::Alarm => f.write_str("alarm"),
        }
    }
}

/// A notification delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Call,
    Slack,
    Webhook,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Email => f.write_str("email"),
            Channel::Sms => f.write_str("sms"),
            Channel::Call => f.write_str("call"),
            Channel::Slack => f.write_str("slack"),
            Channel::Webhook => f.write_str("webhook"),
        }
    }
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// Per-severity channel preferences for a contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelPrefs {
    #[serde(default)]
    pub warning: Vec<Channel>,
    #[serde(default)]
    pub alarm: Vec<Channel>,
}

/// A notification recipient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_preferences: Option<ChannelPrefs>,
}

/// Compatibility reader: `alarming_candidate` historically accepted a bare
/// list of email addresses as well as full contact records. Both forms
/// canonicalise to [`Contact`] on ingest.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContactSpec {
    Email(String),
    Record(Contact),
}

impl From<ContactSpec> for Contact {
    fn from(spec: ContactSpec) -> Self {
        match spec {
            ContactSpec::Email(address) => Contact {
                email: Some(address),
                ..Contact::default()
            },
            ContactSpec::Record(contact) => contact,
        }
    }
}

fn deserialize_contacts<'de, D>(deserializer: D) -> Result<Vec<Contact>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let specs = Vec::<ContactSpec>::deserialize(deserializer)?;
    Ok(specs.into_iter().map(Contact::from).collect())
}

// ---------------------------------------------------------------------------
// Notification settings
// ---------------------------------------------------------------------------

fn default_warning_channels() -> Vec<Channel> {
    vec![Channel::Email]
}

fn default_alarm_channels() -> Vec<Channel> {
    vec![Channel::Email]
}

fn default_escalation_delay() -> u32 {
    30
}

/// Monitor-wide notification defaults, used when a contact carries no
/// per-severity preferences of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "default_warning_channels")]
    pub warning_channels: Vec<Channel>,
    #[serde(default = "default_alarm_channels")]
    pub alarm_channels: Vec<Channel>,
    #[serde(default)]
    pub enable_escalation: bool,
    #[serde(default = "default_escalation_delay")]
    pub escalation_delay_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            warning_channels: default_warning_channels(),
            alarm_channels: default_alarm_channels(),
            enable_escalation: false,
            escalation_delay_minutes: default_escalation_delay(),
            webhook_url: None,
            slack_webhook_url: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Maintenance windows
// ---------------------------------------------------------------------------

/// A daily maintenance window in UTC, `start` inclusive, `end` exclusive.
/// Windows crossing midnight (`start > end`) wrap to the next day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl MaintenanceWindow {
    /// Whether the given instant falls inside the window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let t = at.time();
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Serde adapter for `"HH:MM"` wall-clock times.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(d)?;
        NaiveTime::parse_from_str(&s, "%H:%M").map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Numeric classification thresholds. Any subset may be configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_warning: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_warning: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_alarm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_alarm: Option<f64>,
}

impl Thresholds {
    pub fn is_empty(&self) -> bool {
        self.low_warning.is_none()
            && self.high_warning.is_none()
            && self.low_alarm.is_none()
            && self.high_alarm.is_none()
    }
}

// ---------------------------------------------------------------------------
// Monitor kind (type-specific configuration)
// ---------------------------------------------------------------------------

/// SSH connection parameters, shared by the SSH probe and the remote mode of
/// the log/resource probes. Exactly one of `password` / `private_key` is
/// expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshTarget {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ping_count() -> u32 {
    4
}

fn default_tls_port() -> u16 {
    443
}

fn default_cert_warning_days() -> i64 {
    30
}

fn default_cert_alarm_days() -> i64 {
    7
}

fn default_disk_path() -> String {
    "/".to_string()
}

/// Type-specific monitor configuration, tagged by `monitor_type` on the
/// wire. Unknown types fail deserialization, which surfaces as
/// [`ConfigError::UnknownType`] at validation boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "monitor_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorKind {
    Url {
        url: String,
    },
    ApiPost {
        url: String,
        post_body: serde_json::Value,
    },
    Ping {
        host: String,
        #[serde(default = "default_ping_count")]
        count: u32,
    },
    Ssh {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        private_key: Option<String>,
        command: String,
    },
    Aws {
        region: String,
        service: String,
        resource_id: String,
        metric_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_key_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_access_key: Option<String>,
    },
    Certificate {
        hostname: String,
        #[serde(default = "default_tls_port")]
        port: u16,
        #[serde(default = "default_cert_warning_days")]
        warning_threshold_days: i64,
        #[serde(default = "default_cert_alarm_days")]
        alarm_threshold_days: i64,
    },
    Log {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<SshTarget>,
    },
    Cpu {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<SshTarget>,
    },
    Mem {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<SshTarget>,
    },
    Disk {
        #[serde(default = "default_disk_path")]
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<SshTarget>,
    },
    Custom {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote: Option<SshTarget>,
    },
}

impl MonitorKind {
    /// Stable type label, matching the wire tag.
    pub fn label(&self) -> &'static str {
        match self {
            MonitorKind::Url { .. } => "URL",
            MonitorKind::ApiPost { .. } => "API_POST",
            MonitorKind::Ping { .. } => "PING",
            MonitorKind::Ssh { .. } => "SSH",
            MonitorKind::Aws { .. } => "AWS",
            MonitorKind::Certificate { .. } => "CERTIFICATE",
            MonitorKind::Log { .. } => "LOG",
            MonitorKind::Cpu { .. } => "CPU",
            MonitorKind::Mem { .. } => "MEM",
            MonitorKind::Disk { .. } => "DISK",
            MonitorKind::Custom { .. } => "CUSTOM",
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

fn default_period() -> u32 {
    5
}

fn default_timeout() -> u32 {
    30
}

fn default_one() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// A monitor definition. Immutable from the engine's perspective; edited
/// only through the external CRUD collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    /// Unique identifier.
    pub id: String,

    /// Globally unique name (validated as a [`MonitorName`] at boundaries).
    pub name: String,

    #[serde(flatten)]
    pub kind: MonitorKind,

    /// Check period in minutes, 1-1440.
    #[serde(default = "default_period")]
    pub period_minutes: u32,

    /// Probe timeout in seconds, 5-300.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,

    /// Whether the monitor is enabled.
    #[serde(default = "default_true")]
    pub active: bool,

    /// Whether the monitor is started (participates in scheduling).
    #[serde(default = "default_true")]
    pub running: bool,

    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindow>,

    pub severity: Severity,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub expected_status_codes: Vec<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_pattern: Option<String>,

    /// Consecutive failures required before a warning alert triggers.
    #[serde(default = "default_one")]
    pub consecutive_warning: u32,

    /// Consecutive failures required before an alarm alert triggers.
    #[serde(default = "default_one")]
    pub consecutive_alarm: u32,

    /// Consecutive successes required before an active alert recovers.
    #[serde(default = "default_one")]
    pub reset_after_m_ok: u32,

    /// Notification recipients, canonicalised from either bare email
    /// strings or full contact records.
    #[serde(default, deserialize_with = "deserialize_contacts")]
    pub alarming_candidate: Vec<Contact>,

    #[serde(default)]
    pub notification_settings: NotificationSettings,

    /// Optional remediation command, run verbatim by the recovery executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<String>,
}

impl Monitor {
    /// The maintenance window containing `at`, if any.
    pub fn in_maintenance(&self, at: DateTime<Utc>) -> bool {
        self.maintenance_windows.iter().any(|w| w.contains(at))
    }

    /// Validate the full definition. Totality matters here: anything the
    /// scheduler would choke on later must be rejected at ingest.
    pub fn validate(&self) -> Result<(), ConfigError> {
        MonitorName::new(&self.name)?;

        if !(1..=1440).contains(&self.period_minutes) {
            return Err(ConfigError::PeriodOutOfRange(self.period_minutes));
        }
        if !(5..=300).contains(&self.timeout_secs) {
            return Err(ConfigError::TimeoutOutOfRange(self.timeout_secs));
        }
        if self.consecutive_warning < 1 || self.consecutive_alarm < 1 || self.reset_after_m_ok < 1
        {
            return Err(ConfigError::ZeroHysteresis);
        }
        for code in &self.expected_status_codes {
            if !(100..=599).contains(code) {
                return Err(ConfigError::InvalidStatusCode(*code));
            }
        }

        match &self.kind {
            MonitorKind::Url { url } | MonitorKind::ApiPost { url, .. } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::InvalidUrl(url.clone()));
                }
            }
            MonitorKind::Ping { host, count } => {
                if host.is_empty() {
                    return Err(ConfigError::MissingField("host"));
                }
                if *count == 0 {
                    return Err(ConfigError::MissingField("count"));
                }
            }
            MonitorKind::Ssh {
                host,
                username,
                password,
                private_key,
                command,
                ..
            } => {
                if host.is_empty() || username.is_empty() {
                    return Err(ConfigError::MissingField("host/username"));
                }
                if password.is_none() && private_key.is_none() {
                    return Err(ConfigError::MissingCredentials);
                }
                if command.is_empty() {
                    return Err(ConfigError::MissingField("command"));
                }
            }
            MonitorKind::Aws {
                region,
                service,
                resource_id,
                metric_name,
                ..
            } => {
                if region.is_empty() || service.is_empty() {
                    return Err(ConfigError::MissingField("region/service"));
                }
                if resource_id.is_empty() || metric_name.is_empty() {
                    return Err(ConfigError::MissingField("resource_id/metric_name"));
                }
            }
            MonitorKind::Certificate {
                hostname,
                warning_threshold_days,
                alarm_threshold_days,
                ..
            } => {
                if hostname.is_empty() {
                    return Err(ConfigError::MissingField("hostname"));
                }
                if alarm_threshold_days > warning_threshold_days {
                    return Err(ConfigError::InvertedCertThresholds);
                }
            }
            MonitorKind::Log { path, remote, .. } => {
                if path.is_empty() {
                    return Err(ConfigError::MissingField("path"));
                }
                if let Some(target) = remote {
                    validate_ssh_target(target)?;
                }
            }
            MonitorKind::Cpu { remote } | MonitorKind::Mem { remote } => {
                if let Some(target) = remote {
                    validate_ssh_target(target)?;
                }
            }
            MonitorKind::Disk { path, remote } => {
                if path.is_empty() {
                    return Err(ConfigError::MissingField("path"));
                }
                if let Some(target) = remote {
                    validate_ssh_target(target)?;
                }
            }
            MonitorKind::Custom { command, remote } => {
                if command.is_empty() {
                    return Err(ConfigError::MissingField("command"));
                }
                if let Some(target) = remote {
                    validate_ssh_target(target)?;
                }
            }
        }

        Ok(())
    }
}

fn validate_ssh_target(target: &SshTarget) -> Result<(), ConfigError> {
    if target.host.is_empty() || target.username.is_empty() {
        return Err(ConfigError::MissingField("host/username"));
    }
    if target.password.is_none() && target.private_key.is_none() {
        return Err(ConfigError::MissingCredentials);
    }
    Ok(())
}

/// Monitor definition validation failures.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Name(#[from] NameError),

    #[error("period {0} minutes outside 1-1440")]
    PeriodOutOfRange(u32),

    #[error("timeout {0} seconds outside 5-300")]
    TimeoutOutOfRange(u32),

    #[error("hysteresis counters must be at least 1")]
    ZeroHysteresis,

    #[error("invalid expected status code {0}")]
    InvalidStatusCode(u16),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("SSH config requires a password or a private key")]
    MissingCredentials,

    #[error("certificate alarm threshold exceeds warning threshold")]
    InvertedCertThresholds,

    #[error("unknown monitor type: {0}")]
    UnknownType(String),
}
