pub mod alert;
pub mod clock;
pub mod error;
pub mod model;
pub mod repo;
pub mod sample;
pub mod state;

pub use alert::{
    Alert, AlertEvent, AlertStatus, NotificationEntry, NotificationStatus, RecoveryAttempt,
    RecoveryStatus, REMINDER_MIN_GAP_SECS,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CoreError;
pub use model::{
    AlertSeverity, Channel, ChannelPrefs, ConfigError, Contact, MaintenanceWindow, Monitor,
    MonitorKind, MonitorName, NameError, NotificationSettings, Severity, SshTarget, Thresholds,
};
pub use repo::{AlertFilter, DynamoRepository, MemoryRepository, Repository};
pub use sample::{CertificateInfo, Sample, SampleMetadata, Status};
pub use state::MonitorState;
