use std::env;
use std::time::Duration;

/// SMTP delivery settings for the email channel.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// Engine configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scheduler tick interval. Clamped to 10-60 seconds.
    pub tick_interval: Duration,
    /// Worker pool size for concurrent evaluations.
    pub concurrency: usize,
    /// How long in-flight evaluations may finish after a stop request.
    pub shutdown_grace: Duration,
    /// Hard timeout for a recovery command.
    pub recovery_timeout: Duration,
    /// Recovery attempts allowed per alert.
    pub max_recovery_attempts: u32,
    pub smtp: Option<SmtpConfig>,
    pub sms_gateway_url: Option<String>,
}

pub const MIN_TICK: Duration = Duration::from_secs(10);
pub const MAX_TICK: Duration = Duration::from_secs(60);

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            concurrency: 16,
            shutdown_grace: Duration::from_secs(30),
            recovery_timeout: Duration::from_secs(60),
            max_recovery_attempts: 3,
            smtp: None,
            sms_gateway_url: None,
        }
    }
}

/// Parse a duration from either humantime shorthand ("30s", "2m") or raw
/// seconds ("30").
pub fn parse_duration(s: &str) -> Option<Duration> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Some(d);
    }
    s.parse::<u64>().ok().map(Duration::from_secs)
}

fn clamp_tick(d: Duration) -> Duration {
    d.clamp(MIN_TICK, MAX_TICK)
}

fn env_duration(var: &str, default: Duration) -> Duration {
    env::var(var)
        .ok()
        .and_then(|s| parse_duration(&s))
        .unwrap_or(default)
}

impl EngineConfig {
    /// Build configuration from `VIGIL_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tick_interval = clamp_tick(env_duration("VIGIL_TICK_INTERVAL", defaults.tick_interval));

        let concurrency = env::var("VIGIL_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n >= 1)
            .unwrap_or(defaults.concurrency);

        let shutdown_grace =
            env_duration("VIGIL_SHUTDOWN_GRACE_SECS", defaults.shutdown_grace);
        let recovery_timeout =
            env_duration("VIGIL_RECOVERY_TIMEOUT_SECS", defaults.recovery_timeout);

        let max_recovery_attempts = env::var("VIGIL_MAX_RECOVERY_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &u32| *n >= 1)
            .unwrap_or(defaults.max_recovery_attempts);

        let smtp = env::var("VIGIL_SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: env::var("VIGIL_SMTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(587),
            username: env::var("VIGIL_SMTP_USER").ok(),
            password: env::var("VIGIL_SMTP_PASSWORD").ok(),
            from: env::var("VIGIL_SMTP_FROM").unwrap_or_else(|_| "vigil@localhost".to_string()),
        });

        let sms_gateway_url = env::var("VIGIL_SMS_GATEWAY_URL").ok();

        Self {
            tick_interval,
            concurrency,
            shutdown_grace,
            recovery_timeout,
            max_recovery_attempts,
            smtp,
            sms_gateway_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_humantime_forms() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("bogus"), None);
    }

    #[test]
    fn tick_is_clamped() {
        assert_eq!(clamp_tick(Duration::from_secs(5)), MIN_TICK);
        assert_eq!(clamp_tick(Duration::from_secs(30)), Duration::from_secs(30));
        assert_eq!(clamp_tick(Duration::from_secs(600)), MAX_TICK);
    }

    #[test]
    fn defaults_match_contract() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.tick_interval, Duration::from_secs(30));
        assert_eq!(cfg.concurrency, 16);
        assert_eq!(cfg.max_recovery_attempts, 3);
        assert_eq!(cfg.recovery_timeout, Duration::from_secs(60));
    }
}
