use std::time::Duration;

use camview_rpc::ClientConfig;
use camview_scanner::ScanConfig;

const DEFAULT_QUICK_INTERVAL_SECS: u64 = 300;
const DEFAULT_FULL_INTERVAL_SECS: u64 = 3600;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} must be a positive integer, got '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub rpc: ClientConfig,
    pub scan: ScanConfig,
    /// Period between quick scans of each device.
    pub quick_interval: Duration,
    /// Period between full scan passes of each device.
    pub full_interval: Duration,
    /// Period between re-reads of the enabled device list.
    pub sync_interval: Duration,
    /// Bound on stopping tasks and closing sessions at shutdown.
    pub shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                    | Default |
    /// |----------------------------|---------|
    /// | `DATABASE_URL`             | --      |
    /// | `SCAN_QUICK_INTERVAL_SECS` | `300`   |
    /// | `SCAN_FULL_INTERVAL_SECS`  | `3600`  |
    /// | `DEVICE_SYNC_INTERVAL_SECS`| `60`    |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `5`     |
    ///
    /// RPC and scanner settings are read by [`ClientConfig::from_env`] and
    /// [`ScanConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            rpc: ClientConfig::from_env(),
            scan: ScanConfig::from_env(),
            quick_interval: secs_var("SCAN_QUICK_INTERVAL_SECS", DEFAULT_QUICK_INTERVAL_SECS)?,
            full_interval: secs_var("SCAN_FULL_INTERVAL_SECS", DEFAULT_FULL_INTERVAL_SECS)?,
            sync_interval: secs_var("DEVICE_SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?,
            shutdown_timeout: secs_var("SHUTDOWN_TIMEOUT_SECS", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?,
        })
    }
}

fn secs_var(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(Duration::from_secs(default)),
        Ok(value) => parse_secs(name, &value),
    }
}

fn parse_secs(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn positive_seconds_parse() {
        assert_eq!(parse_secs("X", " 42 ").unwrap(), Duration::from_secs(42));
    }

    #[test]
    fn zero_or_garbage_is_rejected() {
        assert_matches!(parse_secs("X", "0"), Err(ConfigError::Invalid { name: "X", .. }));
        assert_matches!(parse_secs("X", "soon"), Err(ConfigError::Invalid { .. }));
    }
}
