use chrono::Duration;

use camview_core::scan::{DEFAULT_MAX_WINDOW_DAYS, DEFAULT_VOLATILE_HOURS};
use camview_rpc::media_file_find::DEFAULT_PAGE_SIZE;

/// Scanner tuning loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Longest time span queried from a device in one listing.
    pub max_window: Duration,
    /// Trailing period the quick cursor never enters.
    pub volatile_window: Duration,
    /// `findNextFile` page size.
    pub page_size: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_window: Duration::days(DEFAULT_MAX_WINDOW_DAYS),
            volatile_window: Duration::hours(DEFAULT_VOLATILE_HOURS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ScanConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default |
    /// |------------------------|---------|
    /// | `SCAN_MAX_WINDOW_DAYS` | `30`    |
    /// | `SCAN_VOLATILE_HOURS`  | `8`     |
    /// | `SCAN_PAGE_SIZE`       | `64`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_window = env_i64("SCAN_MAX_WINDOW_DAYS")
            .filter(|d| *d > 0)
            .map(Duration::days)
            .unwrap_or(defaults.max_window);

        let volatile_window = env_i64("SCAN_VOLATILE_HOURS")
            .filter(|h| *h >= 0)
            .map(Duration::hours)
            .unwrap_or(defaults.volatile_window);

        let page_size = std::env::var("SCAN_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(defaults.page_size);

        Self {
            max_window,
            volatile_window,
            page_size,
        }
    }
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
