use std::env;
use std::time::Duration;

/// Target probed by the binary.
pub const TARGET_URL: &str = "https://yandex.ru";

/// Per-phase timeout applied when `PINGOMETER_TIMEOUT_MS` is not set.
pub const DEFAULT_TIMEOUT_MS: u64 = 30000;

#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_timeout_var(env::var("PINGOMETER_TIMEOUT_MS").ok())
    }

    fn from_timeout_var(raw: Option<String>) -> Self {
        let timeout_ms = raw
            .and_then(|ms| ms.trim().parse().ok())
            .filter(|ms: &u64| *ms > 0)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Self {
            target_url: TARGET_URL.to_string(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_timeout_var(None)
    }
}
