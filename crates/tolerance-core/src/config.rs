use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DATA_DIR_NAME, REMOTE_TIMEOUT_MS};
use crate::models::ReminderTime;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    /// Budget for each individual remote call made by the saga or the reconciler
    pub remote_timeout: Duration,
    /// Time assigned to a reminder that is switched on without one
    pub default_reminder_time: ReminderTime,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            remote_timeout: Duration::from_millis(REMOTE_TIMEOUT_MS),
            default_reminder_time: ReminderTime::DEFAULT,
        }
    }

    /// Build a config from `TOLERANCE_*` environment variables.
    ///
    /// Unparseable values fall back to the defaults rather than failing startup.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("TOLERANCE_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let remote_timeout = std::env::var("TOLERANCE_REMOTE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(REMOTE_TIMEOUT_MS));

        let default_reminder_time = std::env::var("TOLERANCE_DEFAULT_REMINDER")
            .ok()
            .and_then(|v| v.parse::<ReminderTime>().ok())
            .unwrap_or(ReminderTime::DEFAULT);

        Self {
            data_dir,
            remote_timeout,
            default_reminder_time,
        }
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("tolerance.log")
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new(default_data_dir())
    }
}

fn default_data_dir() -> PathBuf {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(DATA_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let config = CoreConfig::new("/tmp/tolerance-test");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tolerance-test"));
        assert_eq!(config.remote_timeout, Duration::from_millis(REMOTE_TIMEOUT_MS));
        assert_eq!(config.default_reminder_time, ReminderTime::DEFAULT);
        assert_eq!(
            config.settings_path(),
            PathBuf::from("/tmp/tolerance-test/settings.json")
        );
    }

    #[test]
    fn test_with_remote_timeout() {
        let config = CoreConfig::new("data").with_remote_timeout(Duration::from_millis(250));
        assert_eq!(config.remote_timeout, Duration::from_millis(250));
    }
}
