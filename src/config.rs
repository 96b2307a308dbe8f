// Job settings, read from JSON (usually carried in an environment variable)

use crate::monitor::MonitorConfig;
use crate::util::moved_name;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CHUNK_COUNT: usize = 5;
pub const DEFAULT_MOVE_PREFIX: &str = "new-";
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lease_duration_secs: u64,
    pub safety_margin_secs: u64,
    pub poll_interval_ms: u64,
    /// Number of chunks a job splits its source into
    pub chunk_count: usize,
    /// Prefix a chunk gets when it is moved to its final name
    pub move_prefix: String,
    pub job_timeout_secs: u64,
    /// Write error reports into the store next to the data
    pub report_errors: bool,
    pub diagnostics_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        let monitor = MonitorConfig::default();
        Self {
            lease_duration_secs: monitor.lease_duration.as_secs(),
            safety_margin_secs: monitor.safety_margin.as_secs(),
            poll_interval_ms: monitor.poll_interval.as_millis() as u64,
            chunk_count: DEFAULT_CHUNK_COUNT,
            move_prefix: DEFAULT_MOVE_PREFIX.to_string(),
            job_timeout_secs: DEFAULT_JOB_TIMEOUT.as_secs(),
            report_errors: true,
            diagnostics_prefix: String::new(),
        }
    }
}

impl Settings {
    /// Parses and validates settings. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads settings from the JSON document held in environment variable `key`.
    pub fn from_env(key: &str) -> Result<Self> {
        let json = std::env::var(key)
            .map_err(|e| Error::Config(format!("environment variable {key}: {e}")))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.monitor_config()?;
        if self.chunk_count == 0 {
            return Err(Error::Config("chunk_count must be at least 1".to_string()));
        }
        if self.job_timeout_secs == 0 {
            return Err(Error::Config("job_timeout_secs must be positive".to_string()));
        }
        moved_name(&self.move_prefix, "chunk")?;
        Ok(())
    }

    pub fn monitor_config(&self) -> Result<MonitorConfig> {
        MonitorConfig::new(
            Duration::from_secs(self.lease_duration_secs),
            Duration::from_secs(self.safety_margin_secs),
            Duration::from_millis(self.poll_interval_ms),
        )
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.monitor_config().unwrap(), MonitorConfig::default());
        assert_eq!(settings.job_timeout(), Duration::from_secs(7200));
        assert_eq!(settings.chunk_count, 5);
        assert_eq!(settings.move_prefix, "new-");
    }

    #[test]
    fn test_partial_override() {
        let settings =
            Settings::from_json(r#"{"lease_duration_secs": 30, "chunk_count": 2}"#).unwrap();
        assert_eq!(settings.lease_duration_secs, 30);
        assert_eq!(settings.safety_margin_secs, 5);
        assert_eq!(settings.chunk_count, 2);
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(
            Settings::from_json(r#"{"safety_margin_secs": 60}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Settings::from_json(r#"{"chunk_count": 0}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Settings::from_json(r#"{"move_prefix": "out/"}"#),
            Err(Error::InvalidKey { .. })
        ));
        assert!(matches!(
            Settings::from_json("not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_from_env() {
        std::env::set_var(
            "BLOBMOVER_TEST_SETTINGS",
            r#"{"poll_interval_ms": 250, "report_errors": false}"#,
        );
        let settings = Settings::from_env("BLOBMOVER_TEST_SETTINGS").unwrap();
        assert_eq!(settings.poll_interval_ms, 250);
        assert!(!settings.report_errors);

        assert!(matches!(
            Settings::from_env("BLOBMOVER_TEST_SETTINGS_MISSING"),
            Err(Error::Config(_))
        ));
    }
}
