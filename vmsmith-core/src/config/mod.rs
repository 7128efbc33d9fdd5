//! Driver configuration
//!
//! Defaults, an optional TOML file, then environment overrides, then
//! validation. Durations are written in humantime form (`"1s"`, `"500ms"`).

use crate::error::{VmsmithError, VmsmithResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod defaults;

pub use defaults::*;

/// Root configuration for a driver instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Explicit path to VBoxManage; discovered from the environment when unset
    pub vboxmanage_path: Option<PathBuf>,

    /// Retry policy wrapped around `unregistervm`
    pub delete_retry: RetryPolicyConfig,

    /// Delay after power-off before the next operation may touch the VM
    #[serde(with = "humantime_serde")]
    pub stop_grace_period: Duration,

    /// tracing env-filter directive used by the binary
    pub log_filter: String,
}

/// Serializable retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// Maximum attempts, including the first
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Growth factor applied to the delay after each failed attempt
    pub multiplier: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            vboxmanage_path: None,
            delete_retry: RetryPolicyConfig::default(),
            stop_grace_period: Duration::from_secs(DEFAULT_STOP_GRACE_PERIOD_SECS),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_DELETE_RETRY_ATTEMPTS,
            initial_delay: Duration::from_secs(DEFAULT_DELETE_RETRY_INITIAL_DELAY_SECS),
            max_delay: Duration::from_secs(DEFAULT_DELETE_RETRY_MAX_DELAY_SECS),
            multiplier: DEFAULT_DELETE_RETRY_MULTIPLIER,
        }
    }
}

impl RetryPolicyConfig {
    pub fn validate(&self) -> VmsmithResult<()> {
        if self.max_attempts == 0 {
            return Err(VmsmithError::configuration(
                "delete_retry.max_attempts",
                "must be at least 1",
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(VmsmithError::configuration(
                "delete_retry.initial_delay",
                format!(
                    "{:?} exceeds max_delay {:?}",
                    self.initial_delay, self.max_delay
                ),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(VmsmithError::configuration(
                "delete_retry.multiplier",
                format!("{} must be a finite value >= 1.0", self.multiplier),
            ));
        }
        Ok(())
    }
}

impl DriverConfig {
    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> VmsmithResult<Self> {
        toml::from_str(contents)
            .map_err(|e| VmsmithError::configuration("config file", e.to_string()))
    }

    /// Read a TOML file
    pub fn from_file(path: &Path) -> VmsmithResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VmsmithError::configuration(
                "config file",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_toml_str(&contents)
    }

    /// File (when given), then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> VmsmithResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from an environment lookup
    pub fn apply_env<F>(mut self, lookup: F) -> VmsmithResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_VBOXMANAGE_PATH) {
            self.vboxmanage_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup(ENV_DELETE_RETRY_ATTEMPTS) {
            self.delete_retry.max_attempts = val.parse().map_err(|_| {
                VmsmithError::configuration(
                    ENV_DELETE_RETRY_ATTEMPTS,
                    format!("invalid attempt count '{}'", val),
                )
            })?;
        }

        if let Some(val) = lookup(ENV_DELETE_RETRY_DELAY_SECS) {
            let secs = parse_secs(ENV_DELETE_RETRY_DELAY_SECS, &val)?;
            self.delete_retry.initial_delay = secs;
            self.delete_retry.max_delay = secs;
        }

        if let Some(val) = lookup(ENV_STOP_GRACE_PERIOD_SECS) {
            self.stop_grace_period = parse_secs(ENV_STOP_GRACE_PERIOD_SECS, &val)?;
        }

        if let Some(filter) = lookup(ENV_LOG_FILTER) {
            self.log_filter = filter;
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> VmsmithResult<()> {
        if let Some(path) = &self.vboxmanage_path {
            if path.as_os_str().is_empty() {
                return Err(VmsmithError::configuration(
                    "vboxmanage_path",
                    "must not be empty when set",
                ));
            }
        }
        self.delete_retry.validate()?;
        Ok(())
    }

    /// Configuration for tests: no grace period, fast retries
    pub fn test() -> Self {
        Self {
            delete_retry: RetryPolicyConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                multiplier: 1.0,
            },
            stop_grace_period: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn parse_secs(key: &str, val: &str) -> VmsmithResult<Duration> {
    val.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| VmsmithError::configuration(key, format!("invalid seconds value '{}'", val)))
}

/// Builder for DriverConfig
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DriverConfig::default(),
        }
    }

    pub fn vboxmanage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.vboxmanage_path = Some(path.into());
        self
    }

    pub fn delete_retry(mut self, policy: RetryPolicyConfig) -> Self {
        self.config.delete_retry = policy;
        self
    }

    pub fn stop_grace_period(mut self, period: Duration) -> Self {
        self.config.stop_grace_period = period;
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    pub fn build(self) -> VmsmithResult<DriverConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for DriverConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_validation() {
        let config = DriverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.delete_retry.max_attempts, 5);
        assert_eq!(config.delete_retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.delete_retry.max_delay, Duration::from_secs(1));
        assert_eq!(config.stop_grace_period, Duration::from_secs(2));
    }

    #[test]
    fn test_config_builder() {
        let config = DriverConfigBuilder::new()
            .vboxmanage_path("/usr/bin/VBoxManage")
            .stop_grace_period(Duration::from_millis(500))
            .build()
            .unwrap();

        assert_eq!(
            config.vboxmanage_path,
            Some(PathBuf::from("/usr/bin/VBoxManage"))
        );
        assert_eq!(config.stop_grace_period, Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_retry_policy() {
        let result = DriverConfigBuilder::new()
            .delete_retry(RetryPolicyConfig {
                max_attempts: 0,
                ..RetryPolicyConfig::default()
            })
            .build();
        assert!(matches!(
            result,
            Err(VmsmithError::ConfigurationError { .. })
        ));

        let inverted = RetryPolicyConfig {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
            ..RetryPolicyConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_toml_with_humantime_durations() {
        let config = DriverConfig::from_toml_str(
            r#"
vboxmanage_path = "/opt/VirtualBox/VBoxManage"
stop_grace_period = "3s"

[delete_retry]
max_attempts = 8
initial_delay = "250ms"
max_delay = "2s"
multiplier = 2.0
"#,
        )
        .unwrap();

        assert_eq!(
            config.vboxmanage_path,
            Some(PathBuf::from("/opt/VirtualBox/VBoxManage"))
        );
        assert_eq!(config.stop_grace_period, Duration::from_secs(3));
        assert_eq!(config.delete_retry.max_attempts, 8);
        assert_eq!(config.delete_retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stop_grace_period = \"1s\"").unwrap();

        let config = DriverConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.stop_grace_period, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = DriverConfig::from_file(Path::new("/nonexistent/vmsmith.toml")).unwrap_err();
        assert!(matches!(err, VmsmithError::ConfigurationError { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_VBOXMANAGE_PATH, "/custom/VBoxManage"),
            (ENV_DELETE_RETRY_ATTEMPTS, "3"),
            (ENV_DELETE_RETRY_DELAY_SECS, "4"),
            (ENV_STOP_GRACE_PERIOD_SECS, "0"),
            (ENV_LOG_FILTER, "vmsmith=debug"),
        ]);

        let config = DriverConfig::default()
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            config.vboxmanage_path,
            Some(PathBuf::from("/custom/VBoxManage"))
        );
        assert_eq!(config.delete_retry.max_attempts, 3);
        assert_eq!(config.delete_retry.initial_delay, Duration::from_secs(4));
        assert_eq!(config.delete_retry.max_delay, Duration::from_secs(4));
        assert_eq!(config.stop_grace_period, Duration::ZERO);
        assert_eq!(config.log_filter, "vmsmith=debug");
    }

    #[test]
    fn test_invalid_env_value() {
        let result = DriverConfig::default().apply_env(|key| {
            (key == ENV_DELETE_RETRY_ATTEMPTS).then(|| "many".to_string())
        });
        assert!(result.is_err());
    }
}
