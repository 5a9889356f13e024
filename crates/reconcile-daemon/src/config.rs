//! Configuration for reconciled

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Check scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Actuation configuration
    #[serde(default)]
    pub actuation: ActuationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Resource tick period in milliseconds
    #[serde(default = "default_check_interval")]
    pub resource_check_interval_ms: u64,

    /// Environment tick period in milliseconds
    #[serde(default = "default_check_interval")]
    pub environment_check_interval_ms: u64,

    /// Minimum time between two checks of the same item, in seconds
    #[serde(default = "default_min_age")]
    pub min_age_secs: u64,

    /// Resources checked per tick
    #[serde(default = "default_batch_size")]
    pub resource_batch_size: usize,

    /// Delivery configs checked per tick
    #[serde(default = "default_batch_size")]
    pub environment_batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resource_check_interval_ms: default_check_interval(),
            environment_check_interval_ms: default_check_interval(),
            min_age_secs: default_min_age(),
            resource_batch_size: default_batch_size(),
            environment_batch_size: default_batch_size(),
        }
    }
}

impl SchedulerConfig {
    pub fn resource_check_interval(&self) -> Duration {
        Duration::from_millis(self.resource_check_interval_ms)
    }

    pub fn environment_check_interval(&self) -> Duration {
        Duration::from_millis(self.environment_check_interval_ms)
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_secs(self.min_age_secs)
    }
}

/// Actuation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuationConfig {
    /// Skip resources whose delivery config has not been checked for this
    /// long. Zero disables the rule.
    #[serde(default = "default_promotion_check_stale_after")]
    pub promotion_check_stale_after_secs: u64,

    /// Actuations of the same diff before the unhappy veto kicks in
    #[serde(default = "default_unhappy_max_diff_count")]
    pub unhappy_max_diff_count: u32,

    /// How long an unhappy resource is left alone, in seconds
    #[serde(default = "default_unhappy_wait")]
    pub unhappy_wait_secs: u64,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            promotion_check_stale_after_secs: default_promotion_check_stale_after(),
            unhappy_max_diff_count: default_unhappy_max_diff_count(),
            unhappy_wait_secs: default_unhappy_wait(),
        }
    }
}

impl ActuationConfig {
    pub fn promotion_check_stale_after(&self) -> Option<Duration> {
        (self.promotion_check_stale_after_secs > 0)
            .then(|| Duration::from_secs(self.promotion_check_stale_after_secs))
    }

    pub fn unhappy_wait(&self) -> Duration {
        Duration::from_secs(self.unhappy_wait_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_check_interval() -> u64 {
    1000
}

fn default_min_age() -> u64 {
    60
}

fn default_batch_size() -> usize {
    1
}

fn default_promotion_check_stale_after() -> u64 {
    300
}

fn default_unhappy_max_diff_count() -> u32 {
    5
}

fn default_unhappy_wait() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `RECONCILE_`-prefixed environment variables (`__` between sections,
    /// e.g. `RECONCILE_SCHEDULER__MIN_AGE_SECS`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RECONCILE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.scheduler.resource_check_interval(), Duration::from_secs(1));
        assert_eq!(config.scheduler.min_age(), Duration::from_secs(60));
        assert_eq!(config.scheduler.resource_batch_size, 1);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_actuation_defaults() {
        let config = ActuationConfig::default();
        assert_eq!(config.promotion_check_stale_after(), Some(Duration::from_secs(300)));
        assert_eq!(config.unhappy_max_diff_count, 5);

        let disabled = ActuationConfig {
            promotion_check_stale_after_secs: 0,
            ..Default::default()
        };
        assert_eq!(disabled.promotion_check_stale_after(), None);
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let path = std::env::temp_dir().join(format!("reconciled-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[scheduler]\nresource_batch_size = 25\n\n[logging]\njson = true").unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.scheduler.resource_batch_size, 25);
        assert_eq!(config.scheduler.environment_batch_size, 1);
        assert!(config.logging.json);
        assert_eq!(config.actuation.unhappy_wait_secs, 600);
    }
}
