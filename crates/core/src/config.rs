use std::time::Duration;

use serde::Deserialize;

/// Root configuration. Loaded from an optional `campaign-tags.toml` file and
/// environment variables with the prefix `CAMPAIGN_TAGS__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Window for integrations that settle on the script's own load event.
    /// Unset means no implicit timeout.
    #[serde(default)]
    pub script_timeout_ms: Option<u64>,
    /// Window for integrations that settle on a vendor-provided callback.
    /// These never get an unbounded wait.
    #[serde(default = "default_vendor_callback_timeout_ms")]
    pub vendor_callback_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of calls a single drain pass accepts from re-entrant
    /// dispatch before giving up.
    #[serde(default = "default_max_redrain")]
    pub max_redrain: usize,
}

fn default_vendor_callback_timeout_ms() -> u64 {
    10_000
}
fn default_max_redrain() -> usize {
    1_000
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            script_timeout_ms: None,
            vendor_callback_timeout_ms: default_vendor_callback_timeout_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_redrain: default_max_redrain(),
        }
    }
}

impl LoaderConfig {
    pub fn script_timeout(&self) -> Option<Duration> {
        self.script_timeout_ms.map(Duration::from_millis)
    }

    pub fn vendor_callback_timeout(&self) -> Duration {
        Duration::from_millis(self.vendor_callback_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from `campaign-tags.toml` (if present) and the
    /// environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("campaign-tags")
    }

    /// Load configuration using `file` as the base name of an optional
    /// config file.
    pub fn load_from(file: &str) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("CAMPAIGN_TAGS")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.loader.script_timeout(), None);
        assert_eq!(
            config.loader.vendor_callback_timeout(),
            Duration::from_secs(10)
        );
        assert_eq!(config.queue.max_redrain, 1_000);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: AppConfig =
            serde_json::from_value(serde_json::json!({ "loader": { "script_timeout_ms": 2500 } }))
                .unwrap();
        assert_eq!(
            config.loader.script_timeout(),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(config.loader.vendor_callback_timeout_ms, 10_000);
        assert_eq!(config.queue.max_redrain, 1_000);
    }

    #[test]
    fn test_load_without_sources_uses_defaults() {
        let config = AppConfig::load_from("does-not-exist-campaign-tags").unwrap();
        assert_eq!(config.queue.max_redrain, 1_000);
    }
}
