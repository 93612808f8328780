//! Configuration management for Gatekeeper.
//!
//! Sources are layered in order: built-in defaults, an optional YAML file,
//! then `GATEKEEPER_*` environment variables with `__` separating nested
//! keys (e.g. `GATEKEEPER_SWEEPER__INTERVAL_SECS=60`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{PolicySet, DEFAULT_SWEEP_INTERVAL};

const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for Gatekeeper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Expiry sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Per-action rate limit policies
    #[serde(default)]
    pub policies: PolicySet,
}

/// Expiry sweeper configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Whether to run the background sweeper at all
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweep_interval(),
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

impl GatekeeperConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), but reads `GATEKEEPER_*` variables from
    /// `env` instead of the process environment when it is given.
    fn load_with_env(
        path: Option<&Path>,
        env: Option<::config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&GatekeeperConfig::default())?);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: GatekeeperConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;

        info!(
            sweeper_enabled = config.sweeper.enabled,
            sweep_interval_secs = config.sweeper.interval_secs,
            actions = config.policies.actions.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse configuration from YAML, filling unset fields with defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = ::config::Config::builder()
            .add_source(::config::Config::try_from(&GatekeeperConfig::default())?)
            .add_source(::config::File::from_str(yaml, ::config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sweeper.enabled && self.sweeper.interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "sweeper.interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ActionPolicy;

    #[test]
    fn test_defaults() {
        let config = GatekeeperConfig::default();
        assert!(config.sweeper.enabled);
        assert_eq!(config.sweeper.interval(), Duration::from_secs(600));
        assert_eq!(config.policies, PolicySet::default());
    }

    #[test]
    fn test_yaml_overrides_are_layered_over_defaults() {
        let yaml = r#"
sweeper:
  interval_secs: 30
policies:
  actions:
    login:
      max_requests: 10
      window_ms: 60000
    download:
      max_requests: 50
      window_ms: 3600000
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();

        assert!(config.sweeper.enabled);
        assert_eq!(config.sweeper.interval_secs, 30);
        assert_eq!(
            config.policies.get("login"),
            Some(&ActionPolicy::new(10, 60_000))
        );
        assert_eq!(
            config.policies.get("download"),
            Some(&ActionPolicy::new(50, 3_600_000))
        );
        assert_eq!(
            config.policies.get("signup"),
            Some(&ActionPolicy::new(3, 3_600_000))
        );
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = GatekeeperConfig::from_yaml("").unwrap();
        assert_eq!(config, GatekeeperConfig::default());
    }

    fn temp_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "gatekeeper-{}-{}.yaml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_file() {
        let path = temp_config("load-file", "sweeper:\n  enabled: false\n");

        let config = GatekeeperConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(!config.sweeper.enabled);
        assert_eq!(config.sweeper.interval_secs, 600);
    }

    #[test]
    fn test_env_overrides_file_and_defaults() {
        let path = temp_config(
            "env-layer",
            "sweeper:\n  interval_secs: 30\npolicies:\n  actions:\n    login:\n      max_requests: 7\n      window_ms: 60000\n",
        );
        let env = ::config::Map::from([
            (
                "GATEKEEPER_SWEEPER__INTERVAL_SECS".to_string(),
                "60".to_string(),
            ),
            (
                "GATEKEEPER_POLICIES__ACTIONS__LOGIN__MAX_REQUESTS".to_string(),
                "10".to_string(),
            ),
            ("OTHER_SWEEPER__ENABLED".to_string(), "false".to_string()),
        ]);

        let config = GatekeeperConfig::load_with_env(Some(&path), Some(env)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(config.sweeper.enabled);
        assert_eq!(config.sweeper.interval_secs, 60);
        // max_requests from the environment, window_ms from the file
        assert_eq!(
            config.policies.get("login"),
            Some(&ActionPolicy::new(10, 60_000))
        );
        assert_eq!(
            config.policies.get("signup"),
            Some(&ActionPolicy::new(3, 3_600_000))
        );
    }

    #[test]
    fn test_env_without_file_overrides_defaults() {
        let env = ::config::Map::from([(
            "GATEKEEPER_SWEEPER__ENABLED".to_string(),
            "false".to_string(),
        )]);

        let config = GatekeeperConfig::load_with_env(None, Some(env)).unwrap();
        assert!(!config.sweeper.enabled);
        assert_eq!(config.policies, PolicySet::default());
    }

    #[test]
    fn test_env_zero_interval_rejected() {
        let env = ::config::Map::from([(
            "GATEKEEPER_SWEEPER__INTERVAL_SECS".to_string(),
            "0".to_string(),
        )]);

        let result = GatekeeperConfig::load_with_env(None, Some(env));
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let result = GatekeeperConfig::from_yaml("sweeper:\n  interval_secs: 0\n");
        assert!(matches!(result, Err(GatekeeperError::Config(_))));

        let config =
            GatekeeperConfig::from_yaml("sweeper:\n  enabled: false\n  interval_secs: 0\n").unwrap();
        assert!(!config.sweeper.enabled);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = GatekeeperConfig::load(Some(Path::new("/nonexistent/gatekeeper.yaml")));
        assert!(result.is_err());
    }
}
