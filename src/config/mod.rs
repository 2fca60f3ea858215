//! Router configuration.
//!
//! Configuration is loaded with precedence: programmatic overrides > Env
//! vars > config file > defaults.
//!
//! # Example config file (docgrid.toml)
//! ```toml
//! stale_retry_attempts = 5
//! geo_near_default_limit = 100
//! ```

mod defaults;

pub use defaults::*;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Runtime knobs for the command router. Protocol-fixed values (stale
/// routing codes, the map-reduce temp prefix) are constants in
/// [`defaults`], not configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Attempt cap for the staleness retry loop.
    pub stale_retry_attempts: u32,
    /// `geoNear` result cap when the client omits `num`.
    pub geo_near_default_limit: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            stale_retry_attempts: DEFAULT_STALE_RETRY_ATTEMPTS,
            geo_near_default_limit: DEFAULT_GEO_NEAR_LIMIT,
        }
    }
}

/// Optional overrides applied on top of env and file layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_retry_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_near_default_limit: Option<usize>,
}

impl RouterConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(RouterConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("DOCGRID_"));
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let config = RouterConfig::load(None, ConfigOverrides::default()).unwrap();
        assert_eq!(config.stale_retry_attempts, DEFAULT_STALE_RETRY_ATTEMPTS);
        assert_eq!(config.geo_near_default_limit, DEFAULT_GEO_NEAR_LIMIT);
    }

    #[test]
    fn overrides_win_over_defaults() {
        let overrides = ConfigOverrides {
            stale_retry_attempts: Some(3),
            geo_near_default_limit: None,
        };
        let config = RouterConfig::load(None, overrides).unwrap();
        assert_eq!(config.stale_retry_attempts, 3);
        assert_eq!(config.geo_near_default_limit, DEFAULT_GEO_NEAR_LIMIT);
    }
}
