//! Configuration loading.
//!
//! Layered: YAML file, then `FLEETCTL_`-prefixed environment variables with
//! `__` separating nesting levels, then the conventional `DATABASE_URL`
//! override on top.

use clap::Parser;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "fleetctl", about = "Operator console for a fleet of managed Kubernetes clusters")]
pub struct Args {
    /// Path to the configuration file
    #[arg(short = 'f', long, env = "FLEETCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate the configuration and exit
    #[arg(long)]
    pub validate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: DatabaseSettings,
    pub provider: ProviderSettings,
    pub sync: SyncSettings,
    /// Deadline for one dispatched command.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Per-request deadline against the provider API.
    #[serde(with = "humantime_serde")]
    pub provider_timeout: Duration,
    /// Whether the console accepts commands at boot; flippable at runtime
    /// with `setting set enable`.
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            provider: ProviderSettings::default(),
            sync: SyncSettings::default(),
            command_timeout: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(30),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool: PoolSettings,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/fleetctl".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderSettings {
    pub api_url: Url,
    pub region: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.nimbus.example.com"
                .parse()
                .expect("default provider url is valid"),
            region: "hn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Rows per multi-row upsert statement.
    pub batch_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: crate::db::handlers::DEFAULT_BATCH_SIZE,
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("FLEETCTL_").split("__"));
        let mut config: Config = figment.extract()?;
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.command_timeout, Duration::from_secs(60));
        assert!(config.enabled);
    }

    #[test]
    fn yaml_overrides_defaults() {
        let config: Config = Figment::new()
            .merge(Yaml::string(
                r#"
command_timeout: 2m
sync:
  batch_size: 25
provider:
  region: eu-1
"#,
            ))
            .extract()
            .unwrap();
        assert_eq!(config.command_timeout, Duration::from_secs(120));
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(config.provider.region, "eu-1");
        // Untouched sections keep their defaults.
        assert_eq!(config.database.pool.max_connections, 10);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = Figment::new()
            .merge(Yaml::string("databse:\n  url: oops"))
            .extract::<Config>();
        assert!(result.is_err());
    }
}
