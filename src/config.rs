//! Configuration management
//!
//! Settings come from an optional `config.toml`, then the process environment
//! (after `.env` has been loaded). Every key has a default, and a malformed
//! number is logged and replaced by its default rather than aborting startup.

use anyhow::Result;
use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

use crate::hub::HubConfig;

pub const DEFAULT_JWT_SECRET: &str = "change_this_secret_in_production";

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub hub: HubConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory with the built dashboard, served for unknown paths
    pub static_dir: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path of the sqlite alert store
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    /// Pub/sub channel the detection pipeline publishes alerts on
    pub channel: String,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl AuthConfig {
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default())
            .build()?;

        Ok(Self::from_settings(&settings))
    }

    fn from_settings(settings: &config::Config) -> Self {
        let defaults = HubConfig::default();

        Self {
            server: ServerConfig {
                host: string_or(settings, "tower_host", "0.0.0.0"),
                port: number_or(settings, "tower_port", 8080u16),
                static_dir: string_or(settings, "static_dir", "static"),
            },
            database: DatabaseConfig {
                url: string_or(settings, "blackbox_database_url", "blackbox.db"),
            },
            redis: RedisConfig {
                host: string_or(settings, "blackbox_redis_host", "localhost"),
                port: number_or(settings, "blackbox_redis_port", 6379u16),
                channel: string_or(settings, "blackbox_alert_channel", "sentry_alerts"),
            },
            hub: HubConfig {
                queue_capacity: positive_or(settings, "hub_queue_capacity", defaults.queue_capacity),
                command_capacity: positive_or(settings, "hub_command_capacity", defaults.command_capacity),
            },
            auth: AuthConfig {
                jwt_secret: string_or(settings, "jwt_secret", DEFAULT_JWT_SECRET),
            },
        }
    }
}

fn string_or(settings: &config::Config, key: &str, default: &str) -> String {
    settings
        .get_string(key)
        .unwrap_or_else(|_| default.to_string())
}

fn number_or<T>(settings: &config::Config, key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    let Ok(raw) = settings.get_string(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, default = %default, "Invalid numeric setting, using default");
            default
        }
    }
}

fn positive_or(settings: &config::Config, key: &str, default: usize) -> usize {
    match number_or(settings, key, default) {
        0 => {
            warn!(key, default, "Setting must be positive, using default");
            default
        }
        value => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> config::Config {
        let mut builder = config::Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_settings(&settings(&[]));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.redis.url(), "redis://localhost:6379/");
        assert_eq!(config.redis.channel, "sentry_alerts");
        assert_eq!(config.hub.queue_capacity, 64);
        assert!(config.auth.uses_default_secret());
    }

    #[test]
    fn overrides_are_read() {
        let config = Config::from_settings(&settings(&[
            ("tower_port", "9090"),
            ("blackbox_redis_host", "cache.internal"),
            ("hub_queue_capacity", "8"),
            ("jwt_secret", "s3cret"),
        ]));
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.redis.host, "cache.internal");
        assert_eq!(config.hub.queue_capacity, 8);
        assert!(!config.auth.uses_default_secret());
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = Config::from_settings(&settings(&[
            ("tower_port", "eighty"),
            ("blackbox_redis_port", "99999"),
            ("hub_command_capacity", "0"),
        ]));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.hub.command_capacity, 1024);
    }
}
