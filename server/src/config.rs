//! Server settings, read from the environment.

use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// PostgreSQL connection URL; records are kept in memory when absent
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Largest page a pull may request
    pub max_pull_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            max_connections: 10,
            max_pull_limit: 1000,
        }
    }
}

impl Config {
    /// Read `HOST`, `PORT`, `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` and
    /// `MAX_PULL_LIMIT`, keeping the default for any that is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let positive = |name: &'static str, default: usize| -> Result<usize, ConfigError> {
            match parse(&lookup, name, default)? {
                0 => Err(ConfigError::Invalid(name)),
                value => Ok(value),
            }
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            max_connections: positive(
                "DATABASE_MAX_CONNECTIONS",
                defaults.max_connections as usize,
            )? as u32,
            max_pull_limit: positive("MAX_PULL_LIMIT", defaults.max_pull_limit)?,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    Invalid(&'static str),
}
