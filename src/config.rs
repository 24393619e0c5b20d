use std::env;
use std::net::SocketAddr;

use crate::errors::ApiError;
use crate::management::DEFAULT_RATE_LIMIT;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub bind_addr: SocketAddr,
    /// Environment tag embedded in issued keys, `live` or `test`.
    pub key_environment: String,
    pub default_rate_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "db/api_keys.db".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            key_environment: "test".to_string(),
            default_rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source; unset variables
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = path;
        }

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| ApiError::Config(format!("invalid BIND_ADDR '{}'", addr)))?;
        }

        if let Some(environment) = lookup("KEY_ENVIRONMENT") {
            match environment.as_str() {
                "live" | "test" => config.key_environment = environment,
                other => {
                    return Err(ApiError::Config(format!(
                        "KEY_ENVIRONMENT must be 'live' or 'test', got '{}'",
                        other
                    )))
                }
            }
        }

        if let Some(limit) = lookup("DEFAULT_RATE_LIMIT") {
            config.default_rate_limit = limit
                .parse::<u32>()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or_else(|| {
                    ApiError::Config(format!("invalid DEFAULT_RATE_LIMIT '{}'", limit))
                })?;
        }

        Ok(config)
    }
}
