//! Environment-driven configuration structures shared by all binaries.

use std::{env, str::FromStr, time::Duration};

use alloy_primitives::Address;
use thiserror::Error;

use crate::model::BlockNumber;

/// Every task gets its own concurrent slot.
pub const NO_THREAD_LIMIT: usize = 0;
/// Worker budget used for historical backfill.
pub const SEQUENTIAL_THREAD_LIMIT: usize = 10;
pub const DEFAULT_LEVEL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_LEVELS: u32 = 30;
pub const DEFAULT_FAN_OUT_CAP: usize = 60;

/// Tuning knobs for one bisection discovery call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    thread_limit: usize,
    level_timeout: Duration,
    max_levels: u32,
    fan_out_cap: usize,
    cache_ttl: Option<Duration>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            thread_limit: SEQUENTIAL_THREAD_LIMIT,
            level_timeout: DEFAULT_LEVEL_TIMEOUT,
            max_levels: DEFAULT_MAX_LEVELS,
            fan_out_cap: DEFAULT_FAN_OUT_CAP,
            cache_ttl: None,
        }
    }
}

impl DiscoveryConfig {
    /// Reads `<PREFIX>_THREAD_LIMIT`, `<PREFIX>_LEVEL_TIMEOUT_SECS`,
    /// `<PREFIX>_MAX_LEVELS`, `<PREFIX>_FAN_OUT_CAP` and
    /// `<PREFIX>_CACHE_TTL_SECS`; unset entries keep their defaults.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        hydrate_env_file()?;
        let upper = prefix.trim().to_ascii_uppercase();
        let defaults = Self::default();

        let thread_limit =
            parse_optional_number(&format!("{upper}_THREAD_LIMIT"))?.unwrap_or(defaults.thread_limit);
        let level_timeout = parse_optional_number(&format!("{upper}_LEVEL_TIMEOUT_SECS"))?
            .map(Duration::from_secs)
            .unwrap_or(defaults.level_timeout);
        let max_levels =
            parse_optional_number(&format!("{upper}_MAX_LEVELS"))?.unwrap_or(defaults.max_levels);
        let fan_out_cap =
            parse_optional_number(&format!("{upper}_FAN_OUT_CAP"))?.unwrap_or(defaults.fan_out_cap);
        let cache_ttl =
            parse_optional_number(&format!("{upper}_CACHE_TTL_SECS"))?.map(Duration::from_secs);

        Ok(Self {
            thread_limit,
            level_timeout,
            max_levels,
            fan_out_cap,
            cache_ttl,
        })
    }

    pub fn with_thread_limit(mut self, thread_limit: usize) -> Self {
        self.thread_limit = thread_limit;
        self
    }

    pub fn with_level_timeout(mut self, level_timeout: Duration) -> Self {
        self.level_timeout = level_timeout;
        self
    }

    pub fn with_max_levels(mut self, max_levels: u32) -> Self {
        self.max_levels = max_levels;
        self
    }

    pub fn with_fan_out_cap(mut self, fan_out_cap: usize) -> Self {
        self.fan_out_cap = fan_out_cap;
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = Some(cache_ttl);
        self
    }

    pub fn thread_limit(&self) -> usize {
        self.thread_limit
    }

    pub fn level_timeout(&self) -> Duration {
        self.level_timeout
    }

    pub fn max_levels(&self) -> u32 {
        self.max_levels
    }

    pub fn fan_out_cap(&self) -> usize {
        self.fan_out_cap
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }
}

/// Configuration for the monitor binary: which endpoint to read and which
/// accounts and block window to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    rpc_url: String,
    accounts: Vec<Address>,
    from_block: BlockNumber,
    to_block: Option<BlockNumber>,
    no_limit: bool,
}

impl MonitorConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// process variables. Missing or malformed entries surface as
    /// `ConfigError` so binaries can respond gracefully.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let rpc_url = get_required_var("RPC_URL")?;
        let accounts = get_required_var("MONITOR_ACCOUNTS")?
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| {
                Address::from_str(value).map_err(|err| ConfigError::InvalidAddress {
                    key: "MONITOR_ACCOUNTS",
                    value: value.to_string(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if accounts.is_empty() {
            return Err(ConfigError::MissingVar {
                key: "MONITOR_ACCOUNTS",
            });
        }
        let from_block = parse_optional_number("MONITOR_FROM_BLOCK")?.unwrap_or(0);
        let to_block = parse_optional_number("MONITOR_TO_BLOCK")?;
        let no_limit = parse_optional_bool("MONITOR_NO_LIMIT")?.unwrap_or(false);

        Ok(Self {
            rpc_url,
            accounts,
            from_block,
            to_block,
            no_limit,
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn accounts(&self) -> &[Address] {
        &self.accounts
    }

    pub fn from_block(&self) -> BlockNumber {
        self.from_block
    }

    pub fn to_block(&self) -> Option<BlockNumber> {
        self.to_block
    }

    pub fn no_limit(&self) -> bool {
        self.no_limit
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or(ConfigError::MissingVar { key })
}

fn get_optional_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_optional_number<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    get_optional_var(key)
        .map(|value| {
            value.parse().map_err(|source| ConfigError::InvalidNumber {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
}

fn parse_optional_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    get_optional_var(key)
        .map(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value,
            }),
        })
        .transpose()
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("ETH_HISTORY_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid boolean in `{key}`: `{value}`")]
    InvalidBool { key: String, value: String },
    #[error("invalid address `{value}` in `{key}`: {reason}")]
    InvalidAddress {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
