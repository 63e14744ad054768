//! Session coordinator configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default bind address for the socket endpoint and HTTP routes.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:4000";

/// Default window for a new connection to present its credential.
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 15_000;

/// Default fixed delay between bootstrap attempts.
pub const DEFAULT_BOOTSTRAP_RETRY_MS: u64 = 10_000;

/// Default capacity of each connection's outbound mailbox.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default bcrypt cost for the privileged account password.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Default username for the privileged account.
pub const DEFAULT_ROOT_USERNAME: &str = "root";

/// Privileged account written on every successful bootstrap.
#[derive(Clone)]
pub struct RootUserConfig {
    pub username: String,
    pub email: String,
    /// Protected by `SecretString` to prevent accidental logging.
    pub password: SecretString,
    pub first_name: String,
    pub last_name: String,
}

impl fmt::Debug for RootUserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootUserConfig")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .finish()
    }
}

/// Session coordinator configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Shared secret for HS256 socket credentials.
    pub auth_secret: SecretString,

    /// Redis connection URL for the user/meeting store.
    /// Protected by `SecretString` since it may embed credentials.
    pub redis_url: SecretString,

    /// Socket and HTTP bind address (default: "0.0.0.0:4000").
    pub bind_address: String,

    /// Authentication window for new connections (default: 15s).
    pub auth_timeout: Duration,

    /// Delay between bootstrap attempts (default: 10s).
    pub bootstrap_retry_delay: Duration,

    /// Per-connection outbound mailbox capacity (default: 256).
    pub outbound_buffer: usize,

    /// Privileged account reconciled on bootstrap.
    pub root_user: RootUserConfig,

    /// bcrypt cost for hashing the privileged password (default: 10).
    pub bcrypt_cost: u32,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("auth_secret", &"[REDACTED]")
            .field("redis_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("auth_timeout", &self.auth_timeout)
            .field("bootstrap_retry_delay", &self.bootstrap_retry_delay)
            .field("outbound_buffer", &self.outbound_buffer)
            .field("root_user", &self.root_user)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}

/// A millisecond duration that must be non-zero.
fn positive_millis(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match parsed(vars, key, default)? {
        0 => Err(ConfigError::InvalidValue(format!("{key} must be at least 1"))),
        ms => Ok(Duration::from_millis(ms)),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let auth_secret = SecretString::from(required(vars, "AUTH_SECRET")?);
        let redis_url = SecretString::from(required(vars, "REDIS_URL")?);

        let bind_address = vars
            .get("SC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let auth_timeout = positive_millis(vars, "SC_AUTH_TIMEOUT_MS", DEFAULT_AUTH_TIMEOUT_MS)?;
        let bootstrap_retry_delay =
            positive_millis(vars, "SC_BOOTSTRAP_RETRY_MS", DEFAULT_BOOTSTRAP_RETRY_MS)?;

        let outbound_buffer = parsed(vars, "SC_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;
        if outbound_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_OUTBOUND_BUFFER must be at least 1".to_string(),
            ));
        }

        // bcrypt accepts costs 4..=31
        let bcrypt_cost = parsed(vars, "ROOT_USER_BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue(format!(
                "ROOT_USER_BCRYPT_COST={bcrypt_cost} is outside 4..=31"
            )));
        }

        let root_user = RootUserConfig {
            username: vars
                .get("ROOT_USER_USERNAME")
                .cloned()
                .unwrap_or_else(|| DEFAULT_ROOT_USERNAME.to_string()),
            email: required(vars, "ROOT_USER_EMAIL")?,
            password: SecretString::from(required(vars, "ROOT_USER_PASSWORD")?),
            first_name: vars.get("ROOT_USER_FIRST_NAME").cloned().unwrap_or_default(),
            last_name: vars.get("ROOT_USER_LAST_NAME").cloned().unwrap_or_default(),
        };

        Ok(Config {
            auth_secret,
            redis_url,
            bind_address,
            auth_timeout,
            bootstrap_retry_delay,
            outbound_buffer,
            root_user,
            bcrypt_cost,
        })
    }
}
