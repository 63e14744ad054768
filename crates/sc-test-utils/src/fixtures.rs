//! Configuration fixtures.

use common::secret::SecretString;
use session_coordinator::config::{Config, RootUserConfig};
use std::collections::HashMap;

/// Shared secret used by the harness and token builders.
pub const TEST_AUTH_SECRET: &str = "sc-test-shared-secret";

/// Lowest bcrypt cost, to keep reconciliation fast in tests.
pub const TEST_BCRYPT_COST: u32 = 4;

/// Privileged account matching [`test_config_vars`].
pub fn test_root_user() -> RootUserConfig {
    RootUserConfig {
        username: "root".to_string(),
        email: "root@example.com".to_string(),
        password: SecretString::from("root-password"),
        first_name: "Root".to_string(),
        last_name: "User".to_string(),
    }
}

/// Minimal environment accepted by `Config::from_vars`.
pub fn test_config_vars() -> HashMap<String, String> {
    HashMap::from([
        ("AUTH_SECRET".to_string(), TEST_AUTH_SECRET.to_string()),
        ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
        ("SC_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("ROOT_USER_EMAIL".to_string(), "root@example.com".to_string()),
        ("ROOT_USER_PASSWORD".to_string(), "root-password".to_string()),
        ("ROOT_USER_FIRST_NAME".to_string(), "Root".to_string()),
        ("ROOT_USER_LAST_NAME".to_string(), "User".to_string()),
        (
            "ROOT_USER_BCRYPT_COST".to_string(),
            TEST_BCRYPT_COST.to_string(),
        ),
    ])
}

pub fn test_config() -> Config {
    Config::from_vars(&test_config_vars()).expect("test config should load")
}
