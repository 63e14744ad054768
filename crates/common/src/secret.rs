//! Redacted secret types.
//!
//! Re-exports [`secrecy`] so every crate names secrets the same way. Values
//! wrapped in [`SecretString`] print as `[REDACTED]` through `Debug`, which
//! keeps them out of `tracing` fields and panic messages.
//!
//! Wrap in this workspace:
//!
//! - The JWT shared secret (`AUTH_SECRET`)
//! - The privileged account password (`ROOT_USER_PASSWORD`)
//! - Bearer tokens received in the `authenticate` frame
//!
//! Reading the value requires an explicit [`ExposeSecret::expose_secret`]
//! call, so every read site is greppable.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct AuthenticateData {
//!     token: SecretString,
//! }
//!
//! let data: AuthenticateData = serde_json::from_str(r#"{"token": "abc"}"#).unwrap();
//! assert_eq!(data.token.expose_secret(), "abc");
//! assert!(!format!("{data:?}").contains("abc"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
