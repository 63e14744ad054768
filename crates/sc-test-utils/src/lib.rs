//! # SC Test Utilities
//!
//! Shared test utilities for the Session Coordinator.
//!
//! ## Modules
//!
//! - `token_builders` - HS256 socket credentials with adjustable claims
//! - `fixtures` - Configuration and privileged-account fixtures
//! - `server_harness` - Real router on an ephemeral port
//! - `ws_client` - WebSocket client speaking the `{event, data}` protocol
//!
//! In-memory store and media router mocks live next to their traits in
//! `session_coordinator::store::mock` and `session_coordinator::media::mock`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestScServer::spawn().await.unwrap();
//!     let mut client = TestClient::connect(&server.ws_url()).await.unwrap();
//!
//!     let token = TestTokenBuilder::new().for_user("alice").sign(TEST_AUTH_SECRET);
//!     client.authenticate(&token).await.unwrap();
//!     let presence = client.next_event_named("onlineUsers").await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod server_harness;
pub mod token_builders;
pub mod ws_client;

pub use fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
pub use ws_client::*;
