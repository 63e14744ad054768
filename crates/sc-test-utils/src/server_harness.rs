//! Test server harness for end-to-end socket tests.
//!
//! Provides `TestScServer`, which serves the real router on 127.0.0.1:0
//! with an in-memory store and a recording media router.

use crate::fixtures::TEST_AUTH_SECRET;
use common::secret::SecretString;
use serde_json::json;
use session_coordinator::actors::{ActorMetrics, CoordinatorHandle};
use session_coordinator::app_router;
use session_coordinator::auth::CredentialVerifier;
use session_coordinator::bootstrap::StorageHandle;
use session_coordinator::config::DEFAULT_AUTH_TIMEOUT_MS;
use session_coordinator::media::mock::RecordingMediaRouter;
use session_coordinator::observability::HealthState;
use session_coordinator::store::mock::MockStore;
use session_coordinator::ws::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Options for [`TestScServer::spawn_with`].
pub struct TestServerOptions {
    pub auth_timeout: Duration,
    /// `false` leaves storage disconnected, as before bootstrap completes.
    pub storage_connected: bool,
    pub outbound_buffer: usize,
    pub media: Arc<RecordingMediaRouter>,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_millis(DEFAULT_AUTH_TIMEOUT_MS),
            storage_connected: true,
            outbound_buffer: 64,
            media: Arc::new(RecordingMediaRouter::replying(json!({"ok": true}))),
        }
    }
}

/// Test harness for spawning a Session Coordinator in tests.
///
/// # Example
/// ```rust,ignore
/// let server = TestScServer::spawn().await?;
/// let mut client = TestClient::connect(&server.ws_url()).await?;
/// ```
pub struct TestScServer {
    addr: SocketAddr,
    coordinator: CoordinatorHandle,
    store: Arc<MockStore>,
    media: Arc<RecordingMediaRouter>,
    health: HealthState,
    shutdown: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestScServer {
    /// Spawn with default options.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(TestServerOptions::default()).await
    }

    pub async fn spawn_with(options: TestServerOptions) -> Result<Self, anyhow::Error> {
        let shutdown = CancellationToken::new();
        let coordinator = CoordinatorHandle::new(ActorMetrics::new(), shutdown.child_token());
        let store = Arc::new(MockStore::new());
        let storage = if options.storage_connected {
            StorageHandle::connected(store.clone())
        } else {
            StorageHandle::disconnected()
        };

        let health = HealthState::new(coordinator.clone(), storage.clone(), shutdown.clone());

        let state = AppState {
            coordinator: coordinator.clone(),
            verifier: Arc::new(CredentialVerifier::new(
                SecretString::from(TEST_AUTH_SECRET),
                options.auth_timeout,
            )),
            storage,
            media: options.media.clone(),
            outbound_buffer: options.outbound_buffer,
            shutdown: shutdown.clone(),
        };

        let app = app_router(state, health.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            coordinator,
            store,
            media: options.media,
            health,
            shutdown,
            _handle: handle,
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<MockStore> {
        &self.store
    }

    pub fn media(&self) -> &Arc<RecordingMediaRouter> {
        &self.media
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Poll the coordinator until `connections` are registered.
    pub async fn wait_for_connections(&self, connections: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = self.coordinator.get_status().await.expect("coordinator alive");
                if status.connections == connections {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count not reached in time");
    }
}

impl Drop for TestScServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self._handle.abort();
    }
}
