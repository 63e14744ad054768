//! Per-connection session: `Unauthenticated -> Authenticated -> Closed`.
//!
//! - Unauthenticated: wait for the `authenticate` frame, bounded by the
//!   authentication window. Failure sends `unauthorized` and closes with
//!   4001 (timeout) or 4002 (rejected); nothing is registered.
//! - Authenticated: registered with the coordinator, event table bound,
//!   frames dispatched one at a time in receipt order.
//! - Closed: unregister (room leave and presence happen inside), release
//!   media resources, then spawn the best-effort durable update.
//!
//! Socket close, read errors and server shutdown all end in `Closed`.

use crate::actors::connection::run_writer;
use crate::actors::ConnectionOutbound;
use crate::dispatch::{EventRouter, HandlerContext};
use crate::errors::CoordinatorError;
use crate::persistence::record_disconnect;
use crate::protocol::{
    AuthenticateData, ClientFrame, ServerEvent, AUTHENTICATE_EVENT, CLOSE_AUTH_REJECTED,
    CLOSE_AUTH_TIMEOUT, CLOSE_REGISTRATION_FAILED,
};
use crate::registry::Identity;

use super::AppState;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use common::secret::SecretString;
use common::types::ConnectionId;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Lifecycle phase of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    Authenticated,
    Closed,
}

impl SessionPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Unauthenticated => "unauthenticated",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Closed => "closed",
        }
    }
}

struct Session {
    connection_id: ConnectionId,
    phase: SessionPhase,
    state: AppState,
    outbound: ConnectionOutbound,
    cancel_token: CancellationToken,
}

impl Session {
    fn transition(&mut self, next: SessionPhase) {
        debug!(
            target: "sc.ws",
            connection_id = %self.connection_id,
            from = self.phase.as_str(),
            to = next.as_str(),
            "Session phase change"
        );
        self.phase = next;
    }

    /// Queue `event` for this connection, waiting for mailbox space.
    async fn reply(&self, event: &ServerEvent) {
        let text = match event.to_frame() {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "sc.ws",
                    connection_id = %self.connection_id,
                    event = event.tag(),
                    error = %e,
                    "Failed to serialize reply"
                );
                return;
            }
        };
        if let Err(e) = self.outbound.send(Arc::from(text)).await {
            debug!(
                target: "sc.ws",
                connection_id = %self.connection_id,
                error = %e,
                "Reply dropped, writer gone"
            );
        }
    }

    async fn reject(&self, error: &CoordinatorError, close_code: u16) {
        self.reply(&ServerEvent::Unauthorized {
            message: error.client_message(),
        })
        .await;
        let _ = self.outbound.close(close_code, error.client_message()).await;
    }

    /// Unauthenticated phase. Returns the identity once registered.
    async fn authenticate<S>(&mut self, stream: &mut S) -> Option<Identity>
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let verified = tokio::select! {
            () = self.cancel_token.cancelled() => return None,
            verified = self.state.verifier.authenticate(read_credential(stream)) => verified,
        };

        let identity = match verified {
            Ok(identity) => identity,
            Err(e) => {
                let close_code = match e {
                    CoordinatorError::AuthTimeout => CLOSE_AUTH_TIMEOUT,
                    _ => CLOSE_AUTH_REJECTED,
                };
                info!(
                    target: "sc.ws",
                    connection_id = %self.connection_id,
                    close_code,
                    error = %e,
                    "Authentication failed"
                );
                self.reject(&e, close_code).await;
                return None;
            }
        };

        // The coordinator sends `authenticated` once registration commits.
        if let Err(e) = self
            .state
            .coordinator
            .register(self.connection_id, identity.clone(), self.outbound.clone())
            .await
        {
            warn!(
                target: "sc.ws",
                connection_id = %self.connection_id,
                error = %e,
                "Registration failed"
            );
            self.reply(&ServerEvent::Error {
                code: e.error_code(),
                message: e.client_message(),
            })
            .await;
            let _ = self
                .outbound
                .close(CLOSE_REGISTRATION_FAILED, e.client_message())
                .await;
            return None;
        }

        self.transition(SessionPhase::Authenticated);
        Some(identity)
    }

    /// Authenticated phase: dispatch frames until the socket goes away.
    async fn serve<S>(&mut self, stream: &mut S, identity: Identity)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        let router = EventRouter::bind(HandlerContext {
            connection_id: self.connection_id,
            identity,
            coordinator: self.state.coordinator.clone(),
            media: Arc::clone(&self.state.media),
        });
        debug!(
            target: "sc.ws",
            connection_id = %self.connection_id,
            handlers = router.bound_tags(),
            "Event table bound"
        );

        loop {
            let message = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "sc.ws", connection_id = %self.connection_id, "Session cancelled");
                    break;
                }
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => router.dispatch(frame).await,
                        Err(e) => {
                            let err = CoordinatorError::InvalidPayload(e.to_string());
                            Some(ServerEvent::Error {
                                code: err.error_code(),
                                message: err.client_message(),
                            })
                        }
                    };
                    if let Some(event) = reply {
                        self.reply(&event).await;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(
                        target: "sc.ws",
                        connection_id = %self.connection_id,
                        reason = ?frame,
                        "Client closed"
                    );
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(
                        target: "sc.ws",
                        connection_id = %self.connection_id,
                        error = %e,
                        "Socket read failed"
                    );
                    break;
                }
                None => break,
            }
        }
    }

    /// Closed phase for a registered connection.
    async fn close(&mut self) {
        self.transition(SessionPhase::Closed);

        let removed = match self.state.coordinator.unregister(self.connection_id).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(
                    target: "sc.ws",
                    connection_id = %self.connection_id,
                    error = %e,
                    "Unregister failed"
                );
                None
            }
        };

        self.state.media.connection_closed(self.connection_id).await;

        if let Some(removed) = removed {
            let storage = self.state.storage.clone();
            let connection_id = self.connection_id;
            let user_id = removed.identity.user_id;
            tokio::spawn(async move {
                record_disconnect(&storage, connection_id, user_id, Utc::now()).await;
            });
        }
    }
}

/// Read frames until the `authenticate` frame arrives.
///
/// Other frames are ignored. A malformed `authenticate` payload yields an
/// empty token so it is rejected immediately. `None` when the peer leaves.
async fn read_credential<S>(stream: &mut S) -> Option<SecretString>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) if frame.event == AUTHENTICATE_EVENT => {
                    return Some(
                        serde_json::from_value::<AuthenticateData>(frame.data)
                            .map_or_else(|_| SecretString::from(String::new()), |d| d.token),
                    );
                }
                _ => debug!(target: "sc.ws", "Ignoring frame before authentication"),
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Drive one upgraded socket through its whole lifecycle.
#[instrument(skip_all, name = "sc.ws.session", fields(connection_id))]
pub async fn run_session(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new();
    tracing::Span::current().record("connection_id", tracing::field::display(connection_id));

    let (sink, mut stream) = socket.split();
    let (outbound, receiver) = ConnectionOutbound::channel(connection_id, state.outbound_buffer);
    let cancel_token = state.shutdown.child_token();

    let writer = tokio::spawn(run_writer(
        connection_id,
        receiver,
        sink,
        Arc::clone(outbound.monitor()),
        cancel_token.clone(),
    ));

    let mut session = Session {
        connection_id,
        phase: SessionPhase::Unauthenticated,
        state,
        outbound,
        cancel_token,
    };

    info!(target: "sc.ws", connection_id = %connection_id, "Socket opened");

    if let Some(identity) = session.authenticate(&mut stream).await {
        session.serve(&mut stream, identity).await;
        session.close().await;
    } else {
        session.transition(SessionPhase::Closed);
    }

    // Last sender goes away here; the writer drains what is queued and stops.
    drop(session);
    let _ = writer.await;

    info!(target: "sc.ws", connection_id = %connection_id, "Socket closed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, CoordinatorHandle, Outbound};
    use crate::auth::CredentialVerifier;
    use crate::bootstrap::StorageHandle;
    use crate::media::UnavailableMediaRouter;
    use common::secret::ExposeSecret;
    use futures::stream;

    fn text(value: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(value.to_string()))
    }

    #[tokio::test]
    async fn test_read_credential_skips_other_frames() {
        let mut frames = stream::iter(vec![
            text(r#"{"event":"join","data":{"roomID":"r1"}}"#),
            text("not json"),
            text(r#"{"event":"authenticate","data":{"token":"abc"}}"#),
        ]);

        let token = read_credential(&mut frames).await.unwrap();
        assert_eq!(token.expose_secret(), "abc");
    }

    #[tokio::test]
    async fn test_read_credential_malformed_payload_is_empty_token() {
        let mut frames = stream::iter(vec![text(r#"{"event":"authenticate","data":{}}"#)]);

        let token = read_credential(&mut frames).await.unwrap();
        assert_eq!(token.expose_secret(), "");
    }

    #[tokio::test]
    async fn test_read_credential_none_when_peer_leaves() {
        let mut frames = stream::iter(vec![
            text(r#"{"event":"hello"}"#),
            Ok(Message::Close(None)),
        ]);
        assert!(read_credential(&mut frames).await.is_none());

        let mut empty = stream::iter(Vec::<Result<Message, axum::Error>>::new());
        assert!(read_credential(&mut empty).await.is_none());
    }

    fn signed_token(secret: &str, user: &str) -> String {
        let claims = serde_json::json!({
            "id": user,
            "email": format!("{user}@example.com"),
            "exp": Utc::now().timestamp() + 3600,
        });
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn session_for(
        connection_id: ConnectionId,
        coordinator: CoordinatorHandle,
        secret: &str,
    ) -> (Session, tokio::sync::mpsc::Receiver<Outbound>) {
        let shutdown = CancellationToken::new();
        let (outbound, rx) = ConnectionOutbound::channel(connection_id, 16);
        let state = AppState {
            coordinator,
            verifier: Arc::new(CredentialVerifier::new(
                SecretString::from(secret),
                std::time::Duration::from_secs(5),
            )),
            storage: StorageHandle::disconnected(),
            media: Arc::new(UnavailableMediaRouter),
            outbound_buffer: 16,
            shutdown: shutdown.clone(),
        };
        let session = Session {
            connection_id,
            phase: SessionPhase::Unauthenticated,
            state,
            outbound,
            cancel_token: shutdown.child_token(),
        };
        (session, rx)
    }

    fn queued(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn event_of(frame: &Outbound) -> Option<String> {
        match frame {
            Outbound::Text(text) => serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v["event"].as_str().map(str::to_string)),
            Outbound::Close { .. } => None,
        }
    }

    #[tokio::test]
    async fn test_authenticated_sent_only_after_registration() {
        let coordinator = CoordinatorHandle::new(ActorMetrics::new(), CancellationToken::new());
        let (mut session, mut rx) =
            session_for(ConnectionId::new(), coordinator.clone(), "secret");
        let frame = format!(
            r#"{{"event":"authenticate","data":{{"token":"{}"}}}}"#,
            signed_token("secret", "alice")
        );
        let mut frames = stream::iter(vec![text(&frame)]);

        let identity = session.authenticate(&mut frames).await.unwrap();
        assert_eq!(identity.user_id.as_str(), "alice");
        assert_eq!(session.phase, SessionPhase::Authenticated);

        let events: Vec<_> = queued(&mut rx).iter().filter_map(event_of).collect();
        assert_eq!(events, vec!["authenticated", "onlineUsers"]);
    }

    #[tokio::test]
    async fn test_failed_registration_never_reports_authenticated() {
        let coordinator = CoordinatorHandle::new(ActorMetrics::new(), CancellationToken::new());
        let taken = ConnectionId::new();
        let (existing, _existing_rx) = ConnectionOutbound::channel(taken, 16);
        coordinator
            .register(
                taken,
                Identity {
                    user_id: "bob".into(),
                    email: "bob@example.com".to_string(),
                },
                existing,
            )
            .await
            .unwrap();

        let (mut session, mut rx) = session_for(taken, coordinator, "secret");
        let frame = format!(
            r#"{{"event":"authenticate","data":{{"token":"{}"}}}}"#,
            signed_token("secret", "alice")
        );
        let mut frames = stream::iter(vec![text(&frame)]);

        assert!(session.authenticate(&mut frames).await.is_none());

        let sent = queued(&mut rx);
        let events: Vec<_> = sent.iter().filter_map(event_of).collect();
        assert_eq!(events, vec!["error"]);
        assert!(matches!(
            sent.last(),
            Some(Outbound::Close { code, .. }) if *code == CLOSE_REGISTRATION_FAILED
        ));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(SessionPhase::Unauthenticated.as_str(), "unauthenticated");
        assert_eq!(SessionPhase::Authenticated.as_str(), "authenticated");
        assert_eq!(SessionPhase::Closed.as_str(), "closed");
    }
}
