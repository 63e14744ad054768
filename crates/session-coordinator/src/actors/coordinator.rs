//! `CoordinatorActor` - single owner of registry, presence and room state.
//!
//! Every registration change, room change and fan-out runs inside one
//! message turn of this actor, so callers never observe a half-applied
//! mutation and broadcasts always reflect committed state.
//!
//! # Notification order
//!
//! - register: `authenticated` to the new connection, then presence to
//!   every live connection
//! - join: departure notices for the old room (if any), then `consumers` to
//!   every member of the joined room
//! - leave: `consumers` then `leave` to the remaining members
//! - unregister: the leave notices above, then presence

use crate::errors::CoordinatorError;
use crate::presence::{self, PresenceEntry};
use crate::protocol::ServerEvent;
use crate::registry::{Identity, SocketRegistry, Unregistered};
use crate::rooms::RoomDeparture;

use super::connection::ConnectionOutbound;
use super::messages::{CoordinatorMessage, CoordinatorStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use chrono::Utc;
use common::types::{ConnectionId, RoomId, UserId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `CoordinatorActor`. Cheap to clone.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    /// Shared with the actor: senders count enqueues, the actor dequeues.
    mailbox: Arc<MailboxMonitor>,
}

impl CoordinatorHandle {
    /// Spawn the actor and return a handle to it.
    ///
    /// The actor stops when `cancel_token` fires or every handle is dropped.
    #[must_use]
    pub fn new(metrics: Arc<ActorMetrics>, cancel_token: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Coordinator, "coordinator"));
        let actor = CoordinatorActor::new(
            receiver,
            cancel_token.clone(),
            metrics,
            Arc::clone(&mailbox),
        );
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    /// Depth counters of the coordinator mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &Arc<MailboxMonitor> {
        &self.mailbox
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(build(tx)).await {
            self.mailbox.retract_enqueue();
            return Err(CoordinatorError::Internal(format!(
                "channel send failed: {e}"
            )));
        }

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Register an authenticated connection.
    ///
    /// On success the connection is sent `authenticated`, then presence is
    /// broadcast, both before this returns. A rejected registration sends
    /// nothing.
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        outbound: ConnectionOutbound,
    ) -> Result<(), CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::Register {
            connection_id,
            identity,
            outbound,
            respond_to,
        })
        .await?
    }

    /// Remove a connection. `Ok(None)` when it was not registered.
    pub async fn unregister(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<Unregistered>, CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::Unregister {
            connection_id,
            respond_to,
        })
        .await
    }

    /// Join `room`, leaving any other room first. Returns the members.
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        room: RoomId,
    ) -> Result<Vec<ConnectionId>, CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::Join {
            connection_id,
            room,
            respond_to,
        })
        .await?
    }

    /// Leave `room`. `Ok(false)` when the connection was not in it.
    pub async fn leave(
        &self,
        connection_id: ConnectionId,
        room: RoomId,
    ) -> Result<bool, CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::Leave {
            connection_id,
            room,
            respond_to,
        })
        .await
    }

    pub async fn lookup_by_identity(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ConnectionId>, CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::LookupByIdentity {
            user_id,
            respond_to,
        })
        .await
    }

    pub async fn lookup_identity(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<Identity>, CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::LookupIdentity {
            connection_id,
            respond_to,
        })
        .await
    }

    pub async fn room_of(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<RoomId>, CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::RoomOf {
            connection_id,
            respond_to,
        })
        .await
    }

    /// Send `content` to every connection of `to`.
    pub async fn send_to_user(
        &self,
        from: UserId,
        to: UserId,
        content: Value,
    ) -> Result<usize, CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::SendToUser {
            from,
            to,
            content,
            respond_to,
        })
        .await?
    }

    pub async fn presence_snapshot(&self) -> Result<Vec<PresenceEntry>, CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::PresenceSnapshot { respond_to })
            .await
    }

    pub async fn get_status(&self) -> Result<CoordinatorStatus, CoordinatorError> {
        self.request(|respond_to| CoordinatorMessage::GetStatus { respond_to })
            .await
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Child token for per-connection tasks.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `CoordinatorActor` implementation.
pub struct CoordinatorActor {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    cancel_token: CancellationToken,
    registry: SocketRegistry,
    /// Outbound mailboxes, keyed like the registry.
    outbound: HashMap<ConnectionId, ConnectionOutbound>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl CoordinatorActor {
    fn new(
        receiver: mpsc::Receiver<CoordinatorMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        mailbox: Arc<MailboxMonitor>,
    ) -> Self {
        Self {
            receiver,
            cancel_token,
            registry: SocketRegistry::new(),
            outbound: HashMap::new(),
            metrics,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "sc.actor.coordinator")]
    async fn run(mut self) {
        info!(target: "sc.actor.coordinator", "CoordinatorActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.coordinator",
                        "CoordinatorActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            self.handle_message(message);
                            self.metrics.record_message_processed();
                            debug_assert!(self.registry.is_consistent());
                        }
                        None => {
                            info!(
                                target: "sc.actor.coordinator",
                                "CoordinatorActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.coordinator",
            connections_remaining = self.registry.len(),
            messages_processed = self.mailbox.messages_processed(),
            "CoordinatorActor stopped"
        );
    }

    fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::Register {
                connection_id,
                identity,
                outbound,
                respond_to,
            } => {
                let result = self.register(connection_id, identity, outbound);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Unregister {
                connection_id,
                respond_to,
            } => {
                let removed = self.unregister(connection_id);
                let _ = respond_to.send(removed);
            }

            CoordinatorMessage::Join {
                connection_id,
                room,
                respond_to,
            } => {
                let result = self.join(connection_id, room);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Leave {
                connection_id,
                room,
                respond_to,
            } => {
                let left = self.leave(connection_id, &room);
                let _ = respond_to.send(left);
            }

            CoordinatorMessage::LookupByIdentity {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.lookup_by_identity(&user_id));
            }

            CoordinatorMessage::LookupIdentity {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.lookup_identity(&connection_id).cloned());
            }

            CoordinatorMessage::RoomOf {
                connection_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.room_of(&connection_id).cloned());
            }

            CoordinatorMessage::SendToUser {
                from,
                to,
                content,
                respond_to,
            } => {
                let result = self.send_to_user(from, &to, content);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::PresenceSnapshot { respond_to } => {
                let _ = respond_to.send(presence::snapshot(&self.registry));
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }
        }
    }

    fn register(
        &mut self,
        connection_id: ConnectionId,
        identity: Identity,
        outbound: ConnectionOutbound,
    ) -> Result<(), CoordinatorError> {
        let user_id = identity.user_id.clone();
        self.registry
            .register(connection_id, identity)
            .inspect_err(|_| {
                warn!(
                    target: "sc.actor.coordinator",
                    connection_id = %connection_id,
                    "Duplicate registration rejected"
                );
            })?;
        self.outbound.insert(connection_id, outbound);
        self.deliver(&[connection_id], &ServerEvent::Authenticated { connection_id });

        info!(
            target: "sc.actor.coordinator",
            connection_id = %connection_id,
            user_id = %user_id,
            connections = self.registry.len(),
            "Connection registered"
        );

        self.publish_counts();
        self.broadcast_presence();
        Ok(())
    }

    fn unregister(&mut self, connection_id: ConnectionId) -> Option<Unregistered> {
        let Some(removed) = self.registry.unregister(connection_id) else {
            debug!(
                target: "sc.actor.coordinator",
                connection_id = %connection_id,
                "Unregister for unknown connection ignored"
            );
            return None;
        };

        if let Some(departure) = &removed.departure {
            self.notify_departure(departure);
        }
        self.outbound.remove(&connection_id);

        info!(
            target: "sc.actor.coordinator",
            connection_id = %connection_id,
            user_id = %removed.identity.user_id,
            connections = self.registry.len(),
            "Connection unregistered"
        );

        self.publish_counts();
        self.broadcast_presence();
        Some(removed)
    }

    fn join(
        &mut self,
        connection_id: ConnectionId,
        room: RoomId,
    ) -> Result<Vec<ConnectionId>, CoordinatorError> {
        let joined = self.registry.join(connection_id, room)?;

        if let Some(previous) = &joined.previous {
            self.notify_departure(previous);
        }

        debug!(
            target: "sc.actor.coordinator",
            connection_id = %connection_id,
            room = %joined.room,
            members = joined.members.len(),
            "Connection joined room"
        );

        self.deliver(
            &joined.members,
            &ServerEvent::Consumers {
                content: joined.members.clone(),
                timestamp: Utc::now().timestamp_millis(),
            },
        );
        self.publish_counts();
        Ok(joined.members)
    }

    fn leave(&mut self, connection_id: ConnectionId, room: &RoomId) -> bool {
        let Some(departure) = self.registry.leave(connection_id, room) else {
            return false;
        };

        debug!(
            target: "sc.actor.coordinator",
            connection_id = %connection_id,
            room = %room,
            remaining = departure.remaining.len(),
            "Connection left room"
        );

        self.notify_departure(&departure);
        self.publish_counts();
        true
    }

    fn send_to_user(
        &self,
        from: UserId,
        to: &UserId,
        content: Value,
    ) -> Result<usize, CoordinatorError> {
        let targets = self.registry.lookup_by_identity(to);
        if targets.is_empty() {
            return Err(CoordinatorError::UserOffline(to.to_string()));
        }
        Ok(self.deliver(&targets, &ServerEvent::Direct { from, content }))
    }

    fn get_status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            connections: self.registry.len(),
            users_online: self.registry.user_count(),
            active_rooms: self.registry.active_room_count(),
            broadcasts_sent: self.metrics.broadcast_count(),
            consistent: self.registry.is_consistent(),
        }
    }

    /// `consumers` then `leave`, to the members still in the room.
    fn notify_departure(&self, departure: &RoomDeparture) {
        self.deliver(
            &departure.remaining,
            &ServerEvent::Consumers {
                content: departure.remaining.clone(),
                timestamp: Utc::now().timestamp_millis(),
            },
        );
        self.deliver(
            &departure.remaining,
            &ServerEvent::Leave {
                socket_id: departure.departed,
            },
        );
    }

    fn broadcast_presence(&self) {
        let users = presence::online_users(&presence::snapshot(&self.registry));
        let everyone: Vec<ConnectionId> = self.outbound.keys().copied().collect();
        self.deliver(&everyone, &ServerEvent::OnlineUsers(users));
    }

    /// Serialize once and queue for each recipient. Returns how many
    /// mailboxes accepted the frame.
    fn deliver(&self, recipients: &[ConnectionId], event: &ServerEvent) -> usize {
        if recipients.is_empty() {
            return 0;
        }

        let frame: Arc<str> = match event.to_frame() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                error!(
                    target: "sc.actor.coordinator",
                    event = event.tag(),
                    error = %e,
                    "Failed to serialize event"
                );
                return 0;
            }
        };

        self.metrics.record_broadcast();
        recipients
            .iter()
            .filter_map(|id| self.outbound.get(id))
            .filter(|outbound| outbound.try_deliver(Arc::clone(&frame)))
            .count()
    }

    fn publish_counts(&self) {
        self.metrics.set_connections(self.registry.len());
        self.metrics.set_rooms(self.registry.active_room_count());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::actors::connection::Outbound;
    use serde_json::json;

    struct Client {
        id: ConnectionId,
        rx: mpsc::Receiver<Outbound>,
    }

    impl Client {
        async fn connect(coordinator: &CoordinatorHandle, user: &str) -> Self {
            let id = ConnectionId::new();
            let (outbound, rx) = ConnectionOutbound::channel(id, 64);
            coordinator
                .register(
                    id,
                    Identity {
                        user_id: UserId::from(user),
                        email: format!("{user}@example.com"),
                    },
                    outbound,
                )
                .await
                .unwrap();
            Self { id, rx }
        }

        /// Every frame queued so far, as JSON.
        fn drain(&mut self) -> Vec<Value> {
            let mut frames = Vec::new();
            while let Ok(Outbound::Text(text)) = self.rx.try_recv() {
                frames.push(serde_json::from_str(&text).unwrap());
            }
            frames
        }

        fn events(&mut self) -> Vec<String> {
            self.drain()
                .into_iter()
                .map(|f| f["event"].as_str().unwrap().to_string())
                .collect()
        }
    }

    fn coordinator() -> CoordinatorHandle {
        CoordinatorHandle::new(ActorMetrics::new(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_register_broadcasts_presence_to_everyone() {
        let coordinator = coordinator();
        let mut alice = Client::connect(&coordinator, "alice").await;
        let mut bob = Client::connect(&coordinator, "bob").await;

        let alice_frames = alice.drain();
        assert_eq!(alice_frames.len(), 3);
        assert_eq!(
            alice_frames[0],
            json!({"event": "authenticated", "data": {"connectionId": alice.id}})
        );
        assert_eq!(
            alice_frames[2],
            json!({
                "event": "onlineUsers",
                "data": [
                    {"id": "alice", "status": "online"},
                    {"id": "bob", "status": "online"}
                ]
            })
        );
        assert_eq!(bob.events(), vec!["authenticated", "onlineUsers"]);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let coordinator = coordinator();
        let alice = Client::connect(&coordinator, "alice").await;
        let (outbound, mut rx) = ConnectionOutbound::channel(alice.id, 8);

        let err = coordinator
            .register(
                alice.id,
                Identity {
                    user_id: UserId::from("mallory"),
                    email: "m@example.com".to_string(),
                },
                outbound,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoordinatorError::DuplicateRegistration(_)));
        assert!(rx.try_recv().is_err(), "rejected connection got a frame");
        let identity = coordinator.lookup_identity(alice.id).await.unwrap().unwrap();
        assert_eq!(identity.user_id, UserId::from("alice"));
    }

    #[tokio::test]
    async fn test_leave_sends_consumers_then_leave_once() {
        let coordinator = coordinator();
        let mut alice = Client::connect(&coordinator, "alice").await;
        let mut bob = Client::connect(&coordinator, "bob").await;
        let room = RoomId::from("r1");

        coordinator.join(alice.id, room.clone()).await.unwrap();
        coordinator.join(bob.id, room.clone()).await.unwrap();
        alice.drain();
        bob.drain();

        assert!(coordinator.leave(alice.id, room.clone()).await.unwrap());

        let frames = bob.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["event"], "consumers");
        assert_eq!(frames[0]["data"]["content"], json!([bob.id]));
        assert_eq!(frames[1], json!({"event": "leave", "data": {"socketID": alice.id}}));
        assert!(alice.drain().is_empty());

        assert!(!coordinator.leave(alice.id, room).await.unwrap());
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn test_join_moves_between_rooms() {
        let coordinator = coordinator();
        let mut alice = Client::connect(&coordinator, "alice").await;
        let mut bob = Client::connect(&coordinator, "bob").await;
        let mut carol = Client::connect(&coordinator, "carol").await;

        coordinator.join(alice.id, RoomId::from("r1")).await.unwrap();
        coordinator.join(bob.id, RoomId::from("r1")).await.unwrap();
        coordinator.join(carol.id, RoomId::from("r2")).await.unwrap();
        alice.drain();
        bob.drain();
        carol.drain();

        let members = coordinator.join(alice.id, RoomId::from("r2")).await.unwrap();
        let mut expected = vec![alice.id, carol.id];
        expected.sort_unstable();
        assert_eq!(members, expected);

        assert_eq!(bob.events(), vec!["consumers", "leave"]);
        assert_eq!(carol.events(), vec!["consumers"]);
        assert_eq!(alice.events(), vec!["consumers"]);
        assert_eq!(
            coordinator.room_of(alice.id).await.unwrap(),
            Some(RoomId::from("r2"))
        );
    }

    #[tokio::test]
    async fn test_unregister_leaves_room_before_presence() {
        let coordinator = coordinator();
        let alice = Client::connect(&coordinator, "alice").await;
        let mut bob = Client::connect(&coordinator, "bob").await;
        coordinator.join(alice.id, RoomId::from("r1")).await.unwrap();
        coordinator.join(bob.id, RoomId::from("r1")).await.unwrap();
        bob.drain();

        let removed = coordinator.unregister(alice.id).await.unwrap().unwrap();
        assert_eq!(removed.identity.user_id, UserId::from("alice"));

        let frames = bob.drain();
        let events: Vec<&str> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
        assert_eq!(events, vec!["consumers", "leave", "onlineUsers"]);
        assert_eq!(frames[2]["data"], json!([{"id": "bob", "status": "online"}]));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let coordinator = coordinator();
        let alice = Client::connect(&coordinator, "alice").await;
        let mut bob = Client::connect(&coordinator, "bob").await;

        assert!(coordinator.unregister(alice.id).await.unwrap().is_some());
        bob.drain();
        assert!(coordinator.unregister(alice.id).await.unwrap().is_none());

        assert!(bob.drain().is_empty());
        let status = coordinator.get_status().await.unwrap();
        assert_eq!(status.connections, 1);
    }

    #[tokio::test]
    async fn test_send_to_user_reaches_every_connection() {
        let coordinator = coordinator();
        let mut alice = Client::connect(&coordinator, "alice").await;
        let mut phone = Client::connect(&coordinator, "bob").await;
        let mut laptop = Client::connect(&coordinator, "bob").await;
        alice.drain();
        phone.drain();
        laptop.drain();

        let reached = coordinator
            .send_to_user(UserId::from("alice"), UserId::from("bob"), json!("hi"))
            .await
            .unwrap();

        assert_eq!(reached, 2);
        let expected = json!({"event": "direct", "data": {"from": "alice", "content": "hi"}});
        assert_eq!(phone.drain(), vec![expected.clone()]);
        assert_eq!(laptop.drain(), vec![expected]);
        assert!(alice.drain().is_empty());
    }

    #[tokio::test]
    async fn test_send_to_offline_user_fails() {
        let coordinator = coordinator();
        let _alice = Client::connect(&coordinator, "alice").await;

        let err = coordinator
            .send_to_user(UserId::from("alice"), UserId::from("ghost"), json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::UserOffline(_)));
    }

    #[tokio::test]
    async fn test_presence_snapshot_matches_live_connections() {
        let coordinator = coordinator();
        let alice = Client::connect(&coordinator, "alice").await;
        let _bob = Client::connect(&coordinator, "bob").await;
        let _bob2 = Client::connect(&coordinator, "bob").await;
        coordinator.unregister(alice.id).await.unwrap();

        let snapshot = coordinator.presence_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|e| e.user_id == UserId::from("bob")));

        let status = coordinator.get_status().await.unwrap();
        assert_eq!(status.connections, 2);
        assert_eq!(status.users_online, 1);
    }

    #[tokio::test]
    async fn test_cancelled_coordinator_rejects_requests() {
        let coordinator = coordinator();
        coordinator.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let err = coordinator.get_status().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Internal(_)));
        assert!(coordinator.is_cancelled());
    }

    #[tokio::test]
    async fn test_mailbox_depth_counts_queued_requests() {
        let coordinator = coordinator();
        let queued = 20;

        // On the current-thread runtime every request is queued before the
        // actor task is polled.
        let results = futures::future::join_all(
            (0..queued).map(|_| coordinator.get_status()),
        )
        .await;

        assert!(results.iter().all(Result::is_ok));
        let mailbox = coordinator.mailbox();
        assert!(mailbox.peak_depth() >= queued, "peak {}", mailbox.peak_depth());
        assert_eq!(mailbox.current_depth(), 0);
        assert_eq!(mailbox.messages_processed(), queued as u64);
    }

    #[tokio::test]
    async fn test_failed_send_does_not_inflate_depth() {
        let coordinator = coordinator();
        coordinator.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(coordinator.get_status().await.is_err());
        assert_eq!(coordinator.mailbox().current_depth(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_churn_keeps_presence_and_registry_consistent() {
        let coordinator = coordinator();
        let tasks = 400;

        let handles: Vec<_> = (0..tasks)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let id = ConnectionId::new();
                    // Receiver dropped: fan-out to this connection is discarded.
                    let (outbound, _) = ConnectionOutbound::channel(id, 4);
                    let identity = Identity {
                        user_id: UserId::from(format!("user-{}", i % 50).as_str()),
                        email: format!("user-{i}@example.com"),
                    };
                    coordinator.register(id, identity, outbound).await.unwrap();

                    let room = RoomId::from(format!("room-{}", i % 7).as_str());
                    let members = coordinator.join(id, room).await.unwrap();
                    assert!(members.contains(&id));

                    let snapshot = coordinator.presence_snapshot().await.unwrap();
                    assert!(snapshot.iter().any(|entry| entry.connection_id == id));

                    if i % 3 == 0 {
                        assert!(coordinator.unregister(id).await.unwrap().is_some());
                        assert!(coordinator.unregister(id).await.unwrap().is_none());
                        false
                    } else {
                        true
                    }
                })
            })
            .collect();

        let mut still_registered = 0;
        for handle in handles {
            if handle.await.unwrap() {
                still_registered += 1;
            }
        }

        let snapshot = coordinator.presence_snapshot().await.unwrap();
        let status = coordinator.get_status().await.unwrap();
        assert_eq!(snapshot.len(), status.connections);
        assert_eq!(status.connections, still_registered);
        assert!(status.consistent);
        assert!(status.active_rooms <= 7);
    }
}
