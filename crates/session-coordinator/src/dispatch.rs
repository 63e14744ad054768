//! Static event dispatch table.
//!
//! [`EVENT_TABLE`] maps every inbound event tag to its handler and is fixed
//! at compile time. After registration a connection binds the whole table
//! once into its [`EventRouter`]; the router lives as long as the
//! connection's reader loop and is dropped with it.
//!
//! Handlers take an explicit [`HandlerContext`] plus the frame's `data`
//! payload, and may return one event for the calling connection. Events for
//! other connections go through the coordinator.

use crate::actors::CoordinatorHandle;
use crate::errors::CoordinatorError;
use crate::media::{MediaOperation, MediaRequest, MediaRouter};
use crate::observability::metrics::{record_event_dispatched, record_event_latency};
use crate::protocol::{ClientFrame, ServerEvent};
use crate::registry::Identity;
use common::types::{ConnectionId, RoomId, UserId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Everything a handler may touch.
#[derive(Clone)]
pub struct HandlerContext {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub coordinator: CoordinatorHandle,
    pub media: Arc<dyn MediaRouter>,
}

pub type HandlerResult = Result<Option<ServerEvent>, CoordinatorError>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
pub type Handler = fn(HandlerContext, Value) -> HandlerFuture;

/// One row of the dispatch table.
#[derive(Clone, Copy)]
pub struct EventBinding {
    pub tag: &'static str,
    pub handler: Handler,
}

impl std::fmt::Debug for EventBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBinding").field("tag", &self.tag).finish()
    }
}

pub static EVENT_TABLE: &[EventBinding] = &[
    EventBinding {
        tag: "join",
        handler: handle_join,
    },
    EventBinding {
        tag: "leave",
        handler: handle_leave,
    },
    EventBinding {
        tag: "direct",
        handler: handle_direct,
    },
    EventBinding {
        tag: "getRouterRtpCapabilities",
        handler: handle_router_rtp_capabilities,
    },
    EventBinding {
        tag: "createTransport",
        handler: handle_create_transport,
    },
    EventBinding {
        tag: "connectTransport",
        handler: handle_connect_transport,
    },
    EventBinding {
        tag: "produce",
        handler: handle_produce,
    },
    EventBinding {
        tag: "consume",
        handler: handle_consume,
    },
];

#[derive(Debug, Deserialize)]
struct RoomPayload {
    #[serde(rename = "roomID")]
    room_id: RoomId,
}

#[derive(Debug, Deserialize)]
struct DirectPayload {
    to: UserId,
    #[serde(default)]
    content: Value,
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T, CoordinatorError> {
    serde_json::from_value(data).map_err(|e| CoordinatorError::InvalidPayload(e.to_string()))
}

fn handle_join(ctx: HandlerContext, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let payload: RoomPayload = parse(data)?;
        ctx.coordinator
            .join(ctx.connection_id, payload.room_id)
            .await?;
        Ok(None)
    })
}

fn handle_leave(ctx: HandlerContext, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let payload: RoomPayload = parse(data)?;
        let left = ctx
            .coordinator
            .leave(ctx.connection_id, payload.room_id)
            .await?;
        if !left {
            debug!(
                target: "sc.dispatch",
                connection_id = %ctx.connection_id,
                "Leave for a room the connection is not in"
            );
        }
        Ok(None)
    })
}

fn handle_direct(ctx: HandlerContext, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let payload: DirectPayload = parse(data)?;
        ctx.coordinator
            .send_to_user(ctx.identity.user_id, payload.to, payload.content)
            .await?;
        Ok(None)
    })
}

/// Forward to the media router with the room the caller occupies. Router
/// failures are answered in the reply event, not as `error`.
fn forward_media(operation: MediaOperation, ctx: HandlerContext, data: Value) -> HandlerFuture {
    Box::pin(async move {
        let room = ctx
            .coordinator
            .room_of(ctx.connection_id)
            .await?
            .ok_or(CoordinatorError::NotInRoom)?;

        let request = MediaRequest {
            operation,
            connection_id: ctx.connection_id,
            user_id: ctx.identity.user_id,
            room,
            payload: data,
        };

        let event = match ctx.media.handle(request).await {
            Ok(data) => ServerEvent::Media {
                tag: operation.tag(),
                ok: true,
                data,
            },
            Err(e) => {
                warn!(
                    target: "sc.dispatch",
                    connection_id = %ctx.connection_id,
                    operation = operation.tag(),
                    error = %e,
                    "Media request failed"
                );
                ServerEvent::Media {
                    tag: operation.tag(),
                    ok: false,
                    data: json!({ "message": e.client_message() }),
                }
            }
        };
        Ok(Some(event))
    })
}

fn handle_router_rtp_capabilities(ctx: HandlerContext, data: Value) -> HandlerFuture {
    forward_media(MediaOperation::RouterRtpCapabilities, ctx, data)
}

fn handle_create_transport(ctx: HandlerContext, data: Value) -> HandlerFuture {
    forward_media(MediaOperation::CreateTransport, ctx, data)
}

fn handle_connect_transport(ctx: HandlerContext, data: Value) -> HandlerFuture {
    forward_media(MediaOperation::ConnectTransport, ctx, data)
}

fn handle_produce(ctx: HandlerContext, data: Value) -> HandlerFuture {
    forward_media(MediaOperation::Produce, ctx, data)
}

fn handle_consume(ctx: HandlerContext, data: Value) -> HandlerFuture {
    forward_media(MediaOperation::Consume, ctx, data)
}

/// Per-connection view of [`EVENT_TABLE`].
pub struct EventRouter {
    context: HandlerContext,
    bindings: HashMap<&'static str, Handler>,
}

impl EventRouter {
    /// Bind every table entry for one connection.
    #[must_use]
    pub fn bind(context: HandlerContext) -> Self {
        let bindings = EVENT_TABLE
            .iter()
            .map(|binding| (binding.tag, binding.handler))
            .collect();
        Self { context, bindings }
    }

    #[must_use]
    pub fn bound_tags(&self) -> usize {
        self.bindings.len()
    }

    /// Run the handler for one inbound frame.
    ///
    /// Returns the event to send back to the caller, if any. Handler errors
    /// and unknown tags become `error` events.
    pub async fn dispatch(&self, frame: ClientFrame) -> Option<ServerEvent> {
        let Some((&tag, handler)) = self.bindings.get_key_value(frame.event.as_str()) else {
            warn!(
                target: "sc.dispatch",
                connection_id = %self.context.connection_id,
                event = %frame.event,
                "Unknown event"
            );
            record_event_dispatched("unknown");
            let err = CoordinatorError::UnknownEvent(frame.event);
            return Some(ServerEvent::Error {
                code: err.error_code(),
                message: err.client_message(),
            });
        };

        record_event_dispatched(tag);
        let started = Instant::now();
        let result = handler(self.context.clone(), frame.data).await;
        record_event_latency(tag, started.elapsed());

        match result {
            Ok(reply) => reply,
            Err(e) => {
                debug!(
                    target: "sc.dispatch",
                    connection_id = %self.context.connection_id,
                    event = tag,
                    error = %e,
                    "Handler failed"
                );
                Some(ServerEvent::Error {
                    code: e.error_code(),
                    message: e.client_message(),
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, ConnectionOutbound};
    use crate::media::mock::RecordingMediaRouter;
    use crate::media::UnavailableMediaRouter;
    use std::collections::HashSet;
    use tokio_util::sync::CancellationToken;

    async fn router_with(media: Arc<dyn MediaRouter>) -> (EventRouter, CoordinatorHandle) {
        let coordinator = CoordinatorHandle::new(ActorMetrics::new(), CancellationToken::new());
        let connection_id = ConnectionId::new();
        let identity = Identity {
            user_id: UserId::from("alice"),
            email: "alice@example.com".to_string(),
        };
        let (outbound, _rx) = ConnectionOutbound::channel(connection_id, 64);
        coordinator
            .register(connection_id, identity.clone(), outbound)
            .await
            .unwrap();

        let router = EventRouter::bind(HandlerContext {
            connection_id,
            identity,
            coordinator: coordinator.clone(),
            media,
        });
        (router, coordinator)
    }

    fn frame(event: &str, data: Value) -> ClientFrame {
        ClientFrame {
            event: event.to_string(),
            data,
        }
    }

    #[test]
    fn test_table_tags_are_unique() {
        let tags: HashSet<&str> = EVENT_TABLE.iter().map(|b| b.tag).collect();
        assert_eq!(tags.len(), EVENT_TABLE.len());
    }

    #[test]
    fn test_media_tags_match_operations() {
        for op in [
            MediaOperation::RouterRtpCapabilities,
            MediaOperation::CreateTransport,
            MediaOperation::ConnectTransport,
            MediaOperation::Produce,
            MediaOperation::Consume,
        ] {
            assert!(EVENT_TABLE.iter().any(|b| b.tag == op.tag()), "{}", op.tag());
        }
    }

    #[tokio::test]
    async fn test_bind_covers_whole_table() {
        let (router, _) = router_with(Arc::new(UnavailableMediaRouter)).await;
        assert_eq!(router.bound_tags(), EVENT_TABLE.len());
    }

    #[tokio::test]
    async fn test_unknown_event_answers_error() {
        let (router, _) = router_with(Arc::new(UnavailableMediaRouter)).await;

        let reply = router.dispatch(frame("shout", json!({}))).await;

        assert_eq!(
            reply,
            Some(ServerEvent::Error {
                code: 1,
                message: "Unknown event: shout".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_join_updates_room() {
        let (router, coordinator) = router_with(Arc::new(UnavailableMediaRouter)).await;

        let reply = router
            .dispatch(frame("join", json!({"roomID": "r1"})))
            .await;

        assert_eq!(reply, None);
        assert_eq!(
            coordinator.room_of(router.context.connection_id).await.unwrap(),
            Some(RoomId::from("r1"))
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_answers_error() {
        let (router, _) = router_with(Arc::new(UnavailableMediaRouter)).await;

        let reply = router.dispatch(frame("join", json!({"room": 7}))).await;

        assert!(matches!(reply, Some(ServerEvent::Error { code: 1, .. })));
    }

    #[tokio::test]
    async fn test_media_requires_room() {
        let media = Arc::new(RecordingMediaRouter::replying(json!({})));
        let (router, _) = router_with(media.clone()).await;

        let reply = router.dispatch(frame("produce", json!({}))).await;

        assert!(matches!(reply, Some(ServerEvent::Error { code: 4, .. })));
        assert!(media.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_media_forwarded_with_room() {
        let media = Arc::new(RecordingMediaRouter::replying(json!({"id": "t1"})));
        let (router, _) = router_with(media.clone()).await;
        router
            .dispatch(frame("join", json!({"roomID": "r1"})))
            .await;

        let reply = router
            .dispatch(frame("createTransport", json!({"direction": "send"})))
            .await;

        assert_eq!(
            reply,
            Some(ServerEvent::Media {
                tag: "createTransport",
                ok: true,
                data: json!({"id": "t1"}),
            })
        );
        let requests = media.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].room, RoomId::from("r1"));
        assert_eq!(requests[0].payload, json!({"direction": "send"}));
    }

    #[tokio::test]
    async fn test_media_failure_is_reported_in_reply() {
        let (router, _) = router_with(Arc::new(UnavailableMediaRouter)).await;
        router
            .dispatch(frame("join", json!({"roomID": "r1"})))
            .await;

        let reply = router.dispatch(frame("consume", json!({}))).await;

        assert_eq!(
            reply,
            Some(ServerEvent::Media {
                tag: "consume",
                ok: false,
                data: json!({"message": "Media operation failed"}),
            })
        );
    }

    #[tokio::test]
    async fn test_direct_to_offline_user_answers_error() {
        let (router, _) = router_with(Arc::new(UnavailableMediaRouter)).await;

        let reply = router
            .dispatch(frame("direct", json!({"to": "ghost", "content": "hi"})))
            .await;

        assert!(matches!(reply, Some(ServerEvent::Error { code: 4, .. })));
    }
}
