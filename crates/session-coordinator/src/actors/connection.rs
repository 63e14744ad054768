//! Per-connection outbound mailbox and writer task.
//!
//! Every live socket has one bounded mailbox. The coordinator fans frames
//! into it with `try_send` so a slow client never stalls the actor; the
//! writer task drains it into the WebSocket sink in order.

use crate::errors::CoordinatorError;

use super::metrics::{ActorType, MailboxMonitor};

use axum::extract::ws::{CloseFrame, Message};
use common::types::ConnectionId;
use futures::{Sink, SinkExt};
use std::borrow::Cow;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// A frame queued for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized event, shared between all recipients of a broadcast.
    Text(Arc<str>),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: String },
}

/// Sending half of a connection's mailbox.
#[derive(Clone, Debug)]
pub struct ConnectionOutbound {
    connection_id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
    monitor: Arc<MailboxMonitor>,
}

impl ConnectionOutbound {
    /// Create a mailbox with room for `capacity` frames.
    #[must_use]
    pub fn channel(
        connection_id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let monitor = Arc::new(MailboxMonitor::new(
            ActorType::Connection,
            connection_id.to_string(),
        ));
        (
            Self {
                connection_id,
                sender,
                monitor,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn monitor(&self) -> &Arc<MailboxMonitor> {
        &self.monitor
    }

    /// Queue a frame without waiting. A full mailbox drops the frame.
    ///
    /// Returns whether the frame was queued.
    pub fn try_deliver(&self, frame: Arc<str>) -> bool {
        match self.sender.try_send(Outbound::Text(frame)) {
            Ok(()) => {
                self.monitor.record_enqueue();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.monitor.record_drop();
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "sc.actor.connection",
                    connection_id = %self.connection_id,
                    "Writer gone, frame discarded"
                );
                false
            }
        }
    }

    /// Queue a frame, waiting for space. Used for replies to the
    /// connection's own requests.
    pub async fn send(&self, frame: Arc<str>) -> Result<(), CoordinatorError> {
        self.sender
            .send(Outbound::Text(frame))
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        self.monitor.record_enqueue();
        Ok(())
    }

    /// Ask the writer to close the socket with `code`.
    pub async fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), CoordinatorError> {
        self.sender
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;
        self.monitor.record_enqueue();
        Ok(())
    }
}

/// Drain `receiver` into `sink` until the mailbox closes, a close frame is
/// written, the sink fails, or `cancel_token` fires.
#[instrument(skip_all, name = "sc.actor.connection", fields(connection_id = %connection_id))]
pub async fn run_writer<S>(
    connection_id: ConnectionId,
    mut receiver: mpsc::Receiver<Outbound>,
    mut sink: S,
    monitor: Arc<MailboxMonitor>,
    cancel_token: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let outbound = tokio::select! {
            () = cancel_token.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: axum::extract::ws::close_code::AWAY,
                        reason: Cow::Borrowed("server shutting down"),
                    })))
                    .await;
                break;
            }
            outbound = receiver.recv() => outbound,
        };

        let Some(outbound) = outbound else {
            break;
        };
        monitor.record_dequeue();

        match outbound {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text.to_string())).await {
                    warn!(
                        target: "sc.actor.connection",
                        connection_id = %connection_id,
                        error = %e,
                        "Socket write failed"
                    );
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: Cow::Owned(reason),
                    })))
                    .await;
                break;
            }
        }
    }

    debug!(
        target: "sc.actor.connection",
        connection_id = %connection_id,
        frames_written = monitor.messages_processed(),
        frames_dropped = monitor.messages_dropped(),
        "Writer stopped"
    );
}
