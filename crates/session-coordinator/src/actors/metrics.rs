//! Mailbox depth tracking for the coordinator and connection mailboxes.
//!
//! Depth is classified against per-actor thresholds:
//!
//! | Mailbox     | Normal   | Elevated  | Critical |
//! |-------------|----------|-----------|----------|
//! | Coordinator | <= 500   | 501-2000  | > 2000   |
//! | Connection  | <= 64    | 65-192    | > 192    |
//!
//! Every registry mutation and fan-out passes through the coordinator, so
//! it tolerates a deeper queue than one connection's outbound mailbox.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bounds of the normal and elevated bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxThresholds {
    pub normal: usize,
    pub elevated: usize,
}

pub const COORDINATOR_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    normal: 500,
    elevated: 2000,
};

pub const CONNECTION_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    normal: 64,
    elevated: 192,
};

/// Which mailbox a monitor watches; also the metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Coordinator,
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Coordinator => "coordinator",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn thresholds(&self) -> MailboxThresholds {
        match self {
            ActorType::Coordinator => COORDINATOR_THRESHOLDS,
            ActorType::Connection => CONNECTION_THRESHOLDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Elevated,
    Critical,
}

impl MailboxThresholds {
    #[must_use]
    pub const fn classify(&self, depth: usize) -> MailboxLevel {
        if depth > self.elevated {
            MailboxLevel::Critical
        } else if depth > self.normal {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Queue depth and throughput of one mailbox.
///
/// Senders call [`record_enqueue`](Self::record_enqueue) before handing a
/// message over and the owning task calls
/// [`record_dequeue`](Self::record_dequeue) after taking it out. Only the
/// coordinator's depth is exported as a gauge.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// "coordinator" or the connection id.
    owner: String,
    depth: AtomicUsize,
    high_water: AtomicUsize,
    processed: AtomicU64,
    dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, owner: impl Into<String>) -> Self {
        Self {
            actor_type,
            owner: owner.into(),
            depth: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.high_water.fetch_max(depth, Ordering::Relaxed);

        let thresholds = self.actor_type.thresholds();
        match thresholds.classify(depth) {
            MailboxLevel::Critical => warn!(
                target: "sc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                owner = %self.owner,
                depth,
                limit = thresholds.elevated,
                "Mailbox depth critical"
            ),
            MailboxLevel::Elevated if depth == thresholds.normal + 1 => debug!(
                target: "sc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                owner = %self.owner,
                depth,
                "Mailbox depth elevated"
            ),
            _ => {}
        }
    }

    /// Undo a [`record_enqueue`](Self::record_enqueue) whose send failed.
    pub fn retract_enqueue(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
    }

    pub fn record_dequeue(&self) {
        let before = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        self.processed.fetch_add(1, Ordering::Relaxed);
        if self.actor_type == ActorType::Coordinator {
            prom::set_actor_mailbox_depth(self.actor_type.as_str(), before.saturating_sub(1));
        }
    }

    /// A message was discarded because the mailbox was full.
    pub fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_message_dropped();
        warn!(
            target: "sc.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            owner = %self.owner,
            dropped,
            "Mailbox full, message dropped"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.actor_type.thresholds().classify(self.current_depth())
    }
}

/// Aggregated counters for the actor system, readable from the status call
/// and tests without a metrics recorder.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub active_connections: AtomicUsize,
    pub active_rooms: AtomicUsize,
    pub broadcasts_sent: AtomicU64,
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish the live connection count.
    pub fn set_connections(&self, count: usize) {
        self.active_connections.store(count, Ordering::Relaxed);
        prom::set_connections_active(count);
    }

    /// Publish the non-empty room count.
    pub fn set_rooms(&self, count: usize) {
        self.active_rooms.store(count, Ordering::Relaxed);
        prom::set_rooms_active(count);
    }

    pub fn record_broadcast(&self) {
        self.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn broadcast_count(&self) -> u64 {
        self.broadcasts_sent.load(Ordering::Relaxed)
    }
}
