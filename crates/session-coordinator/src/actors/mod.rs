//! Actor model for the session coordinator.
//!
//! - [`coordinator`]: singleton owning the socket registry, presence and
//!   room membership
//! - [`connection`]: per-connection outbound mailbox and writer task
//! - [`messages`]: coordinator mailbox messages
//! - [`metrics`]: mailbox depth monitoring and shared counters

pub mod connection;
pub mod coordinator;
pub mod messages;
pub mod metrics;

pub use connection::{ConnectionOutbound, Outbound};
pub use coordinator::CoordinatorHandle;
pub use messages::CoordinatorStatus;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor, MailboxThresholds};
