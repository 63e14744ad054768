//! Observability for the session coordinator.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit safe
//! fields. Tokens, passwords and emails are never recorded.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_connections_active` | Gauge | none | Live authenticated connections |
//! | `sc_rooms_active` | Gauge | none | Rooms with consumers |
//! | `sc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `sc_auth_attempts_total` | Counter | `result` | Handshake outcomes |
//! | `sc_events_dispatched_total` | Counter | `event` | Inbound events handled |
//! | `sc_messages_dropped_total` | Counter | none | Outbound drops on full mailboxes |
//! | `sc_bootstrap_attempts_total` | Counter | `result` | Storage bootstrap attempts |
//! | `sc_persistence_failures_total` | Counter | `operation` | Failed disconnect writes |
//! | `sc_store_latency_seconds` | Histogram | `operation` | Store call latency |
//! | `sc_event_latency_seconds` | Histogram | `event` | Handler latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
