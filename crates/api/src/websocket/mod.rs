//! Live channel
//!
//! One WebSocket per client tab. Each authenticated connection is held in the
//! [`PresenceRegistry`] until its read loop ends, for whatever reason.
//!
//! # Architecture
//!
//! - **Connection**: outbound queue for one socket, drained by a writer task
//! - **Registry**: identity to live connections, roster broadcasts
//! - **Handler**: Axum upgrade route and per-socket read loop

pub mod connection;
pub mod handler;
pub mod registry;

pub use connection::{push_all, Connection, PushReport, OUTBOUND_QUEUE_CAPACITY};
pub use handler::{admit, ws_handler};
pub use registry::{PresenceRegistry, RegistryStats};
