//! Parley API Library
//!
//! Server side of the direct-messaging subsystem: presence registry,
//! delivery/read dispatch, message storage and unread aggregation.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod unread;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
