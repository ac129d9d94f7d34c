//! Parley Shared Types and Utilities
//!
//! This crate contains the domain types, live-channel events, storage errors
//! and database helpers shared by the server and the client engine.

pub mod db;
pub mod error;
pub mod events;
pub mod types;

pub use db::*;
pub use error::*;
pub use events::{ClientEvent, ServerEvent};
pub use types::*;
