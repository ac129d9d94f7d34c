//! Parley client engine
//!
//! Transport-agnostic reconciliation of a signed-in session's view: the
//! caller feeds it REST responses and live events, and performs the
//! [`Effect`]s it returns.
//!
//! - [`ConversationState`]: message list, per-message delivery state, unread cache
//! - [`PresenceTracker`]: online roster published through a watch channel
//! - [`ClientSession`]: routes decoded events to one or the other

pub mod conversation;
pub mod error;
pub mod message;
pub mod presence;
pub mod session;

pub use conversation::{ConversationState, Effect};
pub use error::ReconcileError;
pub use message::{DeliveryState, LocalMessage, TempId};
pub use presence::{PresenceTracker, Roster};
pub use session::ClientSession;
