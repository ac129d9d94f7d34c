//! Client-side message entries
//!
//! An entry is either an optimistic local insert or a server-confirmed
//! message carrying a [`DeliveryState`]. Only confirmed entries have a state,
//! so a message cannot be delivered or read before it is confirmed.

use std::fmt;

use parley_shared::{Message, MessageDraft, MessageId, MessageView, UserId};
use time::OffsetDateTime;
use uuid::Uuid;

/// Locally generated id of a send that has not been confirmed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempId(Uuid);

impl TempId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp-{}", self.0)
    }
}

/// Stages of a confirmed message. Ordered: `Read` implies `Delivered`
/// implies `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeliveryState {
    Confirmed,
    Delivered,
    Read,
}

impl DeliveryState {
    /// State of a history entry as reported by the server
    pub fn from_view(view: &MessageView) -> Self {
        if view.message.is_read {
            DeliveryState::Read
        } else if view.delivered {
            DeliveryState::Delivered
        } else {
            DeliveryState::Confirmed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalMessage {
    /// Inserted on submit, waiting for the send request to return
    Optimistic {
        temp_id: TempId,
        sender_id: UserId,
        receiver_id: UserId,
        draft: MessageDraft,
        created_at: OffsetDateTime,
    },
    Confirmed {
        message: Message,
        state: DeliveryState,
    },
}

impl LocalMessage {
    pub fn confirmed(message: Message, state: DeliveryState) -> Self {
        // The persisted read flag is authoritative
        let state = if message.is_read {
            DeliveryState::Read
        } else {
            state
        };
        LocalMessage::Confirmed { message, state }
    }

    pub fn server_id(&self) -> Option<MessageId> {
        match self {
            LocalMessage::Confirmed { message, .. } => Some(message.id),
            LocalMessage::Optimistic { .. } => None,
        }
    }

    pub fn temp_id(&self) -> Option<TempId> {
        match self {
            LocalMessage::Optimistic { temp_id, .. } => Some(*temp_id),
            LocalMessage::Confirmed { .. } => None,
        }
    }

    /// `None` while the send is still in flight
    pub fn state(&self) -> Option<DeliveryState> {
        match self {
            LocalMessage::Confirmed { state, .. } => Some(*state),
            LocalMessage::Optimistic { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, LocalMessage::Optimistic { .. })
    }

    pub fn sender_id(&self) -> UserId {
        match self {
            LocalMessage::Optimistic { sender_id, .. } => *sender_id,
            LocalMessage::Confirmed { message, .. } => message.sender_id,
        }
    }

    pub fn receiver_id(&self) -> UserId {
        match self {
            LocalMessage::Optimistic { receiver_id, .. } => *receiver_id,
            LocalMessage::Confirmed { message, .. } => message.receiver_id,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            LocalMessage::Optimistic { draft, .. } => draft.text.as_deref(),
            LocalMessage::Confirmed { message, .. } => message.text.as_deref(),
        }
    }

    /// Move a confirmed message forward. Never regresses; returns whether
    /// anything changed.
    pub fn advance(&mut self, to: DeliveryState) -> bool {
        match self {
            LocalMessage::Confirmed { message, state } if to > *state => {
                *state = to;
                if to == DeliveryState::Read {
                    message.is_read = true;
                }
                true
            }
            _ => false,
        }
    }
}
