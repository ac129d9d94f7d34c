//! Client engine errors

use crate::message::TempId;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Text or image is required")]
    EmptyDraft,
    #[error("No conversation is open")]
    NoActiveConversation,
    #[error("No pending send with id {0}")]
    UnknownTempId(TempId),
    #[error("Confirmed message does not match the pending send")]
    ConfirmationMismatch,
    #[error("Invalid server frame: {0}")]
    Decode(#[from] serde_json::Error),
}
