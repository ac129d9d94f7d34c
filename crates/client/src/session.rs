//! Event routing for one signed-in session
//!
//! Decodes live frames and hands each event to the component that owns it.
//! Presence and conversation state never see each other.

use parley_shared::{ClientEvent, ServerEvent, UserId};
use uuid::Uuid;

use crate::conversation::{ConversationState, Effect};
use crate::error::ReconcileError;
use crate::presence::PresenceTracker;

#[derive(Debug)]
pub struct ClientSession {
    session_id: Option<Uuid>,
    pub presence: PresenceTracker,
    pub conversation: ConversationState,
}

impl ClientSession {
    pub fn new(me: UserId) -> Self {
        Self {
            session_id: None,
            presence: PresenceTracker::new(),
            conversation: ConversationState::new(me),
        }
    }

    /// Server-assigned id of the current live connection
    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }

    /// Decode and route one text frame from the live channel
    pub fn handle_frame(&mut self, frame: &str) -> Result<Vec<Effect>, ReconcileError> {
        let event: ServerEvent = serde_json::from_str(frame)?;
        Ok(self.handle(event))
    }

    pub fn handle(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            ServerEvent::Connected { session_id } => {
                tracing::info!(session_id = %session_id, "Live channel connected");
                self.session_id = Some(session_id);
                Vec::new()
            }
            ServerEvent::PresenceRoster { online_users } => {
                self.presence.apply_roster(online_users);
                Vec::new()
            }
            ServerEvent::Pong => Vec::new(),
            ServerEvent::Error { message } => {
                tracing::warn!(error = %message, "Server reported an error");
                Vec::new()
            }
            event => self.conversation.apply(event),
        }
    }

    /// The live channel dropped. Presence is unknown until the next roster;
    /// conversation state is kept and resynchronized by the next full fetch.
    pub fn disconnected(&mut self) {
        tracing::info!(session_id = ?self.session_id, "Live channel disconnected");
        self.session_id = None;
        self.presence.clear();
    }

    /// Heartbeat frame for the live channel
    pub fn ping_frame() -> Result<String, ReconcileError> {
        Ok(serde_json::to_string(&ClientEvent::Ping)?)
    }
}
