//! Conversation reconciliation
//!
//! Merges three sources of truth about the same messages: local optimistic
//! inserts, send confirmations from the request surface, and live events.
//! Every merge is by id and idempotent, so events may arrive more than once
//! and in any order relative to REST responses.
//!
//! Only the open conversation is materialized. Events for other partners
//! still update the unread cache. Opening a conversation replaces the list
//! from a full fetch; missed events are never replayed.

use std::collections::{HashMap, HashSet};

use parley_shared::{ChatPartner, Message, MessageDraft, MessageId, MessageView, ServerEvent, UserId};
use time::OffsetDateTime;

use crate::error::ReconcileError;
use crate::message::{DeliveryState, LocalMessage, TempId};

/// Follow-up work for the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Acknowledge everything unread from `sender_id` (`POST /message/mark-read`)
    MarkRead { sender_id: UserId },
    /// A message arrived for a conversation that is not open
    BackgroundMessage {
        from_user_id: UserId,
        message_id: MessageId,
    },
}

/// Client-side state for one signed-in session
#[derive(Debug)]
pub struct ConversationState {
    me: UserId,
    active: Option<UserId>,
    messages: Vec<LocalMessage>,
    unread: HashMap<UserId, i64>,
    /// Receipts naming ids that were not confirmed locally yet
    early_receipts: HashMap<MessageId, DeliveryState>,
    /// Messages seen delivered this session. Delivery is not persisted, so
    /// a later fetch may report it as false once the receiver goes offline.
    seen_delivered: HashSet<MessageId>,
    /// Background messages already counted into `unread`
    background_seen: HashMap<MessageId, UserId>,
}

impl ConversationState {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            active: None,
            messages: Vec::new(),
            unread: HashMap::new(),
            early_receipts: HashMap::new(),
            seen_delivered: HashSet::new(),
            background_seen: HashMap::new(),
        }
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn active_partner(&self) -> Option<UserId> {
        self.active
    }

    /// Messages of the open conversation, oldest first
    pub fn messages(&self) -> &[LocalMessage] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&LocalMessage> {
        self.messages.iter().find(|m| m.server_id() == Some(id))
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending()).count()
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Insert an optimistic entry for the open conversation.
    pub fn begin_send(&mut self, draft: MessageDraft) -> Result<TempId, ReconcileError> {
        let draft = draft.normalized();
        if draft.is_empty() {
            return Err(ReconcileError::EmptyDraft);
        }
        let receiver_id = self.active.ok_or(ReconcileError::NoActiveConversation)?;

        let temp_id = TempId::new();
        self.messages.push(LocalMessage::Optimistic {
            temp_id,
            sender_id: self.me,
            receiver_id,
            draft,
            created_at: OffsetDateTime::now_utc(),
        });

        tracing::debug!(temp_id = %temp_id, receiver_id = %receiver_id, "Optimistic send");
        Ok(temp_id)
    }

    /// Replace the optimistic entry with the persisted message.
    ///
    /// Receipts that arrived before the confirmation are applied now.
    pub fn confirm_send(&mut self, temp_id: TempId, message: Message) -> Result<(), ReconcileError> {
        let index = self
            .position_of_temp(temp_id)
            .ok_or(ReconcileError::UnknownTempId(temp_id))?;
        if message.sender_id != self.me || message.receiver_id != self.messages[index].receiver_id() {
            return Err(ReconcileError::ConfirmationMismatch);
        }

        let state = self
            .early_receipts
            .remove(&message.id)
            .unwrap_or(DeliveryState::Confirmed);

        match self.position_of(message.id) {
            // Already merged from another source; keep that entry
            Some(existing) => {
                self.messages[existing].advance(state);
                self.messages.remove(index);
            }
            None => {
                tracing::debug!(temp_id = %temp_id, message_id = %message.id, state = ?state, "Send confirmed");
                self.messages[index] = LocalMessage::confirmed(message, state);
            }
        }

        self.drop_stale_receipts();
        Ok(())
    }

    /// Roll back a failed send. Returns the removed entry so the draft can be
    /// restored.
    pub fn fail_send(&mut self, temp_id: TempId) -> Result<LocalMessage, ReconcileError> {
        let index = self
            .position_of_temp(temp_id)
            .ok_or(ReconcileError::UnknownTempId(temp_id))?;

        tracing::debug!(temp_id = %temp_id, "Send failed, rolled back");
        let removed = self.messages.remove(index);
        self.drop_stale_receipts();
        Ok(removed)
    }

    // =========================================================================
    // Conversation switching
    // =========================================================================

    /// Make `partner` the open conversation, replacing the list with `history`.
    ///
    /// In-flight sends to the same partner are kept after the history. The
    /// partner's cached unread count is cleared. States never regress: a
    /// message seen delivered stays delivered even if the fetch says otherwise.
    pub fn open_conversation(&mut self, partner: UserId, history: Vec<MessageView>) -> Vec<Effect> {
        let mut pending = Vec::new();
        for entry in std::mem::take(&mut self.messages) {
            match entry {
                LocalMessage::Confirmed { message, state } => {
                    if state == DeliveryState::Delivered {
                        self.seen_delivered.insert(message.id);
                    }
                }
                entry if entry.receiver_id() == partner => pending.push(entry),
                LocalMessage::Optimistic { .. } => {}
            }
        }

        let mut messages = Vec::with_capacity(history.len() + pending.len());
        for view in history {
            if !view.message.is_between(self.me, partner) {
                tracing::warn!(message_id = %view.message.id, "History entry outside conversation, skipped");
                continue;
            }
            let id = view.message.id;
            let mut state = DeliveryState::from_view(&view);
            if let Some(early) = self.early_receipts.remove(&id) {
                state = state.max(early);
            }
            if state == DeliveryState::Read {
                // Persisted from here on
                self.seen_delivered.remove(&id);
            } else if self.seen_delivered.contains(&id) {
                state = state.max(DeliveryState::Delivered);
            }
            messages.push(LocalMessage::confirmed(view.message, state));
        }
        messages.extend(pending);

        self.messages = messages;
        self.active = Some(partner);
        self.unread.remove(&partner);
        self.background_seen.retain(|_, from| *from != partner);
        self.drop_stale_receipts();

        let me = self.me;
        let has_unread = self.messages.iter().any(|m| match m {
            LocalMessage::Confirmed { message, .. } => {
                message.sender_id == partner && message.receiver_id == me && !message.is_read
            }
            LocalMessage::Optimistic { .. } => false,
        });

        tracing::debug!(
            partner_id = %partner,
            messages = self.messages.len(),
            has_unread,
            "Conversation opened"
        );

        if has_unread {
            vec![Effect::MarkRead { sender_id: partner }]
        } else {
            Vec::new()
        }
    }

    // =========================================================================
    // Live events
    // =========================================================================

    /// Merge a live event. Events that do not concern conversations are
    /// ignored.
    pub fn apply(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            ServerEvent::NewMessage { message } => self.apply_new_message(message),
            ServerEvent::MessageDelivered { message_id } => {
                self.apply_receipt(message_id, DeliveryState::Delivered);
                Vec::new()
            }
            ServerEvent::MessagesRead {
                message_ids,
                read_by,
            } => {
                tracing::debug!(read_by = %read_by, count = message_ids.len(), "Messages read");
                for id in message_ids {
                    self.apply_receipt(id, DeliveryState::Read);
                }
                Vec::new()
            }
            ServerEvent::UnreadCountChanged {
                from_user_id,
                unread_count,
            } => {
                self.set_unread(from_user_id, unread_count);
                Vec::new()
            }
            other => {
                tracing::trace!(event = other.kind(), "Not a conversation event");
                Vec::new()
            }
        }
    }

    fn apply_new_message(&mut self, message: Message) -> Vec<Effect> {
        if message.sender_id != self.me && message.receiver_id != self.me {
            tracing::warn!(message_id = %message.id, "Message not addressed to this session");
            return Vec::new();
        }
        let partner = message.partner_of(self.me);
        let incoming_unread = message.receiver_id == self.me && !message.is_read;

        if self.active == Some(partner) {
            if self.position_of(message.id).is_some() {
                return Vec::new();
            }
            let message_id = message.id;
            self.messages
                .push(LocalMessage::confirmed(message, DeliveryState::Delivered));
            tracing::debug!(message_id = %message_id, "Merged live message");

            return if incoming_unread {
                vec![Effect::MarkRead { sender_id: partner }]
            } else {
                Vec::new()
            };
        }

        if !incoming_unread || self.background_seen.contains_key(&message.id) {
            return Vec::new();
        }
        self.background_seen.insert(message.id, partner);
        *self.unread.entry(partner).or_insert(0) += 1;

        vec![Effect::BackgroundMessage {
            from_user_id: partner,
            message_id: message.id,
        }]
    }

    fn apply_receipt(&mut self, id: MessageId, state: DeliveryState) {
        if let Some(index) = self.position_of(id) {
            self.messages[index].advance(state);
            return;
        }

        if self.pending_count() > 0 {
            // May name a send whose confirmation has not returned yet
            let slot = self.early_receipts.entry(id).or_insert(state);
            *slot = (*slot).max(state);
            tracing::debug!(message_id = %id, state = ?state, "Buffered early receipt");
        } else {
            if state == DeliveryState::Delivered {
                self.seen_delivered.insert(id);
            }
            tracing::trace!(message_id = %id, "Receipt for message not in view");
        }
    }

    // =========================================================================
    // Unread cache
    // =========================================================================

    /// Replace the unread cache from a `/message/chats` listing.
    pub fn refresh_unread(&mut self, partners: &[ChatPartner]) {
        self.unread.clear();
        for partner in partners {
            self.set_unread(partner.profile.id, partner.unread_count);
        }
    }

    pub fn unread_count(&self, partner: UserId) -> i64 {
        self.unread.get(&partner).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> i64 {
        self.unread.values().sum()
    }

    /// The open conversation always shows zero: its messages are being
    /// acknowledged as they arrive.
    fn set_unread(&mut self, partner: UserId, count: i64) {
        if count <= 0 || self.active == Some(partner) {
            self.unread.remove(&partner);
        } else {
            self.unread.insert(partner, count);
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn position_of(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.server_id() == Some(id))
    }

    fn position_of_temp(&self, temp_id: TempId) -> Option<usize> {
        self.messages.iter().position(|m| m.temp_id() == Some(temp_id))
    }

    /// With nothing in flight, buffered receipts can no longer match
    fn drop_stale_receipts(&mut self) {
        if self.pending_count() == 0 && !self.early_receipts.is_empty() {
            tracing::trace!(count = self.early_receipts.len(), "Dropping unmatched receipts");
            self.early_receipts.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::UserProfile;

    fn persisted(sender: UserId, receiver: UserId, text: &str) -> Message {
        Message {
            id: MessageId::new(),
            sender_id: sender,
            receiver_id: receiver,
            text: Some(text.to_string()),
            image: None,
            created_at: OffsetDateTime::now_utc(),
            is_read: false,
        }
    }

    fn view(message: Message, delivered: bool) -> MessageView {
        MessageView { message, delivered }
    }

    fn partner(id: UserId, unread_count: i64) -> ChatPartner {
        ChatPartner {
            profile: UserProfile {
                id,
                full_name: "Someone".to_string(),
                profile_pic: None,
                is_verified: true,
                onboarding_completed: true,
            },
            unread_count,
        }
    }

    fn open_with(me: UserId, bob: UserId) -> ConversationState {
        let mut state = ConversationState::new(me);
        state.open_conversation(bob, Vec::new());
        state
    }

    #[test]
    fn test_begin_send_validation() {
        let me = UserId::new();
        let mut state = ConversationState::new(me);

        assert!(matches!(
            state.begin_send(MessageDraft::text("hi")),
            Err(ReconcileError::NoActiveConversation)
        ));

        state.open_conversation(UserId::new(), Vec::new());
        assert!(matches!(
            state.begin_send(MessageDraft::text("   ")),
            Err(ReconcileError::EmptyDraft)
        ));
        assert!(state.messages().is_empty());
    }

    #[test]
    fn test_send_lifecycle() {
        let (me, bob) = (UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let temp = state.begin_send(MessageDraft::text(" hi ")).unwrap();
        assert_eq!(state.messages()[0].state(), None);
        assert_eq!(state.messages()[0].text(), Some("hi"));

        let message = persisted(me, bob, "hi");
        let id = message.id;
        state.confirm_send(temp, message).unwrap();
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Confirmed));

        state.apply(ServerEvent::MessageDelivered { message_id: id });
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Delivered));

        state.apply(ServerEvent::MessagesRead {
            message_ids: vec![id],
            read_by: bob,
        });
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Read));

        // A late delivered receipt never regresses
        state.apply(ServerEvent::MessageDelivered { message_id: id });
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Read));
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn test_failed_send_rolls_back() {
        let (me, bob) = (UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let temp = state.begin_send(MessageDraft::text("oops")).unwrap();
        let removed = state.fail_send(temp).unwrap();

        assert_eq!(removed.text(), Some("oops"));
        assert!(state.messages().is_empty());
        assert!(matches!(
            state.confirm_send(temp, persisted(me, bob, "oops")),
            Err(ReconcileError::UnknownTempId(_))
        ));
    }

    #[test]
    fn test_receipt_before_confirmation_is_buffered() {
        let (me, bob) = (UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let temp = state.begin_send(MessageDraft::text("fast")).unwrap();
        let message = persisted(me, bob, "fast");
        let id = message.id;

        // Both receipts race ahead of the send response
        state.apply(ServerEvent::MessagesRead {
            message_ids: vec![id],
            read_by: bob,
        });
        state.apply(ServerEvent::MessageDelivered { message_id: id });
        assert_eq!(state.messages()[0].state(), None);

        state.confirm_send(temp, message).unwrap();
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Read));
    }

    #[test]
    fn test_confirmation_must_match_pending_send() {
        let (me, bob) = (UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let temp = state.begin_send(MessageDraft::text("hi")).unwrap();
        let wrong = persisted(me, UserId::new(), "hi");

        assert!(matches!(
            state.confirm_send(temp, wrong),
            Err(ReconcileError::ConfirmationMismatch)
        ));
        assert_eq!(state.pending_count(), 1);
    }

    #[test]
    fn test_offline_receiver_scenario() {
        let (me, bob) = (UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let temp = state.begin_send(MessageDraft::text("hi")).unwrap();
        let message = persisted(me, bob, "hi");
        let id = message.id;
        state.confirm_send(temp, message.clone()).unwrap();

        // Bob offline: confirmed only
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Confirmed));

        // Reopening before Bob connects keeps it undelivered
        state.open_conversation(bob, vec![view(message, false)]);
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Confirmed));

        // Bob connects, reads
        state.apply(ServerEvent::MessagesRead {
            message_ids: vec![id],
            read_by: bob,
        });
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Read));
    }

    #[test]
    fn test_duplicate_events_are_idempotent() {
        let (me, bob) = (UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let incoming = persisted(bob, me, "yo");
        let first = state.apply(ServerEvent::NewMessage {
            message: incoming.clone(),
        });
        let second = state.apply(ServerEvent::NewMessage { message: incoming });

        assert_eq!(first, vec![Effect::MarkRead { sender_id: bob }]);
        assert!(second.is_empty());
        assert_eq!(state.messages().len(), 1);

        let read = ServerEvent::MessagesRead {
            message_ids: vec![MessageId::new()],
            read_by: bob,
        };
        state.apply(read.clone());
        state.apply(read);
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn test_background_message_updates_badge_once() {
        let (me, bob, carol) = (UserId::new(), UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let from_carol = persisted(carol, me, "psst");
        let effects = state.apply(ServerEvent::NewMessage {
            message: from_carol.clone(),
        });
        assert_eq!(
            effects,
            vec![Effect::BackgroundMessage {
                from_user_id: carol,
                message_id: from_carol.id
            }]
        );
        assert!(state
            .apply(ServerEvent::NewMessage {
                message: from_carol.clone()
            })
            .is_empty());
        assert_eq!(state.unread_count(carol), 1);
        assert!(state.messages().is_empty());

        // Server count is authoritative
        state.apply(ServerEvent::UnreadCountChanged {
            from_user_id: carol,
            unread_count: 3,
        });
        assert_eq!(state.unread_count(carol), 3);
        assert_eq!(state.total_unread(), 3);

        // Opening clears the badge and asks for a read-acknowledgement
        let effects = state.open_conversation(carol, vec![view(from_carol, true)]);
        assert_eq!(effects, vec![Effect::MarkRead { sender_id: carol }]);
        assert_eq!(state.unread_count(carol), 0);
        assert_eq!(state.active_partner(), Some(carol));
    }

    #[test]
    fn test_open_conversation_keeps_inflight_sends() {
        let (me, bob, carol) = (UserId::new(), UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let temp = state.begin_send(MessageDraft::text("still going")).unwrap();
        let older = persisted(bob, me, "older");
        let mut read_older = older.clone();
        read_older.is_read = true;

        let effects = state.open_conversation(bob, vec![view(read_older, true)]);
        assert!(effects.is_empty());
        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.messages()[1].temp_id(), Some(temp));

        // Switching away drops the list, including the pending entry
        state.open_conversation(carol, Vec::new());
        assert!(state.messages().is_empty());
    }

    #[test]
    fn test_reopen_keeps_delivered_state() {
        let (me, bob) = (UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let temp = state.begin_send(MessageDraft::text("hi")).unwrap();
        let message = persisted(me, bob, "hi");
        let id = message.id;
        state.confirm_send(temp, message.clone()).unwrap();
        state.apply(ServerEvent::MessageDelivered { message_id: id });

        // Bob went offline: the fetch no longer reports delivery
        state.open_conversation(bob, vec![view(message.clone(), false)]);
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Delivered));

        // Still held after switching away and back
        let carol = UserId::new();
        state.open_conversation(carol, Vec::new());
        state.open_conversation(bob, vec![view(message.clone(), false)]);
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Delivered));

        // Read is persisted and wins
        let mut read = message;
        read.is_read = true;
        state.open_conversation(bob, vec![view(read, false)]);
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Read));
    }

    #[test]
    fn test_delivered_receipt_while_elsewhere_survives_reopen() {
        let (me, bob, carol) = (UserId::new(), UserId::new(), UserId::new());
        let mut state = open_with(me, carol);

        let message = persisted(me, bob, "sent earlier");
        let id = message.id;
        state.apply(ServerEvent::MessageDelivered { message_id: id });

        state.open_conversation(bob, vec![view(message, false)]);
        assert_eq!(state.message(id).unwrap().state(), Some(DeliveryState::Delivered));
    }

    #[test]
    fn test_refresh_unread_replaces_cache() {
        let (me, bob, carol) = (UserId::new(), UserId::new(), UserId::new());
        let mut state = ConversationState::new(me);

        state.refresh_unread(&[partner(bob, 2), partner(carol, 5)]);
        assert_eq!(state.total_unread(), 7);

        state.refresh_unread(&[partner(bob, 1), partner(carol, 0)]);
        assert_eq!(state.unread_count(bob), 1);
        assert_eq!(state.unread_count(carol), 0);
        assert_eq!(state.total_unread(), 1);

        // The open conversation never shows a badge
        state.open_conversation(bob, Vec::new());
        state.apply(ServerEvent::UnreadCountChanged {
            from_user_id: bob,
            unread_count: 4,
        });
        assert_eq!(state.unread_count(bob), 0);
    }

    #[test]
    fn test_read_never_precedes_confirmation() {
        let (me, bob) = (UserId::new(), UserId::new());
        let mut state = open_with(me, bob);

        let temp = state.begin_send(MessageDraft::text("a")).unwrap();
        for _ in 0..3 {
            state.apply(ServerEvent::MessagesRead {
                message_ids: vec![MessageId::new()],
                read_by: bob,
            });
        }

        // Every entry with a read state is confirmed
        assert!(state
            .messages()
            .iter()
            .all(|m| m.state() != Some(DeliveryState::Read) || m.server_id().is_some()));

        state.fail_send(temp).unwrap();
        state.begin_send(MessageDraft::text("b")).unwrap();
        assert!(state.messages().iter().all(|m| m.state().is_none()));
    }
}
