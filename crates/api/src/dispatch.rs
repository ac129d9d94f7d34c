//! Delivery/read dispatcher
//!
//! Sits between the request surface and the live channel. Writes always go to
//! the Message Store first; live events are only issued for writes that
//! committed, and pushing them is best-effort. A failed or skipped push never
//! fails the request: the counterpart catches up on its next full fetch.
//!
//! Delivery is never persisted. The inference rule lives here and nowhere
//! else (see [`Dispatcher::is_delivered`]).

use std::sync::Arc;

use parley_shared::{
    Message, MessageDraft, MessageId, MessageView, ServerEvent, StoreError, UserId,
};

use crate::store::{MessageStore, UserDirectory};
use crate::websocket::PresenceRegistry;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Text or image is required")]
    EmptyMessage,
    #[error("Cannot send messages to yourself")]
    SelfMessage,
    #[error("Message text exceeds {0} characters")]
    TooLong(usize),
    #[error("Receiver not found")]
    ReceiverNotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Whether a new message reached a live receiver at dispatch time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Live { connections: usize },
    ReceiverOffline,
}

impl Delivery {
    pub fn is_live(&self) -> bool {
        matches!(self, Delivery::Live { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    pub delivery: Delivery,
}

/// Result of a read-acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadAck {
    /// Ids that transitioned to read in this call, oldest first
    pub message_ids: Vec<MessageId>,
}

impl ReadAck {
    pub fn count(&self) -> usize {
        self.message_ids.len()
    }
}

pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn UserDirectory>,
    registry: Arc<PresenceRegistry>,
    max_message_chars: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn UserDirectory>,
        registry: Arc<PresenceRegistry>,
        max_message_chars: usize,
    ) -> Self {
        Self {
            store,
            directory,
            registry,
            max_message_chars,
        }
    }

    /// Persist a message and notify live parties.
    pub async fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        draft: MessageDraft,
    ) -> Result<SendOutcome, DispatchError> {
        let draft = draft.normalized();
        if draft.is_empty() {
            return Err(DispatchError::EmptyMessage);
        }
        if sender == receiver {
            return Err(DispatchError::SelfMessage);
        }
        if let Some(text) = &draft.text {
            if text.chars().count() > self.max_message_chars {
                return Err(DispatchError::TooLong(self.max_message_chars));
            }
        }
        if self.directory.find_user(receiver).await?.is_none() {
            return Err(DispatchError::ReceiverNotFound);
        }

        let message = self.store.insert_message(sender, receiver, draft).await?;
        let delivery = self.notify_new_message(&message).await;

        tracing::info!(
            message_id = %message.id,
            sender_id = %sender,
            receiver_id = %receiver,
            delivered = delivery.is_live(),
            "Message sent"
        );

        Ok(SendOutcome { message, delivery })
    }

    async fn notify_new_message(&self, message: &Message) -> Delivery {
        let receiver_conns = self.registry.lookup(message.receiver_id).await;
        if receiver_conns.is_empty() {
            tracing::debug!(
                receiver_id = %message.receiver_id,
                "Receiver offline, unread count updates on next fetch"
            );
            return Delivery::ReceiverOffline;
        }

        let report = crate::websocket::push_all(
            &receiver_conns,
            &ServerEvent::NewMessage {
                message: message.clone(),
            },
        );

        // Drives the receiver's sidebar badge whether or not this
        // conversation is open on that client.
        match self
            .store
            .count_unread(message.receiver_id, message.sender_id)
            .await
        {
            Ok(unread_count) => {
                crate::websocket::push_all(
                    &receiver_conns,
                    &ServerEvent::UnreadCountChanged {
                        from_user_id: message.sender_id,
                        unread_count,
                    },
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    receiver_id = %message.receiver_id,
                    "Failed to compute unread count for push"
                );
            }
        }

        if report.delivered == 0 {
            return Delivery::ReceiverOffline;
        }

        // Only the sender needs to flip its own status icon
        self.registry
            .push_to(
                message.sender_id,
                &ServerEvent::MessageDelivered {
                    message_id: message.id,
                },
            )
            .await;

        Delivery::Live {
            connections: report.delivered,
        }
    }

    /// Mark every unread message from `partner` to `viewer` as read.
    ///
    /// Idempotent: when nothing was unread, no mutation happens and no event
    /// is issued.
    pub async fn mark_read(&self, viewer: UserId, partner: UserId) -> Result<ReadAck, DispatchError> {
        let message_ids = self.store.mark_read(viewer, partner).await?;
        if message_ids.is_empty() {
            tracing::debug!(viewer_id = %viewer, partner_id = %partner, "Nothing to mark read");
            return Ok(ReadAck::default());
        }

        let read_report = self
            .registry
            .push_to(
                partner,
                &ServerEvent::MessagesRead {
                    message_ids: message_ids.clone(),
                    read_by: viewer,
                },
            )
            .await;

        // Other devices of the viewer clear their badge for this partner
        self.registry
            .push_to(
                viewer,
                &ServerEvent::UnreadCountChanged {
                    from_user_id: partner,
                    unread_count: 0,
                },
            )
            .await;

        tracing::info!(
            viewer_id = %viewer,
            partner_id = %partner,
            count = message_ids.len(),
            partner_connections = read_report.delivered,
            "Messages marked read"
        );

        Ok(ReadAck { message_ids })
    }

    /// Conversation history as seen by `viewer`, oldest first.
    ///
    /// Fetching does not mark anything read.
    pub async fn history(
        &self,
        viewer: UserId,
        partner: UserId,
    ) -> Result<Vec<MessageView>, DispatchError> {
        let messages = self.store.conversation(viewer, partner).await?;
        let partner_online = self.registry.is_online(partner).await;

        Ok(messages
            .into_iter()
            .map(|message| {
                let delivered = Self::is_delivered(&message, viewer, partner_online);
                MessageView { message, delivered }
            })
            .collect())
    }

    /// Delivery inference for a message shown to `viewer`.
    ///
    /// The receiver always has its own messages. For the sender, a message
    /// counts as delivered once read, or while the receiver holds a live
    /// connection: a connected client has either been pushed the message or
    /// resynchronized by full fetch when it (re)connected.
    pub fn is_delivered(message: &Message, viewer: UserId, receiver_online: bool) -> bool {
        if message.receiver_id == viewer {
            return true;
        }
        message.is_read || receiver_online
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::websocket::Connection;
    use parley_shared::UserProfile;
    use tokio::sync::mpsc;

    struct Harness {
        store: Arc<MemoryStore>,
        registry: Arc<PresenceRegistry>,
        dispatcher: Dispatcher,
    }

    async fn harness(users: &[UserId]) -> Harness {
        let store = Arc::new(MemoryStore::new());
        for (i, id) in users.iter().enumerate() {
            store
                .upsert_user(UserProfile {
                    id: *id,
                    full_name: format!("User {i}"),
                    profile_pic: None,
                    is_verified: true,
                    onboarding_completed: true,
                })
                .await;
        }
        let registry = Arc::new(PresenceRegistry::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            store.clone(),
            Arc::clone(&registry),
            100,
        );
        Harness {
            store,
            registry,
            dispatcher,
        }
    }

    async fn connect(
        registry: &PresenceRegistry,
        user: UserId,
    ) -> (Arc<Connection>, mpsc::Receiver<ServerEvent>) {
        let (conn, rx) = Connection::channel(user);
        let conn = registry.register(conn).await;
        (conn, rx)
    }

    /// Drained events, presence rosters excluded
    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if !matches!(event, ServerEvent::PresenceRoster { .. }) {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn test_send_validation() {
        let a = UserId::new();
        let b = UserId::new();
        let h = harness(&[a, b]).await;

        let err = h.dispatcher.send(a, b, MessageDraft::default()).await.unwrap_err();
        assert!(matches!(err, DispatchError::EmptyMessage));

        let err = h.dispatcher.send(a, b, MessageDraft::text("  ")).await.unwrap_err();
        assert!(matches!(err, DispatchError::EmptyMessage));

        let err = h.dispatcher.send(a, a, MessageDraft::text("me")).await.unwrap_err();
        assert!(matches!(err, DispatchError::SelfMessage));

        let err = h
            .dispatcher
            .send(a, b, MessageDraft::text("x".repeat(101)))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::TooLong(100)));

        let err = h
            .dispatcher
            .send(a, UserId::new(), MessageDraft::text("who"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ReceiverNotFound));

        assert_eq!(h.store.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_offline_receiver_issues_no_events() {
        let a = UserId::new();
        let b = UserId::new();
        let h = harness(&[a, b]).await;
        let (_conn, mut a_rx) = connect(&h.registry, a).await;

        let outcome = h.dispatcher.send(a, b, MessageDraft::text("hi")).await.unwrap();

        assert_eq!(outcome.delivery, Delivery::ReceiverOffline);
        assert!(drain(&mut a_rx).is_empty());
        assert!(!outcome.message.is_read);
    }

    #[tokio::test]
    async fn test_send_fans_out_to_every_connection_exactly_once() {
        let a = UserId::new();
        let b = UserId::new();
        let h = harness(&[a, b]).await;
        let (_a1, mut a1_rx) = connect(&h.registry, a).await;
        let (_a2, mut a2_rx) = connect(&h.registry, a).await;
        let (_b1, mut b1_rx) = connect(&h.registry, b).await;
        let (_b2, mut b2_rx) = connect(&h.registry, b).await;

        let outcome = h.dispatcher.send(a, b, MessageDraft::text("hi")).await.unwrap();
        let message = outcome.message;
        assert_eq!(outcome.delivery, Delivery::Live { connections: 2 });

        for rx in [&mut b1_rx, &mut b2_rx] {
            assert_eq!(
                drain(rx),
                vec![
                    ServerEvent::NewMessage {
                        message: message.clone()
                    },
                    ServerEvent::UnreadCountChanged {
                        from_user_id: a,
                        unread_count: 1
                    },
                ]
            );
        }
        for rx in [&mut a1_rx, &mut a2_rx] {
            assert_eq!(
                drain(rx),
                vec![ServerEvent::MessageDelivered {
                    message_id: message.id
                }]
            );
        }
    }

    #[tokio::test]
    async fn test_closed_receiver_connection_does_not_fail_send() {
        let a = UserId::new();
        let b = UserId::new();
        let h = harness(&[a, b]).await;
        let (_a1, mut a_rx) = connect(&h.registry, a).await;
        let (_b1, b_rx) = connect(&h.registry, b).await;
        drop(b_rx);

        let outcome = h.dispatcher.send(a, b, MessageDraft::text("hi")).await.unwrap();

        assert_eq!(outcome.delivery, Delivery::ReceiverOffline);
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(h.store.count_unread(b, a).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_notifies_partner_and_viewer() {
        let a = UserId::new();
        let b = UserId::new();
        let h = harness(&[a, b]).await;

        let first = h.dispatcher.send(a, b, MessageDraft::text("1")).await.unwrap().message;
        let second = h.dispatcher.send(a, b, MessageDraft::text("2")).await.unwrap().message;

        let (_a1, mut a_rx) = connect(&h.registry, a).await;
        let (_b1, mut b_rx) = connect(&h.registry, b).await;

        let ack = h.dispatcher.mark_read(b, a).await.unwrap();
        assert_eq!(ack.message_ids, vec![first.id, second.id]);
        assert_eq!(ack.count(), 2);

        assert_eq!(
            drain(&mut a_rx),
            vec![ServerEvent::MessagesRead {
                message_ids: vec![first.id, second.id],
                read_by: b
            }]
        );
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerEvent::UnreadCountChanged {
                from_user_id: a,
                unread_count: 0
            }]
        );
    }

    #[tokio::test]
    async fn test_mark_read_twice_is_idempotent() {
        let a = UserId::new();
        let b = UserId::new();
        let h = harness(&[a, b]).await;
        h.dispatcher.send(a, b, MessageDraft::text("hi")).await.unwrap();
        let (_a1, mut a_rx) = connect(&h.registry, a).await;

        assert_eq!(h.dispatcher.mark_read(b, a).await.unwrap().count(), 1);
        drain(&mut a_rx);

        let second = h.dispatcher.mark_read(b, a).await.unwrap();
        assert_eq!(second, ReadAck::default());
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_with_nothing_unread_emits_nothing() {
        let a = UserId::new();
        let b = UserId::new();
        let h = harness(&[a, b]).await;
        let (_a1, mut a_rx) = connect(&h.registry, a).await;
        let (_b1, mut b_rx) = connect(&h.registry, b).await;

        assert_eq!(h.dispatcher.mark_read(b, a).await.unwrap().count(), 0);
        assert!(drain(&mut a_rx).is_empty());
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn test_history_delivery_inference() {
        let a = UserId::new();
        let b = UserId::new();
        let h = harness(&[a, b]).await;

        h.dispatcher.send(a, b, MessageDraft::text("hi")).await.unwrap();
        h.dispatcher.send(b, a, MessageDraft::text("yo")).await.unwrap();

        // Receiver offline: sender sees undelivered, receiver-side entries delivered
        let views = h.dispatcher.history(a, b).await.unwrap();
        assert_eq!(views.len(), 2);
        assert!(!views[0].delivered);
        assert!(views[1].delivered);

        // Receiver connects: delivered from then on
        let (b1, _b_rx) = connect(&h.registry, b).await;
        let views = h.dispatcher.history(a, b).await.unwrap();
        assert!(views[0].delivered);

        // Read messages stay delivered after the receiver leaves again
        h.dispatcher.mark_read(b, a).await.unwrap();
        h.registry.unregister(b, b1.session_id).await;
        let views = h.dispatcher.history(a, b).await.unwrap();
        assert!(views[0].delivered);
        assert!(views[0].message.is_read);
    }

    #[tokio::test]
    async fn test_history_does_not_mark_read() {
        let a = UserId::new();
        let b = UserId::new();
        let h = harness(&[a, b]).await;
        h.dispatcher.send(a, b, MessageDraft::text("hi")).await.unwrap();

        h.dispatcher.history(b, a).await.unwrap();
        assert_eq!(h.store.count_unread(b, a).await.unwrap(), 1);
    }
}
