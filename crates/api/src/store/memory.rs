//! In-process store used by tests and `STORE=memory` runs

use std::collections::HashMap;

use async_trait::async_trait;
use parley_shared::{Message, MessageDraft, MessageId, StoreResult, UserId, UserProfile};
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

use super::{MessageStore, UserDirectory};

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, UserProfile>,
    /// Kept in insertion order, which is also creation order
    messages: Vec<Message>,
    last_created_at: Option<OffsetDateTime>,
}

impl Inner {
    /// Wall clock, bumped so creation times strictly increase
    fn next_created_at(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let created_at = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(created_at);
        created_at
    }
}

/// Lock-guarded store; every mutation happens under one write lock
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror an externally issued account
    pub async fn upsert_user(&self, profile: UserProfile) {
        let mut inner = self.inner.write().await;
        inner.users.insert(profile.id, profile);
    }

    pub async fn message_count(&self) -> usize {
        self.inner.read().await.messages.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(
        &self,
        sender: UserId,
        receiver: UserId,
        draft: MessageDraft,
    ) -> StoreResult<Message> {
        let mut inner = self.inner.write().await;
        let message = Message {
            id: MessageId::new(),
            sender_id: sender,
            receiver_id: receiver,
            text: draft.text,
            image: draft.image,
            created_at: inner.next_created_at(),
            is_read: false,
        };
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect())
    }

    async fn mark_read(&self, viewer: UserId, partner: UserId) -> StoreResult<Vec<MessageId>> {
        let mut inner = self.inner.write().await;
        let mut ids = Vec::new();
        for message in inner
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == partner && m.receiver_id == viewer && !m.is_read)
        {
            message.is_read = true;
            ids.push(message.id);
        }
        Ok(ids)
    }

    async fn count_unread(&self, viewer: UserId, partner: UserId) -> StoreResult<i64> {
        let inner = self.inner.read().await;
        let count = inner
            .messages
            .iter()
            .filter(|m| m.sender_id == partner && m.receiver_id == viewer && !m.is_read)
            .count();
        Ok(count as i64)
    }

    async fn unread_by_partner(&self, viewer: UserId) -> StoreResult<Vec<(UserId, i64)>> {
        let inner = self.inner.read().await;
        let mut counts: HashMap<UserId, i64> = HashMap::new();
        for message in inner
            .messages
            .iter()
            .filter(|m| m.receiver_id == viewer && !m.is_read)
        {
            *counts.entry(message.sender_id).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn partner_ids(&self, viewer: UserId) -> StoreResult<Vec<UserId>> {
        let inner = self.inner.read().await;
        let mut partners = Vec::new();
        for message in inner.messages.iter().rev() {
            if message.sender_id != viewer && message.receiver_id != viewer {
                continue;
            }
            let partner = message.partner_of(viewer);
            if !partners.contains(&partner) {
                partners.push(partner);
            }
        }
        Ok(partners)
    }

    async fn purge_user(&self, user: UserId) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.messages.len();
        inner
            .messages
            .retain(|m| m.sender_id != user && m.receiver_id != user);
        Ok((before - inner.messages.len()) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<UserProfile>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn profiles(&self, ids: &[UserId]) -> StoreResult<Vec<UserProfile>> {
        let inner = self.inner.read().await;
        Ok(ids.iter().filter_map(|id| inner.users.get(id).cloned()).collect())
    }

    async fn list_contacts(&self, viewer: UserId) -> StoreResult<Vec<UserProfile>> {
        let inner = self.inner.read().await;
        let mut users: Vec<UserProfile> = inner
            .users
            .values()
            .filter(|u| u.id != viewer)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(users)
    }
}
