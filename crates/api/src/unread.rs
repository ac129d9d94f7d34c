//! Unread aggregation
//!
//! Unread counts are never cached on the server; every read goes to the
//! Message Store, which flips `is_read` one row at a time. A reader racing a
//! read-acknowledgement sees either the old or the new count.

use std::collections::HashMap;
use std::sync::Arc;

use parley_shared::{ChatPartner, StoreResult, UserId};

use crate::store::{MessageStore, UserDirectory};

pub struct UnreadAggregator {
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn UserDirectory>,
}

impl UnreadAggregator {
    pub fn new(store: Arc<dyn MessageStore>, directory: Arc<dyn UserDirectory>) -> Self {
        Self { store, directory }
    }

    /// Messages from `partner` to `viewer` not yet read
    pub async fn count_unread(&self, viewer: UserId, partner: UserId) -> StoreResult<i64> {
        self.store.count_unread(viewer, partner).await
    }

    /// Conversation partners, most recent first, each with its unread count
    pub async fn chat_partners(&self, viewer: UserId) -> StoreResult<Vec<ChatPartner>> {
        let partner_ids = self.store.partner_ids(viewer).await?;
        if partner_ids.is_empty() {
            return Ok(Vec::new());
        }

        let unread: HashMap<UserId, i64> = self
            .store
            .unread_by_partner(viewer)
            .await?
            .into_iter()
            .collect();
        let mut profiles: HashMap<UserId, _> = self
            .directory
            .profiles(&partner_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        Ok(partner_ids
            .into_iter()
            .filter_map(|id| {
                profiles.remove(&id).map(|profile| ChatPartner {
                    unread_count: unread.get(&id).copied().unwrap_or(0),
                    profile,
                })
            })
            .collect())
    }
}
