//! Message Store and User Directory
//!
//! The Message Store is the single source of truth for message content and
//! read state. Delivery state is never persisted here; the dispatcher derives
//! it from the presence registry.
//!
//! Two backends implement the traits:
//! - [`PgStore`]: Postgres via sqlx, used in production
//! - [`MemoryStore`]: lock-guarded in-process store for tests and local runs

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use parley_shared::{Message, MessageDraft, MessageId, StoreResult, UserId, UserProfile};

/// Durable record of every message
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and creation time
    async fn insert_message(
        &self,
        sender: UserId,
        receiver: UserId,
        draft: MessageDraft,
    ) -> StoreResult<Message>;

    /// Every message between `a` and `b`, oldest first
    async fn conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>>;

    /// Atomically flip every unread message from `partner` to `viewer`.
    ///
    /// Returns exactly the ids that transitioned in this call, oldest first.
    /// A concurrent call never returns an id this call returned.
    async fn mark_read(&self, viewer: UserId, partner: UserId) -> StoreResult<Vec<MessageId>>;

    /// Count of messages from `partner` to `viewer` with `is_read = false`
    async fn count_unread(&self, viewer: UserId, partner: UserId) -> StoreResult<i64>;

    /// Non-zero unread counts addressed to `viewer`, grouped by sender
    async fn unread_by_partner(&self, viewer: UserId) -> StoreResult<Vec<(UserId, i64)>>;

    /// Everyone `viewer` has exchanged messages with, most recent first
    async fn partner_ids(&self, viewer: UserId) -> StoreResult<Vec<UserId>>;

    /// Remove every message sent or received by `user` in one atomic step
    async fn purge_user(&self, user: UserId) -> StoreResult<u64>;

    /// Connectivity check for readiness checks
    async fn ping(&self) -> StoreResult<()>;
}

/// Read-only view of externally issued accounts
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<UserProfile>>;

    /// Profiles for `ids`; unknown ids are skipped
    async fn profiles(&self, ids: &[UserId]) -> StoreResult<Vec<UserProfile>>;

    /// Every account except `viewer`, ordered by name
    async fn list_contacts(&self, viewer: UserId) -> StoreResult<Vec<UserProfile>>;
}
