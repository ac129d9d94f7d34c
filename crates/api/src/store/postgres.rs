//! Postgres-backed store

use async_trait::async_trait;
use parley_shared::{Message, MessageDraft, MessageId, StoreResult, UserId, UserProfile};
use sqlx::PgPool;
use uuid::Uuid;

use super::{MessageStore, UserDirectory};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, text, image, created_at, is_read";

/// Message store and user directory over a Postgres pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn insert_message(
        &self,
        sender: UserId,
        receiver: UserId,
        draft: MessageDraft,
    ) -> StoreResult<Message> {
        let message = sqlx::query_as::<_, Message>(&format!(
            r#"
            INSERT INTO messages (sender_id, receiver_id, text, image)
            VALUES ($1, $2, $3, $4)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(sender)
        .bind(receiver)
        .bind(draft.text)
        .bind(draft.image)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    async fn conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE (sender_id = $1 AND receiver_id = $2)
               OR (sender_id = $2 AND receiver_id = $1)
            ORDER BY created_at ASC, seq ASC
            "#
        ))
        .bind(a)
        .bind(b)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn mark_read(&self, viewer: UserId, partner: UserId) -> StoreResult<Vec<MessageId>> {
        // Single conditional write: rows already flipped by a concurrent
        // statement fail the re-checked predicate and are not returned twice.
        let ids = sqlx::query_scalar::<_, MessageId>(
            r#"
            WITH updated AS (
                UPDATE messages
                SET is_read = TRUE
                WHERE sender_id = $1 AND receiver_id = $2 AND is_read = FALSE
                RETURNING id, created_at, seq
            )
            SELECT id FROM updated ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(partner)
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn count_unread(&self, viewer: UserId, partner: UserId) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM messages
            WHERE sender_id = $1 AND receiver_id = $2 AND is_read = FALSE
            "#,
        )
        .bind(partner)
        .bind(viewer)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn unread_by_partner(&self, viewer: UserId) -> StoreResult<Vec<(UserId, i64)>> {
        let rows = sqlx::query_as::<_, (UserId, i64)>(
            r#"
            SELECT sender_id, COUNT(*)
            FROM messages
            WHERE receiver_id = $1 AND is_read = FALSE
            GROUP BY sender_id
            "#,
        )
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn partner_ids(&self, viewer: UserId) -> StoreResult<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, UserId>(
            r#"
            SELECT partner_id
            FROM (
                SELECT CASE WHEN sender_id = $1 THEN receiver_id ELSE sender_id END AS partner_id,
                       MAX(seq) AS last_seq
                FROM messages
                WHERE sender_id = $1 OR receiver_id = $1
                GROUP BY 1
            ) partners
            ORDER BY last_seq DESC
            "#,
        )
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn purge_user(&self, user: UserId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE sender_id = $1 OR receiver_id = $1")
            .bind(user)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            user_id = %user,
            deleted = result.rows_affected(),
            "Purged user messages"
        );

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<UserProfile>> {
        let user = sqlx::query_as::<_, UserProfile>(
            r#"
            SELECT id, full_name, profile_pic, is_verified, onboarding_completed
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn profiles(&self, ids: &[UserId]) -> StoreResult<Vec<UserProfile>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<Uuid> = ids.iter().map(|id| id.0).collect();

        let users = sqlx::query_as::<_, UserProfile>(
            r#"
            SELECT id, full_name, profile_pic, is_verified, onboarding_completed
            FROM users
            WHERE id = ANY($1)
            "#,
        )
        .bind(raw)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn list_contacts(&self, viewer: UserId) -> StoreResult<Vec<UserProfile>> {
        let users = sqlx::query_as::<_, UserProfile>(
            r#"
            SELECT id, full_name, profile_pic, is_verified, onboarding_completed
            FROM users
            WHERE id <> $1
            ORDER BY full_name ASC
            "#,
        )
        .bind(viewer)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{create_pool, run_migrations};

    async fn seeded_store() -> (PgStore, UserId, UserId) {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = create_pool(&url, 2).await.expect("Failed to create pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let a = UserId::new();
        let b = UserId::new();
        for (id, name) in [(a, "Alice"), (b, "Bob")] {
            sqlx::query(
                "INSERT INTO users (id, full_name, is_verified, onboarding_completed) VALUES ($1, $2, TRUE, TRUE)",
            )
            .bind(id)
            .bind(name)
            .execute(&pool)
            .await
            .expect("Failed to seed user");
        }

        (PgStore::new(pool), a, b)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_mark_read_returns_transitioned_ids_once() {
        let (store, a, b) = seeded_store().await;

        let first = store.insert_message(a, b, MessageDraft::text("one")).await.unwrap();
        let second = store.insert_message(a, b, MessageDraft::text("two")).await.unwrap();
        assert_eq!(store.count_unread(b, a).await.unwrap(), 2);

        let ids = store.mark_read(b, a).await.unwrap();
        assert_eq!(ids, vec![first.id, second.id]);
        assert!(store.mark_read(b, a).await.unwrap().is_empty());
        assert_eq!(store.count_unread(b, a).await.unwrap(), 0);

        assert_eq!(store.purge_user(a).await.unwrap(), 2);
    }
}
