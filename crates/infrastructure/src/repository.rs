use std::sync::Arc;

use application::repository::{MessageRepository, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ConversationMessage, MessageContent, MessageId, OnlineUser, PrivateMessage, RepositoryError,
    SessionToken, UserId, UserPresence,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

#[derive(Debug, FromRow)]
struct OnlineUserRecord {
    id: Uuid,
    nickname: String,
}

impl From<OnlineUserRecord> for OnlineUser {
    fn from(value: OnlineUserRecord) -> Self {
        Self {
            id: UserId::from(value.id),
            nickname: value.nickname,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserPresenceRecord {
    id: Uuid,
    nickname: String,
    is_online: bool,
}

impl From<UserPresenceRecord> for UserPresence {
    fn from(value: UserPresenceRecord) -> Self {
        Self {
            id: UserId::from(value.id),
            nickname: value.nickname,
            is_online: value.is_online,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: String,
    created_at: DateTime<Utc>,
    is_read: bool,
    sender_nickname: String,
}

impl From<ConversationRecord> for ConversationMessage {
    fn from(value: ConversationRecord) -> Self {
        Self {
            message: PrivateMessage {
                id: MessageId::from(value.id),
                sender_id: UserId::from(value.sender_id),
                receiver_id: UserId::from(value.receiver_id),
                content: MessageContent::from_stored(value.content),
                created_at: value.created_at,
                is_read: value.is_read,
            },
            sender_nickname: value.sender_nickname,
        }
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn resolve_session(
        &self,
        token: &SessionToken,
    ) -> Result<Option<UserId>, RepositoryError> {
        let id: Option<Uuid> = sqlx::query_scalar(r#"SELECT id FROM users WHERE token = $1"#)
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(id.map(UserId::from))
    }

    async fn get_nickname(&self, user_id: UserId) -> Result<Option<String>, RepositoryError> {
        sqlx::query_scalar(r#"SELECT nickname FROM users WHERE id = $1"#)
            .bind(Uuid::from(user_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn set_presence(&self, user_id: UserId, is_online: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE users SET is_online = $2, last_seen = NOW() WHERE id = $1"#,
        )
        .bind(Uuid::from(user_id))
        .bind(is_online)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_online_users(&self) -> Result<Vec<OnlineUser>, RepositoryError> {
        let records = sqlx::query_as::<_, OnlineUserRecord>(
            r#"SELECT id, nickname FROM users WHERE is_online = TRUE ORDER BY nickname"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(OnlineUser::from).collect())
    }

    async fn list_all_user_ids(&self) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(r#"SELECT id FROM users ORDER BY id"#)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(ids.into_iter().map(UserId::from).collect())
    }

    async fn list_users(&self) -> Result<Vec<UserPresence>, RepositoryError> {
        let records = sqlx::query_as::<_, UserPresenceRecord>(
            r#"SELECT id, nickname, is_online FROM users ORDER BY nickname"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(UserPresence::from).collect())
    }

    async fn revoke_session(&self, user_id: UserId) -> Result<(), RepositoryError> {
        let result = sqlx::query(r#"UPDATE users SET token = NULL WHERE id = $1"#)
            .bind(Uuid::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert_message(&self, message: PrivateMessage) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO private_messages (id, sender_id, receiver_id, content, created_at, is_read)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.sender_id))
        .bind(Uuid::from(message.receiver_id))
        .bind(message.content.as_str())
        .bind(message.created_at)
        .bind(message.is_read)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn mark_message_read(
        &self,
        message_id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE private_messages
            SET is_read = TRUE
            WHERE id = $1 AND sender_id = $2 AND receiver_id = $3 AND is_read = FALSE
            "#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(sender_id))
        .bind(Uuid::from(receiver_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn list_conversation(
        &self,
        user_id: UserId,
        other_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationMessage>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT m.id, m.sender_id, m.receiver_id, m.content, m.created_at, m.is_read,
                   u.nickname AS sender_nickname
            FROM private_messages m
            JOIN users u ON u.id = m.sender_id
            WHERE (m.sender_id = $1 AND m.receiver_id = $2)
               OR (m.sender_id = $2 AND m.receiver_id = $1)
            ORDER BY m.created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(Uuid::from(other_id))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut items: Vec<ConversationMessage> =
            records.into_iter().map(ConversationMessage::from).collect();
        items.reverse();
        Ok(items)
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
