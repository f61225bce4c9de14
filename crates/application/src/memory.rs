//! 内存存储实现
//!
//! 同时实现 [`UserRepository`] 与 [`MessageRepository`]，供单元测试和集成测试使用。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ConversationMessage, MessageId, OnlineUser, PrivateMessage, RepositoryError, SessionToken,
    UserId, UserPresence,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repository::{MessageRepository, UserRepository};

#[derive(Debug, Clone)]
struct UserRecord {
    nickname: String,
    token: Option<String>,
    is_online: bool,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserRecord>,
    messages: Vec<PrivateMessage>,
}

/// 内存中的用户与私信存储
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    presence_writes: Arc<AtomicUsize>,
    fail_inserts: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建用户，可选地附带会话凭证
    pub async fn insert_user(&self, nickname: &str, token: Option<&str>) -> UserId {
        let id = UserId::from(Uuid::new_v4());
        let record = UserRecord {
            nickname: nickname.to_owned(),
            token: token.map(str::to_owned),
            is_online: false,
        };
        self.state.write().await.users.insert(id, record);
        id
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state
            .read()
            .await
            .users
            .get(&user_id)
            .map(|user| user.is_online)
            .unwrap_or(false)
    }

    /// 绕过计数直接改写在线标记，用来模拟上次进程遗留的脏数据
    pub async fn force_presence(&self, user_id: UserId, is_online: bool) {
        if let Some(user) = self.state.write().await.users.get_mut(&user_id) {
            user.is_online = is_online;
        }
    }

    /// `set_presence` 成功写入的次数
    pub fn presence_writes(&self) -> usize {
        self.presence_writes.load(Ordering::SeqCst)
    }

    pub async fn has_session(&self, user_id: UserId) -> bool {
        self.state
            .read()
            .await
            .users
            .get(&user_id)
            .map(|user| user.token.is_some())
            .unwrap_or(false)
    }

    pub async fn messages(&self) -> Vec<PrivateMessage> {
        self.state.read().await.messages.clone()
    }

    /// 让后续的私信写入全部失败
    pub fn fail_message_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn resolve_session(
        &self,
        token: &SessionToken,
    ) -> Result<Option<UserId>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .find(|(_, user)| user.token.as_deref() == Some(token.as_str()))
            .map(|(id, _)| *id))
    }

    async fn get_nickname(&self, user_id: UserId) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .users
            .get(&user_id)
            .map(|user| user.nickname.clone()))
    }

    async fn set_presence(&self, user_id: UserId, is_online: bool) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(RepositoryError::NotFound)?;
        user.is_online = is_online;
        self.presence_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_online_users(&self) -> Result<Vec<OnlineUser>, RepositoryError> {
        let state = self.state.read().await;
        let mut online: Vec<OnlineUser> = state
            .users
            .iter()
            .filter(|(_, user)| user.is_online)
            .map(|(id, user)| OnlineUser {
                id: *id,
                nickname: user.nickname.clone(),
            })
            .collect();
        online.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        Ok(online)
    }

    async fn list_all_user_ids(&self) -> Result<Vec<UserId>, RepositoryError> {
        let mut ids: Vec<UserId> = self.state.read().await.users.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_users(&self) -> Result<Vec<UserPresence>, RepositoryError> {
        let state = self.state.read().await;
        let mut users: Vec<UserPresence> = state
            .users
            .iter()
            .map(|(id, user)| UserPresence {
                id: *id,
                nickname: user.nickname.clone(),
                is_online: user.is_online,
            })
            .collect();
        users.sort_by(|a, b| a.nickname.cmp(&b.nickname));
        Ok(users)
    }

    async fn revoke_session(&self, user_id: UserId) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(RepositoryError::NotFound)?;
        user.token = None;
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn insert_message(&self, message: PrivateMessage) -> Result<(), RepositoryError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("message store unavailable"));
        }
        let mut state = self.state.write().await;
        // 与外键约束一致
        if !state.users.contains_key(&message.sender_id)
            || !state.users.contains_key(&message.receiver_id)
        {
            return Err(RepositoryError::storage("unknown sender or receiver"));
        }
        if state.messages.iter().any(|stored| stored.id == message.id) {
            return Err(RepositoryError::Conflict);
        }
        state.messages.push(message);
        Ok(())
    }

    async fn mark_message_read(
        &self,
        message_id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let affected = state
            .messages
            .iter_mut()
            .filter(|message| {
                message.id == message_id && message.can_be_marked_read_by(receiver_id, sender_id)
            })
            .map(|message| message.is_read = true)
            .count();
        Ok(affected as u64)
    }

    async fn list_conversation(
        &self,
        user_id: UserId,
        other_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationMessage>, RepositoryError> {
        let state = self.state.read().await;
        let mut page: Vec<&PrivateMessage> = state
            .messages
            .iter()
            .filter(|message| {
                (message.sender_id == user_id && message.receiver_id == other_id)
                    || (message.sender_id == other_id && message.receiver_id == user_id)
            })
            .collect();
        page.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut page: Vec<ConversationMessage> = page
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|message| ConversationMessage {
                sender_nickname: state
                    .users
                    .get(&message.sender_id)
                    .map(|user| user.nickname.clone())
                    .unwrap_or_default(),
                message: message.clone(),
            })
            .collect();
        page.reverse();
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domain::MessageContent;

    fn message(sender: UserId, receiver: UserId, text: &str, minutes: i64) -> PrivateMessage {
        PrivateMessage::new(
            MessageId::generate(),
            sender,
            receiver,
            MessageContent::from_stored(text),
            Utc::now() + Duration::minutes(minutes),
        )
    }

    #[tokio::test]
    async fn mark_read_requires_matching_pair_and_unread() {
        let store = MemoryStore::new();
        let alice = store.insert_user("alice", None).await;
        let bob = store.insert_user("bob", None).await;
        let msg = message(alice, bob, "hi", 0);
        let id = msg.id;
        store.insert_message(msg).await.unwrap();

        assert_eq!(store.mark_message_read(id, bob, alice).await.unwrap(), 0);
        assert_eq!(store.mark_message_read(id, alice, bob).await.unwrap(), 1);
        assert_eq!(store.mark_message_read(id, alice, bob).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn conversation_page_is_newest_window_in_ascending_order() {
        let store = MemoryStore::new();
        let alice = store.insert_user("alice", None).await;
        let bob = store.insert_user("bob", None).await;
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            store
                .insert_message(message(alice, bob, text, i as i64))
                .await
                .unwrap();
        }

        let page = store.list_conversation(bob, alice, 2, 0).await.unwrap();
        let texts: Vec<&str> = page.iter().map(|m| m.message.content.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert_eq!(page[0].sender_nickname, "alice");
    }

    #[tokio::test]
    async fn insert_rejects_unknown_receiver() {
        let store = MemoryStore::new();
        let alice = store.insert_user("alice", None).await;
        let ghost = UserId::from(Uuid::new_v4());
        assert!(store.insert_message(message(alice, ghost, "x", 0)).await.is_err());
    }
}
