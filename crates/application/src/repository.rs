use async_trait::async_trait;
use domain::{
    ConversationMessage, MessageId, OnlineUser, PrivateMessage, RepositoryError, SessionToken,
    UserId, UserPresence,
};

/// 用户与会话相关的持久化接口（由外部协作方提供存储）
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 将会话凭证解析为用户ID，凭证无效时返回 None
    async fn resolve_session(&self, token: &SessionToken)
        -> Result<Option<UserId>, RepositoryError>;

    async fn get_nickname(&self, user_id: UserId) -> Result<Option<String>, RepositoryError>;

    /// 写入持久化的在线标记
    async fn set_presence(&self, user_id: UserId, is_online: bool) -> Result<(), RepositoryError>;

    /// 所有在线标记为 true 的用户
    async fn list_online_users(&self) -> Result<Vec<OnlineUser>, RepositoryError>;

    async fn list_all_user_ids(&self) -> Result<Vec<UserId>, RepositoryError>;

    /// 用户目录（含在线标记）
    async fn list_users(&self) -> Result<Vec<UserPresence>, RepositoryError>;

    /// 注销：清除用户的会话凭证
    async fn revoke_session(&self, user_id: UserId) -> Result<(), RepositoryError>;
}

/// 私信持久化接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 保存一条新私信（is_read = false）
    async fn insert_message(&self, message: PrivateMessage) -> Result<(), RepositoryError>;

    /// 仅当 id、发送方、接收方全部匹配且消息未读时置为已读，返回受影响的行数
    async fn mark_message_read(
        &self,
        message_id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<u64, RepositoryError>;

    /// 两个用户之间的会话历史：先按时间倒序取一页，再以时间正序返回
    async fn list_conversation(
        &self,
        user_id: UserId,
        other_id: UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ConversationMessage>, RepositoryError>;
}
