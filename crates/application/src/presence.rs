use std::collections::HashSet;
use std::sync::Arc;

use domain::UserId;
use tokio::sync::Mutex;

use crate::error::ApplicationError;
use crate::frame::{ServerFrame, UserStatusPayload};
use crate::registry::{ConnectionRegistry, DeliveryReport};
use crate::repository::UserRepository;

/// 一次全量对账中被纠正的在线标记
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PresenceChanges {
    pub went_online: Vec<UserId>,
    pub went_offline: Vec<UserId>,
    /// 写入失败、留到下一次对账再纠正的用户
    pub failed: Vec<UserId>,
}

impl PresenceChanges {
    pub fn is_empty(&self) -> bool {
        self.went_online.is_empty() && self.went_offline.is_empty() && self.failed.is_empty()
    }
}

/// 在线状态追踪器
///
/// 让持久化的在线标记与注册表保持一致，并向所有连接广播在线快照。
/// 追踪器只读注册表，从不修改它。
///
/// 所有对账串行执行：注册表快照、比较和写入都在同一把锁内完成，
/// 触发点的广播也在锁内发出，后一次对账总能看到前一次的写入结果。
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    users: Arc<dyn UserRepository>,
    /// 对账锁，保护最近一次以 `user_status` 宣告为在线的用户集合
    announced: Mutex<HashSet<UserId>>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>, users: Arc<dyn UserRepository>) -> Self {
        Self {
            registry,
            users,
            announced: Mutex::new(HashSet::new()),
        }
    }

    /// 全量对账：逐个用户比较注册表成员关系与持久化标记，只写入不一致的标记
    pub async fn recompute(&self) -> Result<PresenceChanges, ApplicationError> {
        let _guard = self.announced.lock().await;
        let (changes, _) = self.reconcile().await?;
        Ok(changes)
    }

    /// 调用方必须持有对账锁。返回纠正结果以及本次使用的注册表快照
    async fn reconcile(&self) -> Result<(PresenceChanges, HashSet<UserId>), ApplicationError> {
        let all_users = self.users.list_all_user_ids().await?;
        let flagged: HashSet<UserId> = self
            .users
            .list_online_users()
            .await?
            .into_iter()
            .map(|user| user.id)
            .collect();
        // 先拿快照，存储调用期间不持有注册表锁
        let live = self.registry.online_user_ids().await;

        let mut changes = PresenceChanges::default();
        for user_id in all_users {
            let should_be_online = live.contains(&user_id);
            if should_be_online == flagged.contains(&user_id) {
                continue;
            }
            match self.users.set_presence(user_id, should_be_online).await {
                Ok(()) => {
                    tracing::info!(user_id = %user_id, is_online = should_be_online, "presence flag corrected");
                    if should_be_online {
                        changes.went_online.push(user_id);
                    } else {
                        changes.went_offline.push(user_id);
                    }
                }
                Err(err) => {
                    tracing::error!(user_id = %user_id, error = %err, "failed to persist presence flag");
                    changes.failed.push(user_id);
                }
            }
        }
        Ok((changes, live))
    }

    /// 持锁对账后判断用户是否在线；对账失败时退回到直接查询注册表
    async fn reconcile_user(&self, user_id: UserId) -> bool {
        match self.reconcile().await {
            Ok((_, live)) => live.contains(&user_id),
            Err(err) => {
                tracing::error!(user_id = %user_id, error = %err, "presence reconciliation failed");
                self.registry.has_user(user_id).await
            }
        }
    }

    /// 读取所有在线标记为 true 的用户，广播 `online_users` 快照
    pub async fn broadcast_snapshot(&self) -> Result<DeliveryReport, ApplicationError> {
        let online = self.users.list_online_users().await?;
        let frame = ServerFrame::OnlineUsers(online).encode()?;
        Ok(self.registry.broadcast(&frame).await)
    }

    pub async fn broadcast_user_status(
        &self,
        user_id: UserId,
        is_online: bool,
    ) -> Result<DeliveryReport, ApplicationError> {
        let frame = ServerFrame::UserStatus(UserStatusPayload { user_id, is_online }).encode()?;
        Ok(self.registry.broadcast(&frame).await)
    }

    async fn announce(&self, user_id: UserId, is_online: bool) {
        if let Err(err) = self.broadcast_user_status(user_id, is_online).await {
            tracing::warn!(user_id = %user_id, error = %err, "failed to broadcast user status");
        }
        if let Err(err) = self.broadcast_snapshot().await {
            tracing::warn!(error = %err, "failed to broadcast online users");
        }
    }

    /// 连接被接纳之后：对账、广播该用户状态、广播快照
    pub async fn on_connection_opened(&self, user_id: UserId) {
        let mut announced = self.announced.lock().await;
        self.log_trigger("connection opened");
        let online = self.reconcile_user(user_id).await;
        if online {
            announced.insert(user_id);
        }
        self.announce(user_id, online).await;
    }

    /// 连接被移除之后：对账、广播该用户当前状态、广播快照。
    ///
    /// 同一用户的多条连接被一起移除时（注销、同时断开），
    /// 只有第一次发现用户已离线的清理会广播，离线快照只发一次。
    pub async fn on_connection_closed(&self, user_id: UserId) {
        let mut announced = self.announced.lock().await;
        self.log_trigger("connection closed");
        let online = self.reconcile_user(user_id).await;
        if online {
            announced.insert(user_id);
        } else if !announced.remove(&user_id) {
            tracing::debug!(user_id = %user_id, "offline status already broadcast");
            return;
        }
        self.announce(user_id, online).await;
    }

    /// 显式注销等不经过连接生命周期的触发点
    pub async fn refresh(&self) -> Result<PresenceChanges, ApplicationError> {
        let _guard = self.announced.lock().await;
        self.log_trigger("refresh");
        let (changes, _) = self.reconcile().await?;
        self.broadcast_snapshot().await?;
        Ok(changes)
    }

    fn log_trigger(&self, trigger: &'static str) {
        tracing::debug!(trigger, "reconciling presence");
    }
}
