//! 连接注册表
//!
//! 进程内唯一的在线连接集合，由一把互斥锁保护。所有对连接的写操作都在持锁扫描中完成，
//! 写失败的连接会在同一次扫描中被移除，广播因此同时充当存活探测。

use std::collections::{HashMap, HashSet};

use domain::{ConnectionId, Timestamp, UserId};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::frame::OutboundFrame;

/// 单次投递失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// 写端已关闭（对端断开或写任务已退出）
    #[error("connection closed")]
    Closed,
}

/// 一个已通过握手的在线连接
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    created_at: Timestamp,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl Connection {
    /// 创建连接以及与之配对的出站接收端（由写任务持有）
    pub fn new(
        user_id: UserId,
        created_at: Timestamp,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let connection = Self {
            id: ConnectionId::generate(),
            user_id,
            created_at,
            outbound,
        };
        (connection, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn send(&self, frame: &OutboundFrame) -> Result<(), DeliveryError> {
        self.outbound
            .send(frame.clone())
            .map_err(|_| DeliveryError::Closed)
    }
}

/// 一次扫描投递的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// 本次扫描中因写失败被移除的连接
    pub evicted: Vec<(ConnectionId, UserId)>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.evicted.len()
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, connection: Connection) {
        let mut connections = self.connections.lock().await;
        tracing::debug!(
            connection_id = %connection.id,
            user_id = %connection.user_id,
            "connection registered"
        );
        connections.insert(connection.id, connection);
    }

    /// 幂等：连接不存在时什么都不做。返回是否真的移除了连接
    pub async fn remove(&self, connection_id: ConnectionId) -> bool {
        let removed = self.connections.lock().await.remove(&connection_id);
        match removed {
            Some(connection) => {
                tracing::debug!(
                    connection_id = %connection.id,
                    user_id = %connection.user_id,
                    connected_at = %connection.created_at,
                    "connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// 持锁扫描所有满足 `predicate` 的连接并执行 `action`。
    ///
    /// `action` 失败的连接在同一临界区内被移除；失败不会中断对其他连接的投递。
    pub async fn for_each_matching<P, A>(&self, predicate: P, mut action: A) -> DeliveryReport
    where
        P: Fn(&Connection) -> bool,
        A: FnMut(&Connection) -> Result<(), DeliveryError>,
    {
        let mut report = DeliveryReport::default();
        let mut connections = self.connections.lock().await;
        connections.retain(|_, connection| {
            if !predicate(connection) {
                return true;
            }
            match action(connection) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(err) => {
                    tracing::warn!(
                        connection_id = %connection.id,
                        user_id = %connection.user_id,
                        error = %err,
                        "delivery failed, evicting connection"
                    );
                    report.evicted.push((connection.id, connection.user_id));
                    false
                }
            }
        });
        report
    }

    pub async fn broadcast(&self, frame: &OutboundFrame) -> DeliveryReport {
        self.for_each_matching(|_| true, |connection| connection.send(frame))
            .await
    }

    pub async fn send_to_user(&self, user_id: UserId, frame: &OutboundFrame) -> DeliveryReport {
        self.for_each_matching(
            |connection| connection.user_id == user_id,
            |connection| connection.send(frame),
        )
        .await
    }

    /// 投递给两个用户的全部连接（并集，自己给自己发时每个连接只收一次）
    pub async fn send_to_pair(
        &self,
        first: UserId,
        second: UserId,
        frame: &OutboundFrame,
    ) -> DeliveryReport {
        self.for_each_matching(
            |connection| connection.user_id == first || connection.user_id == second,
            |connection| connection.send(frame),
        )
        .await
    }

    pub async fn send_to_connection(
        &self,
        connection_id: ConnectionId,
        frame: &OutboundFrame,
    ) -> DeliveryReport {
        self.for_each_matching(
            |connection| connection.id == connection_id,
            |connection| connection.send(frame),
        )
        .await
    }

    /// 移除某用户的全部连接。出站发送端随之释放，对应的写任务会结束并关闭 socket
    pub async fn disconnect_user(&self, user_id: UserId) -> usize {
        let mut connections = self.connections.lock().await;
        let before = connections.len();
        connections.retain(|_, connection| connection.user_id != user_id);
        before - connections.len()
    }

    pub async fn has_user(&self, user_id: UserId) -> bool {
        self.connections
            .lock()
            .await
            .values()
            .any(|connection| connection.user_id == user_id)
    }

    /// 当前至少持有一个连接的用户集合
    pub async fn online_user_ids(&self) -> HashSet<UserId> {
        self.connections
            .lock()
            .await
            .values()
            .map(|connection| connection.user_id)
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}
