use std::time::Duration;

use application::{ApplicationError, ClientFrame, Connection, OutboundFrame, SessionIdentity};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConnectionId, UserId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// 单个 WebSocket 连接
///
/// 握手通过后才会创建。连接被加入注册表后由 [`run`](Self::run) 驱动：
/// 写任务把注册表投递过来的帧写到 socket，读任务逐帧分发给中继服务。
/// 任一任务结束即视为连接关闭，随后执行一次清理。
pub struct WebSocketConnection {
    state: AppState,
    identity: SessionIdentity,
    connection_id: ConnectionId,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl WebSocketConnection {
    /// 把连接加入注册表
    pub async fn admit(state: AppState, identity: SessionIdentity) -> Self {
        let (connection, outbound) = Connection::new(identity.user_id, state.clock.now());
        let connection_id = connection.id();
        state.registry.add(connection).await;
        tracing::info!(
            connection_id = %connection_id,
            user_id = %identity.user_id,
            nickname = %identity.nickname,
            "connection admitted"
        );

        Self {
            state,
            identity,
            connection_id,
            outbound,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let Self {
            state,
            identity,
            connection_id,
            mut outbound,
        } = self;

        // 无论以何种方式退出，清理都只执行一次
        let cleanup = ConnectionCleanup::new(state.clone(), connection_id, identity.user_id);

        state.presence.on_connection_opened(identity.user_id).await;

        let (mut sender, mut incoming) = socket.split();

        // 写任务：注册表释放发送端后 recv 返回 None，随即关闭 socket
        let mut send_task = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if sender.send(WsMessage::Text(String::from(&*frame).into())).await.is_err() {
                    tracing::warn!(connection_id = %connection_id, "failed to write frame to socket");
                    break;
                }
            }
            let _ = sender.close().await;
        });

        let mut recv_task = {
            let state = state.clone();
            let identity = identity.clone();
            let idle_timeout = state.idle_timeout;
            tokio::spawn(async move {
                loop {
                    let next = match next_message(&mut incoming, idle_timeout).await {
                        Some(next) => next,
                        None => {
                            tracing::info!(connection_id = %connection_id, "connection idle timeout");
                            break;
                        }
                    };
                    match next {
                        Some(Ok(WsMessage::Text(text))) => {
                            dispatch(&state, &identity, connection_id, text.as_str()).await;
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            tracing::warn!(connection_id = %connection_id, "ignoring binary frame");
                        }
                        Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(err)) => {
                            tracing::warn!(connection_id = %connection_id, error = %err, "socket read failed");
                            break;
                        }
                    }
                }
            })
        };

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        cleanup.run().await;
    }
}

type Incoming = futures_util::stream::SplitStream<WebSocket>;

/// 读取下一条消息。配置了空闲超时且超时时返回 `None`
async fn next_message(
    incoming: &mut Incoming,
    idle_timeout: Option<Duration>,
) -> Option<Option<Result<WsMessage, axum::Error>>> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, incoming.next()).await.ok(),
        None => Some(incoming.next().await),
    }
}

/// 解码并分发一个客户端文本帧。任何错误都只记录日志，不会中断读循环
async fn dispatch(
    state: &AppState,
    identity: &SessionIdentity,
    connection_id: ConnectionId,
    text: &str,
) {
    let frame = match ClientFrame::decode(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(connection_id = %connection_id, error = %err, "malformed frame");
            return;
        }
    };
    let frame_type = frame.frame_type();

    let result = match frame {
        ClientFrame::PrivateMessage(request) => state
            .message_relay
            .relay_private_message(connection_id, identity, request)
            .await
            .map(|_| ()),
        ClientFrame::MarkRead(request) => state
            .signal_relay
            .mark_read(identity.user_id, request.sender_id, request.message_id)
            .await
            .map(|_| ()),
        ClientFrame::Typing(request) => state
            .signal_relay
            .typing(identity, request.receiver_id)
            .await
            .map(|_| ()),
        ClientFrame::StopTyping(request) => state
            .signal_relay
            .stop_typing(identity, request.receiver_id)
            .await
            .map(|_| ()),
    };

    match result {
        Ok(()) => {}
        // 校验失败和持久化失败已在中继内部处理
        Err(ApplicationError::Domain(_)) | Err(ApplicationError::Repository(_))
            if frame_type == "private_message" => {}
        Err(err) => {
            tracing::warn!(
                connection_id = %connection_id,
                user_id = %identity.user_id,
                frame_type,
                error = %err,
                "failed to handle frame"
            );
        }
    }
}

/// 连接清理：从注册表移除，然后重新对账在线状态。
///
/// 正常路径下由 `run` 显式等待；若连接任务被提前丢弃，则在 Drop 中转交给运行时。
struct ConnectionCleanup {
    state: Option<AppState>,
    connection_id: ConnectionId,
    user_id: UserId,
}

impl ConnectionCleanup {
    fn new(state: AppState, connection_id: ConnectionId, user_id: UserId) -> Self {
        Self {
            state: Some(state),
            connection_id,
            user_id,
        }
    }

    async fn run(mut self) {
        if let Some(state) = self.state.take() {
            cleanup(state, self.connection_id, self.user_id).await;
        }
    }
}

impl Drop for ConnectionCleanup {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup(state, self.connection_id, self.user_id));
            }
            Err(_) => {
                tracing::error!(connection_id = %self.connection_id, "no runtime for connection cleanup");
            }
        }
    }
}

async fn cleanup(state: AppState, connection_id: ConnectionId, user_id: UserId) {
    let removed = state.registry.remove(connection_id).await;
    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        removed,
        "connection closed"
    );
    state.presence.on_connection_closed(user_id).await;
}
