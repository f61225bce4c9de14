#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{MemoryStore, SystemClock};
use config::RelayConfig;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, AppStateDependencies};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const FRAME_WAIT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(RelayConfig::default()).await
    }

    pub async fn start_with(relay: RelayConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(AppStateDependencies {
            user_repository: store.clone(),
            message_repository: store.clone(),
            clock: Arc::new(SystemClock),
            relay,
        });
        let app = router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 使用给定的会话凭证建立 WebSocket 连接
    pub async fn connect(
        &self,
        token: Option<&str>,
    ) -> Result<WsClient, tokio_tungstenite::tungstenite::Error> {
        let mut request = format!("ws://{}/ws", self.addr)
            .into_client_request()
            .expect("ws request");
        if let Some(token) = token {
            request.headers_mut().insert(
                "cookie",
                HeaderValue::from_str(&format!("session_id={token}")).expect("cookie header"),
            );
        }
        connect_async(request).await.map(|(stream, _)| stream)
    }

    /// 建立连接并等待自己出现在在线快照中
    pub async fn connect_online(&self, token: &str, nickname: &str) -> WsClient {
        let mut ws = self.connect(Some(token)).await.expect("connect");
        wait_for_snapshot(&mut ws, |users| {
            users.iter().any(|user| user["nickname"] == nickname)
        })
        .await;
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub fn cookie(token: &str) -> String {
    format!("session_id={token}")
}

pub async fn send_frame(ws: &mut WsClient, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一个文本帧，超时或连接关闭时返回 None
pub async fn try_next_frame(ws: &mut WsClient, wait: Duration) -> Option<Value> {
    loop {
        match timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("json frame"));
            }
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

pub async fn next_frame(ws: &mut WsClient) -> Value {
    try_next_frame(ws, FRAME_WAIT).await.expect("expected a frame")
}

/// 跳过其他帧，直到收到指定类型的帧
pub async fn next_frame_of_type(ws: &mut WsClient, frame_type: &str) -> Value {
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] == frame_type {
            return frame;
        }
    }
}

/// 等待满足条件的 online_users 快照
pub async fn wait_for_snapshot(ws: &mut WsClient, accept: impl Fn(&[Value]) -> bool) -> Vec<Value> {
    loop {
        let frame = next_frame_of_type(ws, "online_users").await;
        let users = frame["payload"].as_array().cloned().unwrap_or_default();
        if accept(&users) {
            return users;
        }
    }
}

/// 丢弃当前已到达的帧
pub async fn drain(ws: &mut WsClient) {
    while try_next_frame(ws, Duration::from_millis(100)).await.is_some() {}
}

/// 断言一段时间内收不到除 `ignored` 之外的任何帧
pub async fn assert_no_frame_except(ws: &mut WsClient, ignored: &[&str]) {
    while let Some(frame) = try_next_frame(ws, Duration::from_millis(300)).await {
        let frame_type = frame["type"].as_str().unwrap_or_default();
        assert!(
            ignored.contains(&frame_type),
            "unexpected frame: {frame}"
        );
    }
}

/// 收集到连接安静下来为止，统计满足条件的 online_users 快照数量
pub async fn count_snapshots(ws: &mut WsClient, accept: impl Fn(&[Value]) -> bool) -> usize {
    let mut count = 0;
    while let Some(frame) = try_next_frame(ws, Duration::from_millis(500)).await {
        if frame["type"] != "online_users" {
            continue;
        }
        let users = frame["payload"].as_array().cloned().unwrap_or_default();
        if accept(&users) {
            count += 1;
        }
    }
    count
}

pub fn lists_nickname(users: &[Value], nickname: &str) -> bool {
    users.iter().any(|user| user["nickname"] == nickname)
}

/// 等待服务端关闭连接
pub async fn wait_closed(ws: &mut WsClient) {
    let closed = timeout(FRAME_WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection was not closed by the server");
}
