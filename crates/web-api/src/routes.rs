use axum::{
    extract::{rejection::QueryRejection, ws::WebSocketUpgrade, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use domain::{ConversationMessage, MessageId, Timestamp, UserId, UserPresence};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{auth, error::ApiError, state::AppState, ws_connection::WebSocketConnection};

const DEFAULT_HISTORY_LIMIT: u32 = 10;
const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    with: Uuid,
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: Timestamp,
    /// 发送者昵称
    pub sender: String,
    pub is_read: bool,
}

impl From<ConversationMessage> for HistoryItem {
    fn from(value: ConversationMessage) -> Self {
        let message = value.message;
        Self {
            id: message.id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content.as_str().to_owned(),
            timestamp: message.created_at,
            sender: value.sender_nickname,
            is_read: message.is_read,
        }
    }
}

#[derive(Debug, Serialize)]
struct LogoutResponse {
    message: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/users", get(list_users))
        .route("/messages", get(get_history))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 握手在升级之前完成，未通过认证的请求直接返回 401，连接不会被接纳
async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let identity = auth::authenticate(&state, &headers).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        let connection = WebSocketConnection::admit(state, identity).await;
        connection.run(socket).await;
    }))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = auth::cookie_value(&headers, &state.session_cookie);
    let identity = state.sessions.logout(token).await?;

    // 有连接时由各连接的清理流程刷新在线状态，离线快照只由其中一次清理发出
    let closed = state.registry.disconnect_user(identity.user_id).await;
    tracing::info!(user_id = %identity.user_id, closed, "user logged out");
    if closed == 0 {
        state.presence.refresh().await?;
    }

    let cookie = auth::clear_cookie(&state.session_cookie)?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LogoutResponse {
            message: "logged out",
        }),
    ))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<UserPresence>>, ApiError> {
    auth::authenticate(&state, &headers).await?;
    let users = state
        .user_repository
        .list_users()
        .await
        .map_err(application::ApplicationError::from)?;
    Ok(Json(users))
}

async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<HistoryItem>>, ApiError> {
    let identity = auth::authenticate(&state, &headers).await?;
    let Query(query) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let items = state
        .message_repository
        .list_conversation(identity.user_id, UserId::from(query.with), limit, offset)
        .await
        .map_err(application::ApplicationError::from)?;

    Ok(Json(items.into_iter().map(HistoryItem::from).collect()))
}
