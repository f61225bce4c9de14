//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 接入（会话握手 + 连接任务），以及注销、用户目录、会话历史等 HTTP 接口。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{clear_cookie, cookie_value};
pub use error::{ApiError, ErrorBody};
pub use routes::{router, HistoryItem};
pub use state::{AppState, AppStateDependencies};
pub use ws_connection::WebSocketConnection;
