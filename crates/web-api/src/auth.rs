//! 基于 cookie 的会话认证
//!
//! 会话凭证由外部登录流程写入 cookie，这里只负责读取、解析和清除。

use application::SessionIdentity;
use axum::http::{header, HeaderMap, HeaderValue};

use crate::{error::ApiError, state::AppState};

/// 从 `Cookie` 头中取出指定名称的值
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}

/// 让浏览器立即丢弃会话 cookie 的 `Set-Cookie` 值
pub fn clear_cookie(name: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&format!(
        "{name}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax"
    ))
    .map_err(|err| ApiError::internal_server_error(format!("invalid cookie name: {err}")))
}

/// 从请求头中解析当前会话身份
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<SessionIdentity, ApiError> {
    let token = cookie_value(headers, &state.session_cookie);
    state.sessions.authenticate(token).await.map_err(|err| {
        tracing::warn!(error = %err, "session authentication failed");
        ApiError::from(err)
    })
}
