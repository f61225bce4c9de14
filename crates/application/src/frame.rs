//! WebSocket 帧协议
//!
//! 所有帧都使用 `{ "type": <string>, "payload": <object> }` 信封。
//! 客户端帧按 `type` 解码为封闭的枚举，未知类型和无法解析的载荷都是可恢复错误。

use domain::{MessageId, OnlineUser, Timestamp, UserId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// 已序列化的出站帧，广播时在多个连接间共享
pub type OutboundFrame = Arc<str>;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown frame type: {0}")]
    UnknownType(String),
    #[error("invalid {frame_type} payload: {source}")]
    InvalidPayload {
        frame_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessageRequest {
    pub receiver_id: UserId,
    pub content: String,
    /// 客户端生成的关联ID，旧客户端使用 `messageId` 字段名
    #[serde(default, alias = "messageId")]
    pub client_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub sender_id: UserId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub receiver_id: UserId,
}

/// 客户端 -> 服务器
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    PrivateMessage(PrivateMessageRequest),
    MarkRead(MarkReadRequest),
    Typing(TypingRequest),
    StopTyping(TypingRequest),
}

impl ClientFrame {
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(FrameError::Malformed)?;
        match envelope.frame_type.as_str() {
            "private_message" => {
                decode_payload("private_message", envelope.payload).map(Self::PrivateMessage)
            }
            "mark_read" => decode_payload("mark_read", envelope.payload).map(Self::MarkRead),
            "typing" => decode_payload("typing", envelope.payload).map(Self::Typing),
            "stop_typing" => decode_payload("stop_typing", envelope.payload).map(Self::StopTyping),
            _ => Err(FrameError::UnknownType(envelope.frame_type)),
        }
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::PrivateMessage(_) => "private_message",
            Self::MarkRead(_) => "mark_read",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
        }
    }
}

fn decode_payload<T: DeserializeOwned>(
    frame_type: &'static str,
    payload: serde_json::Value,
) -> Result<T, FrameError> {
    serde_json::from_value(payload).map_err(|source| FrameError::InvalidPayload { frame_type, source })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusPayload {
    pub user_id: UserId,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagePayload {
    pub message_id: MessageId,
    pub client_message_id: Option<String>,
    pub sender_id: UserId,
    pub sender_name: String,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: Timestamp,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReadPayload {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub sender_id: UserId,
    pub sender_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// 服务器 -> 客户端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    UserStatus(UserStatusPayload),
    OnlineUsers(Vec<OnlineUser>),
    PrivateMessage(PrivateMessagePayload),
    MessageRead(MessageReadPayload),
    Typing(TypingPayload),
    StopTyping(TypingPayload),
    Error(ErrorPayload),
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            error: message.into(),
        })
    }

    pub fn encode(&self) -> Result<OutboundFrame, FrameError> {
        serde_json::to_string(self)
            .map(Arc::from)
            .map_err(FrameError::Encode)
    }
}
