use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{MessageId, Timestamp, UserId};

/// 观测到的默认长度上限（按字符计）。
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 30;

// 只匹配最内层的 `<...>`，第二遍负责剥掉被第一遍拼出来的外层标签。
static MARKUP_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^<>]*>").expect("markup pattern is valid"));

/// 去掉所有 `<...>` 片段。固定执行两遍，相邻和两层嵌套的标签都会被清除。
pub fn strip_markup(input: &str) -> String {
    let first = MARKUP_RUN.replace_all(input, "");
    MARKUP_RUN.replace_all(&first, "").into_owned()
}

/// 经过长度校验和标记清理的私信正文。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    /// 校验原始输入的长度（1..=max_chars 个字符），然后做双遍清理。
    pub fn parse(raw: &str, max_chars: usize) -> Result<Self, DomainError> {
        let actual = raw.chars().count();
        if actual == 0 {
            return Err(DomainError::EmptyMessage);
        }
        if actual > max_chars {
            return Err(DomainError::MessageTooLong {
                max: max_chars,
                actual,
            });
        }
        Ok(Self(strip_markup(raw)))
    }

    /// 从存储中恢复已清理过的正文，不再校验。
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 持久化的私信记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: MessageContent,
    pub created_at: Timestamp,
    pub is_read: bool,
}

impl PrivateMessage {
    /// 新消息总是未读。
    pub fn new(
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        content: MessageContent,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            content,
            created_at,
            is_read: false,
        }
    }

    /// 已读回执的判定条件：发送方/接收方匹配且当前未读。
    pub fn can_be_marked_read_by(&self, receiver_id: UserId, sender_id: UserId) -> bool {
        !self.is_read && self.receiver_id == receiver_id && self.sender_id == sender_id
    }
}

/// 历史查询返回的消息，附带发送者昵称。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMessage {
    pub message: PrivateMessage,
    pub sender_nickname: String,
}
