use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 在线用户快照条目，字段名即线上协议的一部分。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: UserId,
    pub nickname: String,
}

/// 用户目录条目（含持久化的在线标记）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub id: UserId,
    pub nickname: String,
    pub is_online: bool,
}
