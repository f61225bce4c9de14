//! 私信中继系统核心领域模型
//!
//! 包含用户标识、私信、会话凭证等值对象，以及消息正文的校验与清理规则。

pub mod errors;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use user::*;
pub use value_objects::*;
