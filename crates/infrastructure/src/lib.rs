//! 基础设施层实现。
//!
//! 基于 PostgreSQL 的持久化存储，实现应用层定义的用户/私信仓储接口。

pub mod builder;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageRepository, PgStorage, PgUserRepository};
