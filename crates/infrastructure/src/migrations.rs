use sqlx::migrate::Migrator;

/// 嵌入二进制的数据库迁移，目录位于工作区根目录
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
