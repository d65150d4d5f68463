//! 内嵌 schema 初始化
//!
//! DDL 全部幂等（IF NOT EXISTS），每次启动按序执行；失败则启动失败。

use sqlx::{Executor, PgPool};
use tracing::info;

use crate::error::Result;

/// 按文件名顺序内嵌的迁移脚本
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_messages",
        include_str!("../../migrations/001_create_messages.sql"),
    ),
    (
        "002_create_sessions",
        include_str!("../../migrations/002_create_sessions.sql"),
    ),
    (
        "003_create_routes",
        include_str!("../../migrations/003_create_routes.sql"),
    ),
    (
        "004_create_groups",
        include_str!("../../migrations/004_create_groups.sql"),
    ),
];

/// 初始化数据库表结构
pub async fn init(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql).await?;
        info!("schema applied: {}", name);
    }
    Ok(())
}
