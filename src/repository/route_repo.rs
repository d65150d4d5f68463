//! 路由仓库 - PostgreSQL 实现
//!
//! 维护两张表：节点注册表（nexim_servers）和用户路由表（nexim_user_routes）。
//! 节点心跳超过存活窗口后，其持有的路由在查询侧被视为离线。

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::Result;
use crate::model::route::{RouteTarget, ServerNode};

/// 节点存活窗口（秒）：超过该时长无心跳的节点视为下线
pub const SERVER_ALIVE_WINDOW_SECS: i64 = 60;

/// 路由存储 trait（对象安全，便于测试注入）
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// 注册节点（已存在则刷新地址和心跳）
    async fn register_server(&self, server_id: &str, rpc_addr: &str) -> Result<()>;

    /// 注销节点
    async fn unregister_server(&self, server_id: &str) -> Result<()>;

    /// 刷新节点心跳
    async fn heartbeat_server(&self, server_id: &str) -> Result<()>;

    /// 列出存活节点
    async fn list_alive_servers(&self, window_secs: i64) -> Result<Vec<ServerNode>>;

    /// 注册用户路由（已存在则改写归属节点）
    async fn upsert_user_route(&self, user_id: i64, server_id: &str) -> Result<()>;

    /// 删除用户路由；仅当路由仍归属 server_id 时删除
    /// （用户迁移到其他节点后，旧节点的迟到清理不能删掉新路由）
    async fn delete_user_route(&self, user_id: i64, server_id: &str) -> Result<()>;

    /// 查询用户路由（联接节点地址；节点已死视为无路由）
    async fn get_user_route(&self, user_id: i64) -> Result<Option<RouteTarget>>;

    /// 批量刷新用户路由心跳
    async fn batch_touch_routes(&self, user_ids: &[i64]) -> Result<()>;
}

/// 路由仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgRouteRepository {
    pool: PgPool,
}

impl PgRouteRepository {
    /// 创建新的路由仓库
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn now_secs() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl RouteStore for PgRouteRepository {
    async fn register_server(&self, server_id: &str, rpc_addr: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nexim_servers (server_id, rpc_addr, last_heartbeat)
            VALUES ($1, $2, $3)
            ON CONFLICT (server_id) DO UPDATE SET
                rpc_addr       = EXCLUDED.rpc_addr,
                last_heartbeat = EXCLUDED.last_heartbeat
            "#,
        )
        .bind(server_id)
        .bind(rpc_addr)
        .bind(Self::now_secs())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unregister_server(&self, server_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM nexim_servers WHERE server_id = $1")
            .bind(server_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn heartbeat_server(&self, server_id: &str) -> Result<()> {
        sqlx::query("UPDATE nexim_servers SET last_heartbeat = $2 WHERE server_id = $1")
            .bind(server_id)
            .bind(Self::now_secs())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_alive_servers(&self, window_secs: i64) -> Result<Vec<ServerNode>> {
        #[derive(sqlx::FromRow)]
        struct ServerRow {
            server_id: String,
            rpc_addr: String,
            last_heartbeat: i64,
        }

        let cutoff = Self::now_secs() - window_secs;
        let rows = sqlx::query_as::<_, ServerRow>(
            r#"
            SELECT server_id, rpc_addr, last_heartbeat
            FROM nexim_servers
            WHERE last_heartbeat > $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ServerNode {
                server_id: r.server_id,
                rpc_addr: r.rpc_addr,
                last_heartbeat: r.last_heartbeat,
            })
            .collect())
    }

    async fn upsert_user_route(&self, user_id: i64, server_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nexim_user_routes (user_id, server_id, last_heartbeat)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                server_id      = EXCLUDED.server_id,
                last_heartbeat = EXCLUDED.last_heartbeat
            "#,
        )
        .bind(user_id)
        .bind(server_id)
        .bind(Self::now_secs())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_user_route(&self, user_id: i64, server_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM nexim_user_routes WHERE user_id = $1 AND server_id = $2")
            .bind(user_id)
            .bind(server_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_user_route(&self, user_id: i64) -> Result<Option<RouteTarget>> {
        #[derive(sqlx::FromRow)]
        struct RouteRow {
            server_id: String,
            rpc_addr: String,
        }

        // 联接节点表并应用存活窗口：死节点持有的路由视为离线
        let cutoff = Self::now_secs() - SERVER_ALIVE_WINDOW_SECS;
        let row = sqlx::query_as::<_, RouteRow>(
            r#"
            SELECT r.server_id, s.rpc_addr
            FROM nexim_user_routes r
            JOIN nexim_servers s ON s.server_id = r.server_id
            WHERE r.user_id = $1 AND s.last_heartbeat > $2
            "#,
        )
        .bind(user_id)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| RouteTarget {
            server_id: r.server_id,
            rpc_addr: r.rpc_addr,
        }))
    }

    async fn batch_touch_routes(&self, user_ids: &[i64]) -> Result<()> {
        if user_ids.is_empty() {
            return Ok(());
        }

        sqlx::query("UPDATE nexim_user_routes SET last_heartbeat = $1 WHERE user_id = ANY($2)")
            .bind(Self::now_secs())
            .bind(user_ids)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
