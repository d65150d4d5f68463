//! 网关配置与注入式认证

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::Result;

/// 路由缓存 TTL 默认值（秒）
pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;
/// 心跳间隔默认值（秒）
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;
/// 离线补推单次上限
pub const DEFAULT_OFFLINE_DRAIN_LIMIT: i64 = 100;

/// 环境变量：节点 ID
pub const ENV_SERVER_ID: &str = "SERVER_ID";
/// 环境变量：节点间 RPC 地址
pub const ENV_RPC_ADDR: &str = "RPC_ADDR";
/// 环境变量：路由缓存 TTL（秒）
pub const ENV_CACHE_TTL: &str = "CACHE_TTL";
/// 环境变量：心跳间隔（秒）
pub const ENV_HEARTBEAT: &str = "HEARTBEAT";

/// 认证器：token -> user_id
///
/// 网关不解析 token，认证完全由嵌入方实现（JWT、会话表等均可）。
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<i64>;
}

/// 包装同步认证闭包的认证器
pub struct FnAuthenticator<F> {
    auth_fn: F,
}

impl<F> FnAuthenticator<F>
where
    F: Fn(&str) -> Result<i64> + Send + Sync,
{
    pub fn new(auth_fn: F) -> Self {
        Self { auth_fn }
    }
}

#[async_trait]
impl<F> Authenticator for FnAuthenticator<F>
where
    F: Fn(&str) -> Result<i64> + Send + Sync,
{
    async fn authenticate(&self, token: &str) -> Result<i64> {
        (self.auth_fn)(token)
    }
}

/// 网关配置
#[derive(Clone)]
pub struct Config {
    /// 节点 ID（集群内唯一）
    pub server_id: String,
    /// 节点间 RPC 监听地址；单节点部署可留空
    pub rpc_addr: String,
    /// 数据库连接池（由嵌入方创建并持有）
    pub pool: PgPool,
    /// 注入的认证器
    pub authenticator: Arc<dyn Authenticator>,
    /// 路由缓存 TTL（秒）
    pub cache_ttl_secs: u64,
    /// 心跳间隔（秒）
    pub heartbeat_interval_secs: u64,
}
