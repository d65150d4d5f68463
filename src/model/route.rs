use serde::{Deserialize, Serialize};

/// 节点注册信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerNode {
    pub server_id: String,
    pub rpc_addr: String,
    /// unix 秒
    pub last_heartbeat: i64,
}

/// 用户路由：集群范围内 user -> server 的归属
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoute {
    pub user_id: i64,
    pub server_id: String,
    pub last_heartbeat: i64,
}

/// 路由查询结果（已联接节点地址）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub server_id: String,
    pub rpc_addr: String,
}
