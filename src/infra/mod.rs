//! 节点内基础设施：连接中心、路由管理、数据库连接

pub mod database;
pub mod hub;
pub mod route_manager;

pub use database::Database;
pub use hub::{BroadcastMessage, ConnectionHub, OUTBOUND_QUEUE_SIZE};
pub use route_manager::RouteManager;
