//! 数据访问层：每个调用是一个逻辑事务，不含业务逻辑

pub mod group_repo;
pub mod message_repo;
pub mod route_repo;
pub mod schema;
pub mod session_repo;

pub use group_repo::{GroupRepository, PgGroupRepository};
pub use message_repo::{MessageRepository, PgMessageRepository};
pub use route_repo::{PgRouteRepository, RouteStore};
pub use session_repo::{PgSessionRepository, SessionRepository};
