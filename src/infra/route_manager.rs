//! 路由管理器：集群范围 user -> node 查询，带本地 TTL 缓存
//!
//! 缓存允许读到指向已死节点的陈旧路由；转发失败就当作"当前不可达"，
//! 消息保持 sent 状态等用户重连补推。投递从不等待缓存刷新。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use tracing::debug;

use crate::error::Result;
use crate::model::route::RouteTarget;
use crate::repository::RouteStore;

/// 路由管理器
pub struct RouteManager {
    server_id: String,
    store: Arc<dyn RouteStore>,
    /// user_id -> server_id，按 TTL 过期
    user_cache: Cache<i64, String>,
    /// server_id -> rpc_addr，随路由查询回填
    addr_cache: DashMap<String, String>,
}

impl RouteManager {
    /// 创建路由管理器
    pub fn new(server_id: String, store: Arc<dyn RouteStore>, cache_ttl_secs: u64) -> Self {
        let user_cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(Duration::from_secs(cache_ttl_secs))
            .build();

        Self {
            server_id,
            store,
            user_cache,
            addr_cache: DashMap::new(),
        }
    }

    /// 本节点 ID
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// 注册用户路由（用户连接到本节点时调用）
    pub async fn register(&self, user_id: i64) -> Result<()> {
        self.store.upsert_user_route(user_id, &self.server_id).await?;
        self.user_cache.insert(user_id, self.server_id.clone()).await;
        Ok(())
    }

    /// 注销用户路由（仅清除仍归属本节点的路由）
    pub async fn unregister(&self, user_id: i64) -> Result<()> {
        self.store.delete_user_route(user_id, &self.server_id).await?;
        self.user_cache.invalidate(&user_id).await;
        Ok(())
    }

    /// 查询用户路由；None 表示离线
    ///
    /// 命中缓存但缺节点地址时回源补齐。并发未命中重复回源是无害的。
    pub async fn lookup(&self, user_id: i64) -> Result<Option<RouteTarget>> {
        if let Some(server_id) = self.user_cache.get(&user_id).await {
            if let Some(addr) = self.addr_cache.get(&server_id) {
                return Ok(Some(RouteTarget {
                    server_id: server_id.clone(),
                    rpc_addr: addr.clone(),
                }));
            }
        }

        match self.store.get_user_route(user_id).await? {
            Some(target) => {
                self.user_cache.insert(user_id, target.server_id.clone()).await;
                self.addr_cache
                    .insert(target.server_id.clone(), target.rpc_addr.clone());
                Ok(Some(target))
            }
            None => {
                debug!("user {} has no live route", user_id);
                Ok(None)
            }
        }
    }

    /// 批量刷新本节点在线用户的路由心跳（心跳工作器调用）
    pub async fn batch_touch(&self, user_ids: &[i64]) -> Result<()> {
        self.store.batch_touch_routes(user_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::model::route::ServerNode;

    /// 测试用路由存储：记录查询次数，可设置返回值
    #[derive(Default)]
    struct MockRouteStore {
        route: Mutex<Option<RouteTarget>>,
        lookups: AtomicUsize,
    }

    impl MockRouteStore {
        fn set_route(&self, target: Option<RouteTarget>) {
            *self.route.lock().unwrap() = target;
        }

        fn lookup_count(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RouteStore for MockRouteStore {
        async fn register_server(&self, _server_id: &str, _rpc_addr: &str) -> Result<()> {
            Ok(())
        }

        async fn unregister_server(&self, _server_id: &str) -> Result<()> {
            Ok(())
        }

        async fn heartbeat_server(&self, _server_id: &str) -> Result<()> {
            Ok(())
        }

        async fn list_alive_servers(&self, _window_secs: i64) -> Result<Vec<ServerNode>> {
            Ok(vec![])
        }

        async fn upsert_user_route(&self, _user_id: i64, _server_id: &str) -> Result<()> {
            Ok(())
        }

        async fn delete_user_route(&self, _user_id: i64, _server_id: &str) -> Result<()> {
            Ok(())
        }

        async fn get_user_route(&self, _user_id: i64) -> Result<Option<RouteTarget>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.route.lock().unwrap().clone())
        }

        async fn batch_touch_routes(&self, _user_ids: &[i64]) -> Result<()> {
            Ok(())
        }
    }

    fn target(server_id: &str, addr: &str) -> RouteTarget {
        RouteTarget {
            server_id: server_id.to_string(),
            rpc_addr: addr.to_string(),
        }
    }

    #[tokio::test]
    async fn cache_hit_suppresses_store_read() {
        let store = Arc::new(MockRouteStore::default());
        store.set_route(Some(target("s2", "10.0.0.2:50051")));
        let manager = RouteManager::new("s1".to_string(), store.clone(), 30);

        let first = manager.lookup(42).await.unwrap().unwrap();
        assert_eq!(first.server_id, "s2");
        assert_eq!(store.lookup_count(), 1);

        // 第二次命中缓存，不回源
        let second = manager.lookup(42).await.unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(store.lookup_count(), 1);
    }

    #[tokio::test]
    async fn miss_means_offline() {
        let store = Arc::new(MockRouteStore::default());
        let manager = RouteManager::new("s1".to_string(), store.clone(), 30);

        assert!(manager.lookup(9).await.unwrap().is_none());
        // 离线结果不缓存，下一次仍回源
        assert!(manager.lookup(9).await.unwrap().is_none());
        assert_eq!(store.lookup_count(), 2);
    }

    #[tokio::test]
    async fn unregister_invalidates_cache() {
        let store = Arc::new(MockRouteStore::default());
        store.set_route(Some(target("s2", "10.0.0.2:50051")));
        let manager = RouteManager::new("s1".to_string(), store.clone(), 30);

        manager.lookup(5).await.unwrap();
        assert_eq!(store.lookup_count(), 1);

        manager.unregister(5).await.unwrap();
        manager.lookup(5).await.unwrap();
        assert_eq!(store.lookup_count(), 2);
    }

    #[tokio::test]
    async fn ttl_expiry_forces_store_read() {
        let store = Arc::new(MockRouteStore::default());
        store.set_route(Some(target("s2", "10.0.0.2:50051")));
        let manager = RouteManager::new("s1".to_string(), store.clone(), 1);

        manager.lookup(8).await.unwrap();
        assert_eq!(store.lookup_count(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // 用户可能已迁移到其他节点
        store.set_route(Some(target("s3", "10.0.0.3:50051")));
        let refreshed = manager.lookup(8).await.unwrap().unwrap();
        assert_eq!(refreshed.server_id, "s3");
        assert_eq!(store.lookup_count(), 2);
    }

    #[tokio::test]
    async fn register_populates_cache_with_self() {
        let store = Arc::new(MockRouteStore::default());
        let manager = RouteManager::new("s1".to_string(), store.clone(), 30);

        manager.register(11).await.unwrap();

        // 本节点地址不在 addr_cache 中，查询会回源一次
        store.set_route(Some(target("s1", "10.0.0.1:50051")));
        let found = manager.lookup(11).await.unwrap().unwrap();
        assert_eq!(found.server_id, "s1");
    }
}
