//! 连接中心：本节点活跃客户端连接的注册表
//!
//! 每个连接一个读协程（网关的分发循环驱动）和一个写协程（由网关随连接
//! 创建，独占 socket 写端）；出站队列是该连接唯一的串行化点。
//! 同一用户在同一节点最多一个 Client，后到的连接挤掉先前的。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message as WsMessage;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, warn};

/// 单连接出站队列容量
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// 广播队列容量
const BROADCAST_QUEUE_SIZE: usize = 256;

/// 客户端连接句柄
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub user_id: i64,
    /// 节点内连接序号：热重连时用于区分新旧连接
    pub conn_id: u64,
    tx: mpsc::Sender<WsMessage>,
}

/// 批量推送请求
#[derive(Debug)]
pub struct BroadcastMessage {
    pub user_ids: Vec<i64>,
    pub payload: WsMessage,
}

/// 连接中心
pub struct ConnectionHub {
    /// user_id -> 客户端句柄
    clients: RwLock<HashMap<i64, ClientHandle>>,
    broadcast_tx: mpsc::Sender<BroadcastMessage>,
    /// 广播接收端，由 run() 取走
    broadcast_rx: Mutex<Option<mpsc::Receiver<BroadcastMessage>>>,
    conn_seq: AtomicU64,
}

impl ConnectionHub {
    /// 创建连接中心
    pub fn new() -> Self {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_SIZE);
        Self {
            clients: RwLock::new(HashMap::new()),
            broadcast_tx,
            broadcast_rx: Mutex::new(Some(broadcast_rx)),
            conn_seq: AtomicU64::new(0),
        }
    }

    /// 注册客户端，返回分配的连接序号
    ///
    /// 同一用户已有连接时，先关闭旧连接的出站队列再安装新连接。
    pub async fn register(&self, user_id: i64, tx: mpsc::Sender<WsMessage>) -> u64 {
        let conn_id = self.conn_seq.fetch_add(1, Ordering::Relaxed) + 1;

        let mut clients = self.clients.write().await;
        if let Some(old) = clients.remove(&user_id) {
            debug!("user {} reconnected, evicting conn {}", user_id, old.conn_id);
            let _ = old.tx.try_send(WsMessage::Close(None));
        }
        clients.insert(user_id, ClientHandle { user_id, conn_id, tx });

        conn_id
    }

    /// 注销客户端
    ///
    /// 只有 conn_id 仍是当前安装的连接时才移除；被挤掉的旧连接的
    /// 清理流程对新连接是无操作。返回是否真正移除。
    pub async fn unregister(&self, user_id: i64, conn_id: u64) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get(&user_id) {
            Some(current) if current.conn_id == conn_id => {
                if let Some(client) = clients.remove(&user_id) {
                    let _ = client.tx.try_send(WsMessage::Close(None));
                }
                true
            }
            _ => false,
        }
    }

    /// 非阻塞推送：用户不在本节点或队列已满返回 false
    ///
    /// false 是瞬时信号，不代表用户离线；在线与否以路由表为准。
    pub async fn send_to_user(&self, user_id: i64, payload: WsMessage) -> bool {
        let clients = self.clients.read().await;
        match clients.get(&user_id) {
            Some(client) => client.tx.try_send(payload).is_ok(),
            None => false,
        }
    }

    /// 提交批量推送（尽力而为）
    pub async fn send_to_users(&self, user_ids: Vec<i64>, payload: WsMessage) {
        let msg = BroadcastMessage { user_ids, payload };
        if self.broadcast_tx.send(msg).await.is_err() {
            warn!("broadcast channel closed, dropping batch");
        }
    }

    /// 检查用户是否在本节点在线
    pub async fn has(&self, user_id: i64) -> bool {
        self.clients.read().await.contains_key(&user_id)
    }

    /// 本节点所有在线用户
    pub async fn online_users(&self) -> Vec<i64> {
        self.clients.read().await.keys().copied().collect()
    }

    /// 在线连接数
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// 广播循环：逐条取出批量推送请求并分发
    ///
    /// 队列打满的慢消费者直接被关闭移除（背压策略）。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut rx = match self.broadcast_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("hub broadcast loop already running");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    self.dispatch_broadcast(msg).await;
                }
            }
        }

        debug!("hub broadcast loop stopped");
    }

    async fn dispatch_broadcast(&self, msg: BroadcastMessage) {
        let mut stale = Vec::new();
        {
            let clients = self.clients.read().await;
            for user_id in &msg.user_ids {
                if let Some(client) = clients.get(user_id) {
                    if client.tx.try_send(msg.payload.clone()).is_err() {
                        stale.push((*user_id, client.conn_id));
                    }
                }
            }
        }

        for (user_id, conn_id) in stale {
            warn!("user {} send queue full, closing connection", user_id);
            self.unregister(user_id, conn_id).await;
        }
    }

    /// 关闭全部连接（节点停机）
    pub async fn close_all(&self) {
        let mut clients = self.clients.write().await;
        for (_, client) in clients.drain() {
            let _ = client.tx.try_send(WsMessage::Close(None));
        }
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_queue() -> (mpsc::Sender<WsMessage>, mpsc::Receiver<WsMessage>) {
        mpsc::channel(OUTBOUND_QUEUE_SIZE)
    }

    #[tokio::test]
    async fn register_and_send() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = make_queue();

        hub.register(1, tx).await;
        assert!(hub.has(1).await);

        assert!(hub.send_to_user(1, WsMessage::Text("hello".to_string())).await);
        assert!(matches!(rx.recv().await, Some(WsMessage::Text(t)) if t == "hello"));

        // 不在线的用户
        assert!(!hub.send_to_user(2, WsMessage::Text("x".to_string())).await);
    }

    #[tokio::test]
    async fn second_connection_evicts_first() {
        let hub = ConnectionHub::new();
        let (tx1, mut rx1) = make_queue();
        let (tx2, mut rx2) = make_queue();

        let conn1 = hub.register(7, tx1).await;
        let conn2 = hub.register(7, tx2).await;
        assert_ne!(conn1, conn2);

        // 旧连接收到关闭帧
        assert!(matches!(rx1.recv().await, Some(WsMessage::Close(_))));

        // 旧 reader 的清理对新连接是无操作
        assert!(!hub.unregister(7, conn1).await);
        assert!(hub.has(7).await);

        assert!(hub.send_to_user(7, WsMessage::Text("new".to_string())).await);
        assert!(matches!(rx2.recv().await, Some(WsMessage::Text(t)) if t == "new"));

        assert!(hub.unregister(7, conn2).await);
        assert!(!hub.has(7).await);
    }

    #[tokio::test]
    async fn full_queue_is_transient_failure() {
        let hub = ConnectionHub::new();
        let (tx, _rx) = mpsc::channel(1);

        hub.register(3, tx).await;
        assert!(hub.send_to_user(3, WsMessage::Text("1".to_string())).await);
        // 队列已满：返回 false，但连接仍然保留
        assert!(!hub.send_to_user(3, WsMessage::Text("2".to_string())).await);
        assert!(hub.has(3).await);
    }

    #[tokio::test]
    async fn broadcast_removes_slow_consumer() {
        let hub = std::sync::Arc::new(ConnectionHub::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let run_hub = hub.clone();
        let worker = tokio::spawn(async move { run_hub.run(shutdown_rx).await });

        let (fast_tx, mut fast_rx) = make_queue();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        hub.register(1, fast_tx).await;
        hub.register(2, slow_tx).await;

        // 打满慢消费者的队列
        assert!(hub.send_to_user(2, WsMessage::Text("fill".to_string())).await);

        hub.send_to_users(vec![1, 2], WsMessage::Text("batch".to_string())).await;

        assert!(matches!(fast_rx.recv().await, Some(WsMessage::Text(t)) if t == "batch"));

        // 慢消费者被移除
        for _ in 0..50 {
            if !hub.has(2).await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!hub.has(2).await);
        assert!(hub.has(1).await);

        let _ = shutdown_tx.send(true);
        let _ = worker.await;
    }

    #[tokio::test]
    async fn online_users_snapshot() {
        let hub = ConnectionHub::new();
        for user_id in [1, 2, 3] {
            let (tx, _rx) = make_queue();
            hub.register(user_id, tx).await;
        }

        let mut users = hub.online_users().await;
        users.sort();
        assert_eq!(users, vec![1, 2, 3]);
        assert_eq!(hub.client_count().await, 3);

        hub.close_all().await;
        assert_eq!(hub.client_count().await, 0);
    }
}
