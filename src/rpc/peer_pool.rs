//! 对端连接池：按 rpc_addr 惰性拨号，连接复用

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::error::{ImError, Result};
use crate::model::message::Message;
use crate::rpc::proto;
use crate::rpc::proto::peer_service_client::PeerServiceClient;

/// 拨号超时
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
/// 单次调用超时；超时按传输失败处理，消息保持 sent 状态
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// 对端连接池
pub struct PeerPool {
    /// rpc_addr -> 客户端
    clients: RwLock<HashMap<String, PeerServiceClient<Channel>>>,
}

impl PeerPool {
    /// 创建连接池
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// 转发消息到指定节点，返回对端的入队确认
    ///
    /// 传输失败时关闭池中条目并向上返回错误；调用方不做同步重试，
    /// 消息已持久化，等接收方重连时补推。
    pub async fn forward(&self, addr: &str, msg: &Message) -> Result<bool> {
        let mut client = self.client(addr).await?;

        let request = tonic::Request::new(proto::ForwardMessageRequest::from(msg));
        match client.forward_message(request).await {
            Ok(response) => {
                let response = response.into_inner();
                if !response.delivered && !response.error.is_empty() {
                    debug!("peer {} refused message {}: {}", addr, msg.msg_id, response.error);
                }
                Ok(response.delivered)
            }
            Err(status) => {
                warn!("forward to {} failed: {}", addr, status);
                self.evict(addr).await;
                Err(ImError::Transport(status.to_string()))
            }
        }
    }

    /// 预热到指定节点的连接（节点发现工作器调用）
    pub async fn ensure(&self, addr: &str) -> Result<()> {
        self.client(addr).await.map(|_| ())
    }

    /// 获取或建立到指定地址的客户端
    ///
    /// 并发未命中可能重复拨号，多余的连接随覆盖丢弃。
    async fn client(&self, addr: &str) -> Result<PeerServiceClient<Channel>> {
        if let Some(client) = self.clients.read().await.get(addr) {
            return Ok(client.clone());
        }

        let endpoint = Endpoint::from_shared(format!("http://{}", addr))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(CALL_TIMEOUT);

        let channel = endpoint.connect().await?;
        let client = PeerServiceClient::new(channel);

        self.clients
            .write()
            .await
            .insert(addr.to_string(), client.clone());
        info!("connected to peer {}", addr);

        Ok(client)
    }

    /// 移除失效连接，下次使用时重新拨号
    pub async fn evict(&self, addr: &str) {
        self.clients.write().await.remove(addr);
    }

    /// 已建立连接的对端数
    pub async fn peer_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for PeerPool {
    fn default() -> Self {
        Self::new()
    }
}
