//! ForwardMessage 的服务端实现

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::Message as WsMessage;
use tokio::sync::watch;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info};

use crate::error::{ImError, Result};
use crate::infra::ConnectionHub;
use crate::protocol::{self, PushMessageData, WS_MSG_TYPE_CHAT_MSG};
use crate::rpc::proto;
use crate::rpc::proto::peer_service_server::{PeerService, PeerServiceServer};

/// 对端 RPC 服务：把转发来的消息推入本地连接中心
pub struct PeerServiceImpl {
    hub: Arc<ConnectionHub>,
}

impl PeerServiceImpl {
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }
}

#[tonic::async_trait]
impl PeerService for PeerServiceImpl {
    async fn forward_message(
        &self,
        request: Request<proto::ForwardMessageRequest>,
    ) -> std::result::Result<Response<proto::ForwardMessageResponse>, Status> {
        let req = request.into_inner();
        debug!("received forwarded message {} for user {}", req.msg_id, req.to_user_id);

        let msg = req.to_message();
        let push = protocol::envelope(
            WS_MSG_TYPE_CHAT_MSG,
            &msg.msg_id,
            Some(&PushMessageData::from(&msg)),
            msg.server_time,
        );

        // 入队确认：delivered 只代表本地发送队列接受了载荷
        let delivered = self
            .hub
            .send_to_user(msg.to_user_id, WsMessage::Text(push.encode()))
            .await;

        let error = if delivered {
            String::new()
        } else {
            format!("user {} not reachable on this node", msg.to_user_id)
        };

        Ok(Response::new(proto::ForwardMessageResponse {
            delivered,
            error,
        }))
    }
}

/// 等待停机信号
async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if rx.changed().await.is_err() {
            break;
        }
        if *rx.borrow() {
            break;
        }
    }
}

/// 启动对端 RPC 服务，直到停机信号触发
pub async fn serve_peer_rpc(
    rpc_addr: &str,
    hub: Arc<ConnectionHub>,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let addr: SocketAddr = rpc_addr
        .parse()
        .map_err(|e| ImError::Configuration(format!("invalid rpc_addr {}: {}", rpc_addr, e)))?;

    info!("peer RPC server listening on {}", addr);

    let service = PeerServiceServer::new(PeerServiceImpl::new(hub));
    Server::builder()
        .add_service(service)
        .serve_with_shutdown(addr, wait_for_shutdown(shutdown_rx))
        .await
        .map_err(|e| {
            error!("peer RPC server error: {}", e);
            ImError::Transport(e.to_string())
        })?;

    info!("peer RPC server stopped");
    Ok(())
}
