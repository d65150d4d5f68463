//! 节点间通信：单方法 ForwardMessage RPC
//!
//! delivered=true 只表示接收节点的本地发送队列接受了消息（入队确认），
//! 不代表客户端应用已处理。发送节点信任该确认并把状态推进到已送达。

pub mod peer_pool;
pub mod peer_service;

pub use peer_pool::PeerPool;
pub use peer_service::serve_peer_rpc;

/// tonic 生成的 proto 类型
pub mod proto {
    tonic::include_proto!("nexim.peer");
}

use crate::model::message::Message;
use crate::model::MSG_STATUS_SENT;

impl From<&Message> for proto::ForwardMessageRequest {
    fn from(msg: &Message) -> Self {
        Self {
            to_user_id: msg.to_user_id,
            msg_id: msg.msg_id.clone(),
            from_user_id: msg.from_user_id,
            content: msg.content.clone(),
            msg_type: msg.msg_type,
            file_id: msg.file_id.clone(),
            client_time: msg.client_time,
            server_time: msg.server_time,
        }
    }
}

impl proto::ForwardMessageRequest {
    /// 还原为消息模型（接收节点推送给本地用户时用）
    pub fn to_message(&self) -> Message {
        Message {
            msg_id: self.msg_id.clone(),
            from_user_id: self.from_user_id,
            to_user_id: self.to_user_id,
            group_id: 0,
            content: self.content.clone(),
            msg_type: self.msg_type,
            status: MSG_STATUS_SENT,
            file_id: self.file_id.clone(),
            client_time: self.client_time,
            server_time: self.server_time,
            delivered_time: 0,
            read_time: 0,
        }
    }
}
