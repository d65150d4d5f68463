//! 客户端线协议：文本帧承载 JSON 信封

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ImError, Result};

/// 心跳请求（C->S）
pub const WS_MSG_TYPE_PING: &str = "ping";
/// 心跳响应（S->C）
pub const WS_MSG_TYPE_PONG: &str = "pong";
/// 聊天消息（双向）
pub const WS_MSG_TYPE_CHAT_MSG: &str = "chat_msg";
/// 群聊消息（C->S）
pub const WS_MSG_TYPE_GROUP_MSG: &str = "group_msg";
/// 消息确认（S->C）
pub const WS_MSG_TYPE_ACK: &str = "ack";
/// 消息状态更新（S->C）
pub const WS_MSG_TYPE_STATUS_UPDATE: &str = "status_update";
/// 送达回执（C->S）
pub const WS_MSG_TYPE_DELIVERED_RECEIPT: &str = "delivered_receipt";
/// 已读回执（C->S）
pub const WS_MSG_TYPE_READ_RECEIPT: &str = "read_receipt";

/// WebSocket 消息信封
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    /// 消息类型
    #[serde(rename = "type")]
    pub kind: String,
    /// 消息 ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg_id: String,
    /// 消息数据
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// 时间戳（毫秒）
    #[serde(default)]
    pub timestamp: i64,
}

impl WsEnvelope {
    /// 从文本帧解析信封；失败视为协议错误（调用方应断开连接）
    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame)
            .map_err(|e| ImError::Protocol(format!("malformed envelope: {}", e)))
    }

    /// 编码为文本帧
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// 解析 data 字段为具体载荷
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| ImError::Protocol(format!("invalid {} data: {}", self.kind, e)))
    }
}

/// 客户端发送的聊天消息
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatMessageData {
    #[serde(default)]
    pub msg_id: String,
    pub to_user_id: i64,
    pub content: String,
    #[serde(default)]
    pub msg_type: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_id: String,
    #[serde(default)]
    pub client_time: i64,
}

/// 客户端发送的群聊消息
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroupMessageData {
    #[serde(default)]
    pub msg_id: String,
    pub group_id: i64,
    pub content: String,
    #[serde(default)]
    pub msg_type: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_id: String,
    #[serde(default)]
    pub client_time: i64,
}

/// 服务端发送的 ACK 确认
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AckData {
    pub msg_id: String,
    pub status: i32,
    pub server_time: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// 服务端推送的消息
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushMessageData {
    pub msg_id: String,
    pub from_user_id: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub group_id: i64,
    pub content: String,
    pub msg_type: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_id: String,
    pub status: i32,
    pub client_time: i64,
    pub server_time: i64,
}

/// 消息状态更新
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatusUpdateData {
    pub msg_id: String,
    pub status: i32,
    pub update_time: i64,
}

/// 回执（送达/已读）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReceiptData {
    pub msg_id: String,
    /// "delivered" 或 "read"
    #[serde(rename = "type", default)]
    pub receipt_type: String,
    #[serde(default)]
    pub time: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl From<&crate::model::Message> for PushMessageData {
    fn from(msg: &crate::model::Message) -> Self {
        Self {
            msg_id: msg.msg_id.clone(),
            from_user_id: msg.from_user_id,
            group_id: msg.group_id,
            content: msg.content.clone(),
            msg_type: msg.msg_type,
            file_id: msg.file_id.clone(),
            status: msg.status,
            client_time: msg.client_time,
            server_time: msg.server_time,
        }
    }
}

/// 构造信封并序列化 data
pub fn envelope<T: Serialize>(kind: &str, msg_id: &str, data: Option<&T>, timestamp: i64) -> WsEnvelope {
    WsEnvelope {
        kind: kind.to_string(),
        msg_id: msg_id.to_string(),
        data: data.and_then(|d| serde_json::to_value(d).ok()),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_chat_envelope() {
        let frame = r#"{
            "type": "chat_msg",
            "msg_id": "m1",
            "data": {"msg_id": "m1", "to_user_id": 2, "content": "hi", "msg_type": 1, "client_time": 1000},
            "timestamp": 1000
        }"#;
        let env = WsEnvelope::decode(frame).unwrap();
        assert_eq!(env.kind, WS_MSG_TYPE_CHAT_MSG);

        let chat: ChatMessageData = env.data_as().unwrap();
        assert_eq!(chat.to_user_id, 2);
        assert_eq!(chat.content, "hi");
        assert_eq!(chat.file_id, "");
    }

    #[test]
    fn decode_ping_without_data() {
        // ping 允许缺省 data 和 msg_id
        let env = WsEnvelope::decode(r#"{"type":"ping","timestamp":5}"#).unwrap();
        assert_eq!(env.kind, WS_MSG_TYPE_PING);
        assert!(env.data.is_none());
        assert!(env.msg_id.is_empty());
    }

    #[test]
    fn malformed_envelope_is_protocol_error() {
        let err = WsEnvelope::decode("not json").unwrap_err();
        assert!(matches!(err, crate::error::ImError::Protocol(_)));

        // 缺少 type 字段同样非法
        let err = WsEnvelope::decode(r#"{"msg_id":"m1"}"#).unwrap_err();
        assert!(matches!(err, crate::error::ImError::Protocol(_)));
    }

    #[test]
    fn ack_omits_empty_error() {
        let ack = AckData {
            msg_id: "m1".to_string(),
            status: 2,
            server_time: 123,
            error: String::new(),
        };
        let env = envelope(WS_MSG_TYPE_ACK, "m1", Some(&ack), 123);
        let text = env.encode();
        assert!(!text.contains("error"));
        assert!(text.contains("\"server_time\":123"));
    }

    #[test]
    fn receipt_type_field_roundtrip() {
        let env = WsEnvelope::decode(
            r#"{"type":"read_receipt","data":{"msg_id":"m9","type":"read","time":7},"timestamp":7}"#,
        )
        .unwrap();
        let receipt: ReceiptData = env.data_as().unwrap();
        assert_eq!(receipt.msg_id, "m9");
        assert_eq!(receipt.receipt_type, "read");
    }
}
