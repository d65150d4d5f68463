use serde::{Deserialize, Serialize};

/// 消息
///
/// `server_time` 在首次持久化时分配一次，之后不再变更；
/// `status` 只会单调前进（sent -> delivered -> read）。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Message {
    /// 消息唯一 ID（通常由客户端生成 UUID）
    pub msg_id: String,
    /// 发送者用户 ID（0 表示系统消息）
    pub from_user_id: i64,
    /// 接收者用户 ID（单聊）
    pub to_user_id: i64,
    /// 群组 ID（0 表示单聊）
    pub group_id: i64,
    /// 消息内容
    pub content: String,
    /// 消息类型
    pub msg_type: i32,
    /// 消息状态
    pub status: i32,
    /// 文件 ID（多媒体消息的外部引用）
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_id: String,
    /// 客户端时间戳（毫秒，按上报值记录）
    pub client_time: i64,
    /// 服务端时间戳（毫秒，排序依据）
    pub server_time: i64,
    /// 送达时间戳（毫秒）
    pub delivered_time: i64,
    /// 已读时间戳（毫秒）
    pub read_time: i64,
}

/// 发送消息请求（服务端主动推送，如系统消息）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SendMessageRequest {
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub group_id: i64,
    pub content: String,
    pub msg_type: i32,
    #[serde(default)]
    pub file_id: String,
}

/// 历史消息查询请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMessagesRequest {
    /// 当前用户 ID
    pub user_id: i64,
    /// 对方用户 ID 或群组 ID
    pub target_id: i64,
    /// 会话类型（1:单聊 2:群聊）
    pub session_type: i32,
    /// 获取此时间之前的消息（毫秒，排他上界），0 表示最新
    #[serde(default)]
    pub before_time: i64,
    /// 每页条数，0 表示默认 20
    #[serde(default)]
    pub limit: i64,
}
