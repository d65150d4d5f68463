use serde::{Deserialize, Serialize};

/// 会话：用户视角的一个对话入口
///
/// 复合键为 (user_id, target_id, session_type)。接收方每收到一条新消息
/// unread_count 加 1，发送方的行不变；未读数由显式标记已读清零。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Session {
    pub user_id: i64,
    /// 对方用户 ID 或群组 ID
    pub target_id: i64,
    pub session_type: i32,
    pub last_msg_content: String,
    pub last_msg_time: i64,
    pub unread_count: i32,
}
