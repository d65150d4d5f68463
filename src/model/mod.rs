//! 核心数据模型

pub mod group;
pub mod message;
pub mod route;
pub mod session;

pub use group::{Group, GroupMember};
pub use message::{GetMessagesRequest, Message, SendMessageRequest};
pub use route::{RouteTarget, ServerNode, UserRoute};
pub use session::Session;

/// 消息类型：文本
pub const MSG_TYPE_TEXT: i32 = 1;
/// 消息类型：图片
pub const MSG_TYPE_IMAGE: i32 = 2;
/// 消息类型：语音
pub const MSG_TYPE_VOICE: i32 = 3;
/// 消息类型：视频
pub const MSG_TYPE_VIDEO: i32 = 4;
/// 消息类型：文件
pub const MSG_TYPE_FILE: i32 = 5;

/// 消息状态：发送中
pub const MSG_STATUS_SENDING: i32 = 1;
/// 消息状态：已发送（服务端已持久化）
pub const MSG_STATUS_SENT: i32 = 2;
/// 消息状态：已送达（接收方队列已接受）
pub const MSG_STATUS_DELIVERED: i32 = 3;
/// 消息状态：已读
pub const MSG_STATUS_READ: i32 = 4;
/// 消息状态：发送失败
pub const MSG_STATUS_FAILED: i32 = 5;

/// 会话类型：单聊
pub const SESSION_TYPE_SINGLE: i32 = 1;
/// 会话类型：群聊
pub const SESSION_TYPE_GROUP: i32 = 2;
