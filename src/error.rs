use std::error::Error as StdError;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// IM 网关错误类型
#[derive(Debug, Clone)]
pub enum ImError {
    /// 配置错误（缺少必填项等）
    Configuration(String),
    /// 数据库错误
    Database(String),
    /// msg_id 重复（唯一索引冲突，幂等信号）
    DuplicateMessage(String),
    /// 消息未找到
    MessageNotFound(String),
    /// 路由未找到（用户离线）
    RouteNotFound(i64),
    /// 群组未找到
    GroupNotFound(i64),
    /// 认证失败
    Unauthorized(String),
    /// 协议错误（非法帧）
    Protocol(String),
    /// 序列化错误
    Serialization(String),
    /// 节点间传输错误
    Transport(String),
    /// 超时
    Timeout(String),
    /// 内部错误
    Internal(String),
}

impl fmt::Display for ImError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ImError::Database(msg) => write!(f, "Database error: {}", msg),
            ImError::DuplicateMessage(id) => write!(f, "Duplicate message: {}", id),
            ImError::MessageNotFound(id) => write!(f, "Message not found: {}", id),
            ImError::RouteNotFound(uid) => write!(f, "Route not found for user: {}", uid),
            ImError::GroupNotFound(gid) => write!(f, "Group not found: {}", gid),
            ImError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ImError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ImError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ImError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ImError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ImError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for ImError {}

impl IntoResponse for ImError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            ImError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ImError::Protocol(_) => StatusCode::BAD_REQUEST,
            ImError::MessageNotFound(_) | ImError::RouteNotFound(_) | ImError::GroupNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ImError::DuplicateMessage(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status_code, self.to_string()).into_response()
    }
}

impl From<sqlx::Error> for ImError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ImError::DuplicateMessage(db.message().to_string())
            }
            sqlx::Error::RowNotFound => ImError::MessageNotFound("row not found".to_string()),
            _ => ImError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ImError {
    fn from(err: serde_json::Error) -> Self {
        ImError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ImError {
    fn from(err: std::io::Error) -> Self {
        ImError::Internal(err.to_string())
    }
}

impl From<tonic::Status> for ImError {
    fn from(status: tonic::Status) -> Self {
        ImError::Transport(status.to_string())
    }
}

impl From<tonic::transport::Error> for ImError {
    fn from(err: tonic::transport::Error) -> Self {
        ImError::Transport(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ImError>;
