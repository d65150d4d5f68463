//! 可嵌入的即时通讯(IM)网关模块
//!
//! 支持单聊、群聊、消息状态追踪、分布式节点间消息路由。
//! 嵌入方提供数据库连接池和认证回调，网关负责长连接接入、
//! 消息持久化、跨节点投递和离线补推。
//!
//! ```no_run
//! use std::sync::Arc;
//! use nexim::{FnAuthenticator, ImServer};
//!
//! # async fn run(pool: sqlx::PgPool) -> nexim::Result<()> {
//! let im = ImServer::builder()
//!     .with_server_id("server-1")
//!     .with_rpc_addr("0.0.0.0:50051")
//!     .with_pool(pool)
//!     .with_authenticator(Arc::new(FnAuthenticator::new(|token: &str| {
//!         token.parse().map_err(|_| {
//!             nexim::ImError::Unauthorized("invalid token".to_string())
//!         })
//!     })))
//!     .from_env()
//!     .build()?;
//!
//! im.start().await?;
//! // 把 im.websocket_router() 挂载到主应用的 HTTP 路由
//! # Ok(())
//! # }
//! ```

#![allow(async_fn_in_trait)]

pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod infra;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod repository;
pub mod rpc;
pub mod server;

pub use builder::ImBuilder;
pub use config::{Authenticator, Config, FnAuthenticator};
pub use error::{ImError, Result};
pub use events::{EventHooks, MessageHandler, UserHandler};
pub use infra::{ConnectionHub, Database, RouteManager};
pub use model::*;
pub use server::ImServer;
