//! IM 网关核心
//!
//! 接入升级后的客户端长连接，分发入站帧，驱动消息生命周期
//! （sent -> delivered -> read），并在本地推送和跨节点转发之间路由。
//! 恢复策略是拉取式的：投递失败不做推送重试，消息保持 sent 状态，
//! 等接收方在任意节点重连时补推。

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builder::ImBuilder;
use crate::config::{Config, DEFAULT_OFFLINE_DRAIN_LIMIT};
use crate::error::{ImError, Result};
use crate::events::{EventHooks, MessageHandler, UserHandler};
use crate::infra::hub::OUTBOUND_QUEUE_SIZE;
use crate::infra::{ConnectionHub, RouteManager};
use crate::model::message::{GetMessagesRequest, Message, SendMessageRequest};
use crate::model::session::Session;
use crate::model::{
    MSG_STATUS_DELIVERED, MSG_STATUS_FAILED, MSG_STATUS_READ, MSG_STATUS_SENT, MSG_TYPE_TEXT,
    SESSION_TYPE_GROUP, SESSION_TYPE_SINGLE,
};
use crate::protocol::{
    self, AckData, ChatMessageData, GroupMessageData, PushMessageData, ReceiptData,
    StatusUpdateData, WsEnvelope, WS_MSG_TYPE_ACK, WS_MSG_TYPE_CHAT_MSG,
    WS_MSG_TYPE_DELIVERED_RECEIPT, WS_MSG_TYPE_GROUP_MSG, WS_MSG_TYPE_PING, WS_MSG_TYPE_PONG,
    WS_MSG_TYPE_READ_RECEIPT, WS_MSG_TYPE_STATUS_UPDATE,
};
use crate::repository::route_repo::SERVER_ALIVE_WINDOW_SECS;
use crate::repository::{
    schema, GroupRepository, MessageRepository, PgGroupRepository, PgMessageRepository,
    PgRouteRepository, PgSessionRepository, RouteStore, SessionRepository,
};
use crate::rpc::{serve_peer_rpc, PeerPool};

/// 节点发现周期
const PEER_DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
/// 离线补推的逐条间隔，避免打满出站队列
const OFFLINE_DRAIN_SPACING: Duration = Duration::from_millis(10);

/// IM 网关服务
///
/// 克隆开销低（内部共享），可在嵌入方的各处自由传递。
#[derive(Clone)]
pub struct ImServer {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for ImServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImServer").finish_non_exhaustive()
    }
}

pub(crate) struct ServerInner {
    config: Config,
    hub: Arc<ConnectionHub>,
    routes: RouteManager,
    peers: PeerPool,
    message_repo: PgMessageRepository,
    session_repo: PgSessionRepository,
    route_repo: PgRouteRepository,
    group_repo: PgGroupRepository,
    hooks: EventHooks,
    shutdown_tx: watch::Sender<bool>,
}

/// WebSocket 升级请求的查询参数
#[derive(Deserialize)]
struct WsQuery {
    #[serde(default)]
    token: String,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ImServer {
    /// 从配置创建服务实例（通常经由 [`ImBuilder`]）
    pub fn new(config: Config) -> Self {
        let pool = config.pool.clone();
        let route_repo = PgRouteRepository::new(pool.clone());
        let routes = RouteManager::new(
            config.server_id.clone(),
            Arc::new(route_repo.clone()),
            config.cache_ttl_secs,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(ServerInner {
                hub: Arc::new(ConnectionHub::new()),
                routes,
                peers: PeerPool::new(),
                message_repo: PgMessageRepository::new(pool.clone()),
                session_repo: PgSessionRepository::new(pool.clone()),
                route_repo,
                group_repo: PgGroupRepository::new(pool),
                hooks: EventHooks::new(),
                shutdown_tx,
                config,
            }),
        }
    }

    /// 创建构建器
    pub fn builder() -> ImBuilder {
        ImBuilder::new()
    }

    /// 当前配置
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// 启动服务：初始化表结构、注册节点、拉起各工作器，随后立即返回
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;

        // 1. 表结构初始化（失败则启动失败）
        schema::init(&inner.config.pool).await?;

        // 2. 注册当前节点
        inner
            .route_repo
            .register_server(&inner.config.server_id, &inner.config.rpc_addr)
            .await?;

        // 3. 连接中心广播循环
        {
            let hub = inner.hub.clone();
            let shutdown_rx = inner.shutdown_tx.subscribe();
            tokio::spawn(async move { hub.run(shutdown_rx).await });
        }

        // 4. 心跳工作器
        {
            let inner = inner.clone();
            let shutdown_rx = inner.shutdown_tx.subscribe();
            tokio::spawn(async move { heartbeat_worker(inner, shutdown_rx).await });
        }

        // 5. 节点间 RPC（单节点部署可不配置）
        if !inner.config.rpc_addr.is_empty() {
            let rpc_addr = inner.config.rpc_addr.clone();
            let hub = inner.hub.clone();
            let shutdown_rx = inner.shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = serve_peer_rpc(&rpc_addr, hub, shutdown_rx).await {
                    error!("peer RPC server exited: {}", e);
                }
            });
        }

        // 6. 节点发现工作器
        {
            let inner = inner.clone();
            let shutdown_rx = inner.shutdown_tx.subscribe();
            tokio::spawn(async move { discovery_worker(inner, shutdown_rx).await });
        }

        info!("IM server started, id={}", inner.config.server_id);
        Ok(())
    }

    /// 停止服务：注销节点、通知工作器退出、关闭全部连接
    pub async fn stop(&self) {
        let inner = &self.inner;
        info!("IM server stopping...");

        if let Err(e) = inner.route_repo.unregister_server(&inner.config.server_id).await {
            warn!("failed to unregister server: {}", e);
        }

        let _ = inner.shutdown_tx.send(true);
        inner.hub.close_all().await;

        info!("IM server stopped");
    }

    /// 构建 WebSocket 路由，由嵌入方挂载到任意路径
    ///
    /// 例：`app.nest("/im", im_server.websocket_router())` 后客户端连接
    /// `/im/ws?token=...`。
    pub fn websocket_router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_upgrade))
            .with_state(self.inner.clone())
    }

    /// 发送消息（服务端主动推送，如系统消息）
    pub async fn send(&self, req: &SendMessageRequest) -> Result<Message> {
        let msg = Message {
            msg_id: Uuid::new_v4().to_string(),
            from_user_id: req.from_user_id,
            to_user_id: req.to_user_id,
            group_id: req.group_id,
            content: req.content.clone(),
            msg_type: if req.msg_type == 0 { MSG_TYPE_TEXT } else { req.msg_type },
            status: MSG_STATUS_SENT,
            file_id: req.file_id.clone(),
            client_time: 0,
            server_time: now_ms(),
            delivered_time: 0,
            read_time: 0,
        };

        self.inner.message_repo.save(&msg).await?;
        self.inner.hooks.fire_message(&msg);

        if msg.group_id > 0 {
            self.inner.deliver_group_message(&msg).await;
        } else {
            self.inner.update_single_sessions(&msg).await;
            self.inner.route_and_deliver(&msg).await;
        }

        Ok(msg)
    }

    /// 标记消息为已读，并通知各消息的发送方
    pub async fn mark_as_read(&self, user_id: i64, msg_ids: &[String]) -> Result<()> {
        self.inner.mark_as_read(user_id, msg_ids).await
    }

    /// 检查用户是否在本节点在线
    pub async fn is_user_online(&self, user_id: i64) -> bool {
        self.inner.hub.has(user_id).await
    }

    /// 获取用户的会话列表
    pub async fn get_sessions(&self, user_id: i64) -> Result<Vec<Session>> {
        self.inner.session_repo.get_user_sessions(user_id).await
    }

    /// 获取历史消息
    pub async fn get_messages(&self, req: &GetMessagesRequest) -> Result<Vec<Message>> {
        self.inner.message_repo.get_messages(req).await
    }

    /// 注册消息回调
    pub fn on_message(&self, handler: MessageHandler) {
        self.inner.hooks.on_message(handler);
    }

    /// 注册用户上线回调
    pub fn on_user_online(&self, handler: UserHandler) {
        self.inner.hooks.on_user_online(handler);
    }

    /// 注册用户下线回调
    pub fn on_user_offline(&self, handler: UserHandler) {
        self.inner.hooks.on_user_offline(handler);
    }
}

// ========== WebSocket 接入 ==========

/// 升级处理：先认证再升级，认证失败回 401
async fn ws_upgrade(
    State(inner): State<Arc<ServerInner>>,
    Query(query): Query<WsQuery>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if query.token.is_empty() {
        return ImError::Unauthorized("missing token".to_string()).into_response();
    }

    let user_id = match inner.config.authenticator.authenticate(&query.token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!("authentication rejected: {}", e);
            return ImError::Unauthorized("invalid token".to_string()).into_response();
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| handle_connection(inner, user_id, socket)),
        Err(rejection) => rejection.into_response(),
    }
}

/// 单连接生命周期：注册 -> 补推离线消息 -> 分发循环 -> 清理
async fn handle_connection(inner: Arc<ServerInner>, user_id: i64, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(OUTBOUND_QUEUE_SIZE);

    let conn_id = inner.hub.register(user_id, tx).await;

    // 写协程独占 socket 写端，排空出站队列
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, WsMessage::Close(_));
            if sink.send(msg).await.is_err() {
                break;
            }
            if is_close {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if let Err(e) = inner.routes.register(user_id).await {
        warn!("failed to register route for user {}: {}", user_id, e);
    }

    inner.hooks.fire_user_online(user_id);
    info!("user {} connected (conn {})", user_id, conn_id);

    // 异步补推离线消息
    {
        let drain_inner = inner.clone();
        tokio::spawn(async move { drain_inner.drain_offline_messages(user_id).await });
    }

    // 读循环：任何读错误或非法信封都终止连接
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match WsEnvelope::decode(&text) {
                Ok(envelope) => inner.dispatch(user_id, envelope).await,
                Err(e) => {
                    warn!("closing connection of user {}: {}", user_id, e);
                    break;
                }
            },
            Ok(WsMessage::Close(_)) => break,
            // 协议层 ping/pong 由底层处理，二进制帧忽略
            Ok(_) => {}
            Err(e) => {
                debug!("read error from user {}: {}", user_id, e);
                break;
            }
        }
    }

    inner.disconnect(user_id, conn_id).await;
    // 出站队列的所有发送端此时已释放，写协程随 recv 结束退出
    let _ = writer.await;
}

// ========== 核心流程 ==========

impl ServerInner {
    /// 按消息类型分发入站信封
    async fn dispatch(&self, user_id: i64, envelope: WsEnvelope) {
        debug!("received {} from user {}", envelope.kind, user_id);

        match envelope.kind.as_str() {
            WS_MSG_TYPE_PING => self.handle_ping(user_id).await,
            WS_MSG_TYPE_CHAT_MSG => match envelope.data_as::<ChatMessageData>() {
                Ok(chat) => self.handle_chat_message(user_id, chat).await,
                Err(e) => warn!("invalid chat message from user {}: {}", user_id, e),
            },
            WS_MSG_TYPE_GROUP_MSG => match envelope.data_as::<GroupMessageData>() {
                Ok(group_msg) => self.handle_group_message(user_id, group_msg).await,
                Err(e) => warn!("invalid group message from user {}: {}", user_id, e),
            },
            WS_MSG_TYPE_DELIVERED_RECEIPT => match envelope.data_as::<ReceiptData>() {
                Ok(receipt) => self.handle_delivered_receipt(user_id, receipt).await,
                Err(e) => warn!("invalid receipt from user {}: {}", user_id, e),
            },
            WS_MSG_TYPE_READ_RECEIPT => match envelope.data_as::<ReceiptData>() {
                Ok(receipt) => {
                    if let Err(e) = self.mark_as_read(user_id, &[receipt.msg_id]).await {
                        warn!("failed to process read receipt from user {}: {}", user_id, e);
                    }
                }
                Err(e) => warn!("invalid receipt from user {}: {}", user_id, e),
            },
            other => warn!("unknown message type {} from user {}", other, user_id),
        }
    }

    async fn handle_ping(&self, user_id: i64) {
        let pong = WsEnvelope {
            kind: WS_MSG_TYPE_PONG.to_string(),
            msg_id: String::new(),
            data: None,
            timestamp: now_ms(),
        };
        self.hub
            .send_to_user(user_id, WsMessage::Text(pong.encode()))
            .await;
    }

    /// 单聊发送流水线
    async fn handle_chat_message(&self, from_user_id: i64, mut chat: ChatMessageData) {
        // 客户端未提供 msg_id 时由服务端生成
        if chat.msg_id.is_empty() {
            chat.msg_id = Uuid::new_v4().to_string();
        }

        let server_time = now_ms();
        let msg = Message {
            msg_id: chat.msg_id,
            from_user_id,
            to_user_id: chat.to_user_id,
            group_id: 0,
            content: chat.content,
            msg_type: if chat.msg_type == 0 { MSG_TYPE_TEXT } else { chat.msg_type },
            status: MSG_STATUS_SENT,
            file_id: chat.file_id,
            client_time: chat.client_time,
            server_time,
            delivered_time: 0,
            read_time: 0,
        };

        // 1. 持久化；失败（含 msg_id 重复）以失败 ACK 告知发送方
        if let Err(e) = self.message_repo.save(&msg).await {
            error!("failed to save message {}: {}", msg.msg_id, e);
            self.send_ack(from_user_id, &msg.msg_id, MSG_STATUS_FAILED, server_time, &e.to_string())
                .await;
            return;
        }

        info!("message saved: {} ({} -> {})", msg.msg_id, msg.from_user_id, msg.to_user_id);

        // 2. ACK 先于该消息的任何 status_update 入队
        self.send_ack(from_user_id, &msg.msg_id, MSG_STATUS_SENT, server_time, "")
            .await;

        // 3. 会话：发送方未读不变，接收方未读 +1
        self.update_single_sessions(&msg).await;

        // 4. 消息回调
        self.hooks.fire_message(&msg);

        // 5. 路由投递
        self.route_and_deliver(&msg).await;
    }

    /// 群聊发送：校验成员身份、持久化、会话更新、本地成员扇出
    async fn handle_group_message(&self, from_user_id: i64, mut group_msg: GroupMessageData) {
        if group_msg.msg_id.is_empty() {
            group_msg.msg_id = Uuid::new_v4().to_string();
        }

        let server_time = now_ms();

        match self.group_repo.is_member(group_msg.group_id, from_user_id).await {
            Ok(true) => {}
            Ok(false) => {
                self.send_ack(
                    from_user_id,
                    &group_msg.msg_id,
                    MSG_STATUS_FAILED,
                    server_time,
                    "not a group member",
                )
                .await;
                return;
            }
            Err(e) => {
                self.send_ack(from_user_id, &group_msg.msg_id, MSG_STATUS_FAILED, server_time, &e.to_string())
                    .await;
                return;
            }
        }

        let msg = Message {
            msg_id: group_msg.msg_id,
            from_user_id,
            to_user_id: 0,
            group_id: group_msg.group_id,
            content: group_msg.content,
            msg_type: if group_msg.msg_type == 0 { MSG_TYPE_TEXT } else { group_msg.msg_type },
            status: MSG_STATUS_SENT,
            file_id: group_msg.file_id,
            client_time: group_msg.client_time,
            server_time,
            delivered_time: 0,
            read_time: 0,
        };

        if let Err(e) = self.message_repo.save(&msg).await {
            error!("failed to save group message {}: {}", msg.msg_id, e);
            self.send_ack(from_user_id, &msg.msg_id, MSG_STATUS_FAILED, server_time, &e.to_string())
                .await;
            return;
        }

        self.send_ack(from_user_id, &msg.msg_id, MSG_STATUS_SENT, server_time, "")
            .await;

        self.hooks.fire_message(&msg);

        self.deliver_group_message(&msg).await;
    }

    /// 送达回执：推进状态并通知发送方
    async fn handle_delivered_receipt(&self, user_id: i64, receipt: ReceiptData) {
        let delivered_time = now_ms();

        match self
            .message_repo
            .update_status(&receipt.msg_id, MSG_STATUS_DELIVERED, delivered_time)
            .await
        {
            Ok(true) => {}
            // 状态未推进（重复回执或已是更高状态）：幂等，无需通知
            Ok(false) => {
                debug!("receipt for {} from user {} did not advance status", receipt.msg_id, user_id);
                return;
            }
            Err(e) => {
                warn!("failed to apply delivered receipt for {}: {}", receipt.msg_id, e);
                return;
            }
        }

        match self.message_repo.get_by_msg_id(&receipt.msg_id).await {
            Ok(msg) => {
                self.notify_status_update(msg.from_user_id, &receipt.msg_id, MSG_STATUS_DELIVERED, delivered_time)
                    .await;
            }
            Err(e) => warn!("failed to load message {}: {}", receipt.msg_id, e),
        }
    }

    /// 标记已读：逐条推进状态、通知发送方，最后清理会话未读数
    async fn mark_as_read(&self, user_id: i64, msg_ids: &[String]) -> Result<()> {
        let read_time = now_ms();
        let mut peers_to_clear: Vec<i64> = Vec::new();

        for msg_id in msg_ids {
            let advanced = match self.message_repo.update_status(msg_id, MSG_STATUS_READ, read_time).await {
                Ok(advanced) => advanced,
                Err(e) => {
                    warn!("failed to mark message {} as read: {}", msg_id, e);
                    continue;
                }
            };

            let msg = match self.message_repo.get_by_msg_id(msg_id).await {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("failed to load message {}: {}", msg_id, e);
                    continue;
                }
            };

            if advanced {
                self.notify_status_update(msg.from_user_id, msg_id, MSG_STATUS_READ, read_time)
                    .await;
            }

            if msg.group_id == 0 && msg.to_user_id == user_id && !peers_to_clear.contains(&msg.from_user_id) {
                peers_to_clear.push(msg.from_user_id);
            }
        }

        for peer_id in peers_to_clear {
            if let Err(e) = self
                .session_repo
                .clear_unread(user_id, peer_id, SESSION_TYPE_SINGLE)
                .await
            {
                warn!("failed to clear unread for user {} peer {}: {}", user_id, peer_id, e);
            }
        }

        Ok(())
    }

    /// 路由并投递消息（核心转发逻辑）
    async fn route_and_deliver(&self, msg: &Message) {
        let target = match self.routes.lookup(msg.to_user_id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                debug!("user {} offline, message {} stays sent", msg.to_user_id, msg.msg_id);
                return;
            }
            Err(e) => {
                warn!("route lookup for user {} failed: {}", msg.to_user_id, e);
                return;
            }
        };

        if target.server_id == self.routes.server_id() {
            self.push_to_local_user(msg).await;
        } else {
            debug!("forwarding message {} to node {}", msg.msg_id, target.server_id);
            // 缓存可能指向已死节点：转发失败即视为当前不可达，
            // 消息保持 sent，等接收方重连补推。不同步重试。
            match self.peers.forward(&target.rpc_addr, msg).await {
                Ok(true) => self.finish_delivery(msg).await,
                Ok(false) => {
                    debug!("peer {} did not accept message {}", target.server_id, msg.msg_id)
                }
                Err(e) => {
                    debug!("forward of message {} failed: {}", msg.msg_id, e)
                }
            }
        }
    }

    /// 本地推送；队列接受后推进状态并通知发送方
    async fn push_to_local_user(&self, msg: &Message) -> bool {
        let push = protocol::envelope(
            WS_MSG_TYPE_CHAT_MSG,
            &msg.msg_id,
            Some(&PushMessageData::from(msg)),
            msg.server_time,
        );

        let accepted = self
            .hub
            .send_to_user(msg.to_user_id, WsMessage::Text(push.encode()))
            .await;

        if accepted {
            self.finish_delivery(msg).await;
        } else {
            // 队列满或刚好断开：瞬时信号，消息保持 sent
            debug!("local enqueue for user {} refused, message {} stays sent", msg.to_user_id, msg.msg_id);
        }

        accepted
    }

    /// 投递完成：状态推进到已送达，并通知发送方
    async fn finish_delivery(&self, msg: &Message) {
        let delivered_time = now_ms();

        match self
            .message_repo
            .update_status(&msg.msg_id, MSG_STATUS_DELIVERED, delivered_time)
            .await
        {
            Ok(true) => {
                self.notify_status_update(msg.from_user_id, &msg.msg_id, MSG_STATUS_DELIVERED, delivered_time)
                    .await;
            }
            Ok(false) => {}
            Err(e) => warn!("failed to advance message {} to delivered: {}", msg.msg_id, e),
        }
    }

    /// 群消息投递：会话更新 + 本地成员扇出
    ///
    /// 跨节点的群成员暂不转发（单方法 RPC 不携带群上下文），
    /// 留作对端 RPC 的扩展点；群消息不做送达/已读状态推进。
    async fn deliver_group_message(&self, msg: &Message) {
        let members = match self.group_repo.get_members(msg.group_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!("failed to load members of group {}: {}", msg.group_id, e);
                return;
            }
        };

        for member in &members {
            let unread = if member.user_id == msg.from_user_id { 0 } else { 1 };
            let session = Session {
                user_id: member.user_id,
                target_id: msg.group_id,
                session_type: SESSION_TYPE_GROUP,
                last_msg_content: msg.content.clone(),
                last_msg_time: msg.server_time,
                unread_count: unread,
            };
            if let Err(e) = self.session_repo.upsert_session(&session).await {
                warn!("failed to upsert group session for user {}: {}", member.user_id, e);
            }
        }

        let push = protocol::envelope(
            WS_MSG_TYPE_GROUP_MSG,
            &msg.msg_id,
            Some(&PushMessageData::from(msg)),
            msg.server_time,
        );

        for member in members {
            if member.user_id == msg.from_user_id {
                continue;
            }
            if !self
                .hub
                .send_to_user(member.user_id, WsMessage::Text(push.encode()))
                .await
            {
                debug!("group member {} not on this node, skipping push", member.user_id);
            }
        }
    }

    /// 补推离线消息（用户连接时异步触发）
    ///
    /// 最早的消息先推，保持时间序；单条被拒即停止（背压），
    /// 剩余消息留待下次重连。
    async fn drain_offline_messages(&self, user_id: i64) {
        let messages = match self
            .message_repo
            .get_undelivered(user_id, DEFAULT_OFFLINE_DRAIN_LIMIT)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!("failed to load offline messages for user {}: {}", user_id, e);
                return;
            }
        };

        if messages.is_empty() {
            debug!("no offline messages for user {}", user_id);
            return;
        }

        info!("pushing {} offline messages to user {}", messages.len(), user_id);

        for msg in messages {
            if !self.push_to_local_user(&msg).await {
                warn!("offline drain for user {} stopped at message {}", user_id, msg.msg_id);
                break;
            }
            tokio::time::sleep(OFFLINE_DRAIN_SPACING).await;
        }
    }

    /// 更新单聊双方会话：发送方未读不变，接收方未读 +1
    async fn update_single_sessions(&self, msg: &Message) {
        let sender_session = Session {
            user_id: msg.from_user_id,
            target_id: msg.to_user_id,
            session_type: SESSION_TYPE_SINGLE,
            last_msg_content: msg.content.clone(),
            last_msg_time: msg.server_time,
            unread_count: 0,
        };
        if let Err(e) = self.session_repo.upsert_session(&sender_session).await {
            warn!("failed to upsert sender session: {}", e);
        }

        let recipient_session = Session {
            user_id: msg.to_user_id,
            target_id: msg.from_user_id,
            session_type: SESSION_TYPE_SINGLE,
            last_msg_content: msg.content.clone(),
            last_msg_time: msg.server_time,
            unread_count: 1,
        };
        if let Err(e) = self.session_repo.upsert_session(&recipient_session).await {
            warn!("failed to upsert recipient session: {}", e);
        }
    }

    /// 发送 ACK
    async fn send_ack(&self, user_id: i64, msg_id: &str, status: i32, server_time: i64, error: &str) {
        let ack = AckData {
            msg_id: msg_id.to_string(),
            status,
            server_time,
            error: error.to_string(),
        };
        let envelope = protocol::envelope(WS_MSG_TYPE_ACK, msg_id, Some(&ack), now_ms());
        self.hub
            .send_to_user(user_id, WsMessage::Text(envelope.encode()))
            .await;
    }

    /// 通知发送方消息状态变更
    ///
    /// 发送方不在本节点时放弃推送：状态以持久层为准，
    /// 发送方下次拉取历史时同步（对端 RPC 仅承载消息转发）。
    async fn notify_status_update(&self, user_id: i64, msg_id: &str, status: i32, update_time: i64) {
        let update = StatusUpdateData {
            msg_id: msg_id.to_string(),
            status,
            update_time,
        };
        let envelope = protocol::envelope(WS_MSG_TYPE_STATUS_UPDATE, msg_id, Some(&update), update_time);

        if !self
            .hub
            .send_to_user(user_id, WsMessage::Text(envelope.encode()))
            .await
        {
            debug!("status update for {} not pushed, sender {} not on this node", msg_id, user_id);
        }
    }

    /// 断开清理：仅当连接仍是当前安装的那个才执行
    async fn disconnect(&self, user_id: i64, conn_id: u64) {
        if self.hub.unregister(user_id, conn_id).await {
            if let Err(e) = self.routes.unregister(user_id).await {
                warn!("failed to unregister route for user {}: {}", user_id, e);
            }
            self.hooks.fire_user_offline(user_id);
            info!("user {} disconnected", user_id);
        }
    }
}

// ========== 后台工作器 ==========

/// 心跳工作器：刷新本节点心跳，批量刷新本地在线用户的路由心跳
async fn heartbeat_worker(inner: Arc<ServerInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(inner.config.heartbeat_interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                // 失败只记录，下个周期重试
                if let Err(e) = inner.route_repo.heartbeat_server(&inner.config.server_id).await {
                    warn!("server heartbeat failed: {}", e);
                    continue;
                }

                let user_ids = inner.hub.online_users().await;
                if !user_ids.is_empty() {
                    if let Err(e) = inner.routes.batch_touch(&user_ids).await {
                        warn!("route heartbeat for {} users failed: {}", user_ids.len(), e);
                    }
                }
            }
        }
    }

    debug!("heartbeat worker stopped");
}

/// 节点发现工作器：周期性列出存活节点并预热对端连接
async fn discovery_worker(inner: Arc<ServerInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(PEER_DISCOVERY_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let servers = match inner.route_repo.list_alive_servers(SERVER_ALIVE_WINDOW_SECS).await {
                    Ok(servers) => servers,
                    Err(e) => {
                        warn!("peer discovery failed: {}", e);
                        continue;
                    }
                };

                for server in servers {
                    if server.server_id == inner.config.server_id {
                        continue;
                    }
                    if let Err(e) = inner.peers.ensure(&server.rpc_addr).await {
                        debug!("peer {} ({}) not reachable: {}", server.server_id, server.rpc_addr, e);
                    }
                }
            }
        }
    }

    debug!("peer discovery worker stopped");
}
