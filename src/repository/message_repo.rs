//! 消息仓库 - PostgreSQL 实现

use sqlx::PgPool;

use crate::error::{ImError, Result};
use crate::model::message::{GetMessagesRequest, Message};
use crate::model::{MSG_STATUS_DELIVERED, MSG_STATUS_READ, MSG_STATUS_SENT, SESSION_TYPE_SINGLE};

/// 消息仓库 trait
pub trait MessageRepository: Send + Sync {
    /// 保存消息；msg_id 重复返回 `DuplicateMessage`
    async fn save(&self, msg: &Message) -> Result<()>;

    /// 更新消息状态（只允许单调前进），返回是否有行前进
    async fn update_status(&self, msg_id: &str, status: i32, update_time: i64) -> Result<bool>;

    /// 根据消息 ID 查询
    async fn get_by_msg_id(&self, msg_id: &str) -> Result<Message>;

    /// 获取历史消息（server_time 降序，id 兜底）
    async fn get_messages(&self, req: &GetMessagesRequest) -> Result<Vec<Message>>;

    /// 获取未送达消息（server_time 升序，离线补推用）
    async fn get_undelivered(&self, user_id: i64, limit: i64) -> Result<Vec<Message>>;
}

/// 消息仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    msg_id: String,
    from_user_id: i64,
    to_user_id: i64,
    group_id: i64,
    content: String,
    msg_type: i16,
    status: i16,
    file_id: String,
    client_time: i64,
    server_time: i64,
    delivered_time: i64,
    read_time: i64,
}

const MESSAGE_COLUMNS: &str = r#"
    msg_id, from_user_id, to_user_id, group_id, content,
    msg_type, status, file_id, client_time, server_time,
    delivered_time, read_time
"#;

impl PgMessageRepository {
    /// 创建新的消息仓库
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn to_model(row: MessageRow) -> Message {
        Message {
            msg_id: row.msg_id,
            from_user_id: row.from_user_id,
            to_user_id: row.to_user_id,
            group_id: row.group_id,
            content: row.content,
            msg_type: row.msg_type as i32,
            status: row.status as i32,
            file_id: row.file_id,
            client_time: row.client_time,
            server_time: row.server_time,
            delivered_time: row.delivered_time,
            read_time: row.read_time,
        }
    }
}

impl MessageRepository for PgMessageRepository {
    async fn save(&self, msg: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nexim_messages (
                msg_id, from_user_id, to_user_id, group_id, content,
                msg_type, status, file_id, client_time, server_time,
                delivered_time, read_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&msg.msg_id)
        .bind(msg.from_user_id)
        .bind(msg.to_user_id)
        .bind(msg.group_id)
        .bind(&msg.content)
        .bind(msg.msg_type as i16)
        .bind(msg.status as i16)
        .bind(&msg.file_id)
        .bind(msg.client_time)
        .bind(msg.server_time)
        .bind(msg.delivered_time)
        .bind(msg.read_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_status(&self, msg_id: &str, status: i32, update_time: i64) -> Result<bool> {
        // 单调性在 SQL 层保证：status 只前进，时间戳只写一次
        let result = sqlx::query(
            r#"
            UPDATE nexim_messages
            SET status = $2,
                delivered_time = CASE
                    WHEN $2 = $3 AND delivered_time = 0 THEN $4 ELSE delivered_time
                END,
                read_time = CASE
                    WHEN $2 = $5 AND read_time = 0 THEN $4 ELSE read_time
                END
            WHERE msg_id = $1 AND status < $2
            "#,
        )
        .bind(msg_id)
        .bind(status as i16)
        .bind(MSG_STATUS_DELIVERED as i16)
        .bind(update_time)
        .bind(MSG_STATUS_READ as i16)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_by_msg_id(&self, msg_id: &str) -> Result<Message> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {} FROM nexim_messages WHERE msg_id = $1",
            MESSAGE_COLUMNS
        ))
        .bind(msg_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::to_model)
            .ok_or_else(|| ImError::MessageNotFound(msg_id.to_string()))
    }

    async fn get_messages(&self, req: &GetMessagesRequest) -> Result<Vec<Message>> {
        let limit = if req.limit <= 0 { 20 } else { req.limit };

        // 按会话类型和分页条件拼接查询（绑定序号随条件推进）
        let mut sql = format!("SELECT {} FROM nexim_messages WHERE ", MESSAGE_COLUMNS);

        let mut bind_count = if req.session_type == SESSION_TYPE_SINGLE {
            // 单聊：双向查询
            sql.push_str(
                "((from_user_id = $1 AND to_user_id = $2) \
                 OR (from_user_id = $2 AND to_user_id = $1)) AND group_id = 0",
            );
            2
        } else {
            sql.push_str("group_id = $1");
            1
        };

        if req.before_time > 0 {
            bind_count += 1;
            sql.push_str(&format!(" AND server_time < ${}", bind_count));
        }

        bind_count += 1;
        sql.push_str(&format!(
            " ORDER BY server_time DESC, id DESC LIMIT ${}",
            bind_count
        ));

        let mut query = sqlx::query_as::<_, MessageRow>(&sql);
        if req.session_type == SESSION_TYPE_SINGLE {
            query = query.bind(req.user_id).bind(req.target_id);
        } else {
            query = query.bind(req.target_id);
        }
        if req.before_time > 0 {
            query = query.bind(req.before_time);
        }
        query = query.bind(limit);

        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(Self::to_model).collect())
    }

    async fn get_undelivered(&self, user_id: i64, limit: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {} FROM nexim_messages
            WHERE to_user_id = $1 AND status = $2
            ORDER BY server_time ASC
            LIMIT $3
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(user_id)
        .bind(MSG_STATUS_SENT as i16)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::to_model).collect())
    }
}
