//! 会话仓库 - PostgreSQL 实现

use sqlx::PgPool;

use crate::error::Result;
use crate::model::session::Session;

/// 会话仓库 trait
pub trait SessionRepository: Send + Sync {
    /// 更新会话（不存在则创建）；unread_count 在冲突时按增量累加
    async fn upsert_session(&self, session: &Session) -> Result<()>;

    /// 获取用户的会话列表（按最后消息时间降序）
    async fn get_user_sessions(&self, user_id: i64) -> Result<Vec<Session>>;

    /// 清除未读数
    async fn clear_unread(&self, user_id: i64, target_id: i64, session_type: i32) -> Result<()>;
}

/// 会话仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    user_id: i64,
    target_id: i64,
    session_type: i16,
    last_msg_content: String,
    last_msg_time: i64,
    unread_count: i32,
}

impl PgSessionRepository {
    /// 创建新的会话仓库
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl SessionRepository for PgSessionRepository {
    async fn upsert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nexim_sessions (
                user_id, target_id, session_type,
                last_msg_content, last_msg_time, unread_count, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $5)
            ON CONFLICT (user_id, target_id, session_type) DO UPDATE SET
                last_msg_content = EXCLUDED.last_msg_content,
                last_msg_time    = EXCLUDED.last_msg_time,
                unread_count     = nexim_sessions.unread_count + EXCLUDED.unread_count,
                updated_at       = EXCLUDED.updated_at
            "#,
        )
        .bind(session.user_id)
        .bind(session.target_id)
        .bind(session.session_type as i16)
        .bind(&session.last_msg_content)
        .bind(session.last_msg_time)
        .bind(session.unread_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_user_sessions(&self, user_id: i64) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT user_id, target_id, session_type,
                   last_msg_content, last_msg_time, unread_count
            FROM nexim_sessions
            WHERE user_id = $1
            ORDER BY last_msg_time DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Session {
                user_id: r.user_id,
                target_id: r.target_id,
                session_type: r.session_type as i32,
                last_msg_content: r.last_msg_content,
                last_msg_time: r.last_msg_time,
                unread_count: r.unread_count,
            })
            .collect())
    }

    async fn clear_unread(&self, user_id: i64, target_id: i64, session_type: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE nexim_sessions
            SET unread_count = 0
            WHERE user_id = $1 AND target_id = $2 AND session_type = $3
            "#,
        )
        .bind(user_id)
        .bind(target_id)
        .bind(session_type as i16)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
