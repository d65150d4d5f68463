//! 群组仓库 - PostgreSQL 实现

use sqlx::PgPool;

use crate::error::{ImError, Result};
use crate::model::group::{Group, GroupMember};

/// 群组仓库 trait
pub trait GroupRepository: Send + Sync {
    /// 创建群组，回填分配的 group_id
    async fn create_group(&self, group: &Group) -> Result<Group>;

    /// 获取群组信息
    async fn get_group(&self, group_id: i64) -> Result<Group>;

    /// 添加群成员
    async fn add_member(&self, member: &GroupMember) -> Result<()>;

    /// 移除群成员
    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<()>;

    /// 获取群成员列表
    async fn get_members(&self, group_id: i64) -> Result<Vec<GroupMember>>;

    /// 检查用户是否是群成员
    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool>;
}

/// 群组仓库 (PostgreSQL 实现)
#[derive(Clone)]
pub struct PgGroupRepository {
    pool: PgPool,
}

impl PgGroupRepository {
    /// 创建新的群组仓库
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl GroupRepository for PgGroupRepository {
    async fn create_group(&self, group: &Group) -> Result<Group> {
        #[derive(sqlx::FromRow)]
        struct CreatedRow {
            group_id: i64,
            created_at: i64,
        }

        let row = sqlx::query_as::<_, CreatedRow>(
            r#"
            INSERT INTO nexim_groups (group_name, owner_id, avatar_url)
            VALUES ($1, $2, $3)
            RETURNING group_id, created_at
            "#,
        )
        .bind(&group.group_name)
        .bind(group.owner_id)
        .bind(&group.avatar_url)
        .fetch_one(&self.pool)
        .await?;

        let mut created = group.clone();
        created.group_id = row.group_id;
        created.created_at = row.created_at;
        Ok(created)
    }

    async fn get_group(&self, group_id: i64) -> Result<Group> {
        #[derive(sqlx::FromRow)]
        struct GroupRow {
            group_id: i64,
            group_name: String,
            owner_id: i64,
            avatar_url: String,
            created_at: i64,
        }

        let row = sqlx::query_as::<_, GroupRow>(
            r#"
            SELECT group_id, group_name, owner_id, avatar_url, created_at
            FROM nexim_groups
            WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Group {
            group_id: r.group_id,
            group_name: r.group_name,
            owner_id: r.owner_id,
            avatar_url: r.avatar_url,
            created_at: r.created_at,
        })
        .ok_or(ImError::GroupNotFound(group_id))
    }

    async fn add_member(&self, member: &GroupMember) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nexim_group_members (group_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, user_id) DO NOTHING
            "#,
        )
        .bind(member.group_id)
        .bind(member.user_id)
        .bind(member.role as i16)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_member(&self, group_id: i64, user_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM nexim_group_members WHERE group_id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_members(&self, group_id: i64) -> Result<Vec<GroupMember>> {
        #[derive(sqlx::FromRow)]
        struct MemberRow {
            group_id: i64,
            user_id: i64,
            role: i16,
            joined_at: i64,
        }

        let rows = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT group_id, user_id, role, joined_at
            FROM nexim_group_members
            WHERE group_id = $1
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| GroupMember {
                group_id: r.group_id,
                user_id: r.user_id,
                role: r.role as i32,
                joined_at: r.joined_at,
            })
            .collect())
    }

    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(1) FROM nexim_group_members WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0 > 0)
    }
}
