use serde::{Deserialize, Serialize};

/// 群组
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Group {
    pub group_id: i64,
    pub group_name: String,
    pub owner_id: i64,
    #[serde(default)]
    pub avatar_url: String,
    pub created_at: i64,
}

/// 群成员
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GroupMember {
    pub group_id: i64,
    pub user_id: i64,
    /// 0:普通成员 1:管理员 2:群主
    pub role: i32,
    pub joined_at: i64,
}
