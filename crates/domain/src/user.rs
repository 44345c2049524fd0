use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 用户资料的只读投影。账号本身由认证服务维护，这里只关心展示字段。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            avatar_url: None,
        }
    }
}
