//! Assignment models linking users to the bots they may chat with.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl From<String> for AssignmentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => Self::Active,
            _ => Self::Inactive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub id: String,
    pub bot_id: String,
    pub user_id: String,
    pub assigned_by: String,
    pub status: String,
    pub created_at: String,
}

/// Assignment with user details for manager list views
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssignmentWithUser {
    pub id: String,
    pub bot_id: String,
    pub user_id: String,
    pub status: String,
    pub created_at: String,
    pub user_email: String,
    pub user_first_name: Option<String>,
    pub user_last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignUserRequest {
    pub user_id: String,
}
