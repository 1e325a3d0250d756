//! Message models. The messages table is an append-only log: nothing in the
//! service updates or deletes individual rows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which side of the conversation produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Bot => write!(f, "bot"),
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "bot" => Ok(Self::Bot),
            _ => Err(format!("Unknown sender: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: String,
    pub bot_id: String,
    pub user_id: String,
    pub sender: String,
    pub body: String,
    /// Arbitrary JSON from the widget (page URL, client info), stored as TEXT
    pub metadata: Option<String>,
    pub is_test: i32,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub sender: String,
    pub body: String,
    pub metadata: Option<serde_json::Value>,
}

/// Manager sandbox message, recorded against the manager's own account
#[derive(Debug, Deserialize)]
pub struct TestMessageRequest {
    pub sender: String,
    pub body: String,
}
