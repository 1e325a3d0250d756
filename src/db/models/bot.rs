//! Bot models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Active,
    Paused,
    Inactive,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl std::str::FromStr for BotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "inactive" => Ok(Self::Inactive),
            _ => Err(format!("Unknown bot status: {}", s)),
        }
    }
}

impl From<String> for BotStatus {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Self::Inactive)
    }
}

/// Payment state for bots created through a checkout flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Pending,
    Failed,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paid => write!(f, "paid"),
            Self::Pending => write!(f, "pending"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bot {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Customer site the chat widget is embedded on
    pub domain: String,
    pub status: String,
    /// Set only for bots created through checkout, NULL otherwise
    pub payment_status: Option<String>,
    /// Checkout session that paid for this bot; the UNIQUE constraint
    /// makes webhook replays a no-op
    pub provider_session_id: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Bot {
    pub fn status_enum(&self) -> BotStatus {
        BotStatus::from(self.status.clone())
    }
}

/// Bot with assignment count for manager list views
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BotWithAssignmentCount {
    pub id: String,
    pub name: String,
    pub description: String,
    pub domain: String,
    pub status: String,
    pub payment_status: Option<String>,
    pub provider_session_id: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
    pub assigned_users: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateBotRequest {
    pub name: String,
    pub description: String,
    pub domain: String,
    /// Defaults to active when omitted
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBotRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub domain: Option<String>,
    pub status: Option<String>,
}
