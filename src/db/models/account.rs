//! Account and session models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Platform roles. Admins oversee the platform, managers operate bots and
/// invite end users, users chat with the bots assigned to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Admin,
    Manager,
    User,
}

impl AccountRole {
    /// Post-login landing path for this role
    pub fn redirect_path(&self) -> &'static str {
        match self {
            AccountRole::Admin => "/admin",
            AccountRole::Manager => "/manager",
            AccountRole::User => "/chat",
        }
    }
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountRole::Admin => write!(f, "admin"),
            AccountRole::Manager => write!(f, "manager"),
            AccountRole::User => write!(f, "user"),
        }
    }
}

impl std::str::FromStr for AccountRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(AccountRole::Admin),
            "manager" => Ok(AccountRole::Manager),
            "user" => Ok(AccountRole::User),
            _ => Err(format!("Unknown account role: {}", s)),
        }
    }
}

impl From<String> for AccountRole {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(AccountRole::User)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String,
    pub is_active: i32,
    pub email_verified: i32,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub invitation_token: Option<String>,
    pub invitation_expires_at: Option<String>,
    pub invited_by: Option<String>,
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Account {
    pub fn role_enum(&self) -> AccountRole {
        AccountRole::from(self.role.clone())
    }

    /// Check if a pending invitation has expired
    pub fn invitation_expired(&self) -> bool {
        match self.invitation_expires_at.as_deref() {
            Some(expires) => match chrono::DateTime::parse_from_rfc3339(expires) {
                Ok(expires) => expires < chrono::Utc::now(),
                Err(_) => true,
            },
            None => false,
        }
    }

    /// Name shown in conversation views. Falls back to the email local part
    /// when no name was ever set.
    pub fn display_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) if !first.is_empty() && !last.is_empty() => {
                format!("{} {}", first, last)
            }
            (Some(first), _) if !first.is_empty() => first.to_string(),
            (_, Some(last)) if !last.is_empty() => last.to_string(),
            _ => self
                .email
                .split('@')
                .next()
                .unwrap_or(&self.email)
                .to_string(),
        }
    }
}

/// Response DTO for Account that excludes credential fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub email_verified: bool,
    pub invited_by: Option<String>,
    pub last_login_at: Option<String>,
    pub created_at: String,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            role: account.role,
            is_active: account.is_active != 0,
            email_verified: account.email_verified != 0,
            invited_by: account.invited_by,
            last_login_at: account.last_login_at,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthSession {
    pub id: String,
    pub account_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

impl AuthSession {
    pub fn is_expired(&self) -> bool {
        match chrono::DateTime::parse_from_rfc3339(&self.expires_at) {
            Ok(expires) => expires < chrono::Utc::now(),
            // Treat parse errors as expired
            Err(_) => true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub account: AccountResponse,
    /// Role-based landing path for the frontend
    pub redirect: String,
}

#[derive(Debug, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub password: String,
}

/// Request to invite an end user (manager only)
#[derive(Debug, Deserialize)]
pub struct InviteUserRequest {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}
