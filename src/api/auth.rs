//! Authentication: signup, verification, login, invited-account acceptance,
//! and the extractor resolving bearer tokens to accounts.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    Json,
};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation;
use crate::config::Config;
use crate::db::{
    Account, AccountResponse, AccountRole, AcceptInvitationRequest, AuthSession, DbPool,
    LoginRequest, LoginResponse, SignupRequest,
};
use crate::AppState;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random token
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the bearer token from request headers
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }

    // Fall back to X-API-Key header
    headers
        .get("X-API-Key")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

/// Resolve a bearer token to its account
pub async fn get_current_account(pool: &DbPool, token: &str) -> Result<Account, ApiError> {
    let token_hash = hash_token(token);
    let session: Option<AuthSession> =
        sqlx::query_as("SELECT * FROM auth_sessions WHERE token_hash = ?")
            .bind(&token_hash)
            .fetch_optional(pool)
            .await?;

    let session = session.ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    if session.is_expired() {
        sqlx::query("DELETE FROM auth_sessions WHERE id = ?")
            .bind(&session.id)
            .execute(pool)
            .await?;
        return Err(ApiError::unauthorized("Invalid or expired session"));
    }

    let account: Option<Account> = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(&session.account_id)
        .fetch_optional(pool)
        .await?;

    let account = account.ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    if account.is_active == 0 {
        return Err(ApiError::forbidden("Account is deactivated"));
    }

    Ok(account)
}

/// Extractor for getting the current authenticated account from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for Account {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;
        get_current_account(&state.db, &token).await
    }
}

/// Reject accounts that do not hold the required role
pub fn require_role(account: &Account, role: AccountRole) -> Result<(), ApiError> {
    if account.role_enum() == role {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!("Requires {} role", role)))
    }
}

/// Create the platform admin account from configuration if it does not exist.
/// Runs at startup; a second run is a no-op.
pub async fn ensure_admin_account(pool: &DbPool, config: &Config) -> anyhow::Result<()> {
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE email = ?")
        .bind(&config.auth.admin_email)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    let id = uuid::Uuid::new_v4().to_string();
    let password_hash = hash_password(&config.auth.admin_password)
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO accounts (id, email, password_hash, role, is_active, email_verified, created_at, updated_at)
         VALUES (?, ?, ?, 'admin', 1, 1, ?, ?)",
    )
    .bind(&id)
    .bind(&config.auth.admin_email)
    .bind(&password_hash)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    tracing::info!(email = %config.auth.admin_email, "Created admin account");
    Ok(())
}

fn new_session_values(config: &Config) -> (String, String, String) {
    let token = generate_token();
    let token_hash = hash_token(&token);
    let expires_at =
        (chrono::Utc::now() + chrono::Duration::hours(config.auth.session_ttl_hours)).to_rfc3339();
    (token, token_hash, expires_at)
}

async fn create_session(pool: &DbPool, config: &Config, account_id: &str) -> Result<String, ApiError> {
    let (token, token_hash, expires_at) = new_session_values(config);
    let session_id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO auth_sessions (id, account_id, token_hash, expires_at, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&session_id)
    .bind(account_id)
    .bind(&token_hash)
    .bind(&expires_at)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(token)
}

/// Self-serve signup. Creates an unverified manager account and emails a
/// verification link; the account is rolled back if the email cannot be sent.
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validation::validate_email(&request.email) {
        errors.add("email", e);
    }
    if let Err(e) = validation::validate_password(&request.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE email = ?")
        .bind(&request.email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;
    let verification_token = generate_token();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO accounts (id, email, password_hash, first_name, last_name, role, is_active, email_verified, verification_token, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 'manager', 1, 0, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&request.email)
    .bind(&password_hash)
    .bind(&request.first_name)
    .bind(&request.last_name)
    .bind(&verification_token)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let verify_url = format!(
        "{}/api/auth/verify?token={}",
        state.config.server.public_url, verification_token
    );
    if let Err(e) = state
        .mailer
        .send_verification_email(&request.email, &verify_url)
        .await
    {
        // No verification mail means an unreachable account; undo the signup
        tracing::error!(email = %request.email, "Failed to send verification email: {}", e);
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(&id)
            .execute(&state.db)
            .await?;
        return Err(ApiError::internal("Failed to send verification email"));
    }

    let account: Account = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(email = %account.email, "Manager account created");
    Ok((StatusCode::CREATED, Json(AccountResponse::from(account))))
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    pub token: String,
}

/// Email verification endpoint, linked from the verification mail
pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let now = chrono::Utc::now().to_rfc3339();
    let result = sqlx::query(
        "UPDATE accounts SET email_verified = 1, verification_token = NULL, updated_at = ?
         WHERE verification_token = ?",
    )
    .bind(&now)
    .bind(&params.token)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("Invalid verification token"));
    }

    Ok(Json(serde_json::json!({ "verified": true })))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let account: Option<Account> = sqlx::query_as("SELECT * FROM accounts WHERE email = ?")
        .bind(&request.email)
        .fetch_optional(&state.db)
        .await?;

    let account = account.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let password_hash = account
        .password_hash
        .as_deref()
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;
    if !verify_password(&request.password, password_hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    if account.is_active == 0 {
        return Err(ApiError::forbidden("Account is deactivated"));
    }
    if account.email_verified == 0 {
        return Err(ApiError::forbidden("Email not verified"));
    }

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query("UPDATE accounts SET last_login_at = ?, updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&now)
        .bind(&account.id)
        .execute(&state.db)
        .await?;

    let token = create_session(&state.db, &state.config, &account.id).await?;
    let redirect = account.role_enum().redirect_path().to_string();

    Ok(Json(LoginResponse {
        token,
        account: AccountResponse::from(account),
        redirect,
    }))
}

/// Logout: drop the session backing the presented token
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token =
        extract_token(&headers).ok_or_else(|| ApiError::unauthorized("Missing authentication token"))?;
    let token_hash = hash_token(&token);

    sqlx::query("DELETE FROM auth_sessions WHERE token_hash = ?")
        .bind(&token_hash)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Current account details
pub async fn me(account: Account) -> Json<AccountResponse> {
    Json(AccountResponse::from(account))
}

/// Accept an invitation: set the password, activate the account, log in
pub async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AcceptInvitationRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if let Err(e) = validation::validate_password(&request.password) {
        return Err(ApiError::validation_field("password", e));
    }

    let account: Option<Account> =
        sqlx::query_as("SELECT * FROM accounts WHERE invitation_token = ?")
            .bind(&request.token)
            .fetch_optional(&state.db)
            .await?;

    let account = account.ok_or_else(|| ApiError::bad_request("Invalid invitation token"))?;

    if account.invitation_expired() {
        return Err(ApiError::bad_request("Invitation has expired"));
    }

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE accounts SET password_hash = ?, email_verified = 1, is_active = 1,
         invitation_token = NULL, invitation_expires_at = NULL, updated_at = ?
         WHERE id = ?",
    )
    .bind(&password_hash)
    .bind(&now)
    .bind(&account.id)
    .execute(&state.db)
    .await?;

    let token = create_session(&state.db, &state.config, &account.id).await?;
    let account: Account = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(&account.id)
        .fetch_one(&state.db)
        .await?;
    let redirect = account.role_enum().redirect_path().to_string();

    tracing::info!(email = %account.email, "Invitation accepted");

    Ok(Json(LoginResponse {
        token,
        account: AccountResponse::from(account),
        redirect,
    }))
}
