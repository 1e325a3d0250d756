//! Invited end-user management for managers, plus profile self-service
//! for end users.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::{generate_token, hash_password, require_role};
use super::error::ApiError;
use super::validation;
use crate::db::{Account, AccountResponse, AccountRole, InviteUserRequest, UpdateProfileRequest};
use crate::AppState;

/// Invite an end user: create the account and email the invitation link.
/// A failed send is logged but does not roll the account back; the
/// invitation can be re-sent.
pub async fn invite_user(
    State(state): State<Arc<AppState>>,
    account: Account,
    Json(request): Json<InviteUserRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validation::validate_email(&request.email) {
        return Err(ApiError::validation_field("email", e));
    }

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE email = ?")
        .bind(&request.email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let id = Uuid::new_v4().to_string();
    let invitation_token = generate_token();
    let expires_at = (chrono::Utc::now()
        + chrono::Duration::days(state.config.auth.invitation_ttl_days))
    .to_rfc3339();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO accounts (id, email, first_name, last_name, role, is_active, email_verified,
                              invitation_token, invitation_expires_at, invited_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'user', 1, 0, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&request.email)
    .bind(&request.first_name)
    .bind(&request.last_name)
    .bind(&invitation_token)
    .bind(&expires_at)
    .bind(&account.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            ApiError::conflict("An account with this email already exists")
        } else {
            tracing::error!("Failed to create invited account: {}", e);
            ApiError::database("Failed to create account")
        }
    })?;

    let accept_url = format!(
        "{}/accept-invitation?token={}",
        state.config.server.public_url, invitation_token
    );
    if let Err(e) = state
        .mailer
        .send_invitation_email(
            &request.email,
            &account.display_name(),
            &accept_url,
            state.config.auth.invitation_ttl_days,
        )
        .await
    {
        tracing::warn!(email = %request.email, "Failed to send invitation email: {}", e);
    }

    let invited: Account = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(email = %invited.email, invited_by = %account.id, "User invited");
    Ok((StatusCode::CREATED, Json(AccountResponse::from(invited))))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    account: Account,
) -> Result<Json<Vec<AccountResponse>>, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    let users = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE invited_by = ? AND role = 'user' ORDER BY created_at DESC",
    )
    .bind(&account.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(users.into_iter().map(AccountResponse::from).collect()))
}

/// Remove an invited user. Sessions and assignments cascade with the
/// account row; messages stay in the log.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validation::validate_uuid(&id, "user_id") {
        return Err(ApiError::validation_field("user_id", e));
    }

    let _user = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE id = ? AND invited_by = ? AND role = 'user'",
    )
    .bind(&id)
    .bind(&account.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    sqlx::query("DELETE FROM accounts WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_profile(account: Account) -> Result<Json<AccountResponse>, ApiError> {
    require_role(&account, AccountRole::User)?;
    Ok(Json(AccountResponse::from(account)))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    account: Account,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    require_role(&account, AccountRole::User)?;

    if let Some(ref password) = request.password {
        if let Err(e) = validation::validate_password(password) {
            return Err(ApiError::validation_field("password", e));
        }
    }

    let first_name = request.first_name.or_else(|| account.first_name.clone());
    let last_name = request.last_name.or_else(|| account.last_name.clone());
    let password_hash = match request.password {
        Some(ref password) => Some(
            hash_password(password)
                .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?,
        ),
        None => account.password_hash.clone(),
    };

    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "UPDATE accounts SET first_name = ?, last_name = ?, password_hash = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&first_name)
    .bind(&last_name)
    .bind(&password_hash)
    .bind(&now)
    .bind(&account.id)
    .execute(&state.db)
    .await?;

    let updated: Account = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(&account.id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(AccountResponse::from(updated)))
}
