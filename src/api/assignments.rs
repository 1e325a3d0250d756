//! Assignment management: which invited users may chat with which bots.
//! Manager surface only; both sides of an assignment must belong to the
//! caller.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::require_role;
use super::bots::fetch_owned_bot;
use super::error::ApiError;
use super::validation::validate_uuid;
use crate::db::{Account, AccountRole, AssignUserRequest, Assignment, AssignmentWithUser};
use crate::AppState;

pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
) -> Result<Json<Vec<AssignmentWithUser>>, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }

    let _bot = fetch_owned_bot(&state.db, &id, &account.id).await?;

    let assignments = sqlx::query_as::<_, AssignmentWithUser>(
        r#"
        SELECT a.id, a.bot_id, a.user_id, a.status, a.created_at,
               u.email AS user_email,
               u.first_name AS user_first_name,
               u.last_name AS user_last_name
        FROM assignments a
        INNER JOIN accounts u ON u.id = a.user_id
        WHERE a.bot_id = ?
        ORDER BY a.created_at DESC
        "#,
    )
    .bind(&id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(assignments))
}

pub async fn assign_user(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
    Json(req): Json<AssignUserRequest>,
) -> Result<(StatusCode, Json<Assignment>), ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }
    if let Err(e) = validate_uuid(&req.user_id, "user_id") {
        return Err(ApiError::validation_field("user_id", e));
    }

    let _bot = fetch_owned_bot(&state.db, &id, &account.id).await?;

    // Target must be an end user the caller invited
    let _user = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE id = ? AND invited_by = ? AND role = 'user'",
    )
    .bind(&req.user_id)
    .bind(&account.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("User not found"))?;

    let existing = sqlx::query_as::<_, Assignment>(
        "SELECT * FROM assignments WHERE bot_id = ? AND user_id = ? AND status = 'active'",
    )
    .bind(&id)
    .bind(&req.user_id)
    .fetch_optional(&state.db)
    .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("User is already assigned to this bot"));
    }

    let assignment_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO assignments (id, bot_id, user_id, assigned_by, status, created_at)
        VALUES (?, ?, ?, ?, 'active', ?)
        "#,
    )
    .bind(&assignment_id)
    .bind(&id)
    .bind(&req.user_id)
    .bind(&account.id)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(|e| {
        // The partial unique index backstops the existence check above
        if e.to_string().contains("UNIQUE constraint failed") {
            ApiError::conflict("User is already assigned to this bot")
        } else {
            tracing::error!("Failed to create assignment: {}", e);
            ApiError::database("Failed to create assignment")
        }
    })?;

    let assignment = sqlx::query_as::<_, Assignment>("SELECT * FROM assignments WHERE id = ?")
        .bind(&assignment_id)
        .fetch_one(&state.db)
        .await?;

    Ok((StatusCode::CREATED, Json(assignment)))
}

/// Idempotent: removing an assignment that does not exist still succeeds.
pub async fn unassign_user(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }
    if let Err(e) = validate_uuid(&user_id, "user_id") {
        return Err(ApiError::validation_field("user_id", e));
    }

    let _bot = fetch_owned_bot(&state.db, &id, &account.id).await?;

    sqlx::query("DELETE FROM assignments WHERE bot_id = ? AND user_id = ? AND status = 'active'")
        .bind(&id)
        .bind(&user_id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
