//! Bot management for the manager surface, plus the assigned-bot listing
//! for end users. Every manager operation is scoped by `created_by`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::require_role;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    validate_bot_domain, validate_bot_name, validate_description, validate_uuid,
};
use crate::db::{
    Account, AccountRole, Bot, BotStatus, BotWithAssignmentCount, CreateBotRequest, DbPool,
    UpdateBotRequest,
};
use crate::AppState;

/// Fetch a bot scoped by owner. Missing and unowned are both 404.
pub(super) async fn fetch_owned_bot(
    db: &DbPool,
    bot_id: &str,
    owner_id: &str,
) -> Result<Bot, ApiError> {
    sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = ? AND created_by = ?")
        .bind(bot_id)
        .bind(owner_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Bot not found"))
}

/// Validate a CreateBotRequest
fn validate_create_request(req: &CreateBotRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_bot_name(&req.name) {
        errors.add("name", &e);
    }

    if let Err(e) = validate_description(&req.description) {
        errors.add("description", &e);
    }

    if let Err(e) = validate_bot_domain(&req.domain) {
        errors.add("domain", &e);
    }

    errors.finish()
}

/// Validate an UpdateBotRequest (only validates provided fields)
fn validate_update_request(req: &UpdateBotRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Some(ref name) = req.name {
        if let Err(e) = validate_bot_name(name) {
            errors.add("name", &e);
        }
    }

    if let Some(ref description) = req.description {
        if let Err(e) = validate_description(description) {
            errors.add("description", &e);
        }
    }

    if let Some(ref domain) = req.domain {
        if let Err(e) = validate_bot_domain(domain) {
            errors.add("domain", &e);
        }
    }

    errors.finish()
}

pub async fn list_bots(
    State(state): State<Arc<AppState>>,
    account: Account,
) -> Result<Json<Vec<BotWithAssignmentCount>>, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    let bots = sqlx::query_as::<_, BotWithAssignmentCount>(
        r#"
        SELECT b.id, b.name, b.description, b.domain, b.status, b.payment_status,
               b.provider_session_id, b.created_by, b.created_at, b.updated_at,
               COUNT(a.id) AS assigned_users
        FROM bots b
        LEFT JOIN assignments a ON a.bot_id = b.id AND a.status = 'active'
        WHERE b.created_by = ?
        GROUP BY b.id
        ORDER BY b.created_at DESC
        "#,
    )
    .bind(&account.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(bots))
}

pub async fn create_bot(
    State(state): State<Arc<AppState>>,
    account: Account,
    Json(req): Json<CreateBotRequest>,
) -> Result<(StatusCode, Json<Bot>), ApiError> {
    require_role(&account, AccountRole::Manager)?;

    validate_create_request(&req)?;

    let status = match req.status.as_deref() {
        Some(s) => s
            .parse::<BotStatus>()
            .map_err(|e| ApiError::validation_field("status", e))?,
        None => BotStatus::Active,
    };

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO bots (id, name, description, domain, status, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(req.name.trim())
    .bind(&req.description)
    .bind(&req.domain)
    .bind(status.to_string())
    .bind(&account.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create bot: {}", e);
        ApiError::database("Failed to create bot")
    })?;

    let bot = sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    // Workflow notification must never delay or fail the response
    let workflow = state.workflow.clone();
    let created = bot.clone();
    tokio::spawn(async move {
        workflow.bot_created(&created).await;
    });

    Ok((StatusCode::CREATED, Json(bot)))
}

pub async fn get_bot(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
) -> Result<Json<Bot>, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }

    let bot = fetch_owned_bot(&state.db, &id, &account.id).await?;

    Ok(Json(bot))
}

pub async fn update_bot(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
    Json(req): Json<UpdateBotRequest>,
) -> Result<Json<Bot>, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }

    validate_update_request(&req)?;

    let existing = fetch_owned_bot(&state.db, &id, &account.id).await?;

    let now = chrono::Utc::now().to_rfc3339();

    // Merge: absent fields keep their current value
    let name = req.name.unwrap_or(existing.name);
    let description = req.description.unwrap_or(existing.description);
    let domain = req.domain.unwrap_or(existing.domain);
    let status = match req.status.as_deref() {
        Some(s) => s
            .parse::<BotStatus>()
            .map_err(|e| ApiError::validation_field("status", e))?
            .to_string(),
        None => existing.status,
    };

    sqlx::query(
        r#"
        UPDATE bots SET
            name = ?,
            description = ?,
            domain = ?,
            status = ?,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(name.trim())
    .bind(&description)
    .bind(&domain)
    .bind(&status)
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to update bot: {}", e);
        ApiError::database("Failed to update bot")
    })?;

    let bot = sqlx::query_as::<_, Bot>("SELECT * FROM bots WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(bot))
}

pub async fn delete_bot(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }

    let _bot = fetch_owned_bot(&state.db, &id, &account.id).await?;

    // Assignments go with the bot; messages are an append-only log and stay
    let mut tx = state.db.begin().await?;

    sqlx::query("DELETE FROM assignments WHERE bot_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM bots WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Bots the calling end user may chat with (active assignment required)
pub async fn list_assigned_bots(
    State(state): State<Arc<AppState>>,
    account: Account,
) -> Result<Json<Vec<Bot>>, ApiError> {
    require_role(&account, AccountRole::User)?;

    let bots = sqlx::query_as::<_, Bot>(
        r#"
        SELECT b.*
        FROM bots b
        INNER JOIN assignments a ON a.bot_id = b.id AND a.status = 'active'
        WHERE a.user_id = ?
        ORDER BY b.created_at DESC
        "#,
    )
    .bind(&account.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(bots))
}
