//! Support issues. Any authenticated account can file one and see its own;
//! status transitions live on the admin surface.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_issue_body, validate_subject, validate_uuid};
use crate::db::{Account, AccountRole, CreateIssueRequest, Issue};
use crate::AppState;

fn validate_create_request(req: &CreateIssueRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_subject(&req.subject) {
        errors.add("subject", e);
    }
    if let Err(e) = validate_issue_body(&req.body) {
        errors.add("body", e);
    }

    errors.finish()
}

pub async fn create_issue(
    State(state): State<Arc<AppState>>,
    account: Account,
    Json(req): Json<CreateIssueRequest>,
) -> Result<(StatusCode, Json<Issue>), ApiError> {
    validate_create_request(&req)?;

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO issues (id, account_id, subject, body, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'open', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&account.id)
    .bind(req.subject.trim())
    .bind(&req.body)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create issue: {}", e);
        ApiError::database("Failed to create issue")
    })?;

    let issue = sqlx::query_as::<_, Issue>("SELECT * FROM issues WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(issue_id = %issue.id, account_id = %account.id, "Issue filed");

    Ok((StatusCode::CREATED, Json(issue)))
}

/// Own issues, newest first. Admins see every account's issues.
pub async fn list_issues(
    State(state): State<Arc<AppState>>,
    account: Account,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let issues = if account.role_enum() == AccountRole::Admin {
        sqlx::query_as::<_, Issue>("SELECT * FROM issues ORDER BY created_at DESC")
            .fetch_all(&state.db)
            .await?
    } else {
        sqlx::query_as::<_, Issue>(
            "SELECT * FROM issues WHERE account_id = ? ORDER BY created_at DESC",
        )
        .bind(&account.id)
        .fetch_all(&state.db)
        .await?
    };

    Ok(Json(issues))
}

pub async fn get_issue(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
) -> Result<Json<Issue>, ApiError> {
    if let Err(e) = validate_uuid(&id, "issue_id") {
        return Err(ApiError::validation_field("issue_id", e));
    }

    let issue = sqlx::query_as::<_, Issue>("SELECT * FROM issues WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Issue not found"))?;

    // Someone else's issue looks absent, not forbidden
    if issue.account_id != account.id && account.role_enum() != AccountRole::Admin {
        return Err(ApiError::not_found("Issue not found"));
    }

    Ok(Json(issue))
}
