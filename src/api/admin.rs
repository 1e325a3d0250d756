//! Platform administration: account oversight, platform totals, and the
//! admin side of the support issue queue.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::require_role;
use super::error::ApiError;
use super::validation::validate_uuid;
use crate::db::{Account, AccountResponse, AccountRole, Issue, IssueStatus, UpdateIssueRequest};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AccountListQuery {
    pub role: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAccountRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct RoleCounts {
    pub admin: i64,
    pub manager: i64,
    pub user: i64,
}

#[derive(Debug, Serialize)]
pub struct PlatformStats {
    pub accounts: RoleCounts,
    pub bots: i64,
    pub messages: i64,
    pub open_issues: i64,
}

pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    account: Account,
    Query(query): Query<AccountListQuery>,
) -> Result<Json<Vec<AccountResponse>>, ApiError> {
    require_role(&account, AccountRole::Admin)?;

    let role = match query.role.as_deref() {
        Some(s) => Some(
            s.parse::<AccountRole>()
                .map_err(|e| ApiError::validation_field("role", e))?
                .to_string(),
        ),
        None => None,
    };
    let active = query.active.map(|a| a as i32);

    let accounts = sqlx::query_as::<_, Account>(
        r#"
        SELECT * FROM accounts
        WHERE (? IS NULL OR role = ?)
          AND (? IS NULL OR is_active = ?)
        ORDER BY created_at DESC
        "#,
    )
    .bind(&role)
    .bind(&role)
    .bind(active)
    .bind(active)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        accounts.into_iter().map(AccountResponse::from).collect(),
    ))
}

pub async fn get_account(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    require_role(&account, AccountRole::Admin)?;

    if let Err(e) = validate_uuid(&id, "account_id") {
        return Err(ApiError::validation_field("account_id", e));
    }

    let target = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    Ok(Json(AccountResponse::from(target)))
}

/// Activate or deactivate an account. Deactivation takes effect on the
/// target's next request; their existing sessions stop authenticating.
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    require_role(&account, AccountRole::Admin)?;

    if let Err(e) = validate_uuid(&id, "account_id") {
        return Err(ApiError::validation_field("account_id", e));
    }

    if id == account.id && !req.is_active {
        return Err(ApiError::bad_request("Cannot deactivate your own account"));
    }

    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    sqlx::query("UPDATE accounts SET is_active = ?, updated_at = ? WHERE id = ?")
        .bind(req.is_active as i32)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(&id)
        .execute(&state.db)
        .await?;

    let updated = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(
        account_id = %id,
        is_active = req.is_active,
        changed_by = %account.id,
        "Account activation changed"
    );

    Ok(Json(AccountResponse::from(updated)))
}

pub async fn platform_stats(
    State(state): State<Arc<AppState>>,
    account: Account,
) -> Result<Json<PlatformStats>, ApiError> {
    require_role(&account, AccountRole::Admin)?;

    let role_rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT role, COUNT(*) FROM accounts GROUP BY role")
            .fetch_all(&state.db)
            .await?;

    let mut accounts = RoleCounts {
        admin: 0,
        manager: 0,
        user: 0,
    };
    for (role, count) in role_rows {
        match role.as_str() {
            "admin" => accounts.admin = count,
            "manager" => accounts.manager = count,
            "user" => accounts.user = count,
            _ => {}
        }
    }

    let (bots,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bots")
        .fetch_one(&state.db)
        .await?;
    let (messages,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
        .fetch_one(&state.db)
        .await?;
    let (open_issues,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM issues WHERE status = 'open'")
            .fetch_one(&state.db)
            .await?;

    Ok(Json(PlatformStats {
        accounts,
        bots,
        messages,
        open_issues,
    }))
}

pub async fn list_all_issues(
    State(state): State<Arc<AppState>>,
    account: Account,
) -> Result<Json<Vec<Issue>>, ApiError> {
    require_role(&account, AccountRole::Admin)?;

    let issues = sqlx::query_as::<_, Issue>("SELECT * FROM issues ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;

    Ok(Json(issues))
}

pub async fn update_issue(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
    Json(req): Json<UpdateIssueRequest>,
) -> Result<Json<Issue>, ApiError> {
    require_role(&account, AccountRole::Admin)?;

    if let Err(e) = validate_uuid(&id, "issue_id") {
        return Err(ApiError::validation_field("issue_id", e));
    }

    let status = req
        .status
        .parse::<IssueStatus>()
        .map_err(|e| ApiError::validation_field("status", e))?;

    sqlx::query_as::<_, Issue>("SELECT * FROM issues WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Issue not found"))?;

    sqlx::query("UPDATE issues SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(&id)
        .execute(&state.db)
        .await?;

    let updated = sqlx::query_as::<_, Issue>("SELECT * FROM issues WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{seed_admin, seed_manager, seed_user, test_state};
    use crate::db::DbPool;
    use axum::http::StatusCode;
    use uuid::Uuid;

    async fn seed_issue(db: &DbPool, account_id: &str, subject: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO issues (id, account_id, subject, body, status, created_at, updated_at)
            VALUES (?, ?, ?, 'The widget does not load', 'open', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(account_id)
        .bind(subject)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .expect("seed issue");
        id
    }

    #[tokio::test]
    async fn account_list_filters_compose() {
        let state = test_state().await;
        let admin = seed_admin(&state.db, "admin@example.com").await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        seed_user(&state.db, "active@example.com", &manager.id).await;
        let dormant = seed_user(&state.db, "dormant@example.com", &manager.id).await;
        sqlx::query("UPDATE accounts SET is_active = 0 WHERE id = ?")
            .bind(&dormant.id)
            .execute(&state.db)
            .await
            .expect("deactivate");

        let Json(all) = list_accounts(
            State(state.clone()),
            admin.clone(),
            Query(AccountListQuery::default()),
        )
        .await
        .expect("list all");
        assert_eq!(all.len(), 4);

        let Json(users) = list_accounts(
            State(state.clone()),
            admin.clone(),
            Query(AccountListQuery {
                role: Some("user".to_string()),
                active: None,
            }),
        )
        .await
        .expect("list users");
        assert_eq!(users.len(), 2);

        let Json(inactive_users) = list_accounts(
            State(state.clone()),
            admin,
            Query(AccountListQuery {
                role: Some("user".to_string()),
                active: Some(false),
            }),
        )
        .await
        .expect("list inactive users");
        assert_eq!(inactive_users.len(), 1);
        assert_eq!(inactive_users[0].email, "dormant@example.com");
    }

    #[tokio::test]
    async fn unknown_role_filter_is_rejected() {
        let state = test_state().await;
        let admin = seed_admin(&state.db, "admin@example.com").await;

        let err = list_accounts(
            State(state.clone()),
            admin,
            Query(AccountListQuery {
                role: Some("superuser".to_string()),
                active: None,
            }),
        )
        .await
        .expect_err("bad role");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn toggling_account_activation() {
        let state = test_state().await;
        let admin = seed_admin(&state.db, "admin@example.com").await;
        let manager = seed_manager(&state.db, "m@example.com").await;

        let Json(updated) = update_account(
            State(state.clone()),
            admin.clone(),
            Path(manager.id.clone()),
            Json(UpdateAccountRequest { is_active: false }),
        )
        .await
        .expect("deactivate");
        assert!(!updated.is_active);

        let Json(updated) = update_account(
            State(state.clone()),
            admin,
            Path(manager.id.clone()),
            Json(UpdateAccountRequest { is_active: true }),
        )
        .await
        .expect("reactivate");
        assert!(updated.is_active);
    }

    #[tokio::test]
    async fn admins_cannot_deactivate_themselves() {
        let state = test_state().await;
        let admin = seed_admin(&state.db, "admin@example.com").await;

        let err = update_account(
            State(state.clone()),
            admin.clone(),
            Path(admin.id.clone()),
            Json(UpdateAccountRequest { is_active: false }),
        )
        .await
        .expect_err("self deactivation");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        // Self reactivation is a no-op but allowed
        update_account(
            State(state.clone()),
            admin.clone(),
            Path(admin.id.clone()),
            Json(UpdateAccountRequest { is_active: true }),
        )
        .await
        .expect("self activate");
    }

    #[tokio::test]
    async fn missing_account_is_not_found() {
        let state = test_state().await;
        let admin = seed_admin(&state.db, "admin@example.com").await;

        let err = get_account(
            State(state.clone()),
            admin,
            Path(Uuid::new_v4().to_string()),
        )
        .await
        .expect_err("missing");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_report_platform_totals() {
        let state = test_state().await;
        let admin = seed_admin(&state.db, "admin@example.com").await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let user = seed_user(&state.db, "u@example.com", &manager.id).await;
        let bot_id = crate::api::testing::seed_bot(&state.db, "Support Bot", &manager.id).await;
        crate::api::testing::seed_message(
            &state.db,
            &bot_id,
            &user.id,
            "user",
            "Hello",
            "2026-01-10T10:00:00+00:00",
        )
        .await;
        crate::api::testing::seed_message(
            &state.db,
            &bot_id,
            &user.id,
            "bot",
            "Hi there",
            "2026-01-10T10:00:30+00:00",
        )
        .await;
        seed_issue(&state.db, &manager.id, "Widget broken").await;
        let resolved = seed_issue(&state.db, &user.id, "Slow responses").await;
        sqlx::query("UPDATE issues SET status = 'resolved' WHERE id = ?")
            .bind(&resolved)
            .execute(&state.db)
            .await
            .expect("resolve");

        let Json(stats) = platform_stats(State(state.clone()), admin)
            .await
            .expect("stats");
        assert_eq!(stats.accounts.admin, 1);
        assert_eq!(stats.accounts.manager, 1);
        assert_eq!(stats.accounts.user, 1);
        assert_eq!(stats.bots, 1);
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.open_issues, 1);
    }

    #[tokio::test]
    async fn issue_updates_validate_status() {
        let state = test_state().await;
        let admin = seed_admin(&state.db, "admin@example.com").await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let issue_id = seed_issue(&state.db, &manager.id, "Widget broken").await;

        let Json(updated) = update_issue(
            State(state.clone()),
            admin.clone(),
            Path(issue_id.clone()),
            Json(UpdateIssueRequest {
                status: "in_progress".to_string(),
            }),
        )
        .await
        .expect("transition");
        assert_eq!(updated.status, "in_progress");

        let err = update_issue(
            State(state.clone()),
            admin.clone(),
            Path(issue_id),
            Json(UpdateIssueRequest {
                status: "fixed".to_string(),
            }),
        )
        .await
        .expect_err("unknown status");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = update_issue(
            State(state.clone()),
            admin,
            Path(Uuid::new_v4().to_string()),
            Json(UpdateIssueRequest {
                status: "closed".to_string(),
            }),
        )
        .await
        .expect_err("missing issue");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_routes_require_admin_role() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;

        let err = list_accounts(
            State(state.clone()),
            manager.clone(),
            Query(AccountListQuery::default()),
        )
        .await
        .expect_err("role");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = list_all_issues(State(state.clone()), manager)
            .await
            .expect_err("role");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
