//! Chat message endpoints. End users write to the log through the
//! assignment gate; managers have a sandbox that records test messages
//! against their own account.

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
use super::validation::{validate_message_body, validate_uuid};
use crate::db::{
    Account, AccountRole, DbPool, Message, PostMessageRequest, Sender, TestMessageRequest,
};
use crate::AppState;

async fn insert_message(
    db: &DbPool,
    bot_id: &str,
    user_id: &str,
    sender: Sender,
    body: &str,
    metadata: Option<String>,
    is_test: bool,
) -> Result<Message, ApiError> {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO messages (id, bot_id, user_id, sender, body, metadata, is_test, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(bot_id)
    .bind(user_id)
    .bind(sender.to_string())
    .bind(body)
    .bind(&metadata)
    .bind(is_test as i32)
    .bind(&now)
    .execute(db)
    .await?;

    let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
        .bind(&id)
        .fetch_one(db)
        .await?;

    Ok(message)
}

pub async fn post_user_message(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    require_role(&account, AccountRole::User)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }

    let sender = req
        .sender
        .parse::<Sender>()
        .map_err(|e| ApiError::validation_field("sender", e))?;

    if let Err(e) = validate_message_body(&req.body) {
        return Err(ApiError::validation_field("body", e));
    }

    // Writing to the log requires an active assignment
    let assignment: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM assignments WHERE bot_id = ? AND user_id = ? AND status = 'active'",
    )
    .bind(&id)
    .bind(&account.id)
    .fetch_optional(&state.db)
    .await?;
    if assignment.is_none() {
        return Err(ApiError::forbidden("You are not assigned to this bot"));
    }

    let metadata = req.metadata.map(|v| v.to_string());
    let message =
        insert_message(&state.db, &id, &account.id, sender, &req.body, metadata, false).await?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_user_messages(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    require_role(&account, AccountRole::User)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }

    let messages = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE bot_id = ? AND user_id = ? ORDER BY created_at ASC",
    )
    .bind(&id)
    .bind(&account.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(messages))
}

/// Manager sandbox. Bypasses the assignment gate but requires bot
/// ownership; rows carry `is_test = 1` and the manager's own account id.
pub async fn send_test_message(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
    Json(req): Json<TestMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }

    let sender = req
        .sender
        .parse::<Sender>()
        .map_err(|e| ApiError::validation_field("sender", e))?;

    if let Err(e) = validate_message_body(&req.body) {
        return Err(ApiError::validation_field("body", e));
    }

    let _bot = fetch_owned_bot(&state.db, &id, &account.id).await?;

    let message =
        insert_message(&state.db, &id, &account.id, sender, &req.body, None, true).await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Full message log of an owned bot, oldest first
pub async fn list_bot_messages(
    State(state): State<Arc<AppState>>,
    account: Account,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    if let Err(e) = validate_uuid(&id, "bot_id") {
        return Err(ApiError::validation_field("bot_id", e));
    }

    let _bot = fetch_owned_bot(&state.db, &id, &account.id).await?;

    let messages =
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE bot_id = ? ORDER BY created_at ASC")
            .bind(&id)
            .fetch_all(&state.db)
            .await?;

    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{seed_assignment, seed_bot, seed_manager, seed_user, test_state};

    fn user_message(body: &str) -> PostMessageRequest {
        PostMessageRequest {
            sender: "user".to_string(),
            body: body.to_string(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn posting_requires_active_assignment() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let user = seed_user(&state.db, "u@example.com", &manager.id).await;
        let bot_id = seed_bot(&state.db, "Support Bot", &manager.id).await;

        let err = post_user_message(
            State(state.clone()),
            user.clone(),
            Path(bot_id.clone()),
            Json(user_message("hello?")),
        )
        .await
        .expect_err("no assignment");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        seed_assignment(&state.db, &bot_id, &user.id, &manager.id).await;

        let (status, Json(message)) = post_user_message(
            State(state.clone()),
            user.clone(),
            Path(bot_id),
            Json(PostMessageRequest {
                sender: "user".to_string(),
                body: "hello!".to_string(),
                metadata: Some(serde_json::json!({"page": "/pricing"})),
            }),
        )
        .await
        .expect("assigned");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message.user_id, user.id);
        assert_eq!(message.is_test, 0);
        assert_eq!(message.metadata.as_deref(), Some(r#"{"page":"/pricing"}"#));
    }

    #[tokio::test]
    async fn sender_and_body_are_validated() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let user = seed_user(&state.db, "u@example.com", &manager.id).await;
        let bot_id = seed_bot(&state.db, "Support Bot", &manager.id).await;
        seed_assignment(&state.db, &bot_id, &user.id, &manager.id).await;

        let err = post_user_message(
            State(state.clone()),
            user.clone(),
            Path(bot_id.clone()),
            Json(PostMessageRequest {
                sender: "system".to_string(),
                body: "hi".to_string(),
                metadata: None,
            }),
        )
        .await
        .expect_err("bad sender");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = post_user_message(
            State(state.clone()),
            user,
            Path(bot_id),
            Json(user_message("   ")),
        )
        .await
        .expect_err("blank body");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn user_listing_is_scoped_to_own_messages() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let alice = seed_user(&state.db, "alice@example.com", &manager.id).await;
        let bob = seed_user(&state.db, "bob@example.com", &manager.id).await;
        let bot_id = seed_bot(&state.db, "Support Bot", &manager.id).await;
        seed_assignment(&state.db, &bot_id, &alice.id, &manager.id).await;
        seed_assignment(&state.db, &bot_id, &bob.id, &manager.id).await;

        for (who, body) in [(&alice, "from alice"), (&bob, "from bob")] {
            post_user_message(
                State(state.clone()),
                (*who).clone(),
                Path(bot_id.clone()),
                Json(user_message(body)),
            )
            .await
            .expect("post");
        }

        let Json(messages) = list_user_messages(State(state.clone()), alice, Path(bot_id))
            .await
            .expect("list");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "from alice");
    }

    #[tokio::test]
    async fn test_messages_require_bot_ownership() {
        let state = test_state().await;
        let owner = seed_manager(&state.db, "owner@example.com").await;
        let other = seed_manager(&state.db, "other@example.com").await;
        let bot_id = seed_bot(&state.db, "Support Bot", &owner.id).await;

        let err = send_test_message(
            State(state.clone()),
            other,
            Path(bot_id.clone()),
            Json(TestMessageRequest {
                sender: "user".to_string(),
                body: "probe".to_string(),
            }),
        )
        .await
        .expect_err("not the owner");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let (status, Json(message)) = send_test_message(
            State(state.clone()),
            owner.clone(),
            Path(bot_id),
            Json(TestMessageRequest {
                sender: "bot".to_string(),
                body: "canned reply".to_string(),
            }),
        )
        .await
        .expect("owner");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message.is_test, 1);
        assert_eq!(message.user_id, owner.id);
        assert_eq!(message.sender, "bot");
    }

    #[tokio::test]
    async fn bot_log_lists_all_messages_chronologically() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let user = seed_user(&state.db, "u@example.com", &manager.id).await;
        let bot_id = seed_bot(&state.db, "Support Bot", &manager.id).await;
        crate::api::testing::seed_message(
            &state.db,
            &bot_id,
            &user.id,
            "user",
            "second",
            "2025-06-01T10:05:00+00:00",
        )
        .await;
        crate::api::testing::seed_message(
            &state.db,
            &bot_id,
            &user.id,
            "user",
            "first",
            "2025-06-01T10:00:00+00:00",
        )
        .await;

        let Json(messages) = list_bot_messages(State(state.clone()), manager, Path(bot_id))
            .await
            .expect("log");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, "first");
        assert_eq!(messages[1].body, "second");
    }
}
