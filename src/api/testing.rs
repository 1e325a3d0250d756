//! Shared fixtures for handler tests. Each test gets its own in-memory
//! database; the pool is capped at one connection so every query sees the
//! same database.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{Account, DbPool};
use crate::notifications::{EmailService, WorkflowNotifier};
use crate::AppState;

pub(crate) async fn test_state() -> Arc<AppState> {
    state_with_config(Config::default()).await
}

pub(crate) async fn state_with_config(config: Config) -> Arc<AppState> {
    let db = crate::db::connect("sqlite::memory:", 1)
        .await
        .expect("in-memory db");
    let mailer = EmailService::new(config.email.clone());
    let workflow = WorkflowNotifier::new(config.workflow.clone());
    Arc::new(AppState::new(config, db, mailer, workflow))
}

/// Insert a verified, active account and return it as the extractor would.
pub(crate) async fn seed_account(
    db: &DbPool,
    email: &str,
    role: &str,
    invited_by: Option<&str>,
) -> Account {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO accounts (id, email, role, is_active, email_verified, invited_by, created_at, updated_at)
         VALUES (?, ?, ?, 1, 1, ?, ?, ?)",
    )
    .bind(&id)
    .bind(email)
    .bind(role)
    .bind(invited_by)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await
    .expect("seed account");

    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?")
        .bind(&id)
        .fetch_one(db)
        .await
        .expect("fetch seeded account")
}

pub(crate) async fn seed_manager(db: &DbPool, email: &str) -> Account {
    seed_account(db, email, "manager", None).await
}

pub(crate) async fn seed_user(db: &DbPool, email: &str, invited_by: &str) -> Account {
    seed_account(db, email, "user", Some(invited_by)).await
}

pub(crate) async fn seed_admin(db: &DbPool, email: &str) -> Account {
    seed_account(db, email, "admin", None).await
}

pub(crate) async fn seed_bot(db: &DbPool, name: &str, created_by: &str) -> String {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO bots (id, name, description, domain, status, created_by, created_at, updated_at)
         VALUES (?, ?, 'Answers support questions', 'shop.example.com', 'active', ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(created_by)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await
    .expect("seed bot");
    id
}

pub(crate) async fn seed_assignment(
    db: &DbPool,
    bot_id: &str,
    user_id: &str,
    assigned_by: &str,
) -> String {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO assignments (id, bot_id, user_id, assigned_by, status, created_at)
         VALUES (?, ?, ?, ?, 'active', ?)",
    )
    .bind(&id)
    .bind(bot_id)
    .bind(user_id)
    .bind(assigned_by)
    .bind(&now)
    .execute(db)
    .await
    .expect("seed assignment");
    id
}

/// Insert a message row with an explicit timestamp so tests can shape
/// conversation timelines.
pub(crate) async fn seed_message(
    db: &DbPool,
    bot_id: &str,
    user_id: &str,
    sender: &str,
    body: &str,
    created_at: &str,
) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO messages (id, bot_id, user_id, sender, body, is_test, created_at)
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(&id)
    .bind(bot_id)
    .bind(user_id)
    .bind(sender)
    .bind(body)
    .bind(created_at)
    .execute(db)
    .await
    .expect("seed message");
    id
}
