//! Conversation views for managers and end users. Sessions are derived on
//! read by the `sessions` module; this file resolves who may see which
//! messages and feeds the lookup maps.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::auth::require_role;
use super::error::ApiError;
use crate::db::{Account, AccountRole, DbPool, Message};
use crate::sessions::{
    self, ConversationSession, Counterpart, DateRange, SessionFilter, SessionSort, SessionStats,
    SessionStatus, SortOrder,
};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ConversationQuery {
    pub bot_id: Option<String>,
    pub user_id: Option<String>,
    pub range: Option<String>,
    pub status: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

impl ConversationQuery {
    /// Strict parse of the string filters. Unknown values are 400s, not
    /// silently ignored.
    fn parsed(&self) -> Result<(SessionFilter, SessionSort, SortOrder), ApiError> {
        let range = match self.range.as_deref() {
            Some(s) => s
                .parse::<DateRange>()
                .map_err(|e| ApiError::validation_field("range", e))?,
            None => DateRange::default(),
        };
        let status = match self.status.as_deref() {
            Some(s) => Some(
                s.parse::<SessionStatus>()
                    .map_err(|e| ApiError::validation_field("status", e))?,
            ),
            None => None,
        };
        let sort = match self.sort.as_deref() {
            Some(s) => s
                .parse::<SessionSort>()
                .map_err(|e| ApiError::validation_field("sort", e))?,
            None => SessionSort::default(),
        };
        let order = match self.order.as_deref() {
            Some(s) => s
                .parse::<SortOrder>()
                .map_err(|e| ApiError::validation_field("order", e))?,
            None => SortOrder::default(),
        };

        let filter = SessionFilter {
            bot_id: self.bot_id.clone(),
            user_id: self.user_id.clone(),
            range,
            status,
        };
        Ok((filter, sort, order))
    }
}

struct ManagerScope {
    bot_names: HashMap<String, String>,
    counterparts: HashMap<String, Counterpart>,
}

/// Lookup data for a manager's conversation view. `None` means the scope is
/// empty (no owned bots, or no invited users): callers return the empty
/// result without querying the message log at all.
async fn manager_scope(db: &DbPool, manager: &Account) -> Result<Option<ManagerScope>, ApiError> {
    let bots: Vec<(String, String)> =
        sqlx::query_as("SELECT id, name FROM bots WHERE created_by = ?")
            .bind(&manager.id)
            .fetch_all(db)
            .await?;
    if bots.is_empty() {
        return Ok(None);
    }

    let invited = sqlx::query_as::<_, Account>(
        "SELECT * FROM accounts WHERE invited_by = ? AND role = 'user'",
    )
    .bind(&manager.id)
    .fetch_all(db)
    .await?;
    if invited.is_empty() {
        return Ok(None);
    }

    let bot_names: HashMap<String, String> = bots.into_iter().collect();
    let mut counterparts: HashMap<String, Counterpart> = invited
        .into_iter()
        .map(|account| {
            let display_name = account.display_name();
            (
                account.id.clone(),
                Counterpart {
                    display_name,
                    email: account.email,
                },
            )
        })
        .collect();

    // Test conversations show the manager on the user side
    counterparts.insert(
        manager.id.clone(),
        Counterpart {
            display_name: manager.display_name(),
            email: manager.email.clone(),
        },
    );

    Ok(Some(ManagerScope {
        bot_names,
        counterparts,
    }))
}

/// Messages a manager may see: their bots, restricted to users they
/// invited, plus their own test messages.
async fn manager_messages(db: &DbPool, manager_id: &str) -> Result<Vec<Message>, ApiError> {
    let messages = sqlx::query_as::<_, Message>(
        r#"
        SELECT m.*
        FROM messages m
        INNER JOIN bots b ON b.id = m.bot_id AND b.created_by = ?
        LEFT JOIN accounts u ON u.id = m.user_id AND u.invited_by = ? AND u.role = 'user'
        WHERE u.id IS NOT NULL OR (m.user_id = ? AND m.is_test = 1)
        ORDER BY m.created_at ASC
        "#,
    )
    .bind(manager_id)
    .bind(manager_id)
    .bind(manager_id)
    .fetch_all(db)
    .await?;

    Ok(messages)
}

pub async fn manager_conversations(
    State(state): State<Arc<AppState>>,
    account: Account,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<Vec<ConversationSession>>, ApiError> {
    require_role(&account, AccountRole::Manager)?;
    let (filter, sort, order) = query.parsed()?;

    let scope = match manager_scope(&state.db, &account).await? {
        Some(scope) => scope,
        None => return Ok(Json(Vec::new())),
    };

    let messages = manager_messages(&state.db, &account.id).await?;
    let now = chrono::Utc::now();

    let derived = sessions::derive_sessions(&messages, &scope.bot_names, &scope.counterparts, now);
    let mut filtered = sessions::filter_sessions(derived, &filter, now);
    sessions::sort_sessions(&mut filtered, sort, order);

    Ok(Json(filtered))
}

pub async fn manager_conversation_stats(
    State(state): State<Arc<AppState>>,
    account: Account,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<SessionStats>, ApiError> {
    require_role(&account, AccountRole::Manager)?;
    let (filter, _sort, _order) = query.parsed()?;

    let scope = match manager_scope(&state.db, &account).await? {
        Some(scope) => scope,
        None => return Ok(Json(sessions::session_stats(&[]))),
    };

    let messages = manager_messages(&state.db, &account.id).await?;
    let now = chrono::Utc::now();

    let derived = sessions::derive_sessions(&messages, &scope.bot_names, &scope.counterparts, now);
    let filtered = sessions::filter_sessions(derived, &filter, now);

    Ok(Json(sessions::session_stats(&filtered)))
}

pub async fn user_conversations(
    State(state): State<Arc<AppState>>,
    account: Account,
) -> Result<Json<Vec<ConversationSession>>, ApiError> {
    require_role(&account, AccountRole::User)?;

    // Empty scope: without an active assignment there is nothing to show
    let assignments: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM assignments WHERE user_id = ? AND status = 'active'",
    )
    .bind(&account.id)
    .fetch_one(&state.db)
    .await?;
    if assignments.0 == 0 {
        return Ok(Json(Vec::new()));
    }

    let messages =
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE user_id = ? ORDER BY created_at ASC")
            .bind(&account.id)
            .fetch_all(&state.db)
            .await?;

    let bot_names: HashMap<String, String> = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT DISTINCT b.id, b.name
        FROM bots b
        INNER JOIN messages m ON m.bot_id = b.id
        WHERE m.user_id = ?
        "#,
    )
    .bind(&account.id)
    .fetch_all(&state.db)
    .await?
    .into_iter()
    .collect();

    let mut counterparts = HashMap::new();
    counterparts.insert(
        account.id.clone(),
        Counterpart {
            display_name: account.display_name(),
            email: account.email.clone(),
        },
    );

    let now = chrono::Utc::now();
    let derived = sessions::derive_sessions(&messages, &bot_names, &counterparts, now);

    Ok(Json(derived))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{
        seed_assignment, seed_bot, seed_manager, seed_message, seed_user, test_state,
    };
    use crate::db::TestMessageRequest;
    use axum::extract::Path;

    #[tokio::test]
    async fn empty_scope_returns_nothing_even_with_test_messages() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let bot_id = seed_bot(&state.db, "Support Bot", &manager.id).await;

        // A test conversation exists, but no user was ever invited
        super::super::chat::send_test_message(
            State(state.clone()),
            manager.clone(),
            Path(bot_id.clone()),
            Json(TestMessageRequest {
                sender: "user".to_string(),
                body: "probing my own bot".to_string(),
            }),
        )
        .await
        .expect("test message");

        let Json(sessions) = manager_conversations(
            State(state.clone()),
            manager.clone(),
            Query(ConversationQuery::default()),
        )
        .await
        .expect("conversations");
        assert!(sessions.is_empty());

        let Json(stats) = manager_conversation_stats(
            State(state.clone()),
            manager.clone(),
            Query(ConversationQuery::default()),
        )
        .await
        .expect("stats");
        assert_eq!(stats.total, 0);
        assert_eq!(stats.avg_response_seconds, None);

        // Inviting a user opens the scope; the test session becomes visible
        seed_user(&state.db, "u@example.com", &manager.id).await;
        let Json(sessions) = manager_conversations(
            State(state.clone()),
            manager,
            Query(ConversationQuery::default()),
        )
        .await
        .expect("conversations");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].bot_name, "Support Bot");
        assert_eq!(sessions[0].user_email, "m@example.com");
    }

    #[tokio::test]
    async fn manager_sees_only_own_scope() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let rival = seed_manager(&state.db, "rival@example.com").await;

        let my_user = seed_user(&state.db, "mine@example.com", &manager.id).await;
        let their_user = seed_user(&state.db, "theirs@example.com", &rival.id).await;

        let my_bot = seed_bot(&state.db, "My Bot", &manager.id).await;
        let their_bot = seed_bot(&state.db, "Their Bot", &rival.id).await;

        seed_message(&state.db, &my_bot, &my_user.id, "user", "hi", "2025-06-01T10:00:00+00:00")
            .await;
        seed_message(
            &state.db,
            &their_bot,
            &their_user.id,
            "user",
            "spy",
            "2025-06-01T10:00:00+00:00",
        )
        .await;
        // A foreign user talking to my bot is outside my scope too
        seed_message(
            &state.db,
            &my_bot,
            &their_user.id,
            "user",
            "stray",
            "2025-06-01T10:00:00+00:00",
        )
        .await;

        let Json(sessions) = manager_conversations(
            State(state.clone()),
            manager,
            Query(ConversationQuery::default()),
        )
        .await
        .expect("conversations");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].user_email, "mine@example.com");
        assert_eq!(sessions[0].bot_name, "My Bot");
    }

    #[tokio::test]
    async fn filters_and_stats_flow_through() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let alice = seed_user(&state.db, "alice@example.com", &manager.id).await;
        let bob = seed_user(&state.db, "bob@example.com", &manager.id).await;
        let bot_id = seed_bot(&state.db, "Support Bot", &manager.id).await;

        seed_message(&state.db, &bot_id, &alice.id, "user", "q", "2025-06-01T10:00:00+00:00")
            .await;
        seed_message(&state.db, &bot_id, &alice.id, "bot", "a", "2025-06-01T10:00:30+00:00")
            .await;
        seed_message(&state.db, &bot_id, &bob.id, "user", "q", "2025-06-02T09:00:00+00:00").await;

        let Json(all) = manager_conversations(
            State(state.clone()),
            manager.clone(),
            Query(ConversationQuery::default()),
        )
        .await
        .expect("all");
        assert_eq!(all.len(), 2);

        let Json(alice_only) = manager_conversations(
            State(state.clone()),
            manager.clone(),
            Query(ConversationQuery {
                user_id: Some(alice.id.clone()),
                ..Default::default()
            }),
        )
        .await
        .expect("filtered");
        assert_eq!(alice_only.len(), 1);
        assert_eq!(alice_only[0].user_email, "alice@example.com");

        let Json(stats) = manager_conversation_stats(
            State(state.clone()),
            manager,
            Query(ConversationQuery::default()),
        )
        .await
        .expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.avg_response_seconds, Some(30.0));
    }

    #[tokio::test]
    async fn unknown_filter_values_are_rejected() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;

        let err = manager_conversations(
            State(state.clone()),
            manager,
            Query(ConversationQuery {
                range: Some("yesterday".to_string()),
                ..Default::default()
            }),
        )
        .await
        .expect_err("bad range");
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn user_view_requires_an_active_assignment() {
        let state = test_state().await;
        let manager = seed_manager(&state.db, "m@example.com").await;
        let user = seed_user(&state.db, "u@example.com", &manager.id).await;
        let bot_id = seed_bot(&state.db, "Support Bot", &manager.id).await;

        seed_message(&state.db, &bot_id, &user.id, "user", "hi", "2025-06-01T10:00:00+00:00")
            .await;

        // History exists but no active assignment does
        let Json(sessions) = user_conversations(State(state.clone()), user.clone())
            .await
            .expect("no assignment");
        assert!(sessions.is_empty());

        seed_assignment(&state.db, &bot_id, &user.id, &manager.id).await;

        let Json(sessions) = user_conversations(State(state.clone()), user)
            .await
            .expect("assigned");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].bot_name, "Support Bot");
        assert_eq!(sessions[0].message_count, 1);
    }
}
