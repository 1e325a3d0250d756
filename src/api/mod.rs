mod accounts;
mod admin;
mod assignments;
pub mod auth;
mod billing;
mod bots;
mod chat;
mod conversations;
pub mod error;
mod issues;
mod validation;

#[cfg(test)]
pub(crate) mod testing;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public; /me and /logout read the bearer token themselves)
    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/verify", get(auth::verify_email))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/accept-invitation", post(auth::accept_invitation));

    // Manager surface (role checked in each handler)
    let manager_routes = Router::new()
        // Bots
        .route("/bots", get(bots::list_bots))
        .route("/bots", post(bots::create_bot))
        .route("/bots/:id", get(bots::get_bot))
        .route("/bots/:id", put(bots::update_bot))
        .route("/bots/:id", delete(bots::delete_bot))
        // Assignments
        .route("/bots/:id/assignments", get(assignments::list_assignments))
        .route("/bots/:id/assignments", post(assignments::assign_user))
        .route(
            "/bots/:id/assignments/:user_id",
            delete(assignments::unassign_user),
        )
        // Bot messages
        .route("/bots/:id/test-messages", post(chat::send_test_message))
        .route("/bots/:id/messages", get(chat::list_bot_messages))
        // Invited users
        .route("/users", get(accounts::list_users))
        .route("/users", post(accounts::invite_user))
        .route("/users/:id", delete(accounts::delete_user))
        // Conversations
        .route("/conversations", get(conversations::manager_conversations))
        .route(
            "/conversations/stats",
            get(conversations::manager_conversation_stats),
        )
        // Billing
        .route("/subscription", get(billing::get_subscription))
        .route("/invoices", get(billing::list_invoices));

    // End-user surface
    let user_routes = Router::new()
        .route("/bots", get(bots::list_assigned_bots))
        .route("/bots/:id/messages", get(chat::list_user_messages))
        .route("/bots/:id/messages", post(chat::post_user_message))
        .route("/conversations", get(conversations::user_conversations))
        .route("/profile", get(accounts::get_profile))
        .route("/profile", put(accounts::update_profile));

    // Issues (any authenticated account)
    let issue_routes = Router::new()
        .route("/", get(issues::list_issues))
        .route("/", post(issues::create_issue))
        .route("/:id", get(issues::get_issue));

    // Admin surface
    let admin_routes = Router::new()
        .route("/accounts", get(admin::list_accounts))
        .route("/accounts/:id", get(admin::get_account))
        .route("/accounts/:id", put(admin::update_account))
        .route("/stats", get(admin::platform_stats))
        .route("/issues", get(admin::list_all_issues))
        .route("/issues/:id", put(admin::update_issue));

    // Signature-verified, no session auth
    let webhook_routes = Router::new().route("/billing", post(billing::billing_webhook));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api/manager", manager_routes)
        .nest("/api/user", user_routes)
        .nest("/api/issues", issue_routes)
        .nest("/api/admin", admin_routes)
        .nest("/webhooks", webhook_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::test_state;
    use serde_json::json;

    async fn spawn_server() -> (Arc<AppState>, String) {
        let state = test_state().await;
        let app = create_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        (state, format!("http://{}", addr))
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let (_state, base) = spawn_server().await;
        let body = reqwest::get(format!("{}/health", base))
            .await
            .expect("request")
            .text()
            .await
            .expect("body");
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn requests_without_token_get_structured_errors() {
        let (_state, base) = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{}/api/manager/bots", base))
            .send()
            .await
            .expect("send");
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        let body: serde_json::Value = resp.json().await.expect("json");
        assert_eq!(body["error"]["code"], "unauthorized");
        assert_eq!(body["error"]["message"], "Missing authentication token");
    }

    #[tokio::test]
    async fn full_platform_flow_over_http() {
        let (state, base) = spawn_server().await;
        let client = reqwest::Client::new();

        // Manager signs up and verifies their address
        let resp = client
            .post(format!("{}/api/auth/signup", base))
            .json(&json!({
                "email": "owner@example.com",
                "password": "passw0rd1",
                "first_name": "Olive"
            }))
            .send()
            .await
            .expect("signup");
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

        let (token,): (String,) = sqlx::query_as(
            "SELECT verification_token FROM accounts WHERE email = 'owner@example.com'",
        )
        .fetch_one(&state.db)
        .await
        .expect("verification token");
        let resp = client
            .get(format!("{}/api/auth/verify?token={}", base, token))
            .send()
            .await
            .expect("verify");
        assert!(resp.status().is_success());

        let login: serde_json::Value = client
            .post(format!("{}/api/auth/login", base))
            .json(&json!({"email": "owner@example.com", "password": "passw0rd1"}))
            .send()
            .await
            .expect("login")
            .json()
            .await
            .expect("login body");
        let manager_token = login["token"].as_str().expect("token").to_string();
        assert_eq!(login["redirect"], "/manager");

        // Create a bot
        let bot: serde_json::Value = client
            .post(format!("{}/api/manager/bots", base))
            .bearer_auth(&manager_token)
            .json(&json!({
                "name": "Support Bot",
                "description": "Answers order questions",
                "domain": "shop.example.com"
            }))
            .send()
            .await
            .expect("create bot")
            .json()
            .await
            .expect("bot body");
        let bot_id = bot["id"].as_str().expect("bot id").to_string();

        // Invite an end user and accept through the emailed token
        let resp = client
            .post(format!("{}/api/manager/users", base))
            .bearer_auth(&manager_token)
            .json(&json!({"email": "shopper@example.com"}))
            .send()
            .await
            .expect("invite");
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

        let (invitation,): (String,) = sqlx::query_as(
            "SELECT invitation_token FROM accounts WHERE email = 'shopper@example.com'",
        )
        .fetch_one(&state.db)
        .await
        .expect("invitation token");

        let accepted: serde_json::Value = client
            .post(format!("{}/api/auth/accept-invitation", base))
            .json(&json!({"token": invitation, "password": "shopper9pass"}))
            .send()
            .await
            .expect("accept")
            .json()
            .await
            .expect("accept body");
        let user_token = accepted["token"].as_str().expect("token").to_string();
        let user_id = accepted["account"]["id"].as_str().expect("id").to_string();
        assert_eq!(accepted["redirect"], "/chat");

        // No assignment yet, so posting is forbidden
        let resp = client
            .post(format!("{}/api/user/bots/{}/messages", base, bot_id))
            .bearer_auth(&user_token)
            .json(&json!({"sender": "user", "body": "Hello?"}))
            .send()
            .await
            .expect("blocked post");
        assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

        let resp = client
            .post(format!("{}/api/manager/bots/{}/assignments", base, bot_id))
            .bearer_auth(&manager_token)
            .json(&json!({"user_id": user_id}))
            .send()
            .await
            .expect("assign");
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

        for (sender, body) in [("user", "Where is my order?"), ("bot", "It ships tomorrow.")] {
            let resp = client
                .post(format!("{}/api/user/bots/{}/messages", base, bot_id))
                .bearer_auth(&user_token)
                .json(&json!({"sender": sender, "body": body}))
                .send()
                .await
                .expect("post message");
            assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        }

        // Both sides see the conversation
        let sessions: serde_json::Value = client
            .get(format!("{}/api/user/conversations", base))
            .bearer_auth(&user_token)
            .send()
            .await
            .expect("user conversations")
            .json()
            .await
            .expect("sessions body");
        assert_eq!(sessions.as_array().expect("array").len(), 1);
        assert_eq!(sessions[0]["message_count"], 2);
        assert_eq!(sessions[0]["bot_name"], "Support Bot");

        let stats: serde_json::Value = client
            .get(format!("{}/api/manager/conversations/stats", base))
            .bearer_auth(&manager_token)
            .send()
            .await
            .expect("stats")
            .json()
            .await
            .expect("stats body");
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["active"], 1);

        // Role walls hold in both directions
        let resp = client
            .get(format!("{}/api/manager/bots", base))
            .bearer_auth(&user_token)
            .send()
            .await
            .expect("user on manager surface");
        assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

        let resp = client
            .get(format!("{}/api/admin/stats", base))
            .bearer_auth(&manager_token)
            .send()
            .await
            .expect("manager on admin surface");
        assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);

        // Logout drops the session
        let resp = client
            .post(format!("{}/api/auth/logout", base))
            .bearer_auth(&user_token)
            .send()
            .await
            .expect("logout");
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

        let resp = client
            .get(format!("{}/api/auth/me", base))
            .bearer_auth(&user_token)
            .send()
            .await
            .expect("me after logout");
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    }
}
