//! Outbound notifications: platform emails and the workflow webhook.
//!
//! Both services degrade gracefully when unconfigured so the API keeps
//! working in development and tests without external collaborators.

pub mod email;

pub use email::EmailService;

use serde_json::json;

use crate::config::WorkflowConfig;
use crate::db::Bot;

/// Announces bot lifecycle events to an external workflow endpoint
#[derive(Clone)]
pub struct WorkflowNotifier {
    config: WorkflowConfig,
    client: reqwest::Client,
}

impl WorkflowNotifier {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.webhook_url.is_some()
    }

    /// Announce a newly created bot.
    ///
    /// Failures are logged and never surface to the caller, so bot
    /// creation succeeds whether or not the workflow endpoint is up.
    pub async fn bot_created(&self, bot: &Bot) {
        let Some(url) = self.config.webhook_url.as_ref() else {
            return;
        };

        let payload = json!({
            "botId": bot.id,
            "botName": bot.name,
            "description": bot.description,
            "domain": bot.domain,
            "status": bot.status,
            "createdBy": bot.created_by,
            "createdAt": bot.created_at,
        });

        let result = self
            .client
            .post(url)
            .timeout(std::time::Duration::from_secs(10))
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match result {
            Ok(_) => {
                tracing::debug!(bot_id = %bot.id, "Workflow webhook notified");
            }
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, "Workflow webhook failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bot() -> Bot {
        Bot {
            id: "bot-1".to_string(),
            name: "Support Bot".to_string(),
            description: "Answers support questions".to_string(),
            domain: "support.example.com".to_string(),
            status: "active".to_string(),
            payment_status: None,
            provider_session_id: None,
            created_by: "acct-1".to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn disabled_notifier_is_a_no_op() {
        let notifier = WorkflowNotifier::new(WorkflowConfig { webhook_url: None });
        assert!(!notifier.is_enabled());
        // Must return without attempting any network call.
        notifier.bot_created(&sample_bot()).await;
    }
}
