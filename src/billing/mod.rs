//! Payment provider integration.
//!
//! Holds the webhook signature check, the wire shapes of provider events,
//! and the refund sweeper. Refund obligations live in the
//! `pending_refunds` table and are picked up by a periodic background
//! task, so a restart between checkout and the refund due time loses
//! nothing.

use anyhow::Result;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::time::{interval, Duration};

use crate::config::BillingConfig;
use crate::db::{DbPool, PendingRefund};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

/// Verify an `X-Billing-Signature` header against the raw request body.
///
/// Header format: `t=<unix>,v1=<hex>` where `v1` is
/// HMAC-SHA256(secret, "<t>.<body>"). Timestamps outside the tolerance in
/// either direction are rejected before any MAC work happens.
pub fn verify_signature(
    secret: &str,
    signature_header: &str,
    body: &[u8],
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signature: Option<Vec<u8>> = None;

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signature = hex::decode(value).ok(),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let signature = signature.ok_or(SignatureError::Malformed)?;

    if (now_unix - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Stale);
    }

    // Sha256 HMAC accepts keys of any length.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    // Constant-time comparison
    mac.verify_slice(&signature)
        .map_err(|_| SignatureError::Mismatch)
}

/// Envelope shared by every provider event
#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: BillingEventData,
}

#[derive(Debug, Deserialize)]
pub struct BillingEventData {
    pub object: serde_json::Value,
}

impl BillingEvent {
    /// Deserialize the event's inner object into its concrete shape
    pub fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.object.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub payment_intent: Option<String>,
    pub subscription: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: CheckoutMetadata,
}

/// Provider metadata values are always strings on the wire
#[derive(Debug, Default, Deserialize)]
pub struct CheckoutMetadata {
    pub account_id: Option<String>,
    pub bot_name: Option<String>,
    pub bot_domain: Option<String>,
    pub bot_description: Option<String>,
    pub refund_delay_minutes: Option<String>,
}

impl CheckoutMetadata {
    pub fn refund_delay(&self) -> Option<i64> {
        self.refund_delay_minutes
            .as_deref()
            .and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub metadata: PaymentIntentMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentIntentMetadata {
    pub bot_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub subscription: Option<String>,
    pub amount_paid: Option<i64>,
    pub amount_due: Option<i64>,
    pub currency: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: BillingAccountMetadata,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Option<String>,
    pub status: Option<String>,
    /// Unix timestamp
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub metadata: BillingAccountMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillingAccountMetadata {
    pub account_id: Option<String>,
    pub plan: Option<String>,
}

/// Record a refund obligation due `delay_minutes` from now.
///
/// Keyed on the provider payment id, so a replayed checkout event does not
/// schedule a second refund.
pub async fn schedule_refund(
    db: &DbPool,
    provider_payment_id: &str,
    bot_id: Option<&str>,
    amount_cents: Option<i64>,
    delay_minutes: i64,
) -> Result<()> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let due_at = (now + chrono::Duration::minutes(delay_minutes)).to_rfc3339();

    sqlx::query(
        "INSERT OR IGNORE INTO pending_refunds (id, provider_payment_id, bot_id, amount_cents, due_at, status, attempts, created_at)
         VALUES (?, ?, ?, ?, ?, 'pending', 0, ?)",
    )
    .bind(&id)
    .bind(provider_payment_id)
    .bind(bot_id)
    .bind(amount_cents)
    .bind(&due_at)
    .bind(now.to_rfc3339())
    .execute(db)
    .await?;

    tracing::info!(
        payment = %provider_payment_id,
        delay_minutes = delay_minutes,
        "Refund scheduled"
    );
    Ok(())
}

/// Counts from a single sweep cycle
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub processed: u64,
    pub retried: u64,
    pub abandoned: u64,
}

/// Processes due refund rows against the provider's refund endpoint
pub struct RefundSweeper {
    db: DbPool,
    config: BillingConfig,
    client: reqwest::Client,
}

impl RefundSweeper {
    pub fn new(db: DbPool, config: BillingConfig) -> Self {
        Self {
            db,
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Run a single sweep cycle over due pending refunds
    pub async fn sweep(&self) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        let Some(endpoint) = self.config.refund_endpoint.as_deref() else {
            tracing::debug!("No refund endpoint configured, skipping sweep");
            return Ok(stats);
        };

        let due = self.due_refunds(Utc::now()).await?;
        if due.is_empty() {
            return Ok(stats);
        }

        tracing::info!(count = due.len(), "Processing due refunds");

        for refund in due {
            match self.attempt_refund(endpoint, &refund).await {
                Ok(()) => {
                    self.mark_processed(&refund).await?;
                    stats.processed += 1;
                    tracing::info!(
                        refund_id = %refund.id,
                        payment = %refund.provider_payment_id,
                        "Refund processed"
                    );
                }
                Err(e) => {
                    let gave_up = self.record_failure(&refund, &e.to_string()).await?;
                    if gave_up {
                        stats.abandoned += 1;
                        tracing::error!(
                            refund_id = %refund.id,
                            payment = %refund.provider_payment_id,
                            error = %e,
                            "Refund abandoned after too many attempts"
                        );
                    } else {
                        stats.retried += 1;
                        tracing::warn!(
                            refund_id = %refund.id,
                            error = %e,
                            "Refund attempt failed, will retry"
                        );
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Pending rows whose due time has passed, oldest first.
    /// Due times are compared in Rust; a row with an unparseable due time
    /// counts as overdue rather than sticking around forever.
    async fn due_refunds(&self, now: DateTime<Utc>) -> Result<Vec<PendingRefund>> {
        let rows: Vec<PendingRefund> =
            sqlx::query_as("SELECT * FROM pending_refunds WHERE status = 'pending' ORDER BY due_at")
                .fetch_all(&self.db)
                .await?;

        Ok(rows
            .into_iter()
            .filter(|r| match DateTime::parse_from_rfc3339(&r.due_at) {
                Ok(due) => due.with_timezone(&Utc) <= now,
                Err(_) => true,
            })
            .collect())
    }

    async fn attempt_refund(&self, endpoint: &str, refund: &PendingRefund) -> Result<()> {
        let payload = serde_json::json!({
            "provider_payment_id": refund.provider_payment_id,
            "amount_cents": refund.amount_cents,
        });

        self.client
            .post(endpoint)
            .timeout(Duration::from_secs(10))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn mark_processed(&self, refund: &PendingRefund) -> Result<()> {
        sqlx::query(
            "UPDATE pending_refunds SET status = 'processed', processed_at = ?, last_error = NULL
             WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&refund.id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Record a failed attempt. Returns true when the attempt cap is hit
    /// and the row has been marked failed.
    async fn record_failure(&self, refund: &PendingRefund, error: &str) -> Result<bool> {
        let attempts = refund.attempts + 1;
        let gave_up = attempts >= self.config.refund_max_attempts;

        if gave_up {
            sqlx::query(
                "UPDATE pending_refunds SET status = 'failed', attempts = ?, last_error = ? WHERE id = ?",
            )
            .bind(attempts)
            .bind(error)
            .bind(&refund.id)
            .execute(&self.db)
            .await?;
        } else {
            sqlx::query("UPDATE pending_refunds SET attempts = ?, last_error = ? WHERE id = ?")
                .bind(attempts)
                .bind(error)
                .bind(&refund.id)
                .execute(&self.db)
                .await?;
        }

        Ok(gave_up)
    }
}

/// Spawn the background refund sweeper
pub fn spawn_refund_sweeper(db: DbPool, config: BillingConfig) {
    if config.refund_endpoint.is_none() {
        tracing::info!("Refund sweeper disabled, no refund endpoint configured");
        return;
    }

    let interval_secs = config.sweep_interval_secs;
    tracing::info!(interval_secs = interval_secs, "Starting refund sweeper");

    let sweeper = RefundSweeper::new(db, config);

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = sweeper.sweep().await {
                tracing::error!(error = %e, "Refund sweep failed");
            }
        }
    });
}
