//! Billing endpoints: the provider webhook and manager-facing reads of
//! subscription and invoice rows.
//!
//! The webhook trusts nothing: the raw body is checked against the
//! `X-Billing-Signature` header before any JSON is parsed. Events that
//! verify but cannot be tied to local rows are logged and acknowledged,
//! so the provider does not retry them forever.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use uuid::Uuid;

use super::auth::require_role;
use super::error::ApiError;
use crate::billing::{
    self, BillingEvent, CheckoutSession, InvoiceObject, PaymentIntent, SignatureError,
    SubscriptionObject,
};
use crate::db::{Account, AccountRole, Invoice, Subscription};
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-billing-signature";

pub async fn billing_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let secret = state
        .config
        .billing
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::unauthorized("Billing webhooks are not configured"))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing signature header"))?;

    billing::verify_signature(
        secret,
        signature,
        &body,
        state.config.billing.signature_tolerance_secs,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| match e {
        SignatureError::Malformed => ApiError::bad_request("Malformed signature header"),
        SignatureError::Stale | SignatureError::Mismatch => ApiError::unauthorized(e.to_string()),
    })?;

    let event: BillingEvent = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Invalid event payload"))?;

    tracing::info!(
        event_id = ?event.id,
        event_type = %event.event_type,
        "Processing billing event"
    );

    match event.event_type.as_str() {
        "checkout.session.completed" => checkout_completed(&state, &event).await?,
        "payment_intent.failed" => payment_failed(&state, &event).await?,
        "invoice.paid" => invoice_paid(&state, &event).await?,
        "customer.subscription.updated" => subscription_updated(&state, &event).await?,
        "customer.subscription.deleted" => subscription_deleted(&state, &event).await?,
        other => {
            tracing::debug!(event_type = %other, "Ignoring unhandled billing event");
        }
    }

    Ok(Json(serde_json::json!({ "received": true })))
}

/// Create a bot from checkout metadata, at most once per provider session.
async fn checkout_completed(state: &AppState, event: &BillingEvent) -> Result<(), ApiError> {
    let session: CheckoutSession = event
        .object()
        .map_err(|_| ApiError::bad_request("Invalid checkout session object"))?;

    let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM bots WHERE provider_session_id = ?")
            .bind(&session.id)
            .fetch_optional(&state.db)
            .await?;
    if existing.is_some() {
        tracing::info!(session = %session.id, "Checkout already handled, skipping replay");
        return Ok(());
    }

    let (Some(account_id), Some(bot_name)) = (
        session.metadata.account_id.as_deref(),
        session.metadata.bot_name.as_deref(),
    ) else {
        tracing::warn!(session = %session.id, "Checkout metadata missing account or bot name");
        return Ok(());
    };

    let account: Option<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE id = ?")
        .bind(account_id)
        .fetch_optional(&state.db)
        .await?;
    if account.is_none() {
        tracing::warn!(
            session = %session.id,
            account_id = %account_id,
            "Checkout references unknown account"
        );
        return Ok(());
    }

    let bot_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let inserted = sqlx::query(
        r#"
        INSERT INTO bots (id, name, description, domain, status, payment_status,
                          provider_session_id, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'active', 'paid', ?, ?, ?, ?)
        "#,
    )
    .bind(&bot_id)
    .bind(bot_name)
    .bind(session.metadata.bot_description.as_deref().unwrap_or_default())
    .bind(session.metadata.bot_domain.as_deref().unwrap_or_default())
    .bind(&session.id)
    .bind(account_id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await;

    if let Err(e) = inserted {
        // A concurrent delivery of the same session lost the race
        if e.to_string().contains("UNIQUE constraint failed") {
            tracing::info!(session = %session.id, "Checkout already handled, skipping replay");
            return Ok(());
        }
        tracing::error!("Failed to create bot from checkout: {}", e);
        return Err(ApiError::database("Failed to create bot from checkout"));
    }

    if let Some(amount) = session.amount_total {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, account_id, subscription_id, amount_cents, currency,
                                  status, issued_at, created_at)
            VALUES (?, ?, ?, ?, ?, 'paid', ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(account_id)
        .bind(&session.subscription)
        .bind(amount)
        .bind(session.currency.as_deref().unwrap_or("usd"))
        .bind(&now)
        .bind(&now)
        .execute(&state.db)
        .await?;
    }

    if let Some(delay) = session.metadata.refund_delay() {
        let payment_id = session.payment_intent.as_deref().unwrap_or(&session.id);
        billing::schedule_refund(
            &state.db,
            payment_id,
            Some(&bot_id),
            session.amount_total,
            delay,
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to schedule refund: {}", e);
            ApiError::database("Failed to schedule refund")
        })?;
    }

    tracing::info!(bot_id = %bot_id, session = %session.id, "Bot created from checkout");
    Ok(())
}

async fn payment_failed(state: &AppState, event: &BillingEvent) -> Result<(), ApiError> {
    let intent: PaymentIntent = event
        .object()
        .map_err(|_| ApiError::bad_request("Invalid payment intent object"))?;

    let Some(bot_id) = intent.metadata.bot_id.as_deref() else {
        tracing::warn!(payment = %intent.id, "Failed payment carries no bot id");
        return Ok(());
    };

    let result = sqlx::query(
        "UPDATE bots SET payment_status = 'failed', status = 'inactive', updated_at = ? WHERE id = ?",
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(bot_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        tracing::warn!(
            payment = %intent.id,
            bot_id = %bot_id,
            "Failed payment references unknown bot"
        );
    } else {
        tracing::info!(bot_id = %bot_id, payment = %intent.id, "Bot deactivated after failed payment");
    }
    Ok(())
}

/// Upsert an invoice row keyed on the provider invoice id.
async fn invoice_paid(state: &AppState, event: &BillingEvent) -> Result<(), ApiError> {
    let invoice: InvoiceObject = event
        .object()
        .map_err(|_| ApiError::bad_request("Invalid invoice object"))?;

    // Resolve the account from metadata, else through the subscription row
    let account_id = match invoice.metadata.account_id.clone() {
        Some(id) => Some(id),
        None => match invoice.subscription.as_deref() {
            Some(sub) => sqlx::query_as::<_, (String,)>(
                "SELECT account_id FROM subscriptions WHERE provider_subscription_id = ?",
            )
            .bind(sub)
            .fetch_optional(&state.db)
            .await?
            .map(|(id,)| id),
            None => None,
        },
    };

    let Some(account_id) = account_id else {
        tracing::warn!(invoice = %invoice.id, "Invoice cannot be tied to an account, ignoring");
        return Ok(());
    };

    let known: Option<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE id = ?")
        .bind(&account_id)
        .fetch_optional(&state.db)
        .await?;
    if known.is_none() {
        tracing::warn!(
            invoice = %invoice.id,
            account_id = %account_id,
            "Invoice references unknown account, ignoring"
        );
        return Ok(());
    }

    let now = chrono::Utc::now().to_rfc3339();
    let amount = invoice.amount_paid.or(invoice.amount_due).unwrap_or(0);

    sqlx::query(
        r#"
        INSERT INTO invoices (id, account_id, subscription_id, amount_cents, currency,
                              status, provider_invoice_id, issued_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(provider_invoice_id) DO UPDATE SET
            status = excluded.status,
            amount_cents = excluded.amount_cents
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&account_id)
    .bind(&invoice.subscription)
    .bind(amount)
    .bind(invoice.currency.as_deref().unwrap_or("usd"))
    .bind(invoice.status.as_deref().unwrap_or("paid"))
    .bind(&invoice.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::info!(invoice = %invoice.id, account_id = %account_id, "Invoice recorded");
    Ok(())
}

/// Upsert the subscription row keyed on the provider subscription id.
/// Fields the event omits keep their stored values.
async fn subscription_updated(state: &AppState, event: &BillingEvent) -> Result<(), ApiError> {
    let sub: SubscriptionObject = event
        .object()
        .map_err(|_| ApiError::bad_request("Invalid subscription object"))?;

    let account_id = match sub.metadata.account_id.clone() {
        Some(id) => Some(id),
        None => sqlx::query_as::<_, (String,)>(
            "SELECT account_id FROM subscriptions WHERE provider_subscription_id = ?",
        )
        .bind(&sub.id)
        .fetch_optional(&state.db)
        .await?
        .map(|(id,)| id),
    };

    let Some(account_id) = account_id else {
        tracing::warn!(subscription = %sub.id, "Subscription cannot be tied to an account, ignoring");
        return Ok(());
    };

    let known: Option<(String,)> = sqlx::query_as("SELECT id FROM accounts WHERE id = ?")
        .bind(&account_id)
        .fetch_optional(&state.db)
        .await?;
    if known.is_none() {
        tracing::warn!(
            subscription = %sub.id,
            account_id = %account_id,
            "Subscription references unknown account, ignoring"
        );
        return Ok(());
    }

    let now = chrono::Utc::now().to_rfc3339();
    let status = sub.status.as_deref().unwrap_or("active");
    let period_end = sub
        .current_period_end
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.to_rfc3339());

    sqlx::query(
        r#"
        INSERT INTO subscriptions (id, account_id, plan, status, provider_customer_id,
                                   provider_subscription_id, current_period_end, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(provider_subscription_id) DO UPDATE SET
            status = excluded.status,
            plan = COALESCE(?, plan),
            provider_customer_id = COALESCE(excluded.provider_customer_id, provider_customer_id),
            current_period_end = COALESCE(excluded.current_period_end, current_period_end),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&account_id)
    .bind(sub.metadata.plan.as_deref().unwrap_or("standard"))
    .bind(status)
    .bind(&sub.customer)
    .bind(&sub.id)
    .bind(&period_end)
    .bind(&now)
    .bind(&now)
    .bind(&sub.metadata.plan)
    .execute(&state.db)
    .await?;

    tracing::info!(
        subscription = %sub.id,
        account_id = %account_id,
        status = %status,
        "Subscription updated"
    );
    Ok(())
}

async fn subscription_deleted(state: &AppState, event: &BillingEvent) -> Result<(), ApiError> {
    let sub: SubscriptionObject = event
        .object()
        .map_err(|_| ApiError::bad_request("Invalid subscription object"))?;

    let result = sqlx::query(
        "UPDATE subscriptions SET status = 'canceled', updated_at = ? WHERE provider_subscription_id = ?",
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .bind(&sub.id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        tracing::warn!(subscription = %sub.id, "Cancellation for unknown subscription");
    } else {
        tracing::info!(subscription = %sub.id, "Subscription canceled");
    }
    Ok(())
}

pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    account: Account,
) -> Result<Json<Subscription>, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    let subscription = sqlx::query_as::<_, Subscription>(
        "SELECT * FROM subscriptions WHERE account_id = ? ORDER BY updated_at DESC LIMIT 1",
    )
    .bind(&account.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("No subscription found"))?;

    Ok(Json(subscription))
}

pub async fn list_invoices(
    State(state): State<Arc<AppState>>,
    account: Account,
) -> Result<Json<Vec<Invoice>>, ApiError> {
    require_role(&account, AccountRole::Manager)?;

    let invoices = sqlx::query_as::<_, Invoice>(
        "SELECT * FROM invoices WHERE account_id = ? ORDER BY issued_at DESC",
    )
    .bind(&account.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(invoices))
}
