//! Startup self-checks.
//!
//! Before the listener opens, the server verifies the pieces it cannot run
//! without (database, schema, writable data directory) and reports on the
//! optional collaborators (SMTP, workflow webhook, billing secret). Optional
//! ones only warn; the affected features stay disabled.

use tracing::{error, info, warn};

use crate::config::Config;
use crate::DbPool;

/// Tables every API surface queries. Migrations must have produced all of
/// them or the process refuses to serve.
const REQUIRED_TABLES: &[&str] = &[
    "accounts",
    "auth_sessions",
    "bots",
    "assignments",
    "messages",
    "subscriptions",
    "invoices",
    "pending_refunds",
    "issues",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Ok,
    /// Degraded but serveable
    Warn(String),
    /// Refuse to start
    Fatal(String),
}

#[derive(Debug, Clone)]
pub struct StartupCheck {
    pub name: &'static str,
    pub outcome: CheckOutcome,
}

impl StartupCheck {
    fn ok(name: &'static str) -> Self {
        Self {
            name,
            outcome: CheckOutcome::Ok,
        }
    }

    fn warn(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            outcome: CheckOutcome::Warn(reason.into()),
        }
    }

    fn fatal(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            outcome: CheckOutcome::Fatal(reason.into()),
        }
    }
}

#[derive(Debug)]
pub struct StartupReport {
    pub checks: Vec<StartupCheck>,
}

impl StartupReport {
    /// False when any check came back fatal.
    pub fn can_serve(&self) -> bool {
        !self
            .checks
            .iter()
            .any(|c| matches!(c.outcome, CheckOutcome::Fatal(_)))
    }

    pub fn summary(&self) -> String {
        let total = self.checks.len();
        let ok = self
            .checks
            .iter()
            .filter(|c| c.outcome == CheckOutcome::Ok)
            .count();
        let warned = self
            .checks
            .iter()
            .filter(|c| matches!(c.outcome, CheckOutcome::Warn(_)))
            .count();
        let fatal = total - ok - warned;

        if ok == total {
            format!("all {} startup checks passed", total)
        } else if fatal == 0 {
            format!("{}/{} startup checks passed, rest degraded", ok, total)
        } else {
            format!("{}/{} startup checks passed, {} fatal", ok, total, fatal)
        }
    }

    fn log(&self) {
        for check in &self.checks {
            match &check.outcome {
                CheckOutcome::Ok => info!(check = check.name, "startup check passed"),
                CheckOutcome::Warn(reason) => {
                    warn!(check = check.name, %reason, "startup check degraded")
                }
                CheckOutcome::Fatal(reason) => {
                    error!(check = check.name, %reason, "startup check failed")
                }
            }
        }
        info!(summary = %self.summary(), "startup checks completed");
    }
}

/// Run every self-check and log the outcome.
pub async fn run_startup_checks(config: &Config, db: &DbPool) -> StartupReport {
    let report = StartupReport {
        checks: vec![
            check_database(db).await,
            check_schema(db).await,
            check_data_directory(config),
            check_email(config),
            check_workflow(config),
            check_billing(config),
        ],
    };
    report.log();
    report
}

async fn check_database(db: &DbPool) -> StartupCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(_) => StartupCheck::ok("database"),
        Err(e) => StartupCheck::fatal("database", format!("connection failed: {}", e)),
    }
}

async fn check_schema(db: &DbPool) -> StartupCheck {
    let tables: Vec<String> = match sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(db)
    .await
    {
        Ok(tables) => tables,
        Err(e) => return StartupCheck::fatal("schema", format!("catalog query failed: {}", e)),
    };

    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .filter(|required| !tables.iter().any(|t| t == *required))
        .copied()
        .collect();

    if missing.is_empty() {
        StartupCheck::ok("schema")
    } else {
        StartupCheck::fatal("schema", format!("missing tables: {}", missing.join(", ")))
    }
}

fn check_data_directory(config: &Config) -> StartupCheck {
    let dir = &config.server.data_dir;
    if !dir.exists() {
        return StartupCheck::fatal(
            "data_directory",
            format!("{} does not exist", dir.display()),
        );
    }

    let probe = dir.join(".botforge_write_test");
    match std::fs::write(&probe, b"probe") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            StartupCheck::ok("data_directory")
        }
        Err(e) => StartupCheck::fatal(
            "data_directory",
            format!("{} is not writable: {}", dir.display(), e),
        ),
    }
}

fn check_email(config: &Config) -> StartupCheck {
    if config.email.is_configured() {
        StartupCheck::ok("email")
    } else {
        StartupCheck::warn(
            "email",
            "SMTP not configured, verification and invitation emails will be skipped",
        )
    }
}

fn check_workflow(config: &Config) -> StartupCheck {
    if config.workflow.webhook_url.is_some() {
        StartupCheck::ok("workflow_webhook")
    } else {
        StartupCheck::warn(
            "workflow_webhook",
            "workflow webhook not configured, bot creation events will not be announced",
        )
    }
}

fn check_billing(config: &Config) -> StartupCheck {
    if config.billing.webhook_secret.is_some() {
        StartupCheck::ok("billing")
    } else {
        StartupCheck::warn(
            "billing",
            "billing webhook secret not configured, /webhooks/billing will reject all events",
        )
    }
}
