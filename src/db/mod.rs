mod models;

pub use models::*;

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        // Strip SQL comment lines (lines starting with --)
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path, max_connections: u32) -> Result<DbPool> {
    let db_path = data_dir.join("botforge.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = connect(&db_url, max_connections).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Open a pool against any SQLite URL and bring the schema up to date.
/// Tests use this with `sqlite::memory:` and a single connection.
pub async fn connect(db_url: &str, max_connections: u32) -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Initial schema
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: Billing tables
    let has_subscriptions_table: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='subscriptions'",
    )
    .fetch_optional(pool)
    .await?;
    if has_subscriptions_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/002_billing.sql")).await?;
    }

    // Migration 003: Support issues
    let has_issues_table: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='issues'",
    )
    .fetch_optional(pool)
    .await?;
    if has_issues_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/003_issues.sql")).await?;
    }

    info!("Migrations completed");
    Ok(())
}
