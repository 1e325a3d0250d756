pub mod api;
pub mod billing;
pub mod config;
pub mod db;
pub mod notifications;
pub mod sessions;
pub mod startup;

pub use db::DbPool;

use config::Config;
use notifications::{EmailService, WorkflowNotifier};

/// Shared state handed to every request handler
pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub mailer: EmailService,
    pub workflow: WorkflowNotifier,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, mailer: EmailService, workflow: WorkflowNotifier) -> Self {
        Self {
            config,
            db,
            mailer,
            workflow,
        }
    }
}
