use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Externally reachable base URL, used in verification and invitation links
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            public_url: default_public_url(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    /// Bearer session lifetime in hours
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    /// How long invitation links stay valid
    #[serde(default = "default_invitation_ttl_days")]
    pub invitation_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_email: default_admin_email(),
            admin_password: default_admin_password(),
            session_ttl_hours: default_session_ttl_hours(),
            invitation_ttl_days: default_invitation_ttl_days(),
        }
    }
}

fn default_admin_email() -> String {
    "admin@botforge.local".to_string()
}

fn default_admin_password() -> String {
    // Generate a random password if not provided
    uuid::Uuid::new_v4().to_string()
}

fn default_session_ttl_hours() -> i64 {
    168
}

fn default_invitation_ttl_days() -> i64 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl EmailConfig {
    /// Sending requires at least a host and a from address
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: default_smtp_tls(),
            from_address: None,
            from_name: default_from_name(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> bool {
    true
}

fn default_from_name() -> String {
    "BotForge".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Automation endpoint notified when a bot is created. Disabled when unset.
    pub webhook_url: Option<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { webhook_url: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Secret for verifying payment provider webhook signatures (HMAC-SHA256)
    pub webhook_secret: Option<String>,
    /// Provider endpoint the refund sweeper POSTs to. Disabled when unset.
    pub refund_endpoint: Option<String>,
    /// Seconds between refund sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Attempts before a pending refund is marked failed
    #[serde(default = "default_refund_max_attempts")]
    pub refund_max_attempts: i64,
    /// Maximum accepted age of a webhook signature timestamp, in seconds
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            refund_endpoint: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            refund_max_attempts: default_refund_max_attempts(),
            signature_tolerance_secs: default_signature_tolerance_secs(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_refund_max_attempts() -> i64 {
    5
}

fn default_signature_tolerance_secs() -> i64 {
    300
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            email: EmailConfig::default(),
            workflow: WorkflowConfig::default(),
            billing: BillingConfig::default(),
        }
    }
}
