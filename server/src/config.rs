//! Configuration management for the server.

use std::env;
use std::path::PathBuf;

use tandem_engine::RetireMode;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL, where entity links are kept
    pub database_url: String,
    /// Base URL of the CRM (Store A) record API
    pub crm_base_url: String,
    /// Base URL of the content store (Store B) record API
    pub content_base_url: String,
    /// Path to the mapping configuration JSON
    pub mapping_config: PathBuf,
    /// Directory holding imported attachments
    pub attachment_dir: PathBuf,
    /// Shared secret expected as bearer token on webhooks
    pub auth_secret: Option<String>,
    /// CRM types whose records can hold file attachments
    pub attachment_types: Vec<String>,
    /// What happens to relationships that are no longer desired
    pub retire_mode: RetireMode,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = required("DATABASE_URL")?;
        let crm_base_url = required("CRM_BASE_URL")?;
        let content_base_url = required("CONTENT_BASE_URL")?;

        let mapping_config = env::var("MAPPING_CONFIG")
            .unwrap_or_else(|_| "mapping.json".to_string())
            .into();
        let attachment_dir = env::var("ATTACHMENT_DIR")
            .unwrap_or_else(|_| "attachments".to_string())
            .into();

        let auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());

        let attachment_types = env::var("ATTACHMENT_TYPES")
            .map(|raw| parse_list(&raw))
            .unwrap_or_default();

        let retire_mode = match env::var("RETIRE_RELATIONSHIPS").as_deref() {
            Ok("delete") => RetireMode::Delete,
            Ok("deactivate") | Err(_) => RetireMode::Deactivate,
            Ok(_) => return Err(ConfigError::InvalidRetireMode),
        };

        Ok(Self {
            host,
            port,
            database_url,
            crm_base_url: crm_base_url.trim_end_matches('/').to_string(),
            content_base_url: content_base_url.trim_end_matches('/').to_string(),
            mapping_config,
            attachment_dir,
            auth_secret,
            attachment_types,
            retire_mode,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("RETIRE_RELATIONSHIPS must be 'deactivate' or 'delete'")]
    InvalidRetireMode,
}
