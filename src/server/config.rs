//! Service configuration from environment variables

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AppConfigError {
    #[error("ASTERISK_CONFIG_PATH must not be empty")]
    EmptyConfigPath,

    #[error("PORT must be between 1 and 65535")]
    InvalidPort,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the Asterisk configuration files
    pub asterisk_config_path: PathBuf,

    /// The PJSIP file the store reads and rewrites
    pub pjsip_config: PathBuf,

    pub backup_path: PathBuf,

    /// System user the Asterisk CLI runs as
    pub asterisk_user: String,

    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub cors_origins: Vec<String>,

    /// Option table override; the bundled table is used when unset
    pub options_path: Option<PathBuf>,

    /// Add endpoints with the append-only path instead of a full rewrite
    pub fast_append: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl AppConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let asterisk_config_path = PathBuf::from(
            var("ASTERISK_CONFIG_PATH").unwrap_or_else(|| "/etc/asterisk/".to_string()),
        );
        let pjsip_config = var("ASTERISK_PJSIP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| asterisk_config_path.join("pjsip.conf"));

        let cors_origins = var("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Self {
            pjsip_config,
            backup_path: PathBuf::from(
                var("ASTERISK_BACKUP_PATH").unwrap_or_else(|| "/etc/asterisk/backups/".to_string()),
            ),
            asterisk_user: var("ASTERISK_USER").unwrap_or_else(|| "asterisk".to_string()),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT").and_then(|p| p.parse().ok()).unwrap_or(8000),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            cors_origins,
            options_path: var("PJSIP_OPTIONS_PATH").map(PathBuf::from),
            fast_append: var("PJSIP_FAST_APPEND")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false),
            asterisk_config_path,
        }
    }

    pub fn validate(&self) -> Result<(), AppConfigError> {
        if self.asterisk_config_path.as_os_str().is_empty() || self.pjsip_config.as_os_str().is_empty() {
            return Err(AppConfigError::EmptyConfigPath);
        }
        if self.port == 0 {
            return Err(AppConfigError::InvalidPort);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}
