use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub line: LineConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineConfig {
    /// Channel secret used to verify webhook signatures
    pub channel_secret: String,
    /// Channel access token for reply/push calls
    pub channel_access_token: String,
    /// Messaging API base URL
    #[serde(default = "default_line_api_base")]
    pub api_base: String,
}

fn default_line_api_base() -> String {
    "https://api.line.me".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DialogueConfig {
    /// Seconds of inactivity before an unfinished registration is dropped
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout() -> u64 {
    1800
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Search retries after a commit-time stale candidate
    #[serde(default = "default_match_retries")]
    pub max_retries: u32,
}

fn default_match_retries() -> u32 {
    3
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            max_retries: default_match_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Webhook listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            .set_default("dialogue.idle_timeout_secs", 1800)?
            .set_default("matching.max_retries", 3)?
            .set_default("server.port", 8000)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SLOTSWAP_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SLOTSWAP_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("SLOTSWAP")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }

        if self.line.channel_secret.is_empty() {
            errors.push("line.channel_secret must be set".to_string());
        }

        if self.line.channel_access_token.is_empty() {
            errors.push("line.channel_access_token must be set".to_string());
        }

        if self.matching.max_retries == 0 {
            errors.push("matching.max_retries must be at least 1".to_string());
        }

        if self.dialogue.idle_timeout_secs == 0 {
            errors.push("dialogue.idle_timeout_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_secrets() {
        let cfg = AppConfig {
            database: DatabaseConfig {
                url: "postgres://localhost/slotswap".to_string(),
                max_connections: 5,
            },
            line: LineConfig {
                channel_secret: String::new(),
                channel_access_token: String::new(),
                api_base: default_line_api_base(),
            },
            dialogue: DialogueConfig::default(),
            matching: MatchingConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        };

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
