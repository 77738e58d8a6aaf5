use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::card_generator::GenerationPolicy;
use crate::card_service::DEFAULT_HISTORY_WINDOW;
use crate::llm_providers::{GenerationBackend, LLMProviderType};

// Import logging macros
use crate::{log_system_event, log_validation};

pub const DEFAULT_GENERATION_LOG_PATH: &str = "logs/card_generation.jsonl";

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LLMConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub generation: GenerationConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Completion backend configuration. Without an API key the service runs
/// on the offline catalog alone.
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub provider: LLMProviderType,
    pub model: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

/// Card generation tuning
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub max_attempts: u32,
    pub history_window: u32,
    pub prompt_exclusion_cap: usize,
    pub card_timeout_secs: u64,
    pub explain_timeout_secs: u64,
    pub log_path: Option<PathBuf>,
    pub knowledge_base_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            llm: LLMConfig::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            generation: GenerationConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            llm_provider = ?self.llm.provider,
            llm_model = ?self.llm.model,
            llm_configured = self.llm.api_key.is_some(),
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            max_attempts = self.generation.max_attempts,
            history_window = self.generation.history_window,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.generation.max_attempts == 0 {
            return Err(anyhow!("CARD_MAX_ATTEMPTS must be at least 1"));
        }

        if self.generation.history_window == 0 {
            return Err(anyhow!("CARD_HISTORY_WINDOW must be at least 1"));
        }

        if self.generation.card_timeout_secs == 0 || self.generation.explain_timeout_secs == 0 {
            return Err(anyhow!("Backend timeouts must be greater than 0 seconds"));
        }

        if self.llm.api_key.is_none() {
            warn!("LLM API key not set - cards will come from the offline catalog");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .iter()
            .any(|level| self.logging.level.to_lowercase().starts_with(level))
        {
            warn!("Unrecognized log level '{}', using 'info' as fallback", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }

    pub fn generation_backend(&self) -> GenerationBackend {
        GenerationBackend::from_settings(
            self.llm.provider,
            self.llm.api_key.clone(),
            self.llm.base_url.clone(),
            self.llm.model.clone(),
        )
    }

    pub fn generation_policy(&self) -> GenerationPolicy {
        GenerationPolicy {
            max_attempts: self.generation.max_attempts,
            prompt_exclusion_cap: self.generation.prompt_exclusion_cap,
            card_timeout: Duration::from_secs(self.generation.card_timeout_secs),
            explain_timeout: Duration::from_secs(self.generation.explain_timeout_secs),
            ..GenerationPolicy::default()
        }
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:eduflow.db".to_string());

        Ok(DatabaseConfig { url })
    }
}

impl LLMConfig {
    fn from_env() -> Result<Self> {
        let api_key = non_blank(env::var("LLM_API_KEY").ok());
        let base_url = non_blank(env::var("LLM_BASE_URL").ok());
        let provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = LLMProviderType::parse(&provider_str);
        let model = non_blank(env::var("LLM_MODEL").ok());

        Ok(LLMConfig {
            api_key,
            base_url,
            provider,
            model,
        })
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port = parse_setting("PORT", env::var("PORT").ok(), 8000u16)?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }
}

impl LoggingConfig {
    /// Read separately so the subscriber can be installed before the rest of
    /// the configuration is loaded.
    pub fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info,eduflow=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

impl GenerationConfig {
    fn from_env() -> Result<Self> {
        let defaults = GenerationPolicy::default();

        Ok(GenerationConfig {
            max_attempts: parse_setting("CARD_MAX_ATTEMPTS", env::var("CARD_MAX_ATTEMPTS").ok(), defaults.max_attempts)?,
            history_window: parse_setting(
                "CARD_HISTORY_WINDOW",
                env::var("CARD_HISTORY_WINDOW").ok(),
                DEFAULT_HISTORY_WINDOW,
            )?,
            prompt_exclusion_cap: parse_setting(
                "CARD_PROMPT_EXCLUSION_CAP",
                env::var("CARD_PROMPT_EXCLUSION_CAP").ok(),
                defaults.prompt_exclusion_cap,
            )?,
            card_timeout_secs: parse_setting(
                "CARD_TIMEOUT_SECS",
                env::var("CARD_TIMEOUT_SECS").ok(),
                defaults.card_timeout.as_secs(),
            )?,
            explain_timeout_secs: parse_setting(
                "EXPLAIN_TIMEOUT_SECS",
                env::var("EXPLAIN_TIMEOUT_SECS").ok(),
                defaults.explain_timeout.as_secs(),
            )?,
            log_path: generation_log_path(env::var("GENERATION_LOG_PATH").ok()),
            knowledge_base_path: non_blank(env::var("KNOWLEDGE_BASE_PATH").ok()).map(PathBuf::from),
        })
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let defaults = GenerationPolicy::default();
        Self {
            max_attempts: defaults.max_attempts,
            history_window: DEFAULT_HISTORY_WINDOW,
            prompt_exclusion_cap: defaults.prompt_exclusion_cap,
            card_timeout_secs: defaults.card_timeout.as_secs(),
            explain_timeout_secs: defaults.explain_timeout.as_secs(),
            log_path: Some(PathBuf::from(DEFAULT_GENERATION_LOG_PATH)),
            knowledge_base_path: None,
        }
    }
}

/// Diagnostics are on by default; `off` (or an empty value) disables them.
fn generation_log_path(raw: Option<String>) -> Option<PathBuf> {
    match raw {
        None => Some(PathBuf::from(DEFAULT_GENERATION_LOG_PATH)),
        Some(value) => non_blank(Some(value))
            .filter(|v| !v.eq_ignore_ascii_case("off"))
            .map(PathBuf::from),
    }
}

/// Parse an optional raw value, falling back to `default` when unset.
fn parse_setting<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T> {
    match non_blank(raw) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'", name, value)),
        None => Ok(default),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}
