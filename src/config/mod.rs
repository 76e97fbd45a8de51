//! Configuration module for the skin backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Container selector every tenant stylesheet is scoped under
    pub scope_selector: String,
    /// Completion backend settings
    pub model: ModelConfig,
}

/// Settings for the completion model backend.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub num_predict: u32,
    pub timeout_secs: u64,
    /// Number of prior chat turns forwarded to the model
    pub history_limit: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            temperature: 0.7,
            num_predict: 8000,
            timeout_secs: 120,
            history_limit: 10,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let db_path = env::var("SKIN_DB_PATH")
            .unwrap_or_else(|_| "./data/skins.sqlite".to_string())
            .into();

        let bind_addr = env::var("SKIN_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid SKIN_BIND_ADDR format");

        let log_level = env::var("SKIN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = LogFormat::parse(&env::var("SKIN_LOG_FORMAT").unwrap_or_default());

        let scope_selector = env::var("SKIN_SCOPE_SELECTOR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| ".custom-skin-unified".to_string());

        let defaults = ModelConfig::default();
        let model = ModelConfig {
            base_url: env::var("OLLAMA_BASE_URL").unwrap_or(defaults.base_url),
            model: env::var("OLLAMA_MODEL").unwrap_or(defaults.model),
            temperature: env_parse("SKIN_GEN_TEMPERATURE", defaults.temperature),
            num_predict: env_parse("SKIN_GEN_NUM_PREDICT", defaults.num_predict),
            timeout_secs: env_parse("SKIN_GEN_TIMEOUT_SECS", defaults.timeout_secs),
            history_limit: env_parse("SKIN_CHAT_HISTORY_LIMIT", defaults.history_limit),
        };

        Self {
            db_path,
            bind_addr,
            log_level,
            log_format,
            scope_selector,
            model,
        }
    }
}

/// Parse an optional numeric variable, keeping the default on absence or garbage.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
