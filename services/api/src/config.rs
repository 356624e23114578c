use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// The generation backends the service can talk to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
    Groq,
    /// Canned replies, no network. For local runs and demos.
    Mock,
}

impl Provider {
    /// Base URL of the provider's OpenAI-compatible endpoint.
    pub fn api_base(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("https://api.openai.com/v1/"),
            Provider::Gemini => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            Provider::Groq => Some("https://api.groq.com/openai/v1"),
            Provider::Mock => None,
        }
    }
}

/// How the phase router decides whether a message is a clinical question,
/// a diagnosis statement or a request to end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassifierKind {
    Keyword,
    Llm,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub chat_model: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub retrieval_url: Option<String>,
    pub retrieval_timeout: Duration,
    pub grader_timeout: Duration,
    pub classifier_timeout: Duration,
    pub phase_classifier: ClassifierKind,
    pub risk_score_ceiling: u8,
}

fn millis_var(name: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), format!("'{raw}' is not a number of milliseconds"))),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let provider_str = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "gemini" => Provider::Gemini,
            "groq" => Provider::Groq,
            "mock" => Provider::Mock,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{other}' is not one of openai, gemini, groq, mock"),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        let groq_api_key = std::env::var("GROQ_API_KEY").ok();

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let retrieval_url = std::env::var("RETRIEVAL_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let retrieval_timeout = millis_var("RETRIEVAL_TIMEOUT_MS", 2000)?;
        let grader_timeout = millis_var("GRADER_TIMEOUT_MS", 8000)?;
        let classifier_timeout = millis_var("CLASSIFIER_TIMEOUT_MS", 3000)?;

        let classifier_str =
            std::env::var("PHASE_CLASSIFIER").unwrap_or_else(|_| "keyword".to_string());
        let phase_classifier = match classifier_str.to_lowercase().as_str() {
            "keyword" => ClassifierKind::Keyword,
            "llm" => ClassifierKind::Llm,
            other => {
                return Err(ConfigError::InvalidValue(
                    "PHASE_CLASSIFIER".to_string(),
                    format!("'{other}' is not one of keyword, llm"),
                ));
            }
        };

        let risk_score_ceiling = match std::env::var("RISK_SCORE_CEILING") {
            Ok(raw) => raw
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|v| *v <= 10)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "RISK_SCORE_CEILING".to_string(),
                        format!("'{raw}' is not a score between 0 and 10"),
                    )
                })?,
            Err(_) => 3,
        };

        let required_key = match provider {
            Provider::OpenAI => Some(("OPENAI_API_KEY", &openai_api_key)),
            Provider::Gemini => Some(("GEMINI_API_KEY", &gemini_api_key)),
            Provider::Groq => Some(("GROQ_API_KEY", &groq_api_key)),
            Provider::Mock => None,
        };
        if let Some((var, None)) = required_key {
            return Err(ConfigError::MissingVar(format!(
                "{var} must be set for '{}' provider",
                provider_str.to_lowercase()
            )));
        }

        Ok(Self {
            bind_address,
            database_url,
            provider,
            openai_api_key,
            gemini_api_key,
            groq_api_key,
            chat_model,
            log_level,
            prompts_path,
            retrieval_url,
            retrieval_timeout,
            grader_timeout,
            classifier_timeout,
            phase_classifier,
            risk_score_ceiling,
        })
    }

    /// The API key for the configured provider, if it needs one.
    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
            Provider::Groq => self.groq_api_key.as_deref(),
            Provider::Mock => None,
        }
    }
}
