use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;
use tutor_core::persona::{Persona, VoiceMap};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Backends for the chat model that drives persona turns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub realtime_model: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub content_path: PathBuf,
    pub voices: VoiceMap,
}

fn voice_var(persona: Persona) -> String {
    format!("VOICE_{}", persona.as_str().to_uppercase())
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{raw}': {e}")))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address: SocketAddr =
            parse_var("BIND_ADDRESS", &var_or("BIND_ADDRESS", "0.0.0.0:3000"))?;

        let provider = match var_or("LLM_PROVIDER", "openai").to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "gemini" => Provider::Gemini,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{}' is not one of 'openai', 'gemini'", other),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        let required_key = match provider {
            Provider::OpenAI => ("OPENAI_API_KEY", &openai_api_key),
            Provider::Gemini => ("GEMINI_API_KEY", &gemini_api_key),
        };
        if let (name, None) = required_key {
            return Err(ConfigError::MissingVar(format!(
                "{name} must be set for '{}' provider",
                provider.as_str()
            )));
        }

        let chat_model = var_or("CHAT_MODEL", "gpt-4o");
        let realtime_model = var_or("REALTIME_MODEL", "gpt-4o-realtime-preview-2024-10-01");
        let log_level: Level = parse_var("RUST_LOG", &var_or("RUST_LOG", "INFO"))?;

        let prompts_path = PathBuf::from(var_or("PROMPTS_PATH", "./prompts"));
        let content_path = PathBuf::from(var_or(
            "CONTENT_PATH",
            "../shared-data/day4_tutor_content.json",
        ));

        // Empty overrides keep the persona's default voice.
        let voices = Persona::ALL
            .into_iter()
            .fold(VoiceMap::default(), |voices, persona| {
                match std::env::var(voice_var(persona)) {
                    Ok(voice) if !voice.trim().is_empty() => {
                        voices.with_voice(persona, voice.trim())
                    }
                    _ => voices,
                }
            });

        Ok(Self {
            bind_address,
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            realtime_model,
            log_level,
            prompts_path,
            content_path,
            voices,
        })
    }
}
