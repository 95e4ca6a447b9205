use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::chatbot::engine::{ChatbotConfig, DEFAULT_CONTEXT_WINDOW, DEFAULT_GREETING};
use crate::chatbot::profile::is_valid_profile_name;
use crate::openai::DEFAULT_BASE_URL;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    /// Falls back to the TELEGRAM_TOKEN environment variable.
    #[serde(default)]
    telegram_bot_token: String,
    /// Falls back to the OPENAI_API_KEY environment variable.
    #[serde(default)]
    openai_api_key: String,
    openai_base_url: Option<String>,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_transcription_model")]
    transcription_model: String,
    #[serde(default = "default_persona")]
    persona: String,
    profiles_dir: Option<String>,
    #[serde(default = "default_greeting")]
    greeting: String,
    #[serde(default = "default_context_window")]
    context_window: usize,
    /// Path to a ggml Whisper model. When set, voice is transcribed locally.
    whisper_model_path: Option<String>,
    /// Directory for logs. Defaults to current directory.
    data_dir: Option<String>,
    /// Where voice attachments are staged. Defaults to the system temp dir.
    temp_dir: Option<String>,
}

fn default_model() -> String {
    "gpt-4-turbo".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_persona() -> String {
    "anya5".to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

fn default_context_window() -> usize {
    DEFAULT_CONTEXT_WINDOW
}

pub struct Config {
    pub telegram_bot_token: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    /// Chat-completion model.
    pub model: String,
    /// Model for the hosted transcription endpoint.
    pub transcription_model: String,
    /// Active persona profile name.
    pub persona: String,
    pub profiles_dir: PathBuf,
    pub greeting: String,
    /// Trailing messages sent to the model each turn.
    pub context_window: usize,
    pub whisper_model_path: Option<PathBuf>,
    /// Directory for logs.
    pub data_dir: PathBuf,
    pub temp_dir: Option<PathBuf>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], with `env` standing in for the process environment.
    pub fn load_with_env<P, E>(path: P, env: E) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        E: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let telegram_bot_token = non_empty_or_env(file.telegram_bot_token, "TELEGRAM_TOKEN", &env);
        let openai_api_key = non_empty_or_env(file.openai_api_key, "OPENAI_API_KEY", &env);

        if telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token is required (or set TELEGRAM_TOKEN)".into(),
            ));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if openai_api_key.is_empty() {
            return Err(ConfigError::Validation(
                "openai_api_key is required (or set OPENAI_API_KEY)".into(),
            ));
        }
        if !is_valid_profile_name(&file.persona) {
            return Err(ConfigError::Validation(format!(
                "persona '{}' must only contain letters, digits, '-' and '_'",
                file.persona
            )));
        }
        if file.greeting.trim().is_empty() {
            return Err(ConfigError::Validation("greeting must not be empty".into()));
        }
        // The window head is always overwritten with the persona, so a window
        // of 1 would never show the model the user's message.
        if file.context_window < 2 {
            return Err(ConfigError::Validation("context_window must be at least 2".into()));
        }

        Ok(Self {
            telegram_bot_token,
            openai_api_key,
            openai_base_url: file
                .openai_base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: file.model,
            transcription_model: file.transcription_model,
            persona: file.persona,
            profiles_dir: file
                .profiles_dir
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("profiles")),
            greeting: file.greeting,
            context_window: file.context_window,
            whisper_model_path: file.whisper_model_path.map(PathBuf::from),
            data_dir: file.data_dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            temp_dir: file.temp_dir.map(PathBuf::from),
        })
    }

    pub fn chatbot_config(&self) -> ChatbotConfig {
        ChatbotConfig {
            persona: self.persona.clone(),
            profiles_dir: self.profiles_dir.clone(),
            greeting: self.greeting.clone(),
            context_window: self.context_window,
            temp_dir: self.temp_dir.clone(),
        }
    }
}

fn non_empty_or_env<E: Fn(&str) -> Option<String>>(value: String, key: &str, env: &E) -> String {
    if value.is_empty() {
        env(key).unwrap_or_default()
    } else {
        value
    }
}
