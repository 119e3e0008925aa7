use std::path::PathBuf;
use std::time::Duration;

use teloxide::types::{ChatId, UserId};

use crate::chatbot::prompt::{Formatting, Knowledge, Phrasebook, ReplyStyle};

/// Admin id used when `ADMIN_ID` is not set.
const DEFAULT_ADMIN_ID: u64 = 123456789;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/stats.db";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LOG_DIR: &str = "data/logs";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is absent or empty.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable is present but unusable.
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    /// The knowledge file could not be read.
    #[error("failed to read knowledge file '{}': {source}", .path.display())]
    ReadKnowledge { path: PathBuf, source: std::io::Error },
}

/// Process-wide settings, built once at startup and never mutated.
#[derive(Clone)]
pub struct Config {
    pub telegram_token: String,
    pub gemini_api_key: String,
    /// The only user allowed to run `/stats`.
    pub admin_id: UserId,
    pub database_url: String,
    pub gemini_model: String,
    pub gemini_timeout: Duration,
    pub reply_style: ReplyStyle,
    pub knowledge: Knowledge,
    /// Directory for the rolling log file.
    pub log_dir: PathBuf,
    /// Chat that receives WARN/ERROR log lines, if any.
    pub alert_chat_id: Option<ChatId>,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_token = get("TELEGRAM_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_TOKEN"))?;
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        match telegram_token.split_once(':') {
            Some((id, secret)) if id.parse::<u64>().is_ok() && !secret.is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid {
                    name: "TELEGRAM_TOKEN",
                    reason: "expected format 123456789:ABCdefGHI...".into(),
                });
            }
        }

        let gemini_api_key = get("GEMINI_API_KEY").ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;

        let admin_id = match get("ADMIN_ID") {
            Some(raw) => UserId(parse_number("ADMIN_ID", &raw)?),
            None => UserId(DEFAULT_ADMIN_ID),
        };

        let database_url = get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let gemini_model = get("GEMINI_MODEL")
            .map(|m| m.trim_start_matches("models/").to_string())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let timeout_secs = match get("GEMINI_TIMEOUT_SECS") {
            Some(raw) => parse_number("GEMINI_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "GEMINI_TIMEOUT_SECS",
                reason: "must be at least 1".into(),
            });
        }

        let formatting = match get("REPLY_FORMAT").as_deref() {
            None | Some("code") => Formatting::Code,
            Some("plain") => Formatting::Plain,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "REPLY_FORMAT",
                    reason: format!("'{other}' is not one of: code, plain"),
                });
            }
        };

        let phrasebook = match get("REPLY_LANGUAGE").as_deref() {
            None | Some("tk") => Phrasebook::turkmen(),
            Some("en") => Phrasebook::english(),
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "REPLY_LANGUAGE",
                    reason: format!("'{other}' is not one of: tk, en"),
                });
            }
        };

        let knowledge = match get("KNOWLEDGE_FILE") {
            Some(path) => {
                let path = PathBuf::from(path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::ReadKnowledge { path: path.clone(), source })?;
                Knowledge::new(text)
            }
            None => Knowledge::default(),
        };

        let log_dir = get("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));

        let alert_chat_id = get("ALERT_CHAT_ID")
            .map(|raw| {
                raw.parse::<i64>().map(ChatId).map_err(|e| ConfigError::Invalid {
                    name: "ALERT_CHAT_ID",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            telegram_token,
            gemini_api_key,
            admin_id,
            database_url,
            gemini_model,
            gemini_timeout: Duration::from_secs(timeout_secs),
            reply_style: ReplyStyle { formatting, phrasebook },
            knowledge,
            log_dir,
            alert_chat_id,
        })
    }
}

fn parse_number(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("'{raw}': {e}"),
    })
}
