//! Chatbot module - relays Telegram questions to Gemini and logs usage.

pub mod dispatcher;
pub mod gemini;
pub mod prompt;
pub mod stats;
pub mod telegram;


pub use dispatcher::{Command, DispatchSettings, Dispatcher, InboundEvent, Outcome};
pub use gemini::{Completion, GeminiClient};
pub use stats::{SqliteStats, StatsStore};
pub use telegram::{ChatTransport, TelegramClient};
