//! Telegram question-answering bot backed by Gemini, with a SQLite usage log.

pub mod chatbot;
pub mod config;
pub mod telegram_log;
