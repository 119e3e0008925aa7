//! Routes inbound messages to the start, stats or default handler.
//!
//! Every event ends in an [`Outcome`]; nothing is returned as an error and
//! nothing reaches the user except the fixed phrasebook wording or a
//! completion.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use teloxide::types::UserId;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

use crate::chatbot::gemini::Completion;
use crate::chatbot::prompt::{Formatting, Knowledge, Phrasebook, ReplyStyle, build_prompt, render_reply};
use crate::chatbot::stats::{StatsStore, StorageError, UsageRecorder, UsageSummary};
use crate::chatbot::telegram::ChatTransport;
use crate::config::Config;

/// `/name` or `/name@bot`, followed by whitespace or end of text.
static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([A-Za-z0-9_]+)(?:@([A-Za-z0-9_]+))?(?:\s|$)").expect("valid command regex")
});

/// Commands the bot answers to.
#[derive(BotCommands, Clone, Copy, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "start talking to the bot")]
    Start,
    #[command(description = "usage statistics (admin only)")]
    Stats,
}

impl Command {
    /// Split a leading command into the command and the bot it addresses, if any.
    pub fn parse_text(text: &str) -> Option<(Command, Option<&str>)> {
        let caps = COMMAND_RE.captures(text)?;
        let command = match caps.get(1)?.as_str() {
            "start" => Command::Start,
            "stats" => Command::Stats,
            _ => return None,
        };
        Some((command, caps.get(2).map(|m| m.as_str())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-to-one chat with the bot.
    Private,
    /// Group, supergroup or channel.
    Group,
}

/// One inbound message, stripped down to what the handlers use.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub message_id: i32,
    pub user_id: i64,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    StorageUnavailable,
    WriteFailed,
    QueryFailed,
    Completion,
    Transport,
}

impl From<&StorageError> for FailureKind {
    fn from(e: &StorageError) -> Self {
        match e {
            StorageError::Unavailable(_) => FailureKind::StorageUnavailable,
            StorageError::WriteFailed(_) => FailureKind::WriteFailed,
            StorageError::QueryFailed(_) => FailureKind::QueryFailed,
        }
    }
}

/// How an event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler ran to completion and replied.
    Handled,
    /// `/stats` from someone other than the admin; refusal sent.
    Denied,
    /// Ignored on purpose: no reply, no usage row.
    Dropped,
    /// Something failed; the apology was sent where possible.
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Start,
    Stats,
    Default,
}

/// Immutable inputs shared by every handler.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub admin_id: UserId,
    pub style: ReplyStyle,
    pub knowledge: Knowledge,
}

impl DispatchSettings {
    /// Ids that do not fit a Telegram `UserId` never match.
    pub fn is_admin(&self, user_id: i64) -> bool {
        u64::try_from(user_id).is_ok_and(|id| UserId(id) == self.admin_id)
    }
}

impl From<&Config> for DispatchSettings {
    fn from(config: &Config) -> Self {
        Self {
            admin_id: config.admin_id,
            style: config.reply_style.clone(),
            knowledge: config.knowledge.clone(),
        }
    }
}

pub struct Dispatcher {
    settings: DispatchSettings,
    store: Arc<dyn StatsStore>,
    recorder: UsageRecorder,
    completion: Arc<dyn Completion>,
    transport: Arc<dyn ChatTransport>,
}

impl Dispatcher {
    pub fn new(
        settings: DispatchSettings,
        store: Arc<dyn StatsStore>,
        completion: Arc<dyn Completion>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let recorder = UsageRecorder::new(store.clone());
        Self {
            settings,
            store,
            recorder,
            completion,
            transport,
        }
    }

    fn phrasebook(&self) -> &Phrasebook {
        &self.settings.style.phrasebook
    }

    /// Handle one event end to end.
    pub async fn dispatch(&self, event: &InboundEvent) -> Outcome {
        let outcome = match self.classify(event).await {
            Ok(route) => {
                debug!("Event msg={} routed to {:?}", event.message_id, route);
                match route {
                    Route::Start => self.handle_start(event).await,
                    Route::Stats => self.handle_stats(event).await,
                    Route::Default => self.handle_default(event).await,
                }
            }
            Err(outcome) => outcome,
        };
        debug!(
            "Event msg={} user={} chat={} → {:?}",
            event.message_id, event.user_id, event.chat_id, outcome
        );
        outcome
    }

    /// `Err` carries the final outcome when the event cannot be routed.
    async fn classify(&self, event: &InboundEvent) -> Result<Route, Outcome> {
        let Some((command, addressed_to)) = event.text.as_deref().and_then(Command::parse_text) else {
            return Ok(Route::Default);
        };

        // `/start@other_bot` is not ours
        if let Some(target) = addressed_to {
            let me = match self.transport.bot_username().await {
                Ok(me) => me,
                Err(e) => {
                    warn!("Cannot check command target without bot username: {e}");
                    return Err(Outcome::Failed(FailureKind::Transport));
                }
            };
            if !me.eq_ignore_ascii_case(target) {
                return Ok(Route::Default);
            }
        }

        Ok(match command {
            Command::Start => Route::Start,
            Command::Stats => Route::Stats,
        })
    }

    async fn handle_start(&self, event: &InboundEvent) -> Outcome {
        info!("👋 /start from {} in chat {}", event.user_id, event.chat_id);

        if let Err(e) = self.recorder.record(event.user_id, event.chat_id).await {
            warn!("Failed to record usage for /start: {e}");
            return self.apologize(event, None, FailureKind::from(&e)).await;
        }

        let greeting = self.phrasebook().greeting;
        self.send(event.chat_id, greeting, None, Formatting::Plain).await
    }

    async fn handle_stats(&self, event: &InboundEvent) -> Outcome {
        if !self.settings.is_admin(event.user_id) {
            info!("🚫 /stats denied for {}", event.user_id);
            let refusal = self.phrasebook().admin_only;
            if let Err(e) = self.transport.send(event.chat_id, refusal, None, Formatting::Plain).await {
                warn!("Failed to send refusal: {e}");
            }
            return Outcome::Denied;
        }

        let summary = match self.store.aggregate_usage().await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Failed to aggregate usage: {e}");
                return self.apologize(event, None, FailureKind::from(&e)).await;
            }
        };

        info!("📊 Stats: {} users over {} day(s)", summary.total_users, summary.daily.len());
        let text = format_summary(&summary, self.phrasebook());
        self.send(event.chat_id, &text, None, Formatting::Plain).await
    }

    async fn handle_default(&self, event: &InboundEvent) -> Outcome {
        let Some(text) = event.text.as_deref() else {
            return Outcome::Dropped;
        };

        if event.chat_kind == ChatKind::Group {
            let username = match self.transport.bot_username().await {
                Ok(username) => username,
                Err(e) => {
                    warn!("Cannot check mention without bot username: {e}");
                    return Outcome::Failed(FailureKind::Transport);
                }
            };
            if !mentions(text, &username) {
                return Outcome::Dropped;
            }
        }

        if let Err(e) = self.recorder.record(event.user_id, event.chat_id).await {
            warn!("Failed to record usage: {e}");
            return self.apologize(event, Some(event.message_id), FailureKind::from(&e)).await;
        }

        let text_preview: String = text.chars().take(100).collect();
        info!("📨 Question from {} in chat {}: \"{text_preview}\"", event.user_id, event.chat_id);

        let prompt = build_prompt(&self.settings.knowledge, text, self.phrasebook());
        let answer = match self.completion.generate(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Completion failed: {e}");
                return self.apologize(event, Some(event.message_id), FailureKind::Completion).await;
            }
        };

        let formatting = self.settings.style.formatting;
        let rendered = render_reply(&answer, formatting);
        match self
            .transport
            .send(event.chat_id, &rendered, Some(event.message_id), formatting)
            .await
        {
            Ok(_) => Outcome::Handled,
            Err(e) => {
                warn!("Failed to deliver answer: {e}");
                self.apologize(event, Some(event.message_id), FailureKind::Transport).await
            }
        }
    }

    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i32>, formatting: Formatting) -> Outcome {
        match self.transport.send(chat_id, text, reply_to, formatting).await {
            Ok(_) => Outcome::Handled,
            Err(_) => Outcome::Failed(FailureKind::Transport),
        }
    }

    /// Send the fixed apology; the outcome reports `kind` either way.
    async fn apologize(&self, event: &InboundEvent, reply_to: Option<i32>, kind: FailureKind) -> Outcome {
        let apology = self.phrasebook().apology;
        if let Err(e) = self.transport.send(event.chat_id, apology, reply_to, Formatting::Plain).await {
            warn!("Failed to send apology: {e}");
        }
        Outcome::Failed(kind)
    }
}

/// Whether `text` mentions `@username`. Usernames are case-insensitive.
pub fn mentions(text: &str, username: &str) -> bool {
    let needle = format!("@{}", username.to_lowercase());
    text.to_lowercase().contains(&needle)
}

/// Render the admin summary: total users, then one line per day.
pub fn format_summary(summary: &UsageSummary, phrasebook: &Phrasebook) -> String {
    let mut msg = format!(
        "{}\n\n{}: {}\n{}\n",
        phrasebook.stats_title, phrasebook.stats_total_users, summary.total_users, phrasebook.stats_daily
    );
    for row in &summary.daily {
        msg.push_str(&format!("  {}: {}\n", row.day, row.count));
    }
    msg
}
