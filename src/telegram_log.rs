//! Tracing layer that forwards WARN and ERROR events to an operator chat.

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::chatbot::prompt::truncate_utf16;

/// Telegram rejects messages over 4096 UTF-16 code units.
const MAX_ALERT_UNITS: usize = 4000;

pub struct AlertLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl AlertLayer {
    /// Spawns the sender task; must be called inside a Tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                // Not logged through tracing, that would feed back into this layer
                if let Err(e) = bot.send_message(chat_id, text).await {
                    eprintln!("Failed to send alert to Telegram: {e}");
                }
            }
        });

        Self { tx }
    }
}

fn format_alert(level: Level, target: &str, message: &str) -> String {
    let prefix = if level == Level::ERROR { "❌" } else { "⚠️" };
    truncate_utf16(&format!("{prefix} [{target}] {message}"), MAX_ALERT_UNITS)
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::WARN {
            return;
        }
        // Transport internals would alert about their own alert traffic
        if !metadata.target().starts_with("igrosup") {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if self.tx.send(format_alert(level, metadata.target(), &visitor.message)).is_err() {
            eprintln!("Alert channel closed, message dropped");
        }
    }
}
