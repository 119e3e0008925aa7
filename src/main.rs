use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use igrosup::chatbot::dispatcher::ChatKind;
use igrosup::chatbot::{
    self, ChatTransport, Command, DispatchSettings, GeminiClient, InboundEvent, SqliteStats, StatsStore,
    TelegramClient,
};
use igrosup::config::Config;
use igrosup::telegram_log::AlertLayer;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_token);
    let _guard = init_logging(&config, &bot);

    info!("🚀 Starting igrosup...");
    info!("Admin ID: {}", config.admin_id.0);
    info!("Model: {}, reply format: {:?}", config.gemini_model, config.reply_style.formatting);

    let store = match SqliteStats::from_url(&config.database_url) {
        Ok(store) => store,
        Err(e) => {
            error!("Bad DATABASE_URL: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = store.ensure_schema().await {
        error!("Failed to prepare usage table: {e}");
        std::process::exit(1);
    }
    info!("Usage log at {:?}", store.path());

    let gemini = match GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
        config.gemini_timeout,
    ) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create Gemini client: {e}");
            std::process::exit(1);
        }
    };

    let telegram = Arc::new(TelegramClient::new(bot.clone()));
    // Warm the username cache; group mentions resolve it lazily otherwise
    if let Err(e) = telegram.bot_username().await {
        warn!("Bot username not resolved at startup: {e}");
    }
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register command menu: {e}");
    }

    let dispatcher = Arc::new(chatbot::Dispatcher::new(
        DispatchSettings::from(&config),
        Arc::new(store),
        Arc::new(gemini),
        telegram,
    ));

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Stopped");
}

fn init_logging(config: &Config, bot: &Bot) -> WorkerGuard {
    std::fs::create_dir_all(&config.log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "igrosup.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(chat_id) = config.alert_chat_id {
        registry.with(AlertLayer::new(bot.clone(), chat_id)).init();
    } else {
        registry.init();
    }

    guard
}

async fn handle_message(msg: Message, dispatcher: Arc<chatbot::Dispatcher>) -> ResponseResult<()> {
    let Some(event) = telegram_to_event(&msg) else {
        return Ok(());
    };
    dispatcher.dispatch(&event).await;
    Ok(())
}

/// `None` for messages without a sender (channel posts, service messages)
/// or whose sender id does not fit the usage table.
fn telegram_to_event(msg: &Message) -> Option<InboundEvent> {
    let user = msg.from.as_ref()?;
    let user_id = i64::try_from(user.id.0).ok()?;
    let chat_kind = if msg.chat.is_private() {
        ChatKind::Private
    } else {
        ChatKind::Group
    };

    Some(InboundEvent {
        message_id: msg.id.0,
        user_id,
        chat_id: msg.chat.id.0,
        chat_kind,
        text: msg.text().map(str::to_string),
    })
}
