use std::sync::Arc;

use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    utils::command::BotCommands,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use common::{EngineCommand, EngineState, RawSignal, TradingMode};
use engine::{TradeJournal, TradeRegistry};
use signal::parse_signal;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub command_tx: mpsc::Sender<EngineCommand>,
    pub engine_state: Arc<RwLock<EngineState>>,
    pub trading_mode: TradingMode,
    pub allowed_user_ids: Arc<Vec<i64>>,
    /// Chat whose posts are parsed as signals.
    pub signal_chat_id: i64,
    pub signal_tx: mpsc::Sender<RawSignal>,
    pub registry: Arc<TradeRegistry>,
    pub journal: TradeJournal,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "SignalBot commands:")]
pub enum Command {
    #[command(description = "Start accepting signals")]
    Start,
    #[command(description = "Stop accepting signals (pending legs are abandoned)")]
    Stop,
    #[command(description = "Show engine status and results summary")]
    Status,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(token: String, deps: BotDeps) {
    let bot = Bot::new(token);
    let deps = Arc::new(deps);

    info!(signal_chat_id = deps.signal_chat_id, "Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(handle_start))
        .branch(case![Command::Stop].endpoint(handle_stop))
        .branch(case![Command::Status].endpoint(handle_status));

    let operator = dptree::filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler);

    dptree::entry()
        .branch(
            Update::filter_channel_post()
                .filter(is_signal_chat)
                .endpoint(handle_signal_post),
        )
        .branch(
            Update::filter_message()
                .branch(dptree::filter(is_signal_chat).endpoint(handle_signal_post))
                .branch(operator),
        )
}

fn is_signal_chat(msg: Message, deps: Arc<BotDeps>) -> bool {
    msg.chat.id.0 == deps.signal_chat_id
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_signal_post(msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };
    match parse_signal(text) {
        Some(raw) => {
            info!(
                pair = ?raw.currency_pair,
                direction = ?raw.direction,
                entry = ?raw.entry_time,
                source = ?raw.source,
                "Signal received"
            );
            if deps.signal_tx.send(raw).await.is_err() {
                warn!("Signal channel closed, dropping signal");
            }
        }
        None => debug!(message_id = msg.id.0, "Channel post is not a signal"),
    }
    Ok(())
}

async fn handle_start(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = *deps.engine_state.read().await;
    if state == EngineState::Running {
        bot.send_message(msg.chat.id, "Engine is already running.").await?;
    } else {
        let _ = deps.command_tx.send(EngineCommand::Start).await;
        bot.send_message(msg.chat.id, "Engine started. Listening for signals.").await?;
    }
    Ok(())
}

async fn handle_stop(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = *deps.engine_state.read().await;
    if state == EngineState::Stopped {
        bot.send_message(msg.chat.id, "Engine is already stopped.").await?;
    } else {
        let _ = deps.command_tx.send(EngineCommand::Stop).await;
        bot.send_message(msg.chat.id, "Engine stopped.").await?;
    }
    Ok(())
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = *deps.engine_state.read().await;
    let mode = deps.trading_mode;
    let pending = deps.registry.len();
    let results = match deps.journal.summary().await {
        Ok(s) => format!(
            "Results: {} win / {} loss / {} no result",
            s.wins, s.losses, s.no_results
        ),
        Err(e) => {
            warn!(error = %e, "Journal summary failed");
            "Results: unavailable".to_string()
        }
    };
    let text = format!(
        "SignalBot Status\n\
         Engine: {state}\n\
         Mode: {mode}\n\
         Pending trades: {pending}\n\
         {results}"
    );
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Send a proactive alert to all configured chat IDs.
/// Call this from the trade event loop.
pub async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}
