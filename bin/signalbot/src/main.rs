use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{Config, FrameSource, RawSignal, ScheduledTrade, TradeEvent, TradingMode, UiDriver};
use engine::{
    DispatchConfig, Engine, ExecutorConfig, HttpDriver, MartingaleBook, ResultDispatcher,
    SignalIntake, TradeExecutor, TradeJournal, TradeRegistry,
};
use paper::PaperDriver;
use signal::{SchedulerConfig, SignalValidator};
use telegram_ctrl::{alert_text, send_alert, start_bot, BotDeps};
use vision::{ClassifierConfig, OutcomeClassifier, TesseractCli};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let sched = SchedulerConfig::load(&cfg.scheduler_config_path);
    info!(
        mode = %cfg.trading_mode,
        sweep = ?cfg.sweep_mode,
        max_lead_secs = sched.max_lead_secs,
        "SignalBot starting"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    let journal = TradeJournal::new(db, cfg.trading_mode);
    info!("Database ready");

    // ── Shared state ──────────────────────────────────────────────────────────
    let registry = Arc::new(TradeRegistry::new());
    let book = Arc::new(MartingaleBook::new());

    // ── Channels ──────────────────────────────────────────────────────────────
    let (signal_tx, signal_rx) = mpsc::channel::<RawSignal>(128);
    let (trade_tx, trade_rx) = mpsc::channel::<ScheduledTrade>(128);
    let (event_tx, mut event_rx) = mpsc::channel::<TradeEvent>(256);

    // ── UI driver (injected based on TRADING_MODE) ────────────────────────────
    let (driver, frames): (Arc<dyn UiDriver>, Arc<dyn FrameSource>) = match cfg.trading_mode {
        TradingMode::Live => {
            info!(url = %cfg.driver_url, "Live trading mode — using HttpDriver");
            let http = Arc::new(
                HttpDriver::new(
                    &cfg.driver_url,
                    Duration::from_millis(cfg.driver_timeout_ms),
                )
                .unwrap_or_else(|e| panic!("Failed to build HTTP driver: {e}")),
            );
            (http.clone(), http)
        }
        TradingMode::Paper => {
            info!("Paper trading mode — using PaperDriver");
            let paper = Arc::new(PaperDriver::new());
            (paper.clone(), paper)
        }
    };

    // ── Outcome detection ─────────────────────────────────────────────────────
    let classifier = OutcomeClassifier::new(
        &cfg.template_dir,
        Box::new(
            TesseractCli::new(&cfg.tesseract_bin)
                .with_timeout(Duration::from_millis(cfg.ocr_timeout_ms)),
        ),
        ClassifierConfig::default(),
    );
    let dispatcher = ResultDispatcher::new(
        registry.clone(),
        frames,
        Arc::new(classifier),
        book.clone(),
        event_tx.clone(),
        DispatchConfig {
            poll_interval: Duration::from_millis(sched.poll_interval_ms),
            watch_deadline: Duration::from_secs(sched.watch_deadline_secs),
            sweep_mode: cfg.sweep_mode,
        },
    );

    // ── Engine ────────────────────────────────────────────────────────────────
    let (engine, engine_handle) = Engine::new(dispatcher.clone());

    // ── Signal intake ─────────────────────────────────────────────────────────
    let intake = SignalIntake::new(
        SignalValidator::from_config(&sched),
        engine_handle.state_cell(),
        trade_tx,
        event_tx.clone(),
    );

    // ── Trade executor ────────────────────────────────────────────────────────
    let executor = TradeExecutor::new(
        trade_rx,
        registry.clone(),
        driver,
        dispatcher,
        book,
        event_tx,
        engine_handle.state_cell(),
        ExecutorConfig {
            base_amount: cfg.base_amount,
            max_martingale: cfg.max_martingale,
            prepare_lead: chrono_secs(sched.prepare_lead_secs),
            gate_margin: chrono_secs(sched.gate_margin_secs),
            gate_poll_interval: Duration::from_millis(sched.poll_interval_ms),
            entry_tolerance: chrono::Duration::milliseconds(sched.entry_tolerance_ms as i64),
        },
    );

    // ── Telegram C2 ───────────────────────────────────────────────────────────
    let bot_deps = BotDeps {
        command_tx: engine_handle.command_sender(),
        engine_state: engine_handle.state_cell(),
        trading_mode: cfg.trading_mode,
        allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
        signal_chat_id: cfg.telegram_signal_chat_id,
        signal_tx,
        registry,
        journal: journal.clone(),
    };

    // ── Trade event forwarder (journal + Telegram alerts) ─────────────────────
    let telegram_token = cfg.telegram_token.clone();
    let alert_user_ids: Vec<i64> = cfg.telegram_allowed_user_ids.clone();
    tokio::spawn(async move {
        let bot = teloxide::Bot::new(telegram_token);
        let chat_ids: Vec<teloxide::types::ChatId> = alert_user_ids
            .iter()
            .map(|&id| teloxide::types::ChatId(id))
            .collect();

        while let Some(event) = event_rx.recv().await {
            if let TradeEvent::Resolved { trade } = &event {
                if let Err(e) = journal.record(trade).await {
                    error!(trade_id = %trade.trade_id, error = %e, "Failed to journal trade");
                }
            }
            if let Some(msg) = alert_text(&event) {
                send_alert(&bot, &chat_ids, &msg).await;
            }
        }
    });

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    tokio::spawn(engine.run());
    tokio::spawn(intake.run(signal_rx));
    tokio::spawn(executor.run());
    tokio::spawn(start_bot(cfg.telegram_token.clone(), bot_deps));

    // Keep main alive
    info!("All subsystems started. Send /start to begin accepting signals.");
    tokio::signal::ctrl_c().await.unwrap();
    info!("Shutdown signal received. Exiting.");
}

fn chrono_secs(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs as i64)
}
