use crate::{SweepMode, TradingMode};

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_token: String,
    /// Channel the signals are posted to.
    pub telegram_signal_chat_id: i64,
    pub telegram_allowed_user_ids: Vec<i64>,

    // Trading
    pub trading_mode: TradingMode,
    pub driver_url: String,
    /// Per-request timeout of the automation sidecar client.
    pub driver_timeout_ms: u64,
    pub base_amount: f64,
    pub max_martingale: u32,
    pub sweep_mode: SweepMode,

    // Result detection
    pub template_dir: String,
    pub tesseract_bin: String,
    pub ocr_timeout_ms: u64,

    // Database
    pub database_url: String,

    // Scheduler tunables file path
    pub scheduler_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match required_env("TRADING_MODE").to_lowercase().as_str() {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        let sweep_mode = match optional_env("SWEEP_MODE")
            .unwrap_or_else(|| "all".to_string())
            .to_lowercase()
            .as_str()
        {
            "all" => SweepMode::All,
            "strict" => SweepMode::Strict,
            other => panic!("ERROR: SWEEP_MODE must be 'all' or 'strict', got: '{other}'"),
        };

        let telegram_signal_chat_id = required_env("TELEGRAM_SIGNAL_CHAT_ID")
            .trim()
            .parse::<i64>()
            .unwrap_or_else(|e| panic!("TELEGRAM_SIGNAL_CHAT_ID is not a numeric chat id: {e}"));

        Config {
            telegram_token: required_env("TELEGRAM_TOKEN"),
            telegram_signal_chat_id,
            telegram_allowed_user_ids: parse_id_list(&required_env("TELEGRAM_ALLOWED_USER_IDS")),
            trading_mode,
            driver_url: optional_env("DRIVER_URL")
                .unwrap_or_else(|| "http://127.0.0.1:4444".to_string()),
            driver_timeout_ms: optional_env("DRIVER_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            base_amount: optional_env("BASE_AMOUNT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            max_martingale: optional_env("MAX_MARTINGALE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            sweep_mode,
            template_dir: optional_env("TEMPLATE_DIR").unwrap_or_else(|| "templates".to_string()),
            tesseract_bin: optional_env("TESSERACT_BIN")
                .unwrap_or_else(|| "tesseract".to_string()),
            ocr_timeout_ms: optional_env("OCR_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            database_url: required_env("DATABASE_URL"),
            scheduler_config_path: optional_env("SCHEDULER_CONFIG_PATH")
                .unwrap_or_else(|| "config/scheduler.toml".to_string()),
        }
    }
}

fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim().parse::<i64>().unwrap_or_else(|_| {
                panic!("TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{}'", s.trim())
            })
        })
        .collect()
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
