pub mod alerts;
pub mod commands;

pub use alerts::alert_text;
pub use commands::{send_alert, start_bot, BotDeps};
