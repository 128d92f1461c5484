pub mod config;
pub mod parser;
pub mod timezone;
pub mod validator;

pub use config::SchedulerConfig;
pub use parser::parse_signal;
pub use timezone::{SourceZone, TimezoneNormalizer};
pub use validator::SignalValidator;
