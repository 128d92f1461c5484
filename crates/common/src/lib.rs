pub mod config;
pub mod driver;
pub mod error;
pub mod types;

pub use config::Config;
pub use driver::{FrameSource, OutcomeDetector, ResultSink, UiDriver};
pub use error::{Error, Result};
pub use types::*;
