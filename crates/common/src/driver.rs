use async_trait::async_trait;
use image::RgbImage;

use crate::{Direction, Outcome, Result, TradeResult};

/// Abstraction over the browser session that drives the trading platform.
///
/// `HttpDriver` implements this against the automation sidecar.
/// `PaperDriver` implements this for simulation.
///
/// Each call is a single attempt. Retrying belongs to the caller
/// (the readiness gate polls, the executor never retries placement).
#[async_trait]
pub trait UiDriver: Send + Sync {
    /// Make `name` the active instrument. `Ok(false)` means the UI did not
    /// end up showing it.
    async fn select_instrument(&self, name: &str) -> Result<bool>;

    /// Make `timeframe` (e.g. "M1") the active expiry.
    async fn select_timeframe(&self, timeframe: &str) -> Result<bool>;

    /// Fire a trade on the currently selected instrument.
    async fn place_trade(&self, direction: Direction, amount: f64) -> Result<bool>;
}

/// Source of rendered platform frames (H×W×3, 8-bit).
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture_frame(&self) -> Result<RgbImage>;
}

/// Pure per-frame outcome detection. Implementations must not retry and
/// must not fail: a frame that cannot be classified yields `None`.
pub trait OutcomeDetector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Option<Outcome>;
}

/// Downstream notification hooks. Both must be idempotent on the receiving side.
pub trait ResultSink: Send + Sync {
    /// Called by the background sweep, keyed by pair.
    fn on_trade_result(&self, currency_pair: &str, result: TradeResult);

    /// Called by the per-trade watcher, keyed by ledger id.
    fn trade_result_received(&self, trade_id: &str, result: TradeResult);
}
