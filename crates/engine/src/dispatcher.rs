use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{
    FrameSource, Outcome, OutcomeDetector, PendingTrade, ResultSink, SweepMode, TradeEvent,
    TradeResult,
};

use crate::emit;
use crate::registry::TradeRegistry;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub poll_interval: Duration,
    /// How long a per-trade watcher waits before settling on NO_RESULT.
    pub watch_deadline: Duration,
    pub sweep_mode: SweepMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            watch_deadline: Duration::from_secs(60),
            sweep_mode: SweepMode::All,
        }
    }
}

/// Turns detected outcomes into registry resolutions.
///
/// Two loops share it: a long-lived sweep that maps any visible result onto
/// the outstanding pairs, and one short-lived watcher per placed trade that
/// settles on NO_RESULT when its deadline passes. Both go through the
/// registry's first-resolution-wins rule, so a trade is reported once.
#[derive(Clone)]
pub struct ResultDispatcher {
    registry: Arc<TradeRegistry>,
    frames: Arc<dyn FrameSource>,
    detector: Arc<dyn OutcomeDetector>,
    sink: Arc<dyn ResultSink>,
    event_tx: mpsc::Sender<TradeEvent>,
    config: DispatchConfig,
}

impl ResultDispatcher {
    pub fn new(
        registry: Arc<TradeRegistry>,
        frames: Arc<dyn FrameSource>,
        detector: Arc<dyn OutcomeDetector>,
        sink: Arc<dyn ResultSink>,
        event_tx: mpsc::Sender<TradeEvent>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            frames,
            detector,
            sink,
            event_tx,
            config,
        }
    }

    /// Captures one frame and classifies it off the async runtime.
    /// Every failure is a miss.
    pub async fn detect_once(&self) -> Option<Outcome> {
        let frame = match self.frames.capture_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Frame capture failed");
                return None;
            }
        };
        let detector = self.detector.clone();
        match tokio::task::spawn_blocking(move || detector.detect(&frame)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Outcome detection task failed");
                None
            }
        }
    }

    /// Background sweep. Call from `tokio::spawn`; runs until aborted.
    pub async fn run_sweep(self) {
        info!(mode = ?self.config.sweep_mode, "Result sweep running");
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            if self.registry.outstanding_pairs().is_empty() {
                continue;
            }
            if let Some(outcome) = self.detect_once().await {
                self.sweep(outcome.into());
            }
        }
    }

    /// Resolves the latest placed trade of every outstanding pair to `result`.
    /// In strict mode nothing is resolved unless exactly one pair is outstanding.
    pub fn sweep(&self, result: TradeResult) -> Vec<PendingTrade> {
        let pairs = self.registry.outstanding_pairs();
        if self.config.sweep_mode == SweepMode::Strict && pairs.len() != 1 {
            debug!(outstanding = pairs.len(), "Strict sweep skipped: result is ambiguous");
            return Vec::new();
        }

        let mut resolved = Vec::new();
        for pair in pairs {
            let Some(trade_id) = self.registry.latest_placed_for(&pair) else {
                continue;
            };
            if let Some(trade) = self.registry.resolve(&trade_id, result) {
                self.sink.on_trade_result(&pair, result);
                self.finish(&trade);
                resolved.push(trade);
            }
        }
        resolved
    }

    pub fn spawn_watcher(&self, trade_id: String) -> JoinHandle<()> {
        tokio::spawn(self.clone().watch(trade_id))
    }

    async fn watch(self, trade_id: String) {
        let deadline = Instant::now() + self.config.watch_deadline;
        debug!(trade_id = %trade_id, "Watcher started");
        loop {
            if self.registry.is_settled(&trade_id) {
                debug!(trade_id = %trade_id, "Trade already settled, watcher exiting");
                return;
            }
            if Instant::now() >= deadline {
                info!(trade_id = %trade_id, "No result before deadline");
                self.resolve_trade(&trade_id, TradeResult::NoResult);
                return;
            }
            if let Some(outcome) = self.detect_once().await {
                self.resolve_trade(&trade_id, outcome.into());
                return;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Resolves one trade by id. `false` if it was already resolved elsewhere.
    pub fn resolve_trade(&self, trade_id: &str, result: TradeResult) -> bool {
        match self.registry.resolve(trade_id, result) {
            Some(trade) => {
                self.sink.trade_result_received(trade_id, result);
                self.finish(&trade);
                true
            }
            None => false,
        }
    }

    /// Reports a resolved trade and drops it from the live ledger.
    fn finish(&self, trade: &PendingTrade) {
        info!(
            trade_id = %trade.trade_id,
            pair = %trade.currency_pair,
            level = trade.martingale_level,
            result = ?trade.result,
            "Trade resolved"
        );
        self.registry.remove(&trade.trade_id);
        emit(
            &self.event_tx,
            TradeEvent::Resolved {
                trade: trade.clone(),
            },
        );
    }
}
