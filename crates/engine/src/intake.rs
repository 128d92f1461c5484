use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use common::{DropReason, EngineState, RawSignal, ScheduledTrade, TradeEvent};
use signal::SignalValidator;

use crate::emit;

/// Receives raw signals, validates them and forwards accepted trades to the
/// executor. Drops are logged and reported as events; they never stop the loop.
pub struct SignalIntake {
    validator: SignalValidator,
    engine_state: Arc<RwLock<EngineState>>,
    trade_tx: mpsc::Sender<ScheduledTrade>,
    event_tx: mpsc::Sender<TradeEvent>,
}

impl SignalIntake {
    pub fn new(
        validator: SignalValidator,
        engine_state: Arc<RwLock<EngineState>>,
        trade_tx: mpsc::Sender<ScheduledTrade>,
        event_tx: mpsc::Sender<TradeEvent>,
    ) -> Self {
        Self {
            validator,
            engine_state,
            trade_tx,
            event_tx,
        }
    }

    /// Run the intake loop. Call from `tokio::spawn`.
    pub async fn run(self, mut signal_rx: mpsc::Receiver<RawSignal>) {
        info!("Signal intake running");
        while let Some(raw) = signal_rx.recv().await {
            if let Ok(trade) = self.accept(&raw).await {
                if self.trade_tx.send(trade).await.is_err() {
                    warn!("Executor channel closed, stopping intake");
                    break;
                }
            }
        }
        warn!("Signal intake: signal channel closed");
    }

    /// Validates one signal. On success a `Scheduled` event is emitted,
    /// on failure a `Dropped` one.
    pub async fn accept(&self, raw: &RawSignal) -> Result<ScheduledTrade, DropReason> {
        let outcome = if *self.engine_state.read().await != EngineState::Running {
            Err(DropReason::EngineNotRunning)
        } else {
            self.validator.validate(raw)
        };

        let event = match &outcome {
            Ok(trade) => TradeEvent::Scheduled {
                trade: trade.clone(),
            },
            Err(reason) => {
                match reason {
                    DropReason::EngineNotRunning => {
                        info!(pair = ?raw.currency_pair, "Engine not running, signal ignored")
                    }
                    _ => warn!(pair = ?raw.currency_pair, reason = %reason, "Signal dropped"),
                }
                TradeEvent::Dropped {
                    pair: raw.currency_pair.clone(),
                    reason: reason.clone(),
                }
            }
        };
        emit(&self.event_tx, event);
        outcome
    }
}
