pub mod dispatcher;
pub mod executor;
pub mod http_driver;
pub mod intake;
pub mod journal;
pub mod lifecycle;
pub mod readiness;
pub mod registry;

pub use dispatcher::{DispatchConfig, ResultDispatcher};
pub use executor::{ExecutorConfig, MartingaleBook, TradeExecutor};
pub use http_driver::HttpDriver;
pub use intake::SignalIntake;
pub use journal::{JournalSummary, TradeJournal};
pub use lifecycle::{Engine, EngineHandle};
pub use readiness::{Readiness, ReadinessGate};
pub use registry::TradeRegistry;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use common::TradeEvent;

/// Hands an event to the sink without waiting. A full or closed channel
/// drops the event; trade flow never blocks on a slow consumer.
pub(crate) fn emit(event_tx: &mpsc::Sender<TradeEvent>, event: TradeEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => warn!(?event, "Event channel full, event dropped"),
        Err(TrySendError::Closed(_)) => {}
    }
}
