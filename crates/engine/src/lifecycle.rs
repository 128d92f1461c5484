use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use common::{EngineCommand, EngineState};

use crate::dispatcher::ResultDispatcher;

/// Cloneable handle passed to other crates (Telegram, intake, executor).
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Shared state cell, for components that gate work on `Running`.
    pub fn state_cell(&self) -> Arc<RwLock<EngineState>> {
        self.state.clone()
    }

    pub fn command_sender(&self) -> mpsc::Sender<EngineCommand> {
        self.command_tx.clone()
    }
}

/// The main engine: owns the result sweep and processes Start/Stop.
pub struct Engine {
    state: Arc<RwLock<EngineState>>,
    dispatcher: ResultDispatcher,
    command_rx: mpsc::Receiver<EngineCommand>,
    #[allow(dead_code)] // kept to prevent channel close
    command_tx: mpsc::Sender<EngineCommand>,
}

impl Engine {
    pub fn new(dispatcher: ResultDispatcher) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(EngineState::Stopped));

        let handle = EngineHandle {
            command_tx: command_tx.clone(),
            state: state.clone(),
        };

        let engine = Engine {
            state,
            dispatcher,
            command_rx,
            command_tx,
        };

        (engine, handle)
    }

    /// Run the engine. This task drives the sweep and command processing.
    /// Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("Engine initialized in Stopped state. Waiting for Start command.");

        let mut sweep: Option<JoinHandle<()>> = None;

        loop {
            match self.command_rx.recv().await {
                Some(EngineCommand::Start) => {
                    if *self.state.read().await == EngineState::Running {
                        info!("Engine already running");
                        continue;
                    }
                    info!("Engine starting: accepting signals, result sweep on");
                    *self.state.write().await = EngineState::Running;
                    sweep = Some(tokio::spawn(self.dispatcher.clone().run_sweep()));
                }

                Some(EngineCommand::Stop) => {
                    if *self.state.read().await == EngineState::Stopped {
                        info!("Engine already stopped");
                        continue;
                    }
                    info!("Engine stopping: signals ignored, pending legs abandoned");
                    *self.state.write().await = EngineState::Stopped;
                    if let Some(handle) = sweep.take() {
                        handle.abort();
                    }
                }

                None => {
                    warn!("Engine command channel closed, shutting down");
                    break;
                }
            }
        }

        if let Some(handle) = sweep.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use common::{FrameSource, Outcome, OutcomeDetector, ResultSink, Result, TradeResult};
    use image::RgbImage;

    use crate::dispatcher::DispatchConfig;
    use crate::registry::TradeRegistry;

    struct Idle;

    #[async_trait]
    impl FrameSource for Idle {
        async fn capture_frame(&self) -> Result<RgbImage> {
            Ok(RgbImage::new(1, 1))
        }
    }

    impl OutcomeDetector for Idle {
        fn detect(&self, _frame: &RgbImage) -> Option<Outcome> {
            None
        }
    }

    impl ResultSink for Idle {
        fn on_trade_result(&self, _currency_pair: &str, _result: TradeResult) {}
        fn trade_result_received(&self, _trade_id: &str, _result: TradeResult) {}
    }

    async fn wait_for(handle: &EngineHandle, want: EngineState) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while handle.state().await != want {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn start_and_stop_toggle_state() {
        let (event_tx, _events) = mpsc::channel(8);
        let idle = Arc::new(Idle);
        let dispatcher = ResultDispatcher::new(
            Arc::new(TradeRegistry::new()),
            idle.clone(),
            idle.clone(),
            idle,
            event_tx,
            DispatchConfig::default(),
        );
        let (engine, handle) = Engine::new(dispatcher);
        tokio::spawn(engine.run());

        assert_eq!(handle.state().await, EngineState::Stopped);
        handle.send(EngineCommand::Start).await;
        wait_for(&handle, EngineState::Running).await;
        handle.send(EngineCommand::Start).await;
        wait_for(&handle, EngineState::Running).await;

        handle.send(EngineCommand::Stop).await;
        wait_for(&handle, EngineState::Stopped).await;
        assert_eq!(*handle.state_cell().read().await, EngineState::Stopped);
    }
}
